//! A least recently used cache, backing the compiled filter cache.

use std::borrow::Borrow;
use std::collections::HashMap;
use std::hash::Hash;

use crate::datatype::OtherHasher;

struct CacheEntry<K, V> {
    key: K,
    value: V,
    prev: Option<usize>,
    next: Option<usize>,
}

/// Entries live in a vector and are chained from most (head) to least
/// (tail) recently used; freed slots are reused.
pub struct LruCache<K, V> {
    capacity: usize,
    map: HashMap<K, usize, OtherHasher>,
    entries: Vec<Option<CacheEntry<K, V>>>,
    free_list: Vec<usize>,
    head: Option<usize>,
    tail: Option<usize>,
}

impl<K: Eq + Hash + Clone, V> LruCache<K, V> {
    pub fn new(capacity: usize) -> Self {
        let mut map = HashMap::with_hasher(OtherHasher::default());
        map.reserve(capacity);
        Self {
            capacity,
            map,
            entries: Vec::with_capacity(capacity),
            free_list: Vec::new(),
            head: None,
            tail: None,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Get a value, marking it as the most recently used.
    pub fn get<Q>(&mut self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let index = *self.map.get(key)?;
        self.move_to_front(index);
        self.entries[index].as_ref().map(|e| &e.value)
    }

    /// Insert a value and return the keys evicted to make room for it.
    pub fn put(&mut self, key: K, value: V) -> Vec<K> {
        if let Some(&index) = self.map.get(&key) {
            if let Some(entry) = &mut self.entries[index] {
                entry.value = value;
            }
            self.move_to_front(index);
            return Vec::new();
        }
        if self.capacity == 0 {
            return vec![key];
        }
        let mut evicted = Vec::new();
        while self.map.len() >= self.capacity {
            match self.evict() {
                Some(old) => evicted.push(old),
                None => break,
            }
        }
        let index = self.allocate_entry(key.clone(), value);
        self.map.insert(key, index);
        self.push_front(index);
        evicted
    }

    pub fn remove<Q>(&mut self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let index = self.map.remove(key)?;
        self.unlink(index);
        let entry = self.entries[index].take();
        self.free_list.push(index);
        entry.map(|e| e.value)
    }

    pub fn contains<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.map.contains_key(key)
    }
    pub fn len(&self) -> usize {
        self.map.len()
    }
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn clear(&mut self) {
        self.map.clear();
        self.entries.clear();
        self.free_list.clear();
        self.head = None;
        self.tail = None;
    }

    /// Change the capacity, dropping the least recently used entries that no
    /// longer fit. Returns the evicted keys.
    pub fn set_capacity(&mut self, capacity: usize) -> Vec<K> {
        self.capacity = capacity;
        let mut evicted = Vec::new();
        while self.map.len() > capacity {
            match self.evict() {
                Some(old) => evicted.push(old),
                None => break,
            }
        }
        evicted
    }

    /// Keys from the most to the least recently used.
    pub fn keys(&self) -> Vec<&K> {
        let mut keys = Vec::with_capacity(self.map.len());
        let mut cursor = self.head;
        while let Some(index) = cursor {
            match &self.entries[index] {
                Some(entry) => {
                    keys.push(&entry.key);
                    cursor = entry.next;
                }
                None => break,
            }
        }
        keys
    }

    fn allocate_entry(&mut self, key: K, value: V) -> usize {
        let entry = Some(CacheEntry { key, value, prev: None, next: None });
        if let Some(index) = self.free_list.pop() {
            self.entries[index] = entry;
            index
        } else {
            self.entries.push(entry);
            self.entries.len() - 1
        }
    }

    fn push_front(&mut self, index: usize) {
        if let Some(entry) = &mut self.entries[index] {
            entry.prev = None;
            entry.next = self.head;
        }
        if let Some(old_head) = self.head {
            if let Some(entry) = &mut self.entries[old_head] {
                entry.prev = Some(index);
            }
        }
        self.head = Some(index);
        if self.tail.is_none() {
            self.tail = Some(index);
        }
    }

    fn unlink(&mut self, index: usize) {
        let Some((prev, next)) = self.entries[index].as_ref().map(|e| (e.prev, e.next)) else {
            return;
        };
        match prev {
            Some(p) => {
                if let Some(entry) = &mut self.entries[p] {
                    entry.next = next;
                }
            }
            None => self.head = next,
        }
        match next {
            Some(n) => {
                if let Some(entry) = &mut self.entries[n] {
                    entry.prev = prev;
                }
            }
            None => self.tail = prev,
        }
    }

    fn move_to_front(&mut self, index: usize) {
        if self.head == Some(index) {
            return;
        }
        self.unlink(index);
        self.push_front(index);
    }

    fn evict(&mut self) -> Option<K> {
        let tail = self.tail?;
        let key = self.entries[tail].as_ref()?.key.clone();
        self.remove(&key);
        Some(key)
    }
}
