//! An insertion-ordered map for grid and column metadata.
//!
//! Keys keep the order they were added in unless explicitly moved. The
//! container is generic so that a grid's columns can be a `Metadata` of
//! per-column `Metadata`.

use std::fmt;

use crate::datatype::Scalar;
use crate::error::{HaystackError, Result};

/// Where [`Metadata::add_item`] places a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Position<'a> {
    /// Before the first key.
    Start,
    /// After the last key, or where the key already is when replacing.
    End,
    /// At this index, shifting the following keys.
    Index(usize),
    Before(&'a str),
    After(&'a str),
}

#[derive(Clone, PartialEq)]
pub struct Metadata<V = Scalar> {
    items: Vec<(String, V)>,
}

impl<V> Default for Metadata<V> {
    fn default() -> Self {
        Self { items: Vec::new() }
    }
}

impl<V> Metadata<V> {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn len(&self) -> usize {
        self.items.len()
    }
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
    pub fn index_of(&self, key: &str) -> Option<usize> {
        self.items.iter().position(|(k, _)| k == key)
    }
    pub fn contains_key(&self, key: &str) -> bool {
        self.index_of(key).is_some()
    }
    pub fn get(&self, key: &str) -> Option<&V> {
        self.items.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }
    pub fn get_mut(&mut self, key: &str) -> Option<&mut V> {
        self.items.iter_mut().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Set a key, replacing the value in place if it already exists.
    pub fn insert(&mut self, key: &str, value: V) {
        match self.get_mut(key) {
            Some(slot) => *slot = value,
            None => self.items.push((key.to_string(), value)),
        }
    }

    /// Add a key at a position. An existing key is refused unless `replace`
    /// is set; when replacing, the key only moves if a position is given.
    pub fn add_item(&mut self, key: &str, value: V, position: Position<'_>, replace: bool) -> Result<()> {
        let mut index = match position {
            Position::End => None,
            Position::Start => Some(0),
            Position::Index(i) => Some(i),
            Position::Before(anchor) => Some(self.anchor(anchor)?),
            Position::After(anchor) => Some(self.anchor(anchor)? + 1),
        };
        if let Some(existing) = self.index_of(key) {
            if !replace {
                return Err(HaystackError::DuplicateKey(key.to_string()));
            }
            match index {
                None => {
                    self.items[existing].1 = value;
                    return Ok(());
                }
                Some(i) => {
                    self.items.remove(existing);
                    if existing < i {
                        index = Some(i - 1);
                    }
                }
            }
        }
        match index {
            Some(i) => self.items.insert(i.min(self.items.len()), (key.to_string(), value)),
            None => self.items.push((key.to_string(), value)),
        }
        Ok(())
    }

    fn anchor(&self, key: &str) -> Result<usize> {
        self.index_of(key).ok_or_else(|| HaystackError::KeyNotFound(key.to_string()))
    }

    pub fn remove(&mut self, key: &str) -> Option<V> {
        let index = self.index_of(key)?;
        Some(self.items.remove(index).1)
    }
    pub fn at(&self, index: usize) -> Option<&str> {
        self.items.get(index).map(|(k, _)| k.as_str())
    }
    pub fn value_at(&self, index: usize) -> Option<&V> {
        self.items.get(index).map(|(_, v)| v)
    }
    pub fn pop_at(&mut self, index: usize) -> Option<(String, V)> {
        (index < self.items.len()).then(|| self.items.remove(index))
    }
    pub fn reverse(&mut self) {
        self.items.reverse();
    }
    pub fn sort_keys(&mut self) {
        self.items.sort_by(|(a, _), (b, _)| a.cmp(b));
    }
    pub fn sort_by<F>(&mut self, mut compare: F)
    where
        F: FnMut(&str, &str) -> std::cmp::Ordering,
    {
        self.items.sort_by(|(a, _), (b, _)| compare(a, b));
    }
    pub fn retain<F>(&mut self, mut keep: F)
    where
        F: FnMut(&str, &V) -> bool,
    {
        self.items.retain(|(k, v)| keep(k, v));
    }
    pub fn clear(&mut self) {
        self.items.clear();
    }
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.items.iter().map(|(k, _)| k.as_str())
    }
    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.items.iter().map(|(_, v)| v)
    }
    pub fn iter(&self) -> impl Iterator<Item = (&str, &V)> {
        self.items.iter().map(|(k, v)| (k.as_str(), v))
    }
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&str, &mut V)> {
        self.items.iter_mut().map(|(k, v)| (k.as_str(), v))
    }
}

impl<V, K: Into<String>> FromIterator<(K, V)> for Metadata<V> {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut meta = Metadata::new();
        for (k, v) in iter {
            let k: String = k.into();
            meta.insert(&k, v);
        }
        meta
    }
}

impl<V> IntoIterator for Metadata<V> {
    type Item = (String, V);
    type IntoIter = std::vec::IntoIter<(String, V)>;
    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}

impl<V: fmt::Debug> fmt::Debug for Metadata<V> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_map().entries(self.items.iter().map(|(k, v)| (k, v))).finish()
    }
}
