//! The grid: versioned metadata, ordered columns and ordered rows.
//!
//! Rows are plain [`Entity`] maps and may carry tags that are not declared
//! as columns. Rows holding an `id` Ref are reachable through a lazily built
//! index; every mutator that can move or change a row drops the index in the
//! same `&mut self` call, and the next lookup rebuilds it.
//!
//! A grid created without a version starts as Haystack 2.0 and upgrades
//! itself to 3.0 the first time it receives a 3.0-only value (NA, list,
//! dict, nested grid). A grid with a pinned version refuses such values.

use std::collections::HashMap;
use std::ops::{Bound, Index, RangeBounds};
use std::sync::OnceLock;

use crate::datatype::{entity_approx_eq, Entity, OtherHasher, Ref, Scalar};
use crate::error::{HaystackError, Result};
use crate::grid_filter::{filter_function, FilterCache, Predicate};
use crate::metadata::{Metadata, Position};
use crate::version::Version;

/// Column name to per-column metadata, in display order.
pub type Columns = Metadata<Metadata>;

#[derive(Debug, Clone)]
pub struct Grid {
    version: Version,
    version_pinned: bool,
    metadata: Metadata,
    columns: Columns,
    rows: Vec<Entity>,
    index: OnceLock<HashMap<String, usize, OtherHasher>>,
}

impl Default for Grid {
    fn default() -> Self {
        Self::new()
    }
}

impl Grid {
    /// An empty grid whose version is inferred from its content.
    pub fn new() -> Self {
        Self {
            version: Version::v2(),
            version_pinned: false,
            metadata: Metadata::new(),
            columns: Columns::new(),
            rows: Vec::new(),
            index: OnceLock::new(),
        }
    }
    /// An empty grid pinned to a version.
    pub fn with_version(version: Version) -> Self {
        Self { version, version_pinned: true, ..Self::new() }
    }
    /// An empty grid with the same version, metadata and columns.
    pub fn empty_like(&self) -> Self {
        Self {
            version: self.version.clone(),
            version_pinned: self.version_pinned,
            metadata: self.metadata.clone(),
            columns: self.columns.clone(),
            rows: Vec::new(),
            index: OnceLock::new(),
        }
    }

    /// Assemble a grid without checking its values against the version.
    pub(crate) fn from_parts(
        version: Version,
        version_pinned: bool,
        metadata: Metadata,
        columns: Columns,
        rows: Vec<Entity>,
    ) -> Self {
        Self { version, version_pinned, metadata, columns, rows, index: OnceLock::new() }
    }

    // ------------- Version -------------
    pub fn version(&self) -> &Version {
        &self.version
    }
    pub fn nearest_version(&self) -> Version {
        self.version.nearest()
    }
    pub fn is_version_pinned(&self) -> bool {
        self.version_pinned
    }
    pub fn set_version(&mut self, version: Version, pinned: bool) {
        self.version = version;
        self.version_pinned = pinned;
    }

    /// Check that a value fits the grid's version, upgrading an inferred one.
    fn detect_or_validate(&mut self, value: &Scalar) -> Result<()> {
        if let Some(required) = value.required_version() {
            if self.version < required {
                if self.version_pinned {
                    return Err(HaystackError::feature_gate(value.kind(), &self.version));
                }
                self.version = required;
            }
        }
        Ok(())
    }
    fn detect_or_validate_entity(&mut self, entity: &Entity) -> Result<()> {
        entity.values().try_for_each(|v| self.detect_or_validate(v))
    }
    fn detect_or_validate_meta(&mut self, meta: &Metadata) -> Result<()> {
        meta.values().try_for_each(|v| self.detect_or_validate(v))
    }

    // ------------- Metadata -------------
    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }
    pub fn set_meta(&mut self, key: &str, value: Scalar) -> Result<()> {
        self.detect_or_validate(&value)?;
        self.metadata.insert(key, value);
        Ok(())
    }
    pub fn remove_meta(&mut self, key: &str) -> Option<Scalar> {
        self.metadata.remove(key)
    }
    pub fn set_metadata(&mut self, metadata: Metadata) -> Result<()> {
        self.detect_or_validate_meta(&metadata)?;
        self.metadata = metadata;
        Ok(())
    }

    // ------------- Columns -------------
    pub fn columns(&self) -> &Columns {
        &self.columns
    }
    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.keys()
    }
    pub fn has_column(&self, name: &str) -> bool {
        self.columns.contains_key(name)
    }
    pub fn add_column(&mut self, name: &str, meta: Metadata) -> Result<()> {
        self.detect_or_validate_meta(&meta)?;
        self.columns.add_item(name, meta, Position::End, false)
    }
    pub fn add_column_at(&mut self, name: &str, meta: Metadata, position: Position<'_>) -> Result<()> {
        self.detect_or_validate_meta(&meta)?;
        self.columns.add_item(name, meta, position, false)
    }
    pub fn set_column_meta(&mut self, column: &str, key: &str, value: Scalar) -> Result<()> {
        self.detect_or_validate(&value)?;
        let meta = self
            .columns
            .get_mut(column)
            .ok_or_else(|| HaystackError::KeyNotFound(column.to_string()))?;
        meta.insert(key, value);
        Ok(())
    }
    pub fn remove_column(&mut self, name: &str) -> Option<Metadata> {
        self.columns.remove(name)
    }
    pub fn set_columns(&mut self, columns: Columns) -> Result<()> {
        for meta in columns.values() {
            self.detect_or_validate_meta(meta)?;
        }
        self.columns = columns;
        Ok(())
    }

    // ------------- Rows -------------
    pub fn len(&self) -> usize {
        self.rows.len()
    }
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
    pub fn rows(&self) -> &[Entity] {
        &self.rows
    }
    pub fn iter(&self) -> std::slice::Iter<'_, Entity> {
        self.rows.iter()
    }
    pub fn row(&self, index: usize) -> Option<&Entity> {
        self.rows.get(index)
    }
    /// Mutable access to a row. The id index is dropped since the row's id
    /// may change through the returned reference.
    pub fn row_mut(&mut self, index: usize) -> Option<&mut Entity> {
        self.index.take();
        self.rows.get_mut(index)
    }
    pub fn append(&mut self, row: Entity) -> Result<()> {
        self.detect_or_validate_entity(&row)?;
        if let (Some(map), Some(id)) = (self.index.get_mut(), row_id(&row)) {
            map.insert(id.to_string(), self.rows.len());
        }
        self.rows.push(row);
        Ok(())
    }
    pub fn insert(&mut self, index: usize, row: Entity) -> Result<()> {
        if index > self.rows.len() {
            return Err(HaystackError::InvalidValue(format!("row index {index} out of range")));
        }
        self.detect_or_validate_entity(&row)?;
        self.index.take();
        self.rows.insert(index, row);
        Ok(())
    }
    pub fn extend<I: IntoIterator<Item = Entity>>(&mut self, rows: I) -> Result<()> {
        rows.into_iter().try_for_each(|row| self.append(row))
    }
    /// Replace the row at `index`.
    pub fn set(&mut self, index: usize, row: Entity) -> Result<()> {
        if index >= self.rows.len() {
            return Err(HaystackError::InvalidValue(format!("row index {index} out of range")));
        }
        self.detect_or_validate_entity(&row)?;
        self.index.take();
        self.rows[index] = row;
        Ok(())
    }
    pub fn pop(&mut self, index: usize) -> Option<Entity> {
        if index >= self.rows.len() {
            return None;
        }
        self.index.take();
        Some(self.rows.remove(index))
    }
    pub fn pop_by_id(&mut self, id: &Ref) -> Option<Entity> {
        let index = self.position_of(id)?;
        self.pop(index)
    }
    pub fn clear_rows(&mut self) {
        self.index.take();
        self.rows.clear();
    }

    // ------------- Id index -------------
    fn id_index(&self) -> &HashMap<String, usize, OtherHasher> {
        self.index.get_or_init(|| {
            let mut map = HashMap::<String, usize, OtherHasher>::default();
            for (i, row) in self.rows.iter().enumerate() {
                if let Some(id) = row_id(row) {
                    map.insert(id.to_string(), i);
                }
            }
            map
        })
    }
    /// Force the id index to be rebuilt on next lookup.
    pub fn reindex(&mut self) {
        self.index.take();
    }
    pub fn position_of(&self, id: &Ref) -> Option<usize> {
        self.id_index().get(&id.name).copied()
    }
    pub fn contains_id(&self, id: &Ref) -> bool {
        self.position_of(id).is_some()
    }
    pub fn get_by_id(&self, id: &Ref) -> Option<&Entity> {
        self.position_of(id).map(|i| &self.rows[i])
    }
    pub fn get_by_id_mut(&mut self, id: &Ref) -> Option<&mut Entity> {
        let index = self.position_of(id)?;
        self.row_mut(index)
    }
    pub fn ids(&self) -> impl Iterator<Item = &Ref> {
        self.rows.iter().filter_map(|row| row.get("id").and_then(Scalar::as_reference))
    }

    // ------------- Derived grids -------------
    /// A grid with the same version, metadata and columns and a range of rows.
    pub fn slice<R: RangeBounds<usize>>(&self, range: R) -> Grid {
        let len = self.rows.len();
        let start = match range.start_bound() {
            Bound::Included(&s) => s,
            Bound::Excluded(&s) => s + 1,
            Bound::Unbounded => 0,
        }
        .min(len);
        let end = match range.end_bound() {
            Bound::Included(&e) => e + 1,
            Bound::Excluded(&e) => e,
            Bound::Unbounded => len,
        }
        .clamp(start, len);
        let mut result = self.empty_like();
        result.rows = self.rows[start..end].to_vec();
        result
    }

    /// Rows matching a filter expression, stopping after `limit` matches.
    /// An empty expression keeps every row.
    pub fn filter(&self, expr: &str, limit: Option<usize>) -> Result<Grid> {
        if expr.trim().is_empty() {
            return Ok(self.take(limit));
        }
        let predicate = filter_function(expr)?;
        Ok(self.filter_with(&predicate, limit))
    }
    /// Like [`Grid::filter`], reusing compiled filters from `cache`.
    pub fn filter_cached(&self, cache: &FilterCache, expr: &str, limit: Option<usize>) -> Result<Grid> {
        if expr.trim().is_empty() {
            return Ok(self.take(limit));
        }
        let predicate = cache.get_or_compile(expr)?;
        Ok(self.filter_with(&predicate, limit))
    }
    pub fn filter_with(&self, predicate: &Predicate, limit: Option<usize>) -> Grid {
        let mut result = self.empty_like();
        for row in self.rows.iter() {
            if limit.is_some_and(|l| result.rows.len() >= l) {
                break;
            }
            if predicate(self, row) {
                result.rows.push(row.clone());
            }
        }
        result
    }
    fn take(&self, limit: Option<usize>) -> Grid {
        match limit {
            Some(l) => self.slice(..l),
            None => self.clone(),
        }
    }

    /// Keep (`"a,b"`) or drop (`"!a,!b"`) columns. Rows are left untouched,
    /// see [`Grid::purge`]. `""` and `"*"` keep everything.
    pub fn select(&self, selection: &str) -> Result<Grid> {
        let selection = selection.trim();
        if selection.is_empty() || selection == "*" {
            return Ok(self.clone());
        }
        let names: Vec<&str> = selection
            .split([',', ' '])
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect();
        let negative = names.iter().filter(|n| n.starts_with('!')).count();
        if negative != 0 && negative != names.len() {
            return Err(HaystackError::InvalidValue(
                "Impossible to merge positive and negative selection".to_string(),
            ));
        }
        let mut result = self.clone();
        if negative > 0 {
            for name in names {
                result.columns.remove(&name[1..]);
            }
        } else {
            let mut columns = Columns::new();
            for name in names {
                columns.insert(name, self.columns.get(name).cloned().unwrap_or_default());
            }
            result.columns = columns;
        }
        Ok(result)
    }

    /// Drop the tags of every row that are not declared as columns.
    pub fn purge(&self) -> Grid {
        let mut result = self.empty_like();
        result.rows = self
            .rows
            .iter()
            .map(|row| {
                row.iter()
                    .filter(|(k, _)| self.columns.contains_key(k))
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect()
            })
            .collect();
        result
    }

    /// Drop the columns no row has a value for.
    pub fn pack_columns(&mut self) {
        let rows = &self.rows;
        self.columns.retain(|name, _| rows.iter().any(|row| row.contains_key(name)));
    }

    /// Declare a column for every tag used by a row.
    pub fn extend_columns(&mut self) {
        for row in self.rows.iter() {
            for key in row.keys() {
                if !self.columns.contains_key(key) {
                    self.columns.insert(key, Metadata::new());
                }
            }
        }
    }

    /// Sort the rows by the value of a tag. Rows without it come first.
    pub fn sort_by_tag(&mut self, tag: &str) {
        self.index.take();
        self.rows.sort_by(|a, b| match (a.get(tag), b.get(tag)) {
            (Some(x), Some(y)) => x.sort_cmp(y),
            (None, Some(_)) => std::cmp::Ordering::Less,
            (Some(_), None) => std::cmp::Ordering::Greater,
            (None, None) => std::cmp::Ordering::Equal,
        });
    }

    /// Compare with tolerance: metadata and columns by key, rows with an id by
    /// id, rows without one by value, in any order. The version is ignored.
    pub fn approx_eq(&self, other: &Grid) -> bool {
        if !meta_approx_eq(&self.metadata, &other.metadata) {
            return false;
        }
        if self.columns.len() != other.columns.len() {
            return false;
        }
        for (name, meta) in self.columns.iter() {
            match other.columns.get(name) {
                Some(other_meta) if meta_approx_eq(meta, other_meta) => {}
                _ => return false,
            }
        }
        if self.rows.len() != other.rows.len() {
            return false;
        }
        let mut pending: Vec<&Entity> = other.rows.iter().filter(|r| row_id(r).is_none()).collect();
        for left in self.rows.iter() {
            let found = match left.get("id").and_then(Scalar::as_reference) {
                Some(id) => other.get_by_id(id).is_some_and(|right| entity_approx_eq(left, right)),
                None => match pending.iter().position(|right| entity_approx_eq(left, right)) {
                    Some(pos) => {
                        pending.remove(pos);
                        true
                    }
                    None => false,
                },
            };
            if !found {
                return false;
            }
        }
        true
    }
}

fn row_id(row: &Entity) -> Option<&str> {
    match row.get("id") {
        Some(Scalar::Ref(r)) => Some(r.name.as_str()),
        _ => None,
    }
}

fn meta_approx_eq(left: &Metadata, right: &Metadata) -> bool {
    left.len() == right.len()
        && left
            .iter()
            .all(|(k, v)| right.get(k).is_some_and(|other| v.approx_eq(other)))
}

impl PartialEq for Grid {
    fn eq(&self, other: &Self) -> bool {
        self.approx_eq(other)
    }
}

impl Index<usize> for Grid {
    type Output = Entity;
    fn index(&self, index: usize) -> &Entity {
        &self.rows[index]
    }
}

impl Index<&Ref> for Grid {
    type Output = Entity;
    fn index(&self, id: &Ref) -> &Entity {
        match self.get_by_id(id) {
            Some(row) => row,
            None => panic!("no row with id @{}", id.name),
        }
    }
}

impl<'a> IntoIterator for &'a Grid {
    type Item = &'a Entity;
    type IntoIter = std::slice::Iter<'a, Entity>;
    fn into_iter(self) -> Self::IntoIter {
        self.rows.iter()
    }
}
