//! Differences between two grids, and their application.
//!
//! A diff is a grid marked with `diff_`. Its metadata and column metadata
//! hold the changed or added entries, with [`Scalar::Remove`] for deleted
//! ones; a deleted column carries a `remove_` entry. A row with an `id`
//! holds the changed tags of that entity, or `remove_` when the entity is
//! gone. A row without `id` is either added as is or, with `remove_`, names
//! by value the row to delete.
//!
//! For any two grids, `merge(left.clone(), &diff(&left, &right))` equals
//! `right`.

use tracing::debug;

use crate::datatype::{entity_approx_eq, Entity, Ref, Scalar};
use crate::error::Result;
use crate::grid::{Columns, Grid};
use crate::metadata::Metadata;

/// Metadata key marking a grid as a diff.
pub const DIFF_MARKER: &str = "diff_";
/// Tag of a deleted row, and metadata key of a deleted column.
pub const REMOVE_TAG: &str = "remove_";

pub fn is_diff(grid: &Grid) -> bool {
    grid.metadata().contains_key(DIFF_MARKER)
}

/// The changes turning `left` into `right`.
pub fn diff(left: &Grid, right: &Grid) -> Grid {
    let mut metadata = Metadata::new();
    metadata.insert(DIFF_MARKER, Scalar::Marker);
    for (key, value) in diff_meta(left.metadata(), right.metadata()).into_iter() {
        metadata.insert(&key, value);
    }

    let mut columns = Columns::new();
    for (name, meta) in right.columns().iter() {
        let changes = match left.columns().get(name) {
            Some(old) => diff_meta(old, meta),
            None => meta.clone(),
        };
        columns.insert(name, changes);
    }
    for name in left.column_names() {
        if !right.has_column(name) {
            let mut removed = Metadata::new();
            removed.insert(REMOVE_TAG, Scalar::Remove);
            columns.insert(name, removed);
        }
    }

    let mut rows = Vec::new();
    let mut consumed = vec![false; right.len()];
    for left_row in left.iter() {
        match left_row.get("id").and_then(Scalar::as_reference) {
            Some(id) => match right.position_of(id) {
                Some(pos) => {
                    consumed[pos] = true;
                    let changes = diff_entity(left_row, &right[pos]);
                    if !changes.is_empty() {
                        let mut row = changes;
                        row.insert("id".to_string(), Scalar::Ref(id.clone()));
                        rows.push(row);
                    }
                }
                None => {
                    let mut row = Entity::new();
                    row.insert("id".to_string(), Scalar::Ref(id.clone()));
                    row.insert(REMOVE_TAG.to_string(), Scalar::Remove);
                    rows.push(row);
                }
            },
            None => {
                // each right row stands for at most one left row
                let found = right.iter().enumerate().position(|(pos, right_row)| {
                    !consumed[pos] && !right_row.contains_key("id") && entity_approx_eq(left_row, right_row)
                });
                match found {
                    Some(pos) => consumed[pos] = true,
                    None => {
                        let mut row = left_row.clone();
                        row.insert(REMOVE_TAG.to_string(), Scalar::Remove);
                        rows.push(row);
                    }
                }
            }
        }
    }
    for (pos, right_row) in right.iter().enumerate() {
        if !consumed[pos] {
            rows.push(right_row.clone());
        }
    }
    if rows.iter().any(|row| row.contains_key(REMOVE_TAG)) && !columns.contains_key(REMOVE_TAG) {
        columns.insert(REMOVE_TAG, Metadata::new());
    }

    // the rows of a diff may hold the values of `left`, which passed its own checks
    let result = Grid::from_parts(right.version().clone(), right.is_version_pinned(), metadata, columns, rows);
    debug!(rows = result.len(), "computed grid diff");
    result
}

/// Apply a diff to `base`. The result takes the version of the diff.
pub fn merge(mut base: Grid, diff: &Grid) -> Result<Grid> {
    base.set_version(diff.version().clone(), diff.is_version_pinned());

    let mut metadata = base.metadata().clone();
    for (key, value) in diff.metadata().iter() {
        if key == DIFF_MARKER {
            continue;
        }
        match value {
            Scalar::Remove => {
                metadata.remove(key);
            }
            _ => metadata.insert(key, value.clone()),
        }
    }
    base.set_metadata(metadata)?;

    let mut columns = Columns::new();
    for (name, changes) in diff.columns().iter() {
        if name == REMOVE_TAG || changes.contains_key(REMOVE_TAG) {
            continue;
        }
        let mut meta = base.columns().get(name).cloned().unwrap_or_default();
        for (key, value) in changes.iter() {
            match value {
                Scalar::Remove => {
                    meta.remove(key);
                }
                _ => meta.insert(key, value.clone()),
            }
        }
        columns.insert(name, meta);
    }
    base.set_columns(columns)?;

    for diff_row in diff.iter() {
        let removed = diff_row.contains_key(REMOVE_TAG);
        match diff_row.get("id").and_then(Scalar::as_reference) {
            Some(id) if base.contains_id(id) => {
                if removed {
                    base.pop_by_id(id);
                } else {
                    apply_changes(&mut base, id, diff_row)?;
                }
            }
            Some(_) if removed => {}
            Some(_) => base.append(diff_row.clone())?,
            None if removed => {
                let mut wanted = diff_row.clone();
                wanted.shift_remove(REMOVE_TAG);
                if let Some(pos) = base.iter().position(|row| entity_approx_eq(row, &wanted)) {
                    base.pop(pos);
                }
            }
            None => base.append(diff_row.clone())?,
        }
    }
    debug!(rows = base.len(), "merged grid diff");
    Ok(base)
}

fn apply_changes(base: &mut Grid, id: &Ref, changes: &Entity) -> Result<()> {
    let mut row = match base.get_by_id(id) {
        Some(row) => row.clone(),
        None => return Ok(()),
    };
    for (key, value) in changes.iter() {
        match value {
            Scalar::Remove => {
                row.shift_remove(key);
            }
            _ => {
                row.insert(key.clone(), value.clone());
            }
        }
    }
    match base.position_of(id) {
        Some(pos) => base.set(pos, row),
        None => Ok(()),
    }
}

fn diff_meta(left: &Metadata, right: &Metadata) -> Metadata {
    let mut changes = Metadata::new();
    for (key, value) in right.iter() {
        if !left.get(key).is_some_and(|old| old.approx_eq(value)) {
            changes.insert(key, value.clone());
        }
    }
    for key in left.keys() {
        if !right.contains_key(key) {
            changes.insert(key, Scalar::Remove);
        }
    }
    changes
}

fn diff_entity(left: &Entity, right: &Entity) -> Entity {
    let mut changes = Entity::new();
    for (key, value) in right.iter() {
        if !left.get(key).is_some_and(|old| old.approx_eq(value)) {
            changes.insert(key.clone(), value.clone());
        }
    }
    for key in left.keys() {
        if !right.contains_key(key) {
            changes.insert(key.clone(), Scalar::Remove);
        }
    }
    changes
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entity(tags: &[(&str, Scalar)]) -> Entity {
        tags.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn unchanged_tags_are_left_out() {
        let mut left = Grid::new();
        left.add_column("id", Metadata::new()).unwrap();
        left.add_column("dis", Metadata::new()).unwrap();
        left.append(entity(&[("id", Scalar::Ref(Ref::new("a"))), ("dis", Scalar::str("A"))])).unwrap();
        let mut right = left.clone();
        right.row_mut(0).unwrap().insert("area".to_string(), Scalar::number(12.0));

        let changes = diff(&left, &right);
        assert!(is_diff(&changes));
        assert_eq!(changes.len(), 1);
        assert!(!changes[0].contains_key("dis"));
        assert_eq!(changes[0]["area"], Scalar::number(12.0));
    }

    #[test]
    fn duplicate_rows_without_id() {
        let row = entity(&[("dis", Scalar::str("same"))]);
        let mut left = Grid::new();
        left.add_column("dis", Metadata::new()).unwrap();
        left.extend([row.clone(), row.clone()]).unwrap();
        let right = left.slice(..1);

        let changes = diff(&left, &right);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0][REMOVE_TAG], Scalar::Remove);
        assert_eq!(merge(left, &changes).unwrap(), right);
    }
}
