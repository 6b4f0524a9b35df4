//! The CSV rendition of a grid, meant for spreadsheets.
//!
//! The first record holds the column names, the following ones the rows.
//! Grid and column metadata are not written. Cells use a lighter syntax than
//! Zinc where spreadsheets expect one (`✓` for markers, `true`/`false`,
//! plain ISO datetimes) and the Zinc syntax otherwise. An empty cell is a
//! missing tag, `N` is an explicit null.

use crate::datatype::{Entity, Ref, Scalar};
use crate::error::{HaystackError, Result};
use crate::grid::Grid;
use crate::metadata::Metadata;
use crate::version::Version;
use crate::zinc;

const CHECK_MARK: &str = "\u{2713}";

/// The text of a cell before CSV quoting.
#[derive(Debug, Clone, PartialEq)]
enum Cell {
    Empty,
    Value(String),
}

impl Cell {
    fn as_str(&self) -> &str {
        match self {
            Cell::Empty => "",
            Cell::Value(text) => text,
        }
    }
}

// ------------- Reading -------------

/// Parse a CSV document. The grid is always Haystack 3.0.
pub fn parse_grid(text: &str) -> Result<Grid> {
    let mut reader = ::csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(text.as_bytes());
    let names: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
    let mut grid = Grid::with_version(Version::v3());
    for name in names.iter() {
        grid.add_column(name, Metadata::new())?;
    }
    for record in reader.records() {
        let record = record?;
        let mut row = Entity::new();
        for (name, field) in names.iter().zip(record.iter()) {
            if let Some(value) = parse_cell(field) {
                row.insert(name.clone(), value);
            }
        }
        grid.append(row)?;
    }
    Ok(grid)
}

/// One cell, `None` when empty.
pub fn parse_cell(text: &str) -> Option<Scalar> {
    match text {
        "" => None,
        CHECK_MARK => Some(Scalar::Marker),
        "true" => Some(Scalar::Bool(true)),
        "false" => Some(Scalar::Bool(false)),
        _ if text.starts_with('@') => {
            let (name, display) = match text[1..].split_once(' ') {
                Some((name, display)) => (name, Some(display.to_string())),
                None => (&text[1..], None),
            };
            Some(Scalar::Ref(Ref { name: name.to_string(), display }))
        }
        _ => Some(zinc::parse_scalar(text, &Version::v3()).unwrap_or_else(|_| Scalar::str(text))),
    }
}

/// One cell as a scalar, an empty cell being a null. Values above `version`
/// are refused.
pub fn parse_scalar(text: &str, version: &Version) -> Result<Scalar> {
    let value = parse_cell(text).unwrap_or(Scalar::Null);
    match value.required_version() {
        Some(required) if required > *version => Err(HaystackError::feature_gate(value.kind(), version)),
        _ => Ok(value),
    }
}

// ------------- Writing -------------

pub fn dump_grid(grid: &Grid) -> Result<String> {
    let mut writer = ::csv::WriterBuilder::new()
        .terminator(::csv::Terminator::Any(b'\n'))
        .from_writer(Vec::new());
    if !grid.columns().is_empty() {
        writer.write_record(grid.column_names())?;
    }
    let version = grid.version();
    for row in grid.iter() {
        let cells = grid
            .column_names()
            .map(|name| match row.get(name) {
                Some(value) => dump_scalar(value, version).map(Cell::Value),
                None => Ok(Cell::Empty),
            })
            .collect::<Result<Vec<_>>>()?;
        writer.write_record(cells.iter().map(Cell::as_str))?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|e| HaystackError::InvalidValue(e.to_string()))?;
    Ok(String::from_utf8(bytes)?)
}

/// The text of a cell, before CSV quoting.
pub fn dump_scalar(value: &Scalar, version: &Version) -> Result<String> {
    Ok(match value {
        Scalar::Marker => CHECK_MARK.to_string(),
        Scalar::Bool(b) => b.to_string(),
        Scalar::Str(s) if is_ambiguous(s) => zinc::quote(s),
        Scalar::Str(s) => s.clone(),
        Scalar::Ref(r) => match &r.display {
            Some(display) => format!("@{} {display}", r.name),
            None => format!("@{}", r.name),
        },
        Scalar::Date(d) => d.format("%Y-%m-%d").to_string(),
        Scalar::DateTime(dt) => dt.to_rfc3339(),
        _ => zinc::dump_scalar(value, version)?,
    })
}

/// Whether a raw string would be read back as something else.
fn is_ambiguous(s: &str) -> bool {
    parse_cell(s).is_none_or(|parsed| parsed != Scalar::str(s))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cells() {
        assert_eq!(parse_cell(""), None);
        assert_eq!(parse_cell("✓"), Some(Scalar::Marker));
        assert_eq!(parse_cell("N"), Some(Scalar::Null));
        assert_eq!(parse_cell("12kW"), Some(Scalar::quantity(12.0, "kW")));
        assert_eq!(parse_cell("@p:demo:r:1 Site A"), Some(Scalar::Ref(Ref::with_display("p:demo:r:1", "Site A"))));
        assert_eq!(parse_cell("hello world"), Some(Scalar::str("hello world")));
    }

    #[test]
    fn ambiguous_strings_are_quoted() {
        let v3 = Version::v3();
        assert_eq!(dump_scalar(&Scalar::str("12"), &v3).unwrap(), "\"12\"");
        assert_eq!(dump_scalar(&Scalar::str("true"), &v3).unwrap(), "\"true\"");
        assert_eq!(dump_scalar(&Scalar::str(""), &v3).unwrap(), "\"\"");
        assert_eq!(dump_scalar(&Scalar::str("plain text"), &v3).unwrap(), "plain text");
    }
}
