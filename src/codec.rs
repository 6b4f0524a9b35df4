//! One entry point for the three encodings.

use std::fmt;
use std::str::FromStr;

use tracing::trace;

use crate::datatype::Scalar;
use crate::error::{HaystackError, Result};
use crate::grid::Grid;
use crate::version::Version;
use crate::{csv, json, zinc};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Format {
    #[default]
    Zinc,
    Json,
    Csv,
}

impl Format {
    pub fn mime_type(&self) -> &'static str {
        match self {
            Format::Zinc => "text/zinc",
            Format::Json => "application/json",
            Format::Csv => "text/csv",
        }
    }
    pub fn suffix(&self) -> &'static str {
        match self {
            Format::Zinc => ".zinc",
            Format::Json => ".json",
            Format::Csv => ".csv",
        }
    }
    /// The format of a file, guessed from its name.
    pub fn from_path(path: &str) -> Result<Self> {
        let lower = path.to_ascii_lowercase();
        [Format::Zinc, Format::Json, Format::Csv]
            .into_iter()
            .find(|f| lower.ends_with(f.suffix()))
            .ok_or_else(|| HaystackError::UnsupportedFormat(path.to_string()))
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            Format::Zinc => "zinc",
            Format::Json => "json",
            Format::Csv => "csv",
        };
        write!(f, "{name}")
    }
}

/// Accepts the short names and the MIME types, ignoring parameters such as
/// `; charset=utf-8`.
impl FromStr for Format {
    type Err = HaystackError;
    fn from_str(s: &str) -> Result<Self> {
        let name = s.split(';').next().unwrap_or_default().trim().to_ascii_lowercase();
        match name.as_str() {
            "zinc" | "text/zinc" | "text/plain" => Ok(Format::Zinc),
            "json" | "application/json" => Ok(Format::Json),
            "csv" | "text/csv" => Ok(Format::Csv),
            _ => Err(HaystackError::UnsupportedFormat(s.to_string())),
        }
    }
}

/// Parse grids. With `single`, the whole text is one grid; otherwise Zinc
/// grids are separated by blank lines and JSON grids form an array.
pub fn parse(text: &str, format: Format, single: bool) -> Result<Vec<Grid>> {
    trace!(%format, single, bytes = text.len(), "parsing");
    match (format, single) {
        (Format::Zinc, true) => Ok(vec![zinc::parse_grid(text)?]),
        (Format::Zinc, false) => zinc::parse_grids(text),
        (Format::Json, true) => Ok(vec![json::parse_grid(text)?]),
        (Format::Json, false) => json::parse_grids(text),
        (Format::Csv, _) => Ok(vec![csv::parse_grid(text)?]),
    }
}

/// Parse exactly one grid.
pub fn parse_one(text: &str, format: Format) -> Result<Grid> {
    match format {
        Format::Zinc => zinc::parse_grid(text),
        Format::Json => json::parse_grid(text),
        Format::Csv => csv::parse_grid(text),
    }
}

/// Decode raw bytes before parsing. Only `utf-8` and `latin-1` are known.
pub fn parse_bytes(bytes: &[u8], format: Format, charset: &str) -> Result<Vec<Grid>> {
    let text = match charset.to_ascii_lowercase().as_str() {
        "utf-8" | "utf8" => String::from_utf8(bytes.to_vec())?,
        "latin-1" | "latin1" | "iso-8859-1" => bytes.iter().map(|&b| b as char).collect(),
        other => return Err(HaystackError::UnsupportedFormat(format!("charset {other}"))),
    };
    let text = text.strip_prefix('\u{feff}').unwrap_or(&text);
    parse(text, format, false)
}

pub fn dump(grid: &Grid, format: Format) -> Result<String> {
    match format {
        Format::Zinc => zinc::dump_grid(grid),
        Format::Json => json::dump_grid(grid),
        Format::Csv => csv::dump_grid(grid),
    }
}

/// Several grids in one document. CSV only holds one grid.
pub fn dump_all(grids: &[Grid], format: Format) -> Result<String> {
    match format {
        Format::Zinc => {
            let dumped = grids.iter().map(zinc::dump_grid).collect::<Result<Vec<_>>>()?;
            Ok(dumped.join("\n"))
        }
        Format::Json => json::dump_grids(grids),
        Format::Csv => match grids {
            [grid] => csv::dump_grid(grid),
            _ => Err(HaystackError::UnsupportedOperation(format!(
                "CSV holds one grid, {} were given",
                grids.len()
            ))),
        },
    }
}

pub fn parse_scalar(text: &str, format: Format, version: &Version) -> Result<Scalar> {
    match format {
        Format::Zinc => zinc::parse_scalar(text, version),
        Format::Json => json::parse_scalar(text, version),
        Format::Csv => csv::parse_scalar(text, version),
    }
}

pub fn dump_scalar(value: &Scalar, format: Format, version: &Version) -> Result<String> {
    match format {
        Format::Zinc => zinc::dump_scalar(value, version),
        Format::Json => json::dump_scalar(value, version),
        Format::Csv => csv::dump_scalar(value, version),
    }
}
