//! Zinc, the native text encoding of Haystack grids.
//!
//! Reading is done in two steps: the `ver:"X.Y"` header is read first to
//! pick the dialect (the nearest official version), then the whole text is
//! parsed with the pest grammar in `zinc.pest` and the parse tree is turned
//! into a [`Grid`]. The grammar is a superset of every dialect, and the
//! builder refuses the Haystack 3.0 constructs when the dialect is older.

// used to parse the Zinc and filter grammars
use pest::error::LineColLocation;
use pest::iterators::Pair;
use pest::Parser;
use pest_derive::Parser;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, SecondsFormat, TimeZone};
use chrono_tz::Tz;

// used to find the version header before choosing a dialect
use lazy_static::lazy_static;
use regex::Regex;
use tracing::debug;

use crate::datatype::{Bin, Coordinate, Entity, Number, Ref, Scalar, Uri, XStr};
use crate::error::{HaystackError, Result};
use crate::grid::Grid;
use crate::metadata::Metadata;
use crate::version::Version;
use crate::zoneinfo::{timezone, timezone_for_offset, timezone_name};

#[derive(Parser)]
#[grammar = "zinc.pest"]
#[grammar = "filter.pest"]
pub struct HaystackParser;

lazy_static! {
    static ref VERSION_HEADER: Regex = Regex::new(r#"^ver:"([^"]*)""#).unwrap();
    static ref GRID_SEPARATOR: Regex = Regex::new(r"\r?\n(?:[ \t]*\r?\n)+").unwrap();
}

/// Name written for the single column of a grid that has none.
const EMPTY_COLUMN: &str = "empty";

// ------------- Reading -------------

/// Parse one grid.
pub fn parse_grid(text: &str) -> Result<Grid> {
    let version = header_version(text)?;
    let reader = ZincReader::new(text, &version);
    let mut pairs = HaystackParser::parse(Rule::grid, text).map_err(|e| {
        debug!(grid = text, "malformed Zinc grid");
        syntax_error(text, e)
    })?;
    let body = first(pairs.next().ok_or_else(|| empty_tree("grid"))?)?;
    reader.grid(body)
}

/// Parse several grids separated by blank lines.
pub fn parse_grids(text: &str) -> Result<Vec<Grid>> {
    GRID_SEPARATOR
        .split(text)
        .filter(|chunk| !chunk.trim().is_empty())
        .map(|chunk| parse_grid(chunk.trim_start_matches(['\r', '\n'])))
        .collect()
}

/// Parse a single Zinc scalar, as written in a cell, with the grammar of the
/// given version.
pub fn parse_scalar(text: &str, version: &Version) -> Result<Scalar> {
    let reader = ZincReader::new(text, version);
    let mut pairs =
        HaystackParser::parse(Rule::scalar_only, text).map_err(|e| syntax_error(text, e))?;
    let scalar = first(pairs.next().ok_or_else(|| empty_tree("scalar"))?)?;
    reader.scalar(scalar)
}

fn header_version(text: &str) -> Result<Version> {
    let caps = VERSION_HEADER
        .captures(text)
        .ok_or_else(|| HaystackError::parse("Could not find the grid version header", 1, 1))?;
    caps[1].parse::<Version>()
}

fn empty_tree(what: &str) -> HaystackError {
    HaystackError::Invariant(format!("the parser returned no {what}"))
}

/// The first child of a node.
pub(crate) fn first(pair: Pair<'_, Rule>) -> Result<Pair<'_, Rule>> {
    let rule = pair.as_rule();
    pair.into_inner()
        .next()
        .ok_or_else(|| HaystackError::Invariant(format!("empty {rule:?} node")))
}

fn syntax_error(text: &str, err: pest::error::Error<Rule>) -> HaystackError {
    let (line, col) = match err.line_col {
        LineColLocation::Pos(pos) => pos,
        LineColLocation::Span(start, _) => start,
    };
    HaystackError::parse(format!("{}\n{}", err.variant.message(), context(text, line, col)), line, col)
}

/// Render the lines leading to a failure with a pointer under the column.
pub(crate) fn context(text: &str, line: usize, col: usize) -> String {
    let skip = line.saturating_sub(3);
    let mut out = String::new();
    for (i, l) in text.lines().enumerate().skip(skip).take(line - skip) {
        out.push_str(&format!("{:>4} | {}\n", i + 1, l));
    }
    out.push_str(&format!("     | {}^", " ".repeat(col.saturating_sub(1))));
    out
}

/// Turns parse trees into values for one dialect.
pub(crate) struct ZincReader<'t> {
    text: &'t str,
    dialect: Version,
}

impl<'t> ZincReader<'t> {
    pub(crate) fn new(text: &'t str, version: &Version) -> Self {
        Self { text, dialect: version.nearest() }
    }

    fn error(&self, pair: &Pair<'_, Rule>, message: impl Into<String>) -> HaystackError {
        let (line, col) = pair.line_col();
        HaystackError::parse(format!("{}\n{}", message.into(), context(self.text, line, col)), line, col)
    }

    fn require_v3(&self, pair: &Pair<'_, Rule>, feature: &str) -> Result<()> {
        if self.dialect < Version::v3() {
            return Err(self.error(pair, format!("Project Haystack {} does not support {feature}", self.dialect)));
        }
        Ok(())
    }

    pub(crate) fn scalar(&self, pair: Pair<'_, Rule>) -> Result<Scalar> {
        match pair.as_rule() {
            Rule::null => Ok(Scalar::Null),
            Rule::marker => Ok(Scalar::Marker),
            Rule::remove => Ok(Scalar::Remove),
            Rule::na => {
                self.require_v3(&pair, "NA")?;
                Ok(Scalar::NA)
            }
            Rule::boolean => Ok(Scalar::Bool(pair.as_str() == "T")),
            Rule::string => Ok(Scalar::Str(self.string(pair)?)),
            Rule::uri => {
                let inner = first(pair.clone())?;
                let value = unescape(inner.as_str(), true).map_err(|m| self.error(&pair, m))?;
                Ok(Scalar::Uri(Uri(value)))
            }
            Rule::ref_val => {
                let mut inner = pair.into_inner();
                let name = inner.next().ok_or_else(|| empty_tree("ref name"))?;
                let display = inner.next().map(|p| self.string(p)).transpose()?;
                Ok(Scalar::Ref(Ref { name: name.as_str().to_string(), display }))
            }
            Rule::bin => {
                let inner = first(pair)?;
                let mime = match inner.as_rule() {
                    Rule::string => self.string(inner)?,
                    _ => inner.as_str().to_string(),
                };
                Ok(Scalar::Bin(Bin(mime)))
            }
            Rule::xstr => {
                let mut inner = pair.clone().into_inner();
                let encoding = inner.next().ok_or_else(|| empty_tree("xstr name"))?.as_str();
                let payload = self.string(inner.next().ok_or_else(|| empty_tree("xstr payload"))?)?;
                if encoding == "Bin" {
                    return Ok(Scalar::Bin(Bin(payload)));
                }
                let xstr = XStr::new(encoding, &payload).map_err(|e| self.error(&pair, e.to_string()))?;
                Ok(Scalar::XStr(xstr))
            }
            Rule::coord => {
                let mut inner = pair.clone().into_inner();
                let lat = self.degrees(&pair, inner.next())?;
                let lng = self.degrees(&pair, inner.next())?;
                Ok(Scalar::Coord(Coordinate::new(lat, lng)))
            }
            Rule::date => NaiveDate::parse_from_str(pair.as_str(), "%Y-%m-%d")
                .map(Scalar::Date)
                .map_err(|e| self.error(&pair, format!("invalid date: {e}"))),
            Rule::time => parse_time(pair.as_str())
                .map(Scalar::Time)
                .map_err(|e| self.error(&pair, format!("invalid time: {e}"))),
            Rule::datetime => {
                let value = self.datetime(pair.clone()).map_err(|m| self.error(&pair, m))?;
                Ok(Scalar::DateTime(value))
            }
            Rule::number => self.number(pair),
            Rule::list => {
                self.require_v3(&pair, "List")?;
                let items = pair.into_inner().map(|p| self.scalar(p)).collect::<Result<Vec<_>>>()?;
                Ok(Scalar::List(items))
            }
            Rule::dict => {
                self.require_v3(&pair, "Dict")?;
                let mut dict = Entity::new();
                for tag in pair.into_inner() {
                    let (name, value) = self.tag(tag)?;
                    dict.insert(name, value);
                }
                Ok(Scalar::Dict(dict))
            }
            Rule::inner_grid => {
                self.require_v3(&pair, "Grid")?;
                let grid = self.grid(first(pair)?)?;
                Ok(Scalar::Grid(Box::new(grid)))
            }
            other => Err(HaystackError::Invariant(format!("{other:?} is not a scalar"))),
        }
    }

    fn string(&self, pair: Pair<'_, Rule>) -> Result<String> {
        let inner = first(pair.clone())?;
        unescape(inner.as_str(), false).map_err(|m| self.error(&pair, m))
    }

    fn degrees(&self, at: &Pair<'_, Rule>, pair: Option<Pair<'_, Rule>>) -> Result<f64> {
        let text = pair.map(|p| p.as_str()).unwrap_or_default();
        match text {
            "" | "-" => Ok(0.0),
            _ => text.parse::<f64>().map_err(|e| self.error(at, format!("invalid coordinate: {e}"))),
        }
    }

    fn number(&self, pair: Pair<'_, Rule>) -> Result<Scalar> {
        let mut inner = pair.clone().into_inner();
        let head = inner.next().ok_or_else(|| empty_tree("number"))?;
        let value = match head.as_str() {
            "INF" => f64::INFINITY,
            "-INF" => f64::NEG_INFINITY,
            "NaN" => f64::NAN,
            digits => digits
                .replace('_', "")
                .parse::<f64>()
                .map_err(|e| self.error(&pair, format!("invalid number: {e}")))?,
        };
        let number = match inner.next() {
            Some(unit) => Number::with_unit(value, unit.as_str()),
            None => Number::new(value),
        };
        Ok(Scalar::Number(number))
    }

    fn datetime(&self, pair: Pair<'_, Rule>) -> std::result::Result<DateTime<Tz>, String> {
        let mut inner = pair.into_inner();
        let iso = inner.next().map(|p| p.as_str()).unwrap_or_default();
        let zone = match inner.next() {
            Some(name) => Some(timezone(name.as_str()).map_err(|e| e.to_string())?),
            None => None,
        };
        let (naive, offset) = split_iso(iso)?;
        match (offset, zone) {
            (Some(offset), zone) => {
                let fixed = FixedOffset::east_opt(offset).ok_or_else(|| format!("invalid offset in {iso}"))?;
                let instant = fixed
                    .from_local_datetime(&naive)
                    .single()
                    .ok_or_else(|| format!("invalid datetime {iso}"))?;
                let zone = zone.unwrap_or_else(|| timezone_for_offset(offset));
                Ok(instant.with_timezone(&zone))
            }
            (None, Some(zone)) => zone
                .from_local_datetime(&naive)
                .earliest()
                .ok_or_else(|| format!("{iso} does not exist in {zone}")),
            (None, None) => Ok(Tz::UTC.from_utc_datetime(&naive)),
        }
    }

    fn tag(&self, pair: Pair<'_, Rule>) -> Result<(String, Scalar)> {
        let mut inner = pair.into_inner();
        let name = inner.next().ok_or_else(|| empty_tree("tag name"))?.as_str().to_string();
        let value = match inner.next() {
            Some(value) => self.scalar(value)?,
            None => Scalar::Marker,
        };
        Ok((name, value))
    }

    fn metadata(&self, pairs: pest::iterators::Pairs<'_, Rule>) -> Result<Metadata> {
        let mut meta = Metadata::new();
        for tag in pairs {
            let (name, value) = self.tag(tag)?;
            meta.insert(&name, value);
        }
        Ok(meta)
    }

    pub(crate) fn grid(&self, body: Pair<'_, Rule>) -> Result<Grid> {
        let mut parts = body.into_inner();
        let mut header = parts.next().ok_or_else(|| empty_tree("grid header"))?.into_inner();
        let ver = header.next().ok_or_else(|| empty_tree("version"))?;
        let version = self.string(first(ver)?)?.parse::<Version>()?;
        let mut grid = Grid::with_version(version);
        grid.set_metadata(self.metadata(header)?)?;

        let cols = parts.next().ok_or_else(|| empty_tree("columns"))?;
        let mut names = Vec::new();
        for col in cols.into_inner() {
            let at = col.clone();
            let mut inner = col.into_inner();
            let name = inner.next().ok_or_else(|| empty_tree("column name"))?.as_str().to_string();
            let meta = self.metadata(inner)?;
            grid.add_column(&name, meta).map_err(|e| self.error(&at, e.to_string()))?;
            names.push(name);
        }

        if let Some(rows) = parts.next() {
            for row in rows.into_inner() {
                if row.as_str().trim().is_empty() {
                    continue;
                }
                let at = row.clone();
                let mut entity = Entity::new();
                for (i, cell) in row.into_inner().enumerate() {
                    let Some(name) = names.get(i) else {
                        return Err(self.error(&at, format!("row has more than {} cells", names.len())));
                    };
                    if let Some(value) = cell.into_inner().next() {
                        let value = self.scalar(value)?;
                        if !value.is_null() {
                            entity.insert(name.clone(), value);
                        }
                    }
                }
                grid.append(entity)?;
            }
        }

        if names == [EMPTY_COLUMN]
            && grid.columns().value_at(0).is_some_and(Metadata::is_empty)
            && grid.iter().all(|row| !row.contains_key(EMPTY_COLUMN))
        {
            grid.remove_column(EMPTY_COLUMN);
        }
        Ok(grid)
    }
}

fn parse_time(text: &str) -> std::result::Result<NaiveTime, chrono::ParseError> {
    NaiveTime::parse_from_str(text, "%H:%M:%S%.f").or_else(|_| NaiveTime::parse_from_str(text, "%H:%M"))
}

/// Split an ISO datetime into its local part and its offset in seconds.
fn split_iso(iso: &str) -> std::result::Result<(NaiveDateTime, Option<i32>), String> {
    let upper = iso.to_ascii_uppercase();
    let bytes = upper.as_bytes();
    let (body, offset) = if let Some(body) = upper.strip_suffix('Z') {
        (body, Some(0))
    } else if bytes.len() > 6 && matches!(bytes[bytes.len() - 6], b'+' | b'-') && bytes[bytes.len() - 3] == b':' {
        let (body, offset) = upper.split_at(upper.len() - 6);
        let hours: i32 = offset[1..3].parse().map_err(|_| format!("invalid offset in {iso}"))?;
        let minutes: i32 = offset[4..6].parse().map_err(|_| format!("invalid offset in {iso}"))?;
        let sign = if offset.starts_with('-') { -1 } else { 1 };
        (body, Some(sign * (hours * 3600 + minutes * 60)))
    } else {
        (upper.as_str(), None)
    };
    let naive = NaiveDateTime::parse_from_str(body, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(body, "%Y-%m-%dT%H:%M"))
        .map_err(|e| format!("invalid datetime {iso}: {e}"))?;
    Ok((naive, offset))
}

/// Resolve the escapes of a quoted string or URI body. In URIs only the
/// backtick, the backslash and unicode escapes are resolved; any other
/// escape is kept as written.
fn unescape(text: &str, uri: bool) -> std::result::Result<String, String> {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('u' | 'U') => {
                let hex: String = chars.by_ref().take(4).collect();
                let code = u32::from_str_radix(&hex, 16).map_err(|_| format!("invalid escape \\u{hex}"))?;
                out.push(char::from_u32(code).ok_or_else(|| format!("invalid character \\u{hex}"))?);
            }
            Some(c @ ('`' | '\\')) if uri => out.push(c),
            Some(other) if uri => {
                out.push('\\');
                out.push(other);
            }
            Some('b') => out.push('\u{8}'),
            Some('f') => out.push('\u{c}'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('t') => out.push('\t'),
            Some('v') => out.push('\u{b}'),
            Some('a') => out.push('\u{7}'),
            Some(c @ ('"' | '\\' | '$')) => out.push(c),
            Some(other) => return Err(format!("invalid escape \\{other}")),
            None => return Err("dangling backslash".to_string()),
        }
    }
    Ok(out)
}

// ------------- Writing -------------

/// Write a grid, one header line, one column line and one line per row.
pub fn dump_grid(grid: &Grid) -> Result<String> {
    let version = grid.version();
    let mut out = format!("ver:{}", quote(&version.to_string()));
    let meta = dump_meta(grid.metadata(), version)?;
    if !meta.is_empty() {
        out.push(' ');
        out.push_str(&meta);
    }
    out.push('\n');

    if grid.columns().is_empty() {
        out.push_str(EMPTY_COLUMN);
    } else {
        let cols = grid
            .columns()
            .iter()
            .map(|(name, meta)| {
                let meta = dump_meta(meta, version)?;
                Ok(if meta.is_empty() { name.to_string() } else { format!("{name} {meta}") })
            })
            .collect::<Result<Vec<_>>>()?;
        out.push_str(&cols.join(","));
    }
    out.push('\n');

    // a lone empty cell would read back as a blank line
    let multi = grid.columns().len() > 1;
    for row in grid.iter() {
        let cells = grid
            .column_names()
            .map(|name| match row.get(name) {
                Some(value) => dump_scalar(value, version),
                None if multi => Ok(String::new()),
                None => Ok("N".to_string()),
            })
            .collect::<Result<Vec<_>>>()?;
        out.push_str(&cells.join(","));
        out.push('\n');
    }
    Ok(out)
}

fn dump_meta(meta: &Metadata, version: &Version) -> Result<String> {
    let items = meta
        .iter()
        .map(|(name, value)| match value {
            Scalar::Marker => Ok(name.to_string()),
            _ => Ok(format!("{name}:{}", dump_scalar(value, version)?)),
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(items.join(" "))
}

/// Write one scalar in the Zinc syntax of `version`.
pub fn dump_scalar(value: &Scalar, version: &Version) -> Result<String> {
    if let Some(required) = value.required_version() {
        if version < &required {
            return Err(HaystackError::feature_gate(value.kind(), version));
        }
    }
    Ok(match value {
        Scalar::Null => "N".to_string(),
        Scalar::Marker => "M".to_string(),
        Scalar::NA => "NA".to_string(),
        Scalar::Remove => "R".to_string(),
        Scalar::Bool(b) => if *b { "T" } else { "F" }.to_string(),
        Scalar::Number(n) => dump_number(n),
        Scalar::Str(s) => quote(s),
        Scalar::Uri(u) => format!("`{}`", escape_uri(u)),
        Scalar::Bin(b) if version >= &Version::v3() => format!("Bin({})", quote(b)),
        Scalar::Bin(b) => format!("Bin({b})"),
        Scalar::XStr(x) => format!("{}({})", x.encoding, quote(&x.data_to_string())),
        Scalar::Ref(r) => match &r.display {
            Some(display) => format!("@{} {}", r.name, quote(display)),
            None => format!("@{}", r.name),
        },
        Scalar::Date(d) => d.format("%Y-%m-%d").to_string(),
        Scalar::Time(t) => t.format("%H:%M:%S%.f").to_string(),
        Scalar::DateTime(dt) => dump_datetime(dt),
        Scalar::Coord(c) => format!("C({:.6},{:.6})", c.lat, c.lng),
        Scalar::List(items) => {
            let items = items.iter().map(|v| dump_scalar(v, version)).collect::<Result<Vec<_>>>()?;
            format!("[{}]", items.join(","))
        }
        Scalar::Dict(dict) => {
            let items = dict
                .iter()
                .map(|(name, value)| match value {
                    Scalar::Marker => Ok(name.clone()),
                    _ => Ok(format!("{name}:{}", dump_scalar(value, version)?)),
                })
                .collect::<Result<Vec<_>>>()?;
            format!("{{{}}}", items.join(" "))
        }
        Scalar::Grid(grid) => format!("<<{}>>", dump_grid(grid)?),
    })
}

pub(crate) fn dump_number(n: &Number) -> String {
    let value = if n.value.is_nan() {
        "NaN".to_string()
    } else if n.value.is_infinite() {
        if n.value > 0.0 { "INF" } else { "-INF" }.to_string()
    } else {
        n.value.to_string()
    };
    match &n.unit {
        Some(unit) => format!("{value}{unit}"),
        None => value,
    }
}

pub(crate) fn dump_datetime(dt: &DateTime<Tz>) -> String {
    format!("{} {}", dt.to_rfc3339_opts(SecondsFormat::AutoSi, true), timezone_name(&dt.timezone()))
}

/// Quote a string, escaping what the grammar cannot read back verbatim.
pub(crate) fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\u{8}' => out.push_str("\\b"),
            '\u{c}' => out.push_str("\\f"),
            c if (c as u32) < 0x20 => out.push_str(&format!("\\u{:04x}", c as u32)),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

fn escape_uri(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '`' => out.push_str("\\`"),
            '\\' => out.push_str("\\\\"),
            c if (c as u32) < 0x20 => out.push_str(&format!("\\u{:04x}", c as u32)),
            c => out.push(c),
        }
    }
    out
}
