//! The Haystack JSON encoding.
//!
//! Grids are objects with `meta`, `cols` and `rows`. Scalars without a
//! native JSON form are strings with a one letter type prefix: `m:` marker,
//! `z:` NA, `-:` remove (`x:` before 3.0), `n:` number, `r:` ref, `s:`
//! string, `u:` uri, `b:` bin, `x:` xstr, `d:` date, `h:` time,
//! `t:` datetime and `c:` coordinate. Strings are written with `s:`; a
//! string read without a known prefix is taken as is.

use serde_json::{Map, Value};

use crate::datatype::{Bin, Coordinate, Entity, Number, Ref, Scalar, Uri, XStr};
use crate::error::{HaystackError, Result};
use crate::grid::Grid;
use crate::metadata::Metadata;
use crate::version::Version;
use crate::zinc;

// ------------- Reading -------------

pub fn parse_grid(text: &str) -> Result<Grid> {
    let value: Value = serde_json::from_str(text)?;
    grid_from_value(&value)
}

/// Parse a JSON array of grids, or a single grid.
pub fn parse_grids(text: &str) -> Result<Vec<Grid>> {
    match serde_json::from_str::<Value>(text)? {
        Value::Array(items) => items.iter().map(grid_from_value).collect(),
        value => Ok(vec![grid_from_value(&value)?]),
    }
}

/// Parse one scalar: either JSON text, or a bare prefixed string like `n:12 kW`.
pub fn parse_scalar(text: &str, version: &Version) -> Result<Scalar> {
    match serde_json::from_str::<Value>(text) {
        Ok(value) => scalar_from_value(&value, &version.nearest()),
        Err(_) => scalar_from_str(text, &version.nearest()),
    }
}

pub(crate) fn grid_from_value(value: &Value) -> Result<Grid> {
    let object = value.as_object().ok_or_else(|| invalid("a grid must be a JSON object"))?;
    let meta = object
        .get("meta")
        .and_then(Value::as_object)
        .ok_or_else(|| invalid("the grid has no meta object"))?;
    let version = match meta.get("ver") {
        Some(Value::String(ver)) => ver.parse::<Version>()?,
        _ => return Err(invalid("the grid meta has no ver")),
    };
    let dialect = version.nearest();
    let mut grid = Grid::with_version(version);

    let mut metadata = Metadata::new();
    for (name, value) in meta.iter().filter(|(name, _)| name.as_str() != "ver") {
        metadata.insert(name, scalar_from_value(value, &dialect)?);
    }
    grid.set_metadata(metadata)?;

    if let Some(cols) = object.get("cols") {
        let cols = cols.as_array().ok_or_else(|| invalid("cols must be an array"))?;
        for col in cols {
            let col = col.as_object().ok_or_else(|| invalid("a column must be an object"))?;
            let name = col
                .get("name")
                .and_then(Value::as_str)
                .ok_or_else(|| invalid("a column has no name"))?;
            let mut meta = Metadata::new();
            for (key, value) in col.iter().filter(|(key, _)| key.as_str() != "name") {
                let value = scalar_from_value(value, &dialect)?;
                if !value.is_null() {
                    meta.insert(key, value);
                }
            }
            grid.add_column(name, meta)?;
        }
    }

    if let Some(rows) = object.get("rows") {
        let rows = rows.as_array().ok_or_else(|| invalid("rows must be an array"))?;
        for row in rows {
            let row = row.as_object().ok_or_else(|| invalid("a row must be an object"))?;
            grid.append(entity_from_object(row, &dialect)?)?;
        }
    }
    Ok(grid)
}

fn entity_from_object(object: &Map<String, Value>, dialect: &Version) -> Result<Entity> {
    let mut entity = Entity::new();
    for (name, value) in object {
        let value = scalar_from_value(value, dialect)?;
        if !value.is_null() {
            entity.insert(name.clone(), value);
        }
    }
    Ok(entity)
}

pub(crate) fn scalar_from_value(value: &Value, dialect: &Version) -> Result<Scalar> {
    match value {
        Value::Null => Ok(Scalar::Null),
        Value::Bool(b) => Ok(Scalar::Bool(*b)),
        Value::Number(n) => n
            .as_f64()
            .map(Scalar::number)
            .ok_or_else(|| invalid(&format!("{n} is not a number"))),
        Value::String(s) => scalar_from_str(s, dialect),
        Value::Array(items) => {
            gate(dialect, "List")?;
            let items = items
                .iter()
                .map(|item| scalar_from_value(item, dialect))
                .collect::<Result<Vec<_>>>()?;
            Ok(Scalar::List(items))
        }
        Value::Object(object) => {
            gate(dialect, "Dict")?;
            if ["meta", "cols", "rows"].iter().all(|key| object.contains_key(*key)) {
                return Ok(Scalar::Grid(Box::new(grid_from_value(value)?)));
            }
            let mut dict = Entity::new();
            for (name, value) in object {
                dict.insert(name.clone(), scalar_from_value(value, dialect)?);
            }
            Ok(Scalar::Dict(dict))
        }
    }
}

fn scalar_from_str(text: &str, dialect: &Version) -> Result<Scalar> {
    let Some((prefix, rest)) = text.split_at_checked(2) else {
        return Ok(Scalar::Str(text.to_string()));
    };
    match prefix {
        "m:" if rest.is_empty() => Ok(Scalar::Marker),
        "z:" if rest.is_empty() => Ok(Scalar::NA),
        "-:" | "x:" if rest.is_empty() => Ok(Scalar::Remove),
        "s:" => Ok(Scalar::Str(rest.to_string())),
        "n:" => number_from_str(rest).map(Scalar::Number),
        "r:" => {
            let (name, display) = match rest.split_once(' ') {
                Some((name, display)) => (name, Some(display)),
                None => (rest, None),
            };
            Ok(Scalar::Ref(Ref::try_new(name, display)?))
        }
        "u:" => Ok(Scalar::Uri(Uri::new(rest))),
        "b:" => Ok(Scalar::Bin(Bin::new(rest))),
        "x:" => {
            let (encoding, data) = rest
                .split_once(':')
                .ok_or_else(|| invalid(&format!("{text} is not an XStr")))?;
            Ok(Scalar::XStr(XStr::new(encoding, data)?))
        }
        "c:" => {
            let (lat, lng) = rest
                .split_once(',')
                .ok_or_else(|| invalid(&format!("{text} is not a coordinate")))?;
            let lat = lat.trim().parse::<f64>().map_err(|e| invalid(&e.to_string()))?;
            let lng = lng.trim().parse::<f64>().map_err(|e| invalid(&e.to_string()))?;
            Ok(Scalar::Coord(Coordinate::new(lat, lng)))
        }
        "d:" => typed(rest, "Date", dialect),
        "h:" => typed(rest, "Time", dialect),
        "t:" => typed(rest, "DateTime", dialect),
        _ => Ok(Scalar::Str(text.to_string())),
    }
}

fn number_from_str(text: &str) -> Result<Number> {
    let (value, unit) = match text.split_once(' ') {
        Some((value, unit)) => (value, unit),
        None => (text, ""),
    };
    let value = match value {
        "INF" => f64::INFINITY,
        "-INF" => f64::NEG_INFINITY,
        "NaN" => f64::NAN,
        _ => value.parse::<f64>().map_err(|e| invalid(&format!("{text}: {e}")))?,
    };
    Ok(Number::with_unit(value, unit))
}

/// Dates, times and datetimes share the Zinc syntax.
fn typed(text: &str, kind: &str, dialect: &Version) -> Result<Scalar> {
    let value = zinc::parse_scalar(text, dialect)?;
    if value.kind() != kind {
        return Err(invalid(&format!("{text} is not a {kind}")));
    }
    Ok(value)
}

fn gate(dialect: &Version, feature: &str) -> Result<()> {
    if *dialect < Version::v3() {
        return Err(HaystackError::Parse {
            message: format!("{feature} is not supported by Project Haystack {dialect}"),
            line: None,
            col: None,
        });
    }
    Ok(())
}

fn invalid(message: &str) -> HaystackError {
    HaystackError::Parse { message: message.to_string(), line: None, col: None }
}

// ------------- Writing -------------

pub fn dump_grid(grid: &Grid) -> Result<String> {
    Ok(serde_json::to_string(&grid_to_value(grid)?)?)
}

/// Several grids as one JSON array.
pub fn dump_grids(grids: &[Grid]) -> Result<String> {
    let values = grids.iter().map(grid_to_value).collect::<Result<Vec<_>>>()?;
    Ok(serde_json::to_string(&Value::Array(values))?)
}

/// One scalar as JSON text.
pub fn dump_scalar(value: &Scalar, version: &Version) -> Result<String> {
    Ok(serde_json::to_string(&scalar_to_value(value, version)?)?)
}

/// A row as the JSON object stored by the SQL tables.
pub fn dump_entity(entity: &Entity, version: &Version) -> Result<String> {
    let mut object = Map::new();
    for (name, value) in entity {
        object.insert(name.clone(), scalar_to_value(value, version)?);
    }
    Ok(serde_json::to_string(&Value::Object(object))?)
}

pub(crate) fn grid_to_value(grid: &Grid) -> Result<Value> {
    let version = grid.version();
    let mut meta = Map::new();
    meta.insert("ver".to_string(), Value::String(version.to_string()));
    for (name, value) in grid.metadata().iter() {
        meta.insert(name.to_string(), scalar_to_value(value, version)?);
    }

    let mut cols = Vec::with_capacity(grid.columns().len());
    for (name, col_meta) in grid.columns().iter() {
        let mut col = Map::new();
        col.insert("name".to_string(), Value::String(name.to_string()));
        for (key, value) in col_meta.iter() {
            col.insert(key.to_string(), scalar_to_value(value, version)?);
        }
        cols.push(Value::Object(col));
    }

    let mut rows = Vec::with_capacity(grid.len());
    for row in grid.iter() {
        let mut object = Map::new();
        for name in grid.column_names() {
            if let Some(value) = row.get(name) {
                object.insert(name.to_string(), scalar_to_value(value, version)?);
            }
        }
        rows.push(Value::Object(object));
    }

    let mut object = Map::new();
    object.insert("meta".to_string(), Value::Object(meta));
    object.insert("cols".to_string(), Value::Array(cols));
    object.insert("rows".to_string(), Value::Array(rows));
    Ok(Value::Object(object))
}

pub(crate) fn scalar_to_value(value: &Scalar, version: &Version) -> Result<Value> {
    if let Some(required) = value.required_version() {
        if version < &required {
            return Err(HaystackError::feature_gate(value.kind(), version));
        }
    }
    let text = match value {
        Scalar::Null => return Ok(Value::Null),
        Scalar::Bool(b) => return Ok(Value::Bool(*b)),
        Scalar::List(items) => {
            let items = items.iter().map(|v| scalar_to_value(v, version)).collect::<Result<Vec<_>>>()?;
            return Ok(Value::Array(items));
        }
        Scalar::Dict(dict) => {
            let mut object = Map::new();
            for (name, value) in dict {
                object.insert(name.clone(), scalar_to_value(value, version)?);
            }
            return Ok(Value::Object(object));
        }
        Scalar::Grid(grid) => return grid_to_value(grid),
        Scalar::Marker => "m:".to_string(),
        Scalar::NA => "z:".to_string(),
        Scalar::Remove if *version < Version::v3() => "x:".to_string(),
        Scalar::Remove => "-:".to_string(),
        Scalar::Number(n) => {
            let number = zinc::dump_number(&Number::new(n.value));
            match &n.unit {
                Some(unit) => format!("n:{number} {unit}"),
                None => format!("n:{number}"),
            }
        }
        Scalar::Str(s) => format!("s:{s}"),
        Scalar::Uri(u) => format!("u:{u}"),
        Scalar::Bin(b) => format!("b:{b}"),
        Scalar::XStr(x) => format!("x:{}:{}", x.encoding, x.data_to_string()),
        Scalar::Ref(r) => match &r.display {
            Some(display) => format!("r:{} {display}", r.name),
            None => format!("r:{}", r.name),
        },
        Scalar::Date(d) => format!("d:{}", d.format("%Y-%m-%d")),
        Scalar::Time(t) => format!("h:{}", t.format("%H:%M:%S%.f")),
        Scalar::DateTime(dt) => format!("t:{}", zinc::dump_datetime(dt)),
        Scalar::Coord(c) => format!("c:{},{}", c.lat, c.lng),
    };
    Ok(Value::String(text))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefixed_strings() {
        let v3 = Version::v3();
        assert_eq!(scalar_from_str("n:12.5 kW", &v3).unwrap(), Scalar::quantity(12.5, "kW"));
        assert_eq!(scalar_from_str("x:", &v3).unwrap(), Scalar::Remove);
        assert_eq!(scalar_from_str("hello", &v3).unwrap(), Scalar::str("hello"));
        assert_eq!(scalar_from_str("s:n:1", &v3).unwrap(), Scalar::str("n:1"));
        assert_eq!(
            scalar_from_str("r:site-1 Main site", &v3).unwrap(),
            Scalar::Ref(Ref::with_display("site-1", "Main site"))
        );
    }

    #[test]
    fn strings_are_prefixed() {
        let value = scalar_to_value(&Scalar::str("a:b"), &Version::v3()).unwrap();
        assert_eq!(value, Value::String("s:a:b".to_string()));
        let value = scalar_to_value(&Scalar::str("plain"), &Version::v3()).unwrap();
        assert_eq!(value, Value::String("s:plain".to_string()));
    }

    #[test]
    fn lists_need_v3() {
        let list = serde_json::json!(["m:", "n:1"]);
        assert!(scalar_from_value(&list, &Version::v2()).is_err());
        assert_eq!(
            scalar_from_value(&list, &Version::v3()).unwrap(),
            Scalar::List(vec![Scalar::Marker, Scalar::number(1.0)])
        );
    }
}
