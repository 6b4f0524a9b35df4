// used for the date, time and datetime scalars
use chrono::{DateTime, NaiveDate, NaiveTime, Timelike};
use chrono_tz::Tz;

// used to decode XStr payloads
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;

// rows and dicts keep their tags in the order they were added
use indexmap::IndexMap;
// used for the id index and other hashmaps keyed by strings
use core::hash::BuildHasherDefault;
use seahash::SeaHasher;

// used to print out readable forms of a scalar
use std::fmt;
use std::hash::{Hash, Hasher};
use std::cmp::Ordering;
use std::ops;

use crate::error::{HaystackError, Result};
use crate::grid::Grid;
use crate::version::Version;

pub type OtherHasher = BuildHasherDefault<SeaHasher>;

/// A row of a grid, or the value of a Haystack 3.0 dict.
pub type Entity = IndexMap<String, Scalar>;

/// Floats closer than this are considered equal when comparing grids.
pub const EPSILON: f64 = 0.000001;

// ------------- Scalar -------------
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Null,
    Marker,
    /// Not available, Haystack 3.0 and later.
    NA,
    /// Tombstone used by diffs and updates.
    Remove,
    Bool(bool),
    Number(Number),
    Str(String),
    Uri(Uri),
    Bin(Bin),
    XStr(XStr),
    Ref(Ref),
    Date(NaiveDate),
    Time(NaiveTime),
    DateTime(DateTime<Tz>),
    Coord(Coordinate),
    List(Vec<Scalar>),
    Dict(Entity),
    Grid(Box<Grid>),
}

impl Scalar {
    pub fn number(value: f64) -> Self {
        Scalar::Number(Number::new(value))
    }
    pub fn quantity(value: f64, unit: &str) -> Self {
        Scalar::Number(Number::with_unit(value, unit))
    }
    pub fn str(value: &str) -> Self {
        Scalar::Str(value.to_string())
    }
    pub fn kind(&self) -> &'static str {
        match self {
            Scalar::Null => "Null",
            Scalar::Marker => "Marker",
            Scalar::NA => "NA",
            Scalar::Remove => "Remove",
            Scalar::Bool(_) => "Bool",
            Scalar::Number(_) => "Number",
            Scalar::Str(_) => "Str",
            Scalar::Uri(_) => "Uri",
            Scalar::Bin(_) => "Bin",
            Scalar::XStr(_) => "XStr",
            Scalar::Ref(_) => "Ref",
            Scalar::Date(_) => "Date",
            Scalar::Time(_) => "Time",
            Scalar::DateTime(_) => "DateTime",
            Scalar::Coord(_) => "Coord",
            Scalar::List(_) => "List",
            Scalar::Dict(_) => "Dict",
            Scalar::Grid(_) => "Grid",
        }
    }
    pub fn is_null(&self) -> bool {
        matches!(self, Scalar::Null)
    }
    pub fn as_reference(&self) -> Option<&Ref> {
        match self {
            Scalar::Ref(r) => Some(r),
            _ => None,
        }
    }
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Scalar::Str(s) => Some(s),
            _ => None,
        }
    }
    pub fn as_number(&self) -> Option<&Number> {
        match self {
            Scalar::Number(n) => Some(n),
            _ => None,
        }
    }

    /// The oldest Haystack version able to carry this value, if it is not 2.0.
    pub fn required_version(&self) -> Option<Version> {
        match self {
            Scalar::NA | Scalar::List(_) | Scalar::Dict(_) | Scalar::Grid(_) => Some(Version::v3()),
            _ => None,
        }
    }

    /// Equality used when comparing grids: floats within [`EPSILON`], times to
    /// the second, datetimes by instant, containers recursively.
    pub fn approx_eq(&self, other: &Scalar) -> bool {
        match (self, other) {
            (Scalar::Number(a), Scalar::Number(b)) => a.unit == b.unit && approx_f64(a.value, b.value),
            (Scalar::Time(a), Scalar::Time(b)) => a.with_nanosecond(0) == b.with_nanosecond(0),
            (Scalar::DateTime(a), Scalar::DateTime(b)) => a.timestamp_micros() == b.timestamp_micros(),
            (Scalar::Coord(a), Scalar::Coord(b)) => approx_f64(a.lat, b.lat) && approx_f64(a.lng, b.lng),
            (Scalar::List(a), Scalar::List(b)) => {
                a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| x.approx_eq(y))
            }
            (Scalar::Dict(a), Scalar::Dict(b)) => entity_approx_eq(a, b),
            (Scalar::Grid(a), Scalar::Grid(b)) => a.approx_eq(b),
            (a, b) => a == b,
        }
    }

    /// Equality as seen by the filter language. A number without a unit
    /// matches a quantity of the same magnitude.
    pub fn filter_eq(&self, other: &Scalar) -> bool {
        match (self, other) {
            (Scalar::Number(a), Scalar::Number(b)) => a.compatible(b) && a.value == b.value,
            (Scalar::DateTime(a), Scalar::DateTime(b)) => a == b,
            (a, b) => a == b,
        }
    }

    /// Ordering as seen by the filter language: only values of the same kind
    /// (and compatible units) are ordered.
    pub fn filter_cmp(&self, other: &Scalar) -> Option<Ordering> {
        match (self, other) {
            (Scalar::Number(a), Scalar::Number(b)) if a.compatible(b) => a.value.partial_cmp(&b.value),
            (Scalar::Bool(a), Scalar::Bool(b)) => Some(a.cmp(b)),
            (Scalar::Str(a), Scalar::Str(b)) => Some(a.cmp(b)),
            (Scalar::Uri(a), Scalar::Uri(b)) => Some(a.0.cmp(&b.0)),
            (Scalar::Ref(a), Scalar::Ref(b)) => Some(a.name.cmp(&b.name)),
            (Scalar::Date(a), Scalar::Date(b)) => Some(a.cmp(b)),
            (Scalar::Time(a), Scalar::Time(b)) => Some(a.cmp(b)),
            (Scalar::DateTime(a), Scalar::DateTime(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    /// Total order used to sort rows: kinds first, then values.
    pub fn sort_cmp(&self, other: &Scalar) -> Ordering {
        self.filter_cmp(other)
            .unwrap_or_else(|| self.kind_rank().cmp(&other.kind_rank()))
    }

    fn kind_rank(&self) -> u8 {
        match self {
            Scalar::Null => 0,
            Scalar::Marker => 1,
            Scalar::NA => 2,
            Scalar::Remove => 3,
            Scalar::Bool(_) => 4,
            Scalar::Number(_) => 5,
            Scalar::Str(_) => 6,
            Scalar::Uri(_) => 7,
            Scalar::Bin(_) => 8,
            Scalar::XStr(_) => 9,
            Scalar::Ref(_) => 10,
            Scalar::Date(_) => 11,
            Scalar::Time(_) => 12,
            Scalar::DateTime(_) => 13,
            Scalar::Coord(_) => 14,
            Scalar::List(_) => 15,
            Scalar::Dict(_) => 16,
            Scalar::Grid(_) => 17,
        }
    }
}

fn approx_f64(a: f64, b: f64) -> bool {
    if a.is_nan() || b.is_nan() {
        return a.is_nan() && b.is_nan();
    }
    if a.is_infinite() || b.is_infinite() {
        return a == b;
    }
    (a - b).abs() < EPSILON
}

/// Approximate equality of two rows, absent tags and nulls being the same.
pub fn entity_approx_eq(left: &Entity, right: &Entity) -> bool {
    let null = Scalar::Null;
    left.iter().all(|(k, v)| v.approx_eq(right.get(k).unwrap_or(&null)))
        && right.iter().all(|(k, v)| left.contains_key(k) || v.approx_eq(&null))
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match crate::zinc::dump_scalar(self, &Version::latest()) {
            Ok(zinc) => write!(f, "{zinc}"),
            Err(_) => write!(f, "<{}>", self.kind()),
        }
    }
}

// ------------- Conversions -------------
impl From<bool> for Scalar {
    fn from(v: bool) -> Self { Scalar::Bool(v) }
}
impl From<f64> for Scalar {
    fn from(v: f64) -> Self { Scalar::number(v) }
}
impl From<i64> for Scalar {
    fn from(v: i64) -> Self { Scalar::number(v as f64) }
}
impl From<&str> for Scalar {
    fn from(v: &str) -> Self { Scalar::Str(v.to_string()) }
}
impl From<String> for Scalar {
    fn from(v: String) -> Self { Scalar::Str(v) }
}
impl From<Number> for Scalar {
    fn from(v: Number) -> Self { Scalar::Number(v) }
}
impl From<Uri> for Scalar {
    fn from(v: Uri) -> Self { Scalar::Uri(v) }
}
impl From<Bin> for Scalar {
    fn from(v: Bin) -> Self { Scalar::Bin(v) }
}
impl From<XStr> for Scalar {
    fn from(v: XStr) -> Self { Scalar::XStr(v) }
}
impl From<Ref> for Scalar {
    fn from(v: Ref) -> Self { Scalar::Ref(v) }
}
impl From<NaiveDate> for Scalar {
    fn from(v: NaiveDate) -> Self { Scalar::Date(v) }
}
impl From<NaiveTime> for Scalar {
    fn from(v: NaiveTime) -> Self { Scalar::Time(v) }
}
impl From<DateTime<Tz>> for Scalar {
    fn from(v: DateTime<Tz>) -> Self { Scalar::DateTime(v) }
}
impl From<Coordinate> for Scalar {
    fn from(v: Coordinate) -> Self { Scalar::Coord(v) }
}
impl From<Vec<Scalar>> for Scalar {
    fn from(v: Vec<Scalar>) -> Self { Scalar::List(v) }
}
impl From<Entity> for Scalar {
    fn from(v: Entity) -> Self { Scalar::Dict(v) }
}
impl From<Grid> for Scalar {
    fn from(v: Grid) -> Self { Scalar::Grid(Box::new(v)) }
}

// Special types below
#[derive(Debug, Clone, PartialEq)]
pub struct Number {
    pub value: f64,
    pub unit: Option<String>,
}

impl Number {
    pub fn new(value: f64) -> Self {
        Self { value, unit: None }
    }
    pub fn with_unit(value: f64, unit: &str) -> Self {
        let unit = if unit.is_empty() { None } else { Some(unit.to_string()) };
        Self { value, unit }
    }
    pub fn is_quantity(&self) -> bool {
        self.unit.is_some()
    }
    fn compatible(&self, other: &Number) -> bool {
        match (&self.unit, &other.unit) {
            (Some(a), Some(b)) => a == b,
            _ => true,
        }
    }
}

/// A URI, kept apart from plain strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Uri (pub String);

impl Uri {
    pub fn new(s: &str) -> Self {
        Uri (s.to_string())
    }
}
impl fmt::Display for Uri {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
impl ops::Deref for Uri {
    type Target = str;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// The MIME type of a binary attachment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Bin (pub String);

impl Bin {
    pub fn new(mime: &str) -> Self {
        Bin (mime.to_string())
    }
}
impl fmt::Display for Bin {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
impl ops::Deref for Bin {
    type Target = str;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// An encoded string: `hex` and `b64` payloads are decoded, anything else is
/// kept as the raw bytes of the text.
#[derive(Debug, Clone)]
pub struct XStr {
    pub encoding: String,
    pub data: Vec<u8>,
}

impl XStr {
    pub fn new(encoding: &str, text: &str) -> Result<Self> {
        let data = match encoding {
            "hex" => hex::decode(text)
                .map_err(|e| HaystackError::InvalidValue(format!("invalid hex payload: {e}")))?,
            "b64" => BASE64
                .decode(text)
                .map_err(|e| HaystackError::InvalidValue(format!("invalid b64 payload: {e}")))?,
            _ => text.as_bytes().to_vec(),
        };
        Ok(Self { encoding: encoding.to_string(), data })
    }
    pub fn data_to_string(&self) -> String {
        match self.encoding.as_str() {
            "hex" => hex::encode(&self.data),
            "b64" => BASE64.encode(&self.data),
            _ => String::from_utf8_lossy(&self.data).into_owned(),
        }
    }
}
// two XStr carrying the same bytes are the same value
impl PartialEq for XStr {
    fn eq(&self, other: &Self) -> bool {
        self.data == other.data
    }
}

/// A reference to an entity. Only the name takes part in equality.
#[derive(Debug, Clone)]
pub struct Ref {
    pub name: String,
    pub display: Option<String>,
}

impl Ref {
    pub fn new(name: &str) -> Self {
        Self { name: name.to_string(), display: None }
    }
    pub fn with_display(name: &str, display: &str) -> Self {
        Self { name: name.to_string(), display: Some(display.to_string()) }
    }
    /// Like [`Ref::new`], refusing names outside `[a-zA-Z0-9_:\-.~]+`.
    pub fn try_new(name: &str, display: Option<&str>) -> Result<Self> {
        if !Self::is_valid_name(name) {
            return Err(HaystackError::InvalidValue(format!("invalid ref name {name:?}")));
        }
        Ok(Self { name: name.to_string(), display: display.map(str::to_string) })
    }
    pub fn is_valid_name(name: &str) -> bool {
        !name.is_empty()
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | ':' | '-' | '.' | '~'))
    }
}
impl PartialEq for Ref {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}
impl Eq for Ref {}
impl Hash for Ref {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}
impl fmt::Display for Ref {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "@{}", self.name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Coordinate {
    pub lat: f64,
    pub lng: f64,
}

impl Coordinate {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }
}
