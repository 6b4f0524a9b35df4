//! The contract between this crate and the servers built on it.
//!
//! A provider answers the Haystack operations for one backend. It declares
//! the operations it implements as a set of [`Capability`] values, and the
//! `ops` grid is computed from that set. Operations a provider does not
//! implement fall back to a default refusing with
//! [`HaystackError::UnsupportedOperation`].

use std::fmt;

use chrono::{DateTime, Days, Local, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use tracing::debug;

use crate::datatype::{Entity, Number, Ref, Scalar, Uri};
use crate::error::{HaystackError, Result};
use crate::grid::Grid;
use crate::grid_filter::FilterCache;
use crate::metadata::Metadata;
use crate::version::Version;
use crate::zinc;
use crate::zoneinfo;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Capability {
    About,
    Ops,
    Formats,
    Read,
    Nav,
    WatchSub,
    WatchUnsub,
    WatchPoll,
    PointWrite,
    HisRead,
    HisWrite,
    InvokeAction,
}

impl Capability {
    pub const ALL: [Capability; 12] = [
        Capability::About,
        Capability::Ops,
        Capability::Formats,
        Capability::Read,
        Capability::Nav,
        Capability::WatchSub,
        Capability::WatchUnsub,
        Capability::WatchPoll,
        Capability::PointWrite,
        Capability::HisRead,
        Capability::HisWrite,
        Capability::InvokeAction,
    ];

    /// The operation name on the wire.
    pub fn name(&self) -> &'static str {
        match self {
            Capability::About => "about",
            Capability::Ops => "ops",
            Capability::Formats => "formats",
            Capability::Read => "read",
            Capability::Nav => "nav",
            Capability::WatchSub => "watchSub",
            Capability::WatchUnsub => "watchUnsub",
            Capability::WatchPoll => "watchPoll",
            Capability::PointWrite => "pointWrite",
            Capability::HisRead => "hisRead",
            Capability::HisWrite => "hisWrite",
            Capability::InvokeAction => "invokeAction",
        }
    }

    pub fn summary(&self) -> &'static str {
        match self {
            Capability::About => "Summary information for server",
            Capability::Ops => "Operations supported by this server",
            Capability::Formats => "Grid data formats supported by this server",
            Capability::Read => {
                "The read op is used to read a set of entity records either by their unique identifier or using a filter."
            }
            Capability::Nav => "The nav op is used navigate a project for learning and discovery",
            Capability::WatchSub => {
                "The watch_sub operation is used to create new watches or add entities to an existing watch."
            }
            Capability::WatchUnsub => {
                "The watch_unsub operation is used to close a watch entirely or remove entities from a watch."
            }
            Capability::WatchPoll => {
                "The watch_poll operation is used to poll a watch for changes to the subscribed entity records."
            }
            Capability::PointWrite => {
                "The point_write_read op is used to: read the current status of a writable point's priority array or write to a given level"
            }
            Capability::HisRead => "The his_read op is used to read a time-series data from historized point.",
            Capability::HisWrite => "The his_write op is used to post new time-series data to a historized point.",
            Capability::InvokeAction => "The invoke_action op is used to invoke a user action on a target record.",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.name() == name)
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Arguments of the `read` operation. With `ids`, the filter and the limit
/// are ignored.
#[derive(Debug, Clone, Default)]
pub struct ReadRequest {
    pub limit: Option<usize>,
    pub select: Option<String>,
    pub ids: Vec<Ref>,
    pub filter: Option<String>,
    pub version: Option<DateTime<Utc>>,
}

fn unsupported<P: Provider + ?Sized>(provider: &P, capability: Capability) -> HaystackError {
    HaystackError::UnsupportedOperation(format!("{} does not implement {}", provider.name(), capability))
}

pub trait Provider {
    fn name(&self) -> &str;

    /// The operations this provider answers. `about` and `ops` are always
    /// available.
    fn capabilities(&self) -> Vec<Capability>;

    fn tz(&self) -> Tz {
        Tz::UTC
    }

    /// The instants at which the stored entities changed, oldest first.
    fn versions(&self) -> Vec<DateTime<Utc>> {
        Vec::new()
    }

    fn about(&self, home: &str) -> Result<Grid> {
        about_grid(self, home)
    }

    fn ops(&self) -> Result<Grid> {
        ops_grid(self)
    }

    /// `None` accepts every format this crate knows.
    fn formats(&self) -> Result<Option<Grid>> {
        Ok(None)
    }

    fn read(&self, _request: &ReadRequest) -> Result<Grid> {
        Err(unsupported(self, Capability::Read))
    }

    fn nav(&self, _nav_id: Option<&str>) -> Result<Grid> {
        Err(unsupported(self, Capability::Nav))
    }

    fn watch_sub(&self, _watch_dis: &str, _watch_id: Option<&str>, _ids: &[Ref], _lease: Option<u64>) -> Result<Grid> {
        Err(unsupported(self, Capability::WatchSub))
    }

    fn watch_unsub(&self, _watch_id: &str, _ids: &[Ref], _close: bool) -> Result<Grid> {
        Err(unsupported(self, Capability::WatchUnsub))
    }

    fn watch_poll(&self, _watch_id: &str, _refresh: bool) -> Result<Grid> {
        Err(unsupported(self, Capability::WatchPoll))
    }

    fn point_write_read(&self, _id: &Ref, _version: Option<DateTime<Utc>>) -> Result<Grid> {
        Err(unsupported(self, Capability::PointWrite))
    }

    fn point_write_write(
        &self,
        _id: &Ref,
        _level: u8,
        _value: Option<Scalar>,
        _duration: Option<Number>,
        _who: Option<&str>,
        _version: Option<DateTime<Utc>>,
    ) -> Result<()> {
        Err(unsupported(self, Capability::PointWrite))
    }

    fn his_read(&self, _id: &Ref, _range: (DateTime<Tz>, DateTime<Tz>), _version: Option<DateTime<Utc>>) -> Result<Grid> {
        Err(unsupported(self, Capability::HisRead))
    }

    fn his_write(&self, _id: &Ref, _series: &Grid, _version: Option<DateTime<Utc>>) -> Result<Grid> {
        Err(unsupported(self, Capability::HisWrite))
    }

    fn invoke_action(
        &self,
        _id: &Ref,
        _action: &str,
        _params: &Entity,
        _version: Option<DateTime<Utc>>,
    ) -> Result<Grid> {
        Err(unsupported(self, Capability::InvokeAction))
    }
}

/// The `ops` grid: one `name,summary` row per declared capability.
pub fn ops_grid<P: Provider + ?Sized>(provider: &P) -> Result<Grid> {
    let mut declared = provider.capabilities();
    declared.extend([Capability::About, Capability::Ops]);
    declared.sort();
    declared.dedup();

    let mut grid = Grid::with_version(Version::v3());
    grid.add_column("name", Metadata::new())?;
    grid.add_column("summary", Metadata::new())?;
    for capability in declared {
        let mut row = Entity::new();
        row.insert("name".to_string(), Scalar::str(capability.name()));
        row.insert("summary".to_string(), Scalar::str(capability.summary()));
        grid.append(row)?;
    }
    Ok(grid)
}

fn about_grid<P: Provider + ?Sized>(provider: &P, home: &str) -> Result<Grid> {
    let tz = provider.tz();
    let now = Utc::now().with_timezone(&tz);
    let columns = [
        ("haystackVersion", Scalar::str(&Version::latest().to_string())),
        ("tz", Scalar::str(zoneinfo::timezone_name(&tz))),
        ("serverName", Scalar::str(provider.name())),
        ("serverTime", Scalar::DateTime(now)),
        ("productName", Scalar::str("hsgrid")),
        ("productUri", Scalar::Uri(Uri::new(home))),
        ("productVersion", Scalar::str(env!("CARGO_PKG_VERSION"))),
        ("moduleName", Scalar::str(provider.name())),
        ("moduleVersion", Scalar::str(env!("CARGO_PKG_VERSION"))),
    ];
    let mut grid = Grid::with_version(Version::v3());
    let mut row = Entity::new();
    for (name, value) in columns {
        grid.add_column(name, Metadata::new())?;
        row.insert(name.to_string(), value);
    }
    grid.append(row)?;
    Ok(grid)
}

// ------------- Grid provider -------------

/// Serves `read` from a grid held in memory.
pub struct GridProvider {
    name: String,
    grid: Grid,
    cache: FilterCache,
}

impl GridProvider {
    pub fn new(name: &str, grid: Grid) -> Self {
        Self::with_cache(name, grid, FilterCache::default())
    }
    pub fn with_cache(name: &str, grid: Grid, cache: FilterCache) -> Self {
        Self { name: name.to_string(), grid, cache }
    }
    pub fn grid(&self) -> &Grid {
        &self.grid
    }
}

impl Provider for GridProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> Vec<Capability> {
        vec![Capability::Read]
    }

    fn read(&self, request: &ReadRequest) -> Result<Grid> {
        debug!(provider = %self.name, ids = request.ids.len(), filter = ?request.filter, "read");
        let selected = if request.ids.is_empty() {
            let filter = request.filter.as_deref().unwrap_or_default();
            self.grid.filter_cached(&self.cache, filter, request.limit)?
        } else {
            let mut found = self.grid.empty_like();
            for id in request.ids.iter() {
                if let Some(row) = self.grid.get_by_id(id) {
                    found.append(row.clone())?;
                }
            }
            found
        };
        match request.select.as_deref() {
            Some(select) => selected.select(select),
            None => Ok(selected),
        }
    }
}

// ------------- Date ranges -------------

/// Parse the range of a `hisRead` request: `today`, `yesterday`, a date, a
/// datetime, or two of them separated by a comma, either side possibly
/// empty. The start is inclusive, the end exclusive.
pub fn parse_date_range(range: &str, tz: Tz) -> Result<(DateTime<Tz>, DateTime<Tz>)> {
    let range = range.trim();
    let earliest = tz.from_utc_datetime(&DateTime::<Utc>::MIN_UTC.naive_utc());
    let latest = tz.from_utc_datetime(&DateTime::<Utc>::MAX_UTC.naive_utc());
    if range.is_empty() {
        return Ok((earliest, latest));
    }
    let today = Local::now().with_timezone(&tz).date_naive();
    let bound = |text: &str| -> Result<Option<Scalar>> {
        match text.trim() {
            "" => Ok(None),
            "today" => Ok(Some(Scalar::Date(today))),
            "yesterday" => Ok(Some(Scalar::Date(today - Days::new(1)))),
            other => zinc::parse_scalar(other, &Version::latest()).map(Some),
        }
    };
    match range.split_once(',') {
        None => match bound(range)? {
            Some(Scalar::Date(date)) => {
                let start = start_of(date, tz)?;
                Ok((start, start_of(next_day(date)?, tz)?))
            }
            Some(Scalar::DateTime(dt)) => Ok((dt.with_timezone(&tz), latest)),
            _ => Err(HaystackError::InvalidValue(format!("date range {range}"))),
        },
        Some((start, end)) => {
            let start = match bound(start)? {
                None => earliest,
                Some(Scalar::Date(date)) => start_of(date, tz)?,
                Some(Scalar::DateTime(dt)) => dt.with_timezone(&tz),
                Some(_) => return Err(HaystackError::InvalidValue(format!("date range {range}"))),
            };
            let end = match bound(end)? {
                None => latest,
                // a date ends the range at the end of that day
                Some(Scalar::Date(date)) => start_of(next_day(date)?, tz)?,
                Some(Scalar::DateTime(dt)) => dt.with_timezone(&tz),
                Some(_) => return Err(HaystackError::InvalidValue(format!("date range {range}"))),
            };
            Ok((start, end))
        }
    }
}

fn next_day(date: NaiveDate) -> Result<NaiveDate> {
    date.checked_add_days(Days::new(1))
        .ok_or_else(|| HaystackError::InvalidValue(format!("no day after {date}")))
}

fn start_of(date: NaiveDate, tz: Tz) -> Result<DateTime<Tz>> {
    tz.from_local_datetime(&date.and_time(NaiveTime::MIN))
        .earliest()
        .ok_or_else(|| HaystackError::InvalidValue(format!("{date} has no midnight in {tz}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capability_names() {
        assert_eq!(Capability::WatchSub.name(), "watchSub");
        assert_eq!(Capability::from_name("hisRead"), Some(Capability::HisRead));
        assert_eq!(Capability::from_name("his_read"), None);
    }

    #[test]
    fn date_ranges() {
        let tz = Tz::UTC;
        let (start, end) = parse_date_range("2020-01-01", tz).unwrap();
        assert_eq!(end - start, chrono::Duration::days(1));
        let (start, end) = parse_date_range("2020-01-01,2020-01-03", tz).unwrap();
        assert_eq!(end - start, chrono::Duration::days(3));
        let (_, end) = parse_date_range("2020-01-01T00:00:00Z UTC", tz).unwrap();
        assert_eq!(end.naive_utc(), DateTime::<Utc>::MAX_UTC.naive_utc());
        assert!(parse_date_range("@ref", tz).is_err());
    }
}
