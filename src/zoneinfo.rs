//! Haystack timezone names.
//!
//! Haystack names a timezone by the city part of its IANA identifier
//! (`New_York`, `Paris`, `GMT+1`, `UTC`). The mapping is derived once from
//! the `chrono-tz` database: every zone is known by the last segment of its
//! name, so `America/North_Dakota/Beulah` is `Beulah`. Full IANA names are
//! accepted on input too.

use std::collections::HashMap;

use chrono_tz::{Tz, TZ_VARIANTS};
use lazy_static::lazy_static;

use crate::datatype::OtherHasher;
use crate::error::{HaystackError, Result};

lazy_static! {
    static ref TZ_MAP: HashMap<&'static str, Tz, OtherHasher> = build_map();
}

fn build_map() -> HashMap<&'static str, Tz, OtherHasher> {
    let mut map = HashMap::<&'static str, Tz, OtherHasher>::default();
    // the shallowest zone wins a name: `Etc/UTC` never shadows `UTC`, and
    // `America/Argentina/Buenos_Aires` yields to `America/Buenos_Aires`
    for depth in 0..3 {
        for tz in TZ_VARIANTS.iter() {
            if tz.name().matches('/').count() == depth {
                map.entry(last_segment(tz.name())).or_insert(*tz);
            }
        }
    }
    map
}

fn last_segment(name: &'static str) -> &'static str {
    name.rsplit_once('/').map_or(name, |(_, city)| city)
}

/// Resolve a Haystack timezone name, or a full IANA name, to a zone.
pub fn timezone(haystack_tz: &str) -> Result<Tz> {
    if let Some(tz) = TZ_MAP.get(haystack_tz) {
        return Ok(*tz);
    }
    haystack_tz
        .parse::<Tz>()
        .map_err(|_| HaystackError::InvalidValue(format!("{haystack_tz} is not a recognised timezone")))
}

/// The Haystack name of a zone: the last segment of its IANA name.
pub fn timezone_name(tz: &Tz) -> &'static str {
    last_segment(tz.name())
}

/// The zone a fixed UTC offset is written in when no name was given:
/// whole hours map onto the `Etc/GMT` zones, anything else onto UTC.
pub fn timezone_for_offset(offset_seconds: i32) -> Tz {
    if offset_seconds == 0 || offset_seconds % 3600 != 0 {
        return Tz::UTC;
    }
    // POSIX inverts the sign: Etc/GMT-1 is one hour east of Greenwich
    let hours = -offset_seconds / 3600;
    let name = if hours > 0 { format!("Etc/GMT+{hours}") } else { format!("Etc/GMT{hours}") };
    name.parse::<Tz>().unwrap_or(Tz::UTC)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn city_names() {
        assert_eq!(timezone("Paris").unwrap(), chrono_tz::Europe::Paris);
        assert_eq!(timezone("New_York").unwrap(), chrono_tz::America::New_York);
        assert_eq!(timezone("Europe/Paris").unwrap(), chrono_tz::Europe::Paris);
        assert_eq!(timezone_name(&chrono_tz::Europe::Paris), "Paris");
        assert_eq!(timezone_name(&chrono_tz::Etc::GMTPlus1), "GMT+1");
        assert!(timezone("Atlantis").is_err());
    }

    #[test]
    fn nested_zones_are_known_by_their_city() {
        assert_eq!(timezone("Beulah").unwrap(), chrono_tz::America::North_Dakota::Beulah);
        assert_eq!(timezone_name(&chrono_tz::America::North_Dakota::Beulah), "Beulah");
        assert_eq!(timezone_name(&chrono_tz::America::Argentina::Buenos_Aires), "Buenos_Aires");
        assert!(timezone("Buenos_Aires").is_ok());
        assert!(timezone("Indianapolis").is_ok());
        assert_eq!(timezone("UTC").unwrap(), Tz::UTC);
    }

    #[test]
    fn fixed_offsets() {
        assert_eq!(timezone_for_offset(3600), chrono_tz::Etc::GMTMinus1);
        assert_eq!(timezone_for_offset(-7200), chrono_tz::Etc::GMTPlus2);
        assert_eq!(timezone_for_offset(1800), Tz::UTC);
    }
}
