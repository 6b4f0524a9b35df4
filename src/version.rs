//! Project Haystack version numbers.
//!
//! Haystack uses a plain `Major.Minor` scheme. Versions are compared the way
//! Debian compares them: each dotted group of digits numerically, padding the
//! shorter one with zeros, then any trailing text lexically. A version without
//! trailing text sorts first, so `2.0 == 2.0.0 < 2.0a < 2.0b < 3.0`.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

// used to split the dotted digits from the trailing text
use lazy_static::lazy_static;
use regex::Regex;
use tracing::warn;

use crate::error::{HaystackError, Result};

lazy_static! {
    static ref VERSION_RE: Regex = Regex::new(r"^(\d[\d.]*)(\D.*)?$").unwrap();
}

#[derive(Debug, Clone)]
pub struct Version {
    nums: Vec<u32>,
    extra: Option<String>,
}

impl Version {
    pub fn new(major: u32, minor: u32) -> Self {
        Self { nums: vec![major, minor], extra: None }
    }
    pub fn v2() -> Self {
        Self::new(2, 0)
    }
    pub fn v3() -> Self {
        Self::new(3, 0)
    }
    /// The most recent version this crate knows how to read and write.
    pub fn latest() -> Self {
        Self::v3()
    }
    pub fn official() -> [Version; 2] {
        [Self::v2(), Self::v3()]
    }
    pub fn is_official(&self) -> bool {
        Self::official().iter().any(|v| v == self)
    }

    /// Retrieve the official version nearest the one given: the exact match,
    /// else the closest older one, else the closest newer one. Falling back
    /// logs a warning.
    pub fn nearest(&self) -> Version {
        let versions = Self::official();
        if let Some(exact) = versions.iter().find(|v| *v == self) {
            return exact.clone();
        }
        if let Some(older) = versions.iter().filter(|v| *v < self).max() {
            warn!(requested=%self, closest=%older, "unsupported Haystack version, using older one");
            return older.clone();
        }
        let newer = versions
            .iter()
            .filter(|v| *v > self)
            .min()
            .cloned()
            .unwrap_or_else(Self::latest);
        warn!(requested=%self, closest=%newer, "unsupported Haystack version, using newer one");
        newer
    }

    fn padded(&self, len: usize) -> impl Iterator<Item = u32> + '_ {
        self.nums.iter().copied().chain(std::iter::repeat(0)).take(len)
    }
}

impl FromStr for Version {
    type Err = HaystackError;
    fn from_str(s: &str) -> Result<Self> {
        let caps = VERSION_RE
            .captures(s)
            .ok_or_else(|| HaystackError::InvalidValue(format!("Not a valid version string: {s:?}")))?;
        let nums = caps[1]
            .split('.')
            .map(|p| if p.is_empty() { Ok(0) } else { p.parse::<u32>() })
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|_| HaystackError::InvalidValue(format!("Not a valid version string: {s:?}")))?;
        let extra = caps.get(2).map(|m| m.as_str().to_string());
        Ok(Self { nums, extra })
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let nums: Vec<String> = self.nums.iter().map(|n| n.to_string()).collect();
        write!(f, "{}", nums.join("."))?;
        if let Some(extra) = &self.extra {
            write!(f, "{extra}")?;
        }
        Ok(())
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        let len = self.nums.len().max(other.nums.len());
        for (a, b) in self.padded(len).zip(other.padded(len)) {
            match a.cmp(&b) {
                Ordering::Equal => continue,
                unequal => return unequal,
            }
        }
        // a missing extra part comes first
        match (&self.extra, &other.extra) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Less,
            (Some(_), None) => Ordering::Greater,
            (Some(a), Some(b)) => a.cmp(b),
        }
    }
}
impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}
impl Eq for Version {}

impl Default for Version {
    fn default() -> Self {
        Self::latest()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn padding_and_extra() {
        let v = |s: &str| s.parse::<Version>().unwrap();
        assert_eq!(v("2.0"), v("2.0.0"));
        assert!(v("2.0") < v("2.0a"));
        assert!(v("2.0a") < v("2.0b"));
        assert!(v("2.0b") < v("3.0"));
        assert_eq!(v("3.0").to_string(), "3.0");
        assert!("x.0".parse::<Version>().is_err());
    }

    #[test]
    fn nearest_version() {
        let v = |s: &str| s.parse::<Version>().unwrap();
        assert_eq!(v("3.0").nearest(), Version::v3());
        assert_eq!(v("2.0.0").nearest(), Version::v2());
        assert_eq!(v("2.5").nearest(), Version::v2());
        assert_eq!(v("4.0").nearest(), Version::v3());
        assert_eq!(v("1.0").nearest(), Version::v2());
    }
}
