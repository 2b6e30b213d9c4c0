//! Protocol version ranges.
//!
//! A [`VersionSpec`] is an inclusive range of protocol numbers with an
//! optional upper bound. Ranges are written as strings in declaration files:
//!
//! | Text   | Range            |
//! |--------|------------------|
//! | `"47"` | `47..=47`        |
//! | `"47-"`| `47..`           |
//! | `"-47"`| `0..=47`         |
//! | `"5-1"`| `1..=5` (swapped)|

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{ProtocolError, Result};

/// Inclusive protocol version range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VersionSpec {
    pub start: i32,
    pub end: Option<i32>,
}

impl VersionSpec {
    pub const fn new(start: i32, end: Option<i32>) -> Self {
        Self { start, end }
    }

    /// Single version
    pub const fn exact(version: i32) -> Self {
        Self::new(version, Some(version))
    }

    /// Everything from `start` upward
    pub const fn starting_at(start: i32) -> Self {
        Self::new(start, None)
    }

    /// Parse range text. A missing upper bound in `"-b"` form falls back to
    /// `ceiling`.
    pub fn parse(text: &str, ceiling: Option<i32>) -> Result<Self> {
        let text = text.trim();
        let number = |part: &str| -> Result<i32> {
            part.trim().parse::<i32>().map_err(|_| {
                ProtocolError::InvalidDeclaration(format!("invalid version range '{text}'"))
            })
        };

        let spec = match text.split_once('-') {
            None => Self::exact(number(text)?),
            Some(("", "")) => Self::new(0, ceiling),
            Some(("", end)) => Self::new(0, Some(number(end)?)),
            Some((start, "")) => Self::starting_at(number(start)?),
            Some((start, end)) => {
                let (a, b) = (number(start)?, number(end)?);
                Self::new(a.min(b), Some(a.max(b)))
            }
        };
        Ok(spec)
    }

    /// Whether `version` falls inside the range
    pub fn contains(&self, version: i32) -> bool {
        version >= self.start && self.end.map_or(true, |end| version <= end)
    }

    /// Whether the range text carried an explicit upper bound
    pub fn is_closed(&self) -> bool {
        self.end.is_some()
    }
}

/// Whether `version` falls inside any of `ranges`
pub fn check_version(version: i32, ranges: &[VersionSpec]) -> bool {
    ranges.iter().any(|range| range.contains(version))
}

impl fmt::Display for VersionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.end {
            Some(end) if end == self.start => write!(f, "{}", self.start),
            Some(end) => write!(f, "{}-{}", self.start, end),
            None => write!(f, "{}-", self.start),
        }
    }
}

impl FromStr for VersionSpec {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s, None)
    }
}

impl Serialize for VersionSpec {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for VersionSpec {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}
