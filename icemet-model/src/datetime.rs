use crate::error::{Error, Result};
use std::fmt;

/// A UTC millisecond instant, matching the database's `datetime(3)` resolution.
pub type Timestamp = i64;

/// A broken-down UTC timestamp with millisecond resolution.
///
/// Round-trips through the canonical string `YYYY-MM-DD HH:MM:SS.mmm` and through a
/// millisecond [`Timestamp`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DateTime {
    pub year: i32,
    pub month: u32,
    pub day: u32,
    pub hour: u32,
    pub min: u32,
    pub sec: u32,
    pub millis: u32,
}

impl DateTime {
    #[allow(clippy::too_many_arguments)]
    pub const fn new(year: i32, month: u32, day: u32, hour: u32, min: u32, sec: u32, millis: u32) -> Self {
        Self { year, month, day, hour, min, sec, millis }
    }

    #[cfg(feature = "chrono")]
    pub fn now() -> Self {
        Self::from_chrono(chrono::Utc::now())
    }

    #[cfg(feature = "chrono")]
    pub fn from_chrono(dt: chrono::DateTime<chrono::Utc>) -> Self {
        use chrono::{Datelike, Timelike};
        Self {
            year: dt.year(),
            month: dt.month(),
            day: dt.day(),
            hour: dt.hour(),
            min: dt.minute(),
            sec: dt.second(),
            millis: dt.timestamp_subsec_millis(),
        }
    }

    #[cfg(feature = "chrono")]
    pub fn to_chrono(self) -> Option<chrono::DateTime<chrono::Utc>> {
        use chrono::TimeZone;
        chrono::Utc
            .with_ymd_and_hms(self.year, self.month, self.day, self.hour, self.min, self.sec)
            .single()
            .map(|dt| dt + chrono::Duration::milliseconds(self.millis as i64))
    }

    /// Millisecond UNIX timestamp. Requires the `chrono` feature for the calendar math.
    #[cfg(feature = "chrono")]
    pub fn stamp(self) -> Timestamp {
        self.to_chrono().map(|dt| dt.timestamp_millis()).unwrap_or(0)
    }

    #[cfg(feature = "chrono")]
    pub fn from_stamp(stamp: Timestamp) -> Self {
        use chrono::TimeZone;
        let dt = chrono::Utc.timestamp_millis_opt(stamp).single().unwrap_or_default();
        Self::from_chrono(dt)
    }

    /// Canonical round-trip string `YYYY-MM-DD HH:MM:SS.mmm`.
    pub fn to_canonical_string(&self) -> String {
        format!(
            "{:04}-{:02}-{:02} {:02}:{:02}:{:02}.{:03}",
            self.year, self.month, self.day, self.hour, self.min, self.sec, self.millis
        )
    }

    pub fn from_canonical_string(s: &str) -> Result<Self> {
        let (date, rest) = s.split_once(' ').ok_or_else(|| Error::InvalidDateTime(s.to_string()))?;
        let mut date_parts = date.split('-');
        let year: i32 = date_parts
            .next()
            .and_then(|v| v.parse().ok())
            .ok_or_else(|| Error::InvalidDateTime(s.to_string()))?;
        let month: u32 = date_parts
            .next()
            .and_then(|v| v.parse().ok())
            .ok_or_else(|| Error::InvalidDateTime(s.to_string()))?;
        let day: u32 = date_parts
            .next()
            .and_then(|v| v.parse().ok())
            .ok_or_else(|| Error::InvalidDateTime(s.to_string()))?;

        let (time, millis) = rest.split_once('.').ok_or_else(|| Error::InvalidDateTime(s.to_string()))?;
        let millis: u32 = millis.parse().map_err(|_| Error::InvalidDateTime(s.to_string()))?;
        let mut time_parts = time.split(':');
        let hour: u32 = time_parts
            .next()
            .and_then(|v| v.parse().ok())
            .ok_or_else(|| Error::InvalidDateTime(s.to_string()))?;
        let min: u32 = time_parts
            .next()
            .and_then(|v| v.parse().ok())
            .ok_or_else(|| Error::InvalidDateTime(s.to_string()))?;
        let sec: u32 = time_parts
            .next()
            .and_then(|v| v.parse().ok())
            .ok_or_else(|| Error::InvalidDateTime(s.to_string()))?;

        Ok(Self { year, month, day, hour, min, sec, millis })
    }
}

impl Default for DateTime {
    fn default() -> Self {
        Self { year: 1970, month: 1, day: 1, hour: 0, min: 0, sec: 0, millis: 0 }
    }
}

impl fmt::Display for DateTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_canonical_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_string_round_trips() {
        let dt = DateTime::new(2023, 6, 18, 14, 5, 9, 123);
        let s = dt.to_canonical_string();
        assert_eq!(s, "2023-06-18 14:05:09.123");
        assert_eq!(DateTime::from_canonical_string(&s).unwrap(), dt);
    }

    #[test]
    fn ordering_is_chronological() {
        let a = DateTime::new(2023, 6, 18, 14, 5, 9, 0);
        let b = DateTime::new(2023, 6, 18, 14, 5, 10, 0);
        assert!(a < b);
    }
}
