//! Common types used throughout the data platform

use crate::error::{Error, Result};
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Candle timeframe (interval length)
///
/// Each variant corresponds to one of the supported candle tables in the
/// time-series store. Timestamps of persisted candles are always aligned to
/// the timeframe boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Timeframe {
    #[serde(rename = "1m")]
    M1,
    #[serde(rename = "5m")]
    M5,
    #[serde(rename = "15m")]
    M15,
    #[serde(rename = "30m")]
    M30,
    #[serde(rename = "1h")]
    H1,
    #[serde(rename = "4h")]
    H4,
    #[serde(rename = "1d")]
    D1,
}

impl Timeframe {
    /// All supported timeframes, shortest first
    pub const ALL: [Timeframe; 7] = [
        Timeframe::M1,
        Timeframe::M5,
        Timeframe::M15,
        Timeframe::M30,
        Timeframe::H1,
        Timeframe::H4,
        Timeframe::D1,
    ];

    /// Returns the canonical string form (e.g. "1m", "1h")
    pub fn as_str(&self) -> &'static str {
        match self {
            Timeframe::M1 => "1m",
            Timeframe::M5 => "5m",
            Timeframe::M15 => "15m",
            Timeframe::M30 => "30m",
            Timeframe::H1 => "1h",
            Timeframe::H4 => "4h",
            Timeframe::D1 => "1d",
        }
    }

    /// Interval length in minutes
    pub fn minutes(&self) -> i64 {
        match self {
            Timeframe::M1 => 1,
            Timeframe::M5 => 5,
            Timeframe::M15 => 15,
            Timeframe::M30 => 30,
            Timeframe::H1 => 60,
            Timeframe::H4 => 240,
            Timeframe::D1 => 1440,
        }
    }

    /// Interval length as a std Duration
    pub fn duration(&self) -> Duration {
        Duration::from_secs(self.minutes() as u64 * 60)
    }

    /// Interval length as a chrono Duration
    pub fn chrono_duration(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.minutes())
    }

    /// Candle table backing this timeframe.
    ///
    /// Only 1m, 5m and 1h are materialized; other timeframes read from the
    /// 1m table.
    pub fn table(&self) -> &'static str {
        match self {
            Timeframe::M1 => "candles_1m",
            Timeframe::M5 => "candles_5m",
            Timeframe::H1 => "candles_1h",
            _ => "candles_1m",
        }
    }

    /// Start of the interval currently open at `now`.
    ///
    /// Candle queries must exclude everything at or after this boundary so
    /// that the open (still accumulating) interval never reaches downstream
    /// computation.
    pub fn start_of_current_interval(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let secs = self.minutes() * 60;
        let aligned = now.timestamp() - now.timestamp().rem_euclid(secs);
        Utc.timestamp_opt(aligned, 0).single().unwrap_or(now)
    }

    /// Whether `timestamp` falls exactly on an interval boundary
    pub fn is_aligned(&self, timestamp: DateTime<Utc>) -> bool {
        timestamp.timestamp().rem_euclid(self.minutes() * 60) == 0
            && timestamp.timestamp_subsec_nanos() == 0
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Timeframe {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "1m" => Ok(Timeframe::M1),
            "5m" => Ok(Timeframe::M5),
            "15m" => Ok(Timeframe::M15),
            "30m" => Ok(Timeframe::M30),
            "1h" => Ok(Timeframe::H1),
            "4h" => Ok(Timeframe::H4),
            "1d" => Ok(Timeframe::D1),
            other => Err(Error::UnsupportedTimeframe(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_timeframe_roundtrip() {
        for tf in Timeframe::ALL {
            let parsed: Timeframe = tf.as_str().parse().unwrap();
            assert_eq!(parsed, tf);
        }
    }

    #[test]
    fn test_timeframe_parse_invalid() {
        assert!("2m".parse::<Timeframe>().is_err());
        assert!("".parse::<Timeframe>().is_err());
    }

    #[test]
    fn test_timeframe_minutes() {
        assert_eq!(Timeframe::M1.minutes(), 1);
        assert_eq!(Timeframe::H1.minutes(), 60);
        assert_eq!(Timeframe::D1.minutes(), 1440);
    }

    #[test]
    fn test_timeframe_table_mapping() {
        assert_eq!(Timeframe::M1.table(), "candles_1m");
        assert_eq!(Timeframe::M5.table(), "candles_5m");
        assert_eq!(Timeframe::H1.table(), "candles_1h");
        assert_eq!(Timeframe::M15.table(), "candles_1m");
    }

    #[test]
    fn test_start_of_current_interval() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 12, 34, 56).unwrap();

        let start_1m = Timeframe::M1.start_of_current_interval(now);
        assert_eq!(start_1m, Utc.with_ymd_and_hms(2024, 1, 1, 12, 34, 0).unwrap());

        let start_5m = Timeframe::M5.start_of_current_interval(now);
        assert_eq!(start_5m, Utc.with_ymd_and_hms(2024, 1, 1, 12, 30, 0).unwrap());

        let start_1h = Timeframe::H1.start_of_current_interval(now);
        assert_eq!(start_1h, Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap());

        let start_1d = Timeframe::D1.start_of_current_interval(now);
        assert_eq!(start_1d, Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
    }

    #[test]
    fn test_start_of_interval_idempotent_on_boundary() {
        let boundary = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        assert_eq!(Timeframe::H1.start_of_current_interval(boundary), boundary);
        assert!(Timeframe::H1.is_aligned(boundary));
        assert!(!Timeframe::H1.is_aligned(boundary + chrono::Duration::seconds(1)));
    }

    #[test]
    fn test_serde_rename() {
        let json = serde_json::to_string(&Timeframe::H4).unwrap();
        assert_eq!(json, "\"4h\"");
        let back: Timeframe = serde_json::from_str("\"15m\"").unwrap();
        assert_eq!(back, Timeframe::M15);
    }
}
