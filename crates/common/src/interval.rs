use std::str::FromStr;

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::Error;

/// Supported bar sampling intervals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Interval {
    M1,
    M3,
    M5,
    M15,
    M30,
    H1,
    H2,
    H4,
    H6,
    H12,
    D1,
    W1,
}

impl Interval {
    pub const ALL: [Interval; 12] = [
        Interval::M1,
        Interval::M3,
        Interval::M5,
        Interval::M15,
        Interval::M30,
        Interval::H1,
        Interval::H2,
        Interval::H4,
        Interval::H6,
        Interval::H12,
        Interval::D1,
        Interval::W1,
    ];

    pub fn minutes(self) -> i64 {
        match self {
            Interval::M1 => 1,
            Interval::M3 => 3,
            Interval::M5 => 5,
            Interval::M15 => 15,
            Interval::M30 => 30,
            Interval::H1 => 60,
            Interval::H2 => 120,
            Interval::H4 => 240,
            Interval::H6 => 360,
            Interval::H12 => 720,
            Interval::D1 => 1440,
            Interval::W1 => 10_080,
        }
    }

    pub fn duration(self) -> Duration {
        Duration::minutes(self.minutes())
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Interval::M1 => "1m",
            Interval::M3 => "3m",
            Interval::M5 => "5m",
            Interval::M15 => "15m",
            Interval::M30 => "30m",
            Interval::H1 => "1h",
            Interval::H2 => "2h",
            Interval::H4 => "4h",
            Interval::H6 => "6h",
            Interval::H12 => "12h",
            Interval::D1 => "1d",
            Interval::W1 => "1w",
        }
    }

    /// Interval code used by the Bybit V5 kline endpoint.
    pub fn bybit_code(self) -> &'static str {
        match self {
            Interval::D1 => "D",
            Interval::W1 => "W",
            other => match other.minutes() {
                1 => "1",
                3 => "3",
                5 => "5",
                15 => "15",
                30 => "30",
                60 => "60",
                120 => "120",
                240 => "240",
                360 => "360",
                _ => "720",
            },
        }
    }

    /// Floor `ts` to the start of the interval containing it. Weeks start on
    /// Monday 00:00 UTC; everything shorter is epoch-aligned.
    pub fn floor(self, ts: DateTime<Utc>) -> DateTime<Utc> {
        let step = self.minutes() * 60;
        // 1970-01-01 was a Thursday; the first Monday is four days later.
        let origin = if self == Interval::W1 { MONDAY_OFFSET_SECS } else { 0 };
        let secs = (ts.timestamp() - origin).div_euclid(step) * step + origin;
        Utc.timestamp_opt(secs, 0).single().unwrap_or(ts)
    }
}

const MONDAY_OFFSET_SECS: i64 = 4 * 24 * 60 * 60;

/// Floor a timestamp to whole minutes, dropping seconds and sub-seconds.
pub fn floor_minute(ts: DateTime<Utc>) -> DateTime<Utc> {
    Interval::M1.floor(ts)
}

impl std::fmt::Display for Interval {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Interval {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        Interval::ALL
            .into_iter()
            .find(|i| i.as_str() == wanted)
            .ok_or_else(|| Error::Config(format!("unsupported sampling interval '{s}'")))
    }
}

impl TryFrom<String> for Interval {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Interval> for String {
    fn from(value: Interval) -> Self {
        value.as_str().to_string()
    }
}
