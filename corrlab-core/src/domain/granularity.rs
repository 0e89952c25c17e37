//! Sampling granularity of a price or return series.

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Bar spacing. Daily timestamps are midnight of the trading date.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Granularity {
    #[default]
    Daily,
    Minute,
}

impl Granularity {
    pub const ALL: [Granularity; 2] = [Granularity::Daily, Granularity::Minute];

    /// Directory / config name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Granularity::Daily => "daily",
            Granularity::Minute => "minute",
        }
    }

    /// Name of the timestamp column in persisted tables.
    pub fn index_label(&self) -> &'static str {
        match self {
            Granularity::Daily => "Date",
            Granularity::Minute => "Datetime",
        }
    }

    /// Interval parameter understood by the Yahoo chart API.
    pub fn provider_interval(&self) -> &'static str {
        match self {
            Granularity::Daily => "1d",
            Granularity::Minute => "1m",
        }
    }

    pub fn format_timestamp(&self, ts: NaiveDateTime) -> String {
        match self {
            Granularity::Daily => ts.format("%Y-%m-%d").to_string(),
            Granularity::Minute => ts.format("%Y-%m-%d %H:%M:%S").to_string(),
        }
    }

    /// Parse a timestamp written by [`Granularity::format_timestamp`].
    ///
    /// Both layouts are accepted regardless of granularity so hand-edited
    /// files with a date-only minute index still load.
    pub fn parse_timestamp(s: &str) -> Option<NaiveDateTime> {
        let s = s.trim();
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
            .ok()
            .or_else(|| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S").ok())
            .or_else(|| {
                NaiveDate::parse_from_str(s, "%Y-%m-%d")
                    .ok()
                    .and_then(|d| d.and_hms_opt(0, 0, 0))
            })
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Granularity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "daily" | "1d" => Ok(Granularity::Daily),
            "minute" | "minutes" | "1m" => Ok(Granularity::Minute),
            other => Err(format!("unknown granularity '{other}' (expected daily or minute)")),
        }
    }
}
