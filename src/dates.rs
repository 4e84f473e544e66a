use std::fmt::Display;

use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, TimeZone};

/// A date that may not be known.  Used for both the upstream update date of a
/// dataset and the creation date of a database, so that "unknown" is an
/// explicit branch rather than a missing value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateStatus {
    Known(NaiveDate),
    Unknown,
}

impl DateStatus {
    pub fn known(&self) -> Option<NaiveDate> {
        match self {
            DateStatus::Known(date) => Some(*date),
            DateStatus::Unknown => None,
        }
    }

    /// Parse a feed timestamp like `2024-01-01T10:15:00`.  Anything else is unknown.
    pub fn parse_timestamp(value: &str) -> DateStatus {
        match NaiveDateTime::parse_from_str(value.trim(), "%Y-%m-%dT%H:%M:%S") {
            Ok(dt) => DateStatus::Known(dt.date()),
            Err(_) => DateStatus::Unknown,
        }
    }

    /// Local calendar date of a server timestamp.
    pub fn from_timestamp<Tz: TimeZone>(value: Option<DateTime<Tz>>) -> DateStatus {
        match value {
            Some(ts) => DateStatus::Known(ts.with_timezone(&Local).date_naive()),
            None => DateStatus::Unknown,
        }
    }
}

impl Display for DateStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DateStatus::Known(date) => write!(f, "{}", date),
            DateStatus::Unknown => write!(f, "unknown"),
        }
    }
}
