//! Date ranges and pagination windows for queries.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CalverError, CalverResult};

/// Half-open range `[from, to)`. `None` means unbounded in that direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

impl DateRange {
    pub fn new(from: DateTime<Utc>, to: DateTime<Utc>) -> CalverResult<Self> {
        let range = DateRange {
            from: Some(from),
            to: Some(to),
        };
        range.validate()?;
        Ok(range)
    }

    pub fn unbounded() -> Self {
        DateRange::default()
    }

    /// Parse optional query bounds. Each accepts RFC 3339 or `YYYY-MM-DD`
    /// (midnight UTC).
    pub fn from_args(from: Option<&str>, to: Option<&str>) -> CalverResult<Self> {
        let range = DateRange {
            from: from.map(parse_bound).transpose()?,
            to: to.map(parse_bound).transpose()?,
        };
        range.validate()?;
        Ok(range)
    }

    pub fn validate(&self) -> CalverResult<()> {
        match (self.from, self.to) {
            (Some(from), Some(to)) if to < from => Err(CalverError::Validation(
                "range end is before range start".into(),
            )),
            _ => Ok(()),
        }
    }

    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        self.from.is_none_or(|from| instant >= from) && self.to.is_none_or(|to| instant < to)
    }
}

fn parse_bound(s: &str) -> CalverResult<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    let date = NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|_| {
        CalverError::Validation(format!(
            "Invalid date '{}'. Expected YYYY-MM-DD or RFC 3339",
            s
        ))
    })?;
    Ok(date.and_time(chrono::NaiveTime::MIN).and_utc())
}

/// An offset/limit window over an ordered result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    pub offset: usize,
    pub limit: usize,
}

impl Page {
    pub fn new(offset: usize, limit: usize) -> Self {
        Page { offset, limit }
    }

    /// Build from optional query values, falling back to `default_limit`
    /// and never exceeding `max_limit`.
    pub fn from_args(
        offset: Option<usize>,
        limit: Option<usize>,
        default_limit: usize,
        max_limit: usize,
    ) -> Self {
        Page {
            offset: offset.unwrap_or(0),
            limit: limit.unwrap_or(default_limit).min(max_limit),
        }
    }
}
