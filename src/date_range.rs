//! Date range for windowed queries.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{SchedError, SchedResult};

/// Default half-width of the implicit query window, in days.
pub const DEFAULT_WINDOW_DAYS: i64 = 60;

/// Query window for events and free/busy lookups.
/// None values mean unbounded in that direction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DateRange {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

impl Default for DateRange {
    /// Default range: ±DEFAULT_WINDOW_DAYS from now
    fn default() -> Self {
        let now = Utc::now();
        DateRange {
            from: Some(now - Duration::days(DEFAULT_WINDOW_DAYS)),
            to: Some(now + Duration::days(DEFAULT_WINDOW_DAYS)),
        }
    }
}

impl DateRange {
    pub fn new(from: DateTime<Utc>, to: DateTime<Utc>) -> SchedResult<Self> {
        if to <= from {
            return Err(SchedError::Validation(format!(
                "window end {} must be after window start {}",
                to, from
            )));
        }
        Ok(DateRange {
            from: Some(from),
            to: Some(to),
        })
    }

    /// Parse a pair of date strings into a DateRange.
    /// - `from`: "start" for unbounded, or YYYY-MM-DD
    /// - `to`: YYYY-MM-DD, defaults to +DEFAULT_WINDOW_DAYS if not specified
    pub fn from_args(from: Option<&str>, to: Option<&str>) -> SchedResult<Self> {
        let now = Utc::now();

        let from_dt = match from {
            Some("start") => None, // Unbounded past
            Some(s) => Some(parse_date_start(s)?),
            None => Some(now - Duration::days(DEFAULT_WINDOW_DAYS)),
        };

        let to_dt = match to {
            Some(s) => Some(parse_date_end(s)?),
            None => Some(now + Duration::days(DEFAULT_WINDOW_DAYS)),
        };

        Ok(DateRange {
            from: from_dt,
            to: to_dt,
        })
    }

    /// Lower bound, using a very old instant if unbounded.
    pub fn start_utc(&self) -> DateTime<Utc> {
        self.from.unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
    }

    /// Upper bound, using a far-future instant if unbounded.
    pub fn end_utc(&self) -> DateTime<Utc> {
        self.to.unwrap_or_else(|| {
            NaiveDate::from_ymd_opt(2100, 1, 1)
                .unwrap()
                .and_hms_opt(0, 0, 0)
                .unwrap()
                .and_utc()
        })
    }

    /// Whether `[start, end)` overlaps this window.
    pub fn overlaps(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        end > self.start_utc() && start < self.end_utc()
    }
}

/// Parse YYYY-MM-DD as start of day in UTC
fn parse_date_start(s: &str) -> SchedResult<DateTime<Utc>> {
    let date = NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|_| {
        SchedError::Validation(format!("Invalid date format '{}'. Expected YYYY-MM-DD", s))
    })?;
    Ok(date.and_hms_opt(0, 0, 0).unwrap().and_utc())
}

/// Parse YYYY-MM-DD as end of day in UTC
fn parse_date_end(s: &str) -> SchedResult<DateTime<Utc>> {
    let date = NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|_| {
        SchedError::Validation(format!("Invalid date format '{}'. Expected YYYY-MM-DD", s))
    })?;
    Ok(date.and_hms_opt(23, 59, 59).unwrap().and_utc())
}
