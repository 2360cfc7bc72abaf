//! Free/busy interval queries.
//!
//! Point-in-time status and discretized availability grids over per-attendee
//! interval lists. Precedence among overlapping intervals is
//! Busy > Tentative > OutOfOffice > Free, short-circuiting on Busy.

pub mod aggregate;

pub use aggregate::{
    AttendeeAvailability, AvailabilityGrid, FreeBusySource, collect_availability,
};

use chrono::{DateTime, Duration, Offset, TimeZone, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{SchedError, SchedResult};
use crate::event::FreeBusyStatus;

/// One availability interval for a single attendee, as produced by a
/// free/busy source. Consumed and discarded by the aggregator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FreeBusyInterval {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub status: FreeBusyStatus,
}

impl FreeBusyInterval {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>, status: FreeBusyStatus) -> Self {
        FreeBusyInterval { start, end, status }
    }

    fn overlaps(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        self.start < end && self.end > start
    }

    /// All-day intervals are stored spanning exactly 00:00:00-23:59:59 UTC
    /// (possibly across several days).
    fn is_all_day(&self) -> bool {
        self.start.time().num_seconds_from_midnight() == 0
            && self.end.time().num_seconds_from_midnight() == 23 * 3600 + 59 * 60 + 59
    }
}

/// Status of the query range: Free when nothing overlaps, otherwise the
/// highest-precedence status among overlapping intervals.
pub fn point_status(
    intervals: &[FreeBusyInterval],
    query_start: DateTime<Utc>,
    query_end: DateTime<Utc>,
) -> FreeBusyStatus {
    let mut dominant = FreeBusyStatus::Free;
    for interval in intervals {
        if !interval.overlaps(query_start, query_end) {
            continue;
        }
        if interval.status == FreeBusyStatus::Busy {
            return FreeBusyStatus::Busy;
        }
        if interval.status.rank() > dominant.rank() {
            dominant = interval.status;
        }
    }
    dominant
}

/// Partition `[window_start, window_end)` into fixed slots of
/// `slot_minutes` and compute the dominant status per slot.
///
/// All-day source intervals are shifted by the viewer's UTC offset (taken
/// from `viewer_tz` at the window start) so they align with the viewer's
/// local day boundaries.
pub fn grid(
    intervals: &[FreeBusyInterval],
    window_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
    slot_minutes: u32,
    viewer_tz: chrono_tz::Tz,
) -> SchedResult<Vec<FreeBusyStatus>> {
    if slot_minutes == 0 {
        return Err(SchedError::Validation("slot size must be at least one minute".into()));
    }
    if window_end <= window_start {
        return Err(SchedError::Validation(format!(
            "window end {} must be after window start {}",
            window_end, window_start
        )));
    }

    let offset_secs = viewer_tz
        .offset_from_utc_datetime(&window_start.naive_utc())
        .fix()
        .local_minus_utc() as i64;

    let shifted: Vec<FreeBusyInterval> = intervals
        .iter()
        .map(|iv| {
            if iv.is_all_day() {
                FreeBusyInterval {
                    start: iv.start - Duration::seconds(offset_secs),
                    end: iv.end - Duration::seconds(offset_secs),
                    status: iv.status,
                }
            } else {
                iv.clone()
            }
        })
        .collect();

    let slot = Duration::minutes(slot_minutes as i64);
    let mut statuses = Vec::with_capacity(slot_count(window_start, window_end, slot_minutes));
    let mut cursor = window_start;
    while cursor < window_end {
        let slot_end = (cursor + slot).min(window_end);
        statuses.push(point_status(&shifted, cursor, slot_end));
        cursor = slot_end;
    }
    Ok(statuses)
}

/// Number of slots `grid` produces for the given window.
pub fn slot_count(window_start: DateTime<Utc>, window_end: DateTime<Utc>, slot_minutes: u32) -> usize {
    let minutes = (window_end - window_start).num_minutes().max(0) as u64;
    minutes.div_ceil(slot_minutes.max(1) as u64) as usize
}
