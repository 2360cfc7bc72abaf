//! Multi-attendee availability aggregation.
//!
//! Looks up free/busy data for every attendee concurrently and folds the
//! results into per-attendee slot grids. Lookups are independent reads: a
//! timed-out or failed source degrades that attendee's contribution to
//! `Unknown` instead of failing the aggregate.

use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use tracing::warn;

use crate::date_range::DateRange;
use crate::error::SchedResult;
use crate::event::{Attendee, FreeBusyStatus, Role};
use crate::freebusy::{FreeBusyInterval, grid, slot_count};

/// Source of free/busy data for a single identity. May fail or time out.
#[async_trait]
pub trait FreeBusySource: Send + Sync {
    async fn lookup(&self, identity: &str, window: &DateRange)
    -> SchedResult<Vec<FreeBusyInterval>>;
}

/// One attendee's discretized availability.
#[derive(Debug, Clone)]
pub struct AttendeeAvailability {
    pub attendee: Attendee,
    pub slots: Vec<FreeBusyStatus>,
}

impl AttendeeAvailability {
    /// Required attendees constrain slot search; optional ones do not.
    pub fn is_required(&self) -> bool {
        self.attendee.role != Role::OptParticipant
    }
}

/// Availability of a set of attendees over a fixed slot grid.
#[derive(Debug, Clone)]
pub struct AvailabilityGrid {
    pub window: DateRange,
    pub slot_minutes: u32,
    pub attendees: Vec<AttendeeAvailability>,
}

impl AvailabilityGrid {
    pub fn slot_count(&self) -> usize {
        slot_count(self.window.start_utc(), self.window.end_utc(), self.slot_minutes)
    }

    /// Whether any required attendee is non-free in the slot.
    pub fn required_busy(&self, slot: usize) -> bool {
        self.attendees
            .iter()
            .filter(|a| a.is_required())
            .any(|a| a.slots.get(slot).copied().is_some_and(FreeBusyStatus::is_non_free))
    }

    /// Whether every attendee, required or not, is non-free in the slot.
    pub fn all_busy(&self, slot: usize) -> bool {
        !self.attendees.is_empty()
            && self
                .attendees
                .iter()
                .all(|a| a.slots.get(slot).copied().is_some_and(FreeBusyStatus::is_non_free))
    }

    /// Dominant status of a slot across all attendees.
    pub fn slot_status(&self, slot: usize) -> FreeBusyStatus {
        let mut dominant = FreeBusyStatus::Free;
        for a in &self.attendees {
            if let Some(status) = a.slots.get(slot) {
                if *status == FreeBusyStatus::Busy {
                    return FreeBusyStatus::Busy;
                }
                if status.rank() > dominant.rank() {
                    dominant = *status;
                }
            }
        }
        dominant
    }
}

/// Collect availability grids for `attendees` over `window`.
///
/// All lookups are issued concurrently, each bounded by `lookup_timeout`.
/// Failures degrade to all-`Unknown` for that attendee.
pub async fn collect_availability(
    source: &dyn FreeBusySource,
    attendees: &[Attendee],
    window: &DateRange,
    slot_minutes: u32,
    viewer_tz: chrono_tz::Tz,
    lookup_timeout: Duration,
) -> SchedResult<AvailabilityGrid> {
    let start = window.start_utc();
    let end = window.end_utc();
    let slots = slot_count(start, end, slot_minutes);

    let lookups = attendees.iter().map(|attendee| async move {
        let result = tokio::time::timeout(lookup_timeout, source.lookup(&attendee.email, window)).await;
        let slots_for_attendee = match result {
            Ok(Ok(intervals)) => grid(&intervals, start, end, slot_minutes, viewer_tz)?,
            Ok(Err(e)) => {
                warn!(identity = %attendee.email, error = %e, "free/busy lookup failed; degrading to unknown");
                vec![FreeBusyStatus::Unknown; slots]
            }
            Err(_) => {
                warn!(identity = %attendee.email, timeout = ?lookup_timeout, "free/busy lookup timed out; degrading to unknown");
                vec![FreeBusyStatus::Unknown; slots]
            }
        };
        Ok::<AttendeeAvailability, crate::error::SchedError>(AttendeeAvailability {
            attendee: attendee.clone(),
            slots: slots_for_attendee,
        })
    });

    let collected: Vec<AttendeeAvailability> =
        join_all(lookups).await.into_iter().collect::<SchedResult<_>>()?;

    Ok(AvailabilityGrid {
        window: window.clone(),
        slot_minutes,
        attendees: collected,
    })
}
