//! Slot search over aggregated availability grids.

use chrono::{DateTime, Datelike, Duration, Timelike, Utc};

use crate::config::BusinessHours;
use crate::freebusy::AvailabilityGrid;

/// Direction of the slot scan relative to the anchor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchDirection {
    Forward,
    Backward,
}

/// Find a run of `duration_slots` consecutive slots in which no required
/// attendee is non-free, scanning from `anchor_slot` in `direction`.
///
/// Returns the first (lowest) slot index of the run, i.e. the start of the
/// bookable block, or `None` when no such run exists. When an `off_hours`
/// mask is supplied, a masked slot cannot participate in a run and resets
/// the running count.
pub fn find_slot(
    grid: &AvailabilityGrid,
    duration_slots: usize,
    anchor_slot: usize,
    direction: SearchDirection,
    off_hours: Option<&[bool]>,
) -> Option<usize> {
    let total = grid.slot_count();
    if duration_slots == 0 || total == 0 {
        return None;
    }

    let candidate = |slot: usize| -> bool {
        let masked = off_hours.is_some_and(|mask| mask.get(slot).copied().unwrap_or(false));
        !masked && !grid.required_busy(slot)
    };

    let mut run = 0usize;
    match direction {
        SearchDirection::Forward => {
            for slot in anchor_slot..total {
                if candidate(slot) {
                    run += 1;
                    if run >= duration_slots {
                        return Some(slot + 1 - duration_slots);
                    }
                } else {
                    run = 0;
                }
            }
        }
        SearchDirection::Backward => {
            for slot in (0..=anchor_slot.min(total - 1)).rev() {
                if candidate(slot) {
                    run += 1;
                    if run >= duration_slots {
                        return Some(slot);
                    }
                } else {
                    run = 0;
                }
            }
        }
    }
    None
}

/// Build an off-hours mask for a grid window: a slot is off-hours when its
/// start falls outside the configured work days or business hours, in the
/// viewer's timezone.
pub fn off_hours_mask(
    window_start: DateTime<Utc>,
    slot_minutes: u32,
    slots: usize,
    viewer_tz: chrono_tz::Tz,
    hours: &BusinessHours,
) -> Vec<bool> {
    (0..slots)
        .map(|k| {
            let slot_start =
                window_start + Duration::minutes(k as i64 * slot_minutes as i64);
            let local = slot_start.with_timezone(&viewer_tz);
            let weekday = local.weekday().number_from_monday() as u8;
            let hour = local.hour();
            let working = hours.work_days.contains(&weekday)
                && hour >= hours.first_hour
                && hour < hours.last_hour;
            !working
        })
        .collect()
}
