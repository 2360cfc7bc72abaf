//! Reschedule detection.
//!
//! Decides whether an edit changes scheduling-relevant properties — the
//! trigger for resetting attendee participation and re-requesting replies.

use crate::event::{Event, EventTime, RecurrenceRule};

/// Compare old and new snapshots on the scheduling-relevant property set
/// {start, end, location, recurrence}.
///
/// All-day events compare calendar dates only. The recurrence comparison
/// ignores the exception overlay, and a rule that is merely shortened
/// (count decreased or until moved earlier, all else equal) does not count
/// as a reschedule: nobody's remaining occurrences moved.
pub fn is_reschedule(old: &Event, new: &Event) -> bool {
    if time_differs(old, &old.start, new, &new.start)
        || time_differs(old, &old.end, new, &new.end)
    {
        return true;
    }

    if normalized(&old.location) != normalized(&new.location) {
        return true;
    }

    match (&old.recurrence, &new.recurrence) {
        (None, None) => false,
        (Some(old_rule), Some(new_rule)) => {
            let old_rule = old_rule.without_exceptions();
            let new_rule = new_rule.without_exceptions();
            if old_rule == new_rule {
                false
            } else {
                !merely_shortened(&old_rule, &new_rule)
            }
        }
        _ => true,
    }
}

fn time_differs(old: &Event, old_time: &EventTime, new: &Event, new_time: &EventTime) -> bool {
    if old.is_allday() && new.is_allday() {
        old_time.date() != new_time.date()
    } else {
        old_time != new_time
    }
}

fn normalized(location: &Option<String>) -> Option<&str> {
    location
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// True when `new` is the same rule with a tighter bound: a lower count, or
/// an earlier until, with every other structural field unchanged.
fn merely_shortened(old: &RecurrenceRule, new: &RecurrenceRule) -> bool {
    let structurally_equal = RecurrenceRule {
        count: old.count,
        until: old.until.clone(),
        ..new.clone()
    } == *old;
    if !structurally_equal {
        return false;
    }

    let count_shortened = match (old.count, new.count) {
        (Some(o), Some(n)) => n < o,
        (None, Some(_)) => true,
        _ => false,
    };
    let until_shortened = match (&old.until, &new.until) {
        (Some(o), Some(n)) => n.to_utc_end() < o.to_utc_end(),
        (None, Some(_)) => true,
        _ => false,
    };

    // Exactly one bound may tighten; the other must be untouched.
    (count_shortened && old.until == new.until)
        || (until_shortened && old.count == new.count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeZone, Utc};
    use crate::event::{EventStatus, Frequency};

    fn dt(d: u32, h: u32) -> EventTime {
        EventTime::DateTime(Utc.with_ymd_and_hms(2024, 1, d, h, 0, 0).unwrap())
    }

    fn base() -> Event {
        let mut event = Event::new("sync", dt(10, 9), dt(10, 10));
        event.uid = "ev".into();
        event
    }

    #[test]
    fn test_start_change_is_a_reschedule() {
        let old = base();
        let mut new = old.clone();
        new.start = dt(10, 10);
        assert!(is_reschedule(&old, &new));
    }

    #[test]
    fn test_cosmetic_changes_are_not_a_reschedule() {
        let old = base();
        let mut new = old.clone();
        new.summary = "renamed".into();
        new.description = Some("notes".into());
        new.categories = vec!["x".into()];
        new.status = EventStatus::Tentative;
        assert!(!is_reschedule(&old, &new));
    }

    #[test]
    fn test_location_change_is_a_reschedule() {
        let old = base();
        let mut new = old.clone();
        new.location = Some("room 2".into());
        assert!(is_reschedule(&old, &new));
    }

    #[test]
    fn test_blank_location_equals_absent_location() {
        let mut old = base();
        old.location = Some("  ".into());
        let mut new = old.clone();
        new.location = None;
        assert!(!is_reschedule(&old, &new));
    }

    #[test]
    fn test_allday_compares_dates_not_times() {
        let mut old = base();
        old.start = EventTime::Date(NaiveDate::from_ymd_opt(2024, 1, 10).unwrap());
        old.end = EventTime::Date(NaiveDate::from_ymd_opt(2024, 1, 10).unwrap());
        let new = old.clone();
        assert!(!is_reschedule(&old, &new));

        let mut moved = old.clone();
        moved.start = EventTime::Date(NaiveDate::from_ymd_opt(2024, 1, 11).unwrap());
        moved.end = EventTime::Date(NaiveDate::from_ymd_opt(2024, 1, 11).unwrap());
        assert!(is_reschedule(&old, &moved));
    }

    #[test]
    fn test_exception_edits_do_not_count() {
        let mut old = base();
        old.recurrence = Some(RecurrenceRule::new(Frequency::Daily).with_count(10));
        let mut new = old.clone();
        new.recurrence
            .as_mut()
            .unwrap()
            .exceptions
            .insert(
                NaiveDate::from_ymd_opt(2024, 1, 12).unwrap(),
                crate::event::RecurrenceException {
                    this_and_future: false,
                    patch: crate::event::EventPatch::default(),
                },
            );
        assert!(
            !is_reschedule(&old, &new),
            "the exception subtree is ignored"
        );
    }

    #[test]
    fn test_shortened_rule_is_not_a_reschedule() {
        let mut old = base();
        old.recurrence = Some(RecurrenceRule::new(Frequency::Daily).with_count(10));
        let mut new = old.clone();
        new.recurrence.as_mut().unwrap().count = Some(5);
        assert!(!is_reschedule(&old, &new), "count decrease only shortens");

        let mut lengthened = old.clone();
        lengthened.recurrence.as_mut().unwrap().count = Some(20);
        assert!(is_reschedule(&old, &lengthened), "count increase reschedules");
    }

    #[test]
    fn test_until_moved_earlier_is_not_a_reschedule() {
        let mut old = base();
        old.recurrence = Some(
            RecurrenceRule::new(Frequency::Daily)
                .with_until(EventTime::Date(NaiveDate::from_ymd_opt(2024, 2, 1).unwrap())),
        );
        let mut new = old.clone();
        new.recurrence.as_mut().unwrap().until =
            Some(EventTime::Date(NaiveDate::from_ymd_opt(2024, 1, 20).unwrap()));
        assert!(!is_reschedule(&old, &new));
    }

    #[test]
    fn test_interval_change_is_a_reschedule() {
        let mut old = base();
        old.recurrence = Some(RecurrenceRule::new(Frequency::Daily).with_count(10));
        let mut new = old.clone();
        new.recurrence.as_mut().unwrap().interval = 2;
        new.recurrence.as_mut().unwrap().count = Some(5);
        assert!(
            is_reschedule(&old, &new),
            "interval changed alongside the count: not merely shortened"
        );
    }
}
