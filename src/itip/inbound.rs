//! Inbound scheduling message handling.
//!
//! REPLY application on the organizer's copy, and REQUEST/CANCEL import on
//! an attendee's copy. Every update is gated by the `(sequence, changed)`
//! ordering guard: an inbound snapshot older than the stored one is
//! rejected with `StaleWrite` and leaves the stored copy untouched.

use std::collections::BTreeSet;

use chrono::Utc;
use tracing::debug;

use crate::error::{SchedError, SchedResult};
use crate::event::{Attendee, Event, EventPatch, EventStatus, FreeBusyStatus, ParticipationStatus};
use crate::itip::{Method, record_instance_override};

/// Enforce the stale-update guard: accept only when the incoming revision
/// is at least the stored one.
pub fn guard_revision(stored: &Event, incoming: &Event) -> SchedResult<()> {
    if incoming.revision() < stored.revision() {
        return Err(SchedError::StaleWrite(format!(
            "event '{}': incoming revision {:?} predates stored {:?}",
            stored.uid,
            incoming.revision(),
            stored.revision()
        )));
    }
    Ok(())
}

/// Apply an attendee REPLY to the organizer's stored copy.
///
/// Locates the replying attendee by case-insensitive email and copies the
/// participation status and rsvp flag. Delegation is followed: a DELEGATED
/// reply attaches the delegatee entry, and a delegatee's DECLINED reply
/// re-opens the delegator's rsvp so the organizer hears about it.
///
/// Returns false when the replier is unknown to the stored copy.
pub fn apply_reply(stored: &mut Event, incoming: &Event) -> SchedResult<bool> {
    guard_revision(stored, incoming)?;

    let replier = incoming
        .attendees
        .first()
        .ok_or_else(|| SchedError::Validation("reply carries no attendee".into()))?;

    let updated = apply_reply_to_attendees(&mut stored.attendees, replier, &incoming.attendees);
    if updated {
        stored.changed = Some(Utc::now());
    } else {
        debug!(uid = %stored.uid, replier = %replier.email, "reply from unknown attendee ignored");
    }
    Ok(updated)
}

/// Apply a REPLY that targets a single occurrence of a recurring event.
///
/// The master's series-wide attendee list is left alone; the updated list
/// is materialized as an exception entry keyed by the occurrence date.
pub fn apply_reply_to_instance(
    stored: &mut Event,
    instance_id: &str,
    incoming: &Event,
) -> SchedResult<bool> {
    guard_revision(stored, incoming)?;

    let replier = incoming
        .attendees
        .first()
        .ok_or_else(|| SchedError::Validation("reply carries no attendee".into()))?;

    let rule = stored.recurrence.as_ref().ok_or_else(|| {
        SchedError::Validation(format!("event '{}' is not recurring", stored.uid))
    })?;

    let date = crate::itip::parse_instance_date(instance_id)?;
    let mut attendees = rule
        .exceptions
        .get(&date)
        .and_then(|e| e.patch.attendees.clone())
        .unwrap_or_else(|| stored.attendees.clone());

    let updated = apply_reply_to_attendees(&mut attendees, replier, &incoming.attendees);
    if updated {
        let this_and_future = rule
            .exceptions
            .get(&date)
            .map(|e| e.this_and_future)
            .unwrap_or(false);
        let mut patch = rule
            .exceptions
            .get(&date)
            .map(|e| e.patch.clone())
            .unwrap_or_else(EventPatch::default);
        patch.attendees = Some(attendees);
        record_instance_override(stored, instance_id, patch, this_and_future)?;
        stored.changed = Some(Utc::now());
    }
    Ok(updated)
}

fn apply_reply_to_attendees(
    attendees: &mut Vec<Attendee>,
    replier: &Attendee,
    incoming: &[Attendee],
) -> bool {
    let index = match attendees.iter().position(|a| a.matches_email(&replier.email)) {
        Some(index) => index,
        None => {
            // A delegatee may reply before the organizer ever saw them.
            if replier.delegated_from.is_none() {
                return false;
            }
            attendees.push(replier.clone());
            attendees.len() - 1
        }
    };

    let entry = &mut attendees[index];
    entry.status = replier.status;
    entry.rsvp = replier.rsvp;
    if replier.status == ParticipationStatus::Delegated {
        entry.delegated_to = replier.delegated_to.clone();
    }

    if replier.status == ParticipationStatus::Delegated {
        // Attach the delegatee entry carried alongside the reply.
        let delegatee = incoming.iter().find(|a| {
            a.delegated_from
                .as_deref()
                .is_some_and(|from| replier.matches_email(from))
        });
        if let Some(delegatee) = delegatee {
            match attendees.iter_mut().find(|a| a.matches_email(&delegatee.email)) {
                Some(existing) => *existing = delegatee.clone(),
                None => attendees.push(delegatee.clone()),
            }
        }
    }

    if replier.status == ParticipationStatus::Declined {
        // A declined delegation re-opens the delegator's reply loop.
        if let Some(from) = replier.delegated_from.clone() {
            if let Some(delegator) = attendees.iter_mut().find(|a| a.matches_email(&from)) {
                delegator.rsvp = true;
            }
        }
    }

    true
}

/// Import an inbound REQUEST or CANCEL on the attendee side.
///
/// With no local copy, a REQUEST creates one. With a local copy, the update
/// is accepted only under the revision guard, and the local identity's own
/// participation status is preserved: an inbound REQUEST never silently
/// overwrites a reply already recorded locally. CANCEL marks the local copy
/// cancelled and frees its time.
pub fn import_request(
    local: Option<&Event>,
    incoming: &Event,
    method: Method,
    own_emails: &BTreeSet<String>,
) -> SchedResult<Event> {
    let local = match local {
        None => {
            if method == Method::Cancel {
                return Err(SchedError::EventNotFound(incoming.uid.clone()));
            }
            incoming.validate()?;
            debug!(uid = %incoming.uid, "importing new event copy");
            return Ok(incoming.clone());
        }
        Some(local) => local,
    };

    guard_revision(local, incoming)?;

    let mut merged = incoming.clone();
    for email in own_emails {
        if let Some(own) = local.find_attendee(email) {
            if let Some(entry) = merged.find_attendee_mut(email) {
                entry.status = own.status;
                entry.rsvp = own.rsvp;
            }
        }
    }

    if method == Method::Cancel {
        merged.status = EventStatus::Cancelled;
        merged.free_busy = FreeBusyStatus::Free;
    }
    merged.changed = Some(Utc::now());

    Ok(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use crate::event::{EventTime, Frequency, RecurrenceRule, Role};

    fn dt(d: u32, h: u32) -> EventTime {
        EventTime::DateTime(Utc.with_ymd_and_hms(2024, 1, d, h, 0, 0).unwrap())
    }

    fn organizer_copy() -> Event {
        let mut event = Event::new("review", dt(10, 9), dt(10, 10));
        event.uid = "rev-1".into();
        event.sequence = 2;
        event.changed = Some(Utc.with_ymd_and_hms(2024, 1, 2, 12, 0, 0).unwrap());
        event.organizer = Some(Attendee::organizer("boss@example.com"));
        event.attendees = vec![
            Attendee::organizer("boss@example.com"),
            Attendee::new("a@example.com"),
        ];
        event
    }

    fn reply_from(base: &Event, email: &str, status: ParticipationStatus) -> Event {
        let mut reply = base.clone();
        reply.attendees = vec![Attendee::new(email).with_status(status)];
        reply
    }

    #[test]
    fn test_reply_updates_participation_status() {
        let mut stored = organizer_copy();
        let reply = reply_from(&stored, "A@Example.com", ParticipationStatus::Accepted);
        assert!(apply_reply(&mut stored, &reply).unwrap());
        assert_eq!(
            stored.find_attendee("a@example.com").unwrap().status,
            ParticipationStatus::Accepted,
            "matching is case-insensitive"
        );
    }

    #[test]
    fn test_stale_reply_is_rejected_and_leaves_copy_unchanged() {
        let mut stored = organizer_copy();
        let mut reply = reply_from(&stored, "a@example.com", ParticipationStatus::Accepted);
        reply.sequence = 1; // older than stored sequence 2

        let before = stored.clone();
        let err = apply_reply(&mut stored, &reply).unwrap_err();
        assert!(matches!(err, SchedError::StaleWrite(_)));
        assert_eq!(stored, before, "rejected reply must not mutate the copy");
    }

    #[test]
    fn test_equal_revision_reply_is_accepted() {
        let mut stored = organizer_copy();
        let reply = reply_from(&stored, "a@example.com", ParticipationStatus::Tentative);
        assert!(apply_reply(&mut stored, &reply).unwrap());
    }

    #[test]
    fn test_reply_from_unknown_attendee_is_ignored() {
        let mut stored = organizer_copy();
        let reply = reply_from(&stored, "stranger@example.com", ParticipationStatus::Accepted);
        assert!(!apply_reply(&mut stored, &reply).unwrap());
        assert_eq!(stored.attendees.len(), 2);
    }

    #[test]
    fn test_delegated_reply_attaches_delegatee() {
        let mut stored = organizer_copy();
        let mut reply = stored.clone();
        let mut delegator = Attendee::new("a@example.com")
            .with_status(ParticipationStatus::Delegated);
        delegator.delegated_to = Some("c@example.com".into());
        let mut delegatee = Attendee::new("c@example.com");
        delegatee.delegated_from = Some("a@example.com".into());
        reply.attendees = vec![delegator, delegatee];

        assert!(apply_reply(&mut stored, &reply).unwrap());
        assert_eq!(
            stored.find_attendee("a@example.com").unwrap().delegated_to.as_deref(),
            Some("c@example.com")
        );
        assert!(
            stored.find_attendee("c@example.com").is_some(),
            "delegatee entry attached to the stored copy"
        );
    }

    #[test]
    fn test_declined_delegatee_reopens_delegator_rsvp() {
        let mut stored = organizer_copy();
        {
            let a = stored.find_attendee_mut("a@example.com").unwrap();
            a.status = ParticipationStatus::Delegated;
            a.delegated_to = Some("c@example.com".into());
            a.rsvp = false;
        }
        let mut delegatee = Attendee::new("c@example.com")
            .with_status(ParticipationStatus::Declined);
        delegatee.delegated_from = Some("a@example.com".into());
        let mut reply = stored.clone();
        reply.attendees = vec![delegatee];

        assert!(apply_reply(&mut stored, &reply).unwrap());
        assert!(
            stored.find_attendee("a@example.com").unwrap().rsvp,
            "declined delegation re-opens the delegator's reply loop"
        );
    }

    #[test]
    fn test_instance_reply_materializes_exception() {
        let mut stored = organizer_copy();
        stored.recurrence = Some(RecurrenceRule::new(Frequency::Daily).with_count(5));

        let reply = reply_from(&stored, "a@example.com", ParticipationStatus::Declined);
        assert!(apply_reply_to_instance(&mut stored, "20240112T090000", &reply).unwrap());

        // Series-wide status untouched; the exception carries the decline.
        assert_eq!(
            stored.find_attendee("a@example.com").unwrap().status,
            ParticipationStatus::NeedsAction
        );
        let rule = stored.recurrence.as_ref().unwrap();
        let exc = rule
            .exceptions
            .get(&chrono::NaiveDate::from_ymd_opt(2024, 1, 12).unwrap())
            .expect("exception materialized");
        let patched = exc.patch.attendees.as_ref().unwrap();
        assert_eq!(
            patched.iter().find(|a| a.matches_email("a@example.com")).unwrap().status,
            ParticipationStatus::Declined
        );
    }

    #[test]
    fn test_import_creates_local_copy() {
        let incoming = organizer_copy();
        let own = BTreeSet::from(["a@example.com".to_string()]);
        let imported = import_request(None, &incoming, Method::Request, &own).unwrap();
        assert_eq!(imported.uid, incoming.uid);
    }

    #[test]
    fn test_import_preserves_own_reply() {
        let mut local = organizer_copy();
        local
            .find_attendee_mut("a@example.com")
            .unwrap()
            .status = ParticipationStatus::Accepted;

        let mut incoming = organizer_copy();
        incoming.sequence = 3;
        incoming.summary = "review (updated)".into();

        let own = BTreeSet::from(["a@example.com".to_string()]);
        let merged = import_request(Some(&local), &incoming, Method::Request, &own).unwrap();
        assert_eq!(merged.summary, "review (updated)");
        assert_eq!(
            merged.find_attendee("a@example.com").unwrap().status,
            ParticipationStatus::Accepted,
            "an inbound update never overwrites the locally recorded reply"
        );
    }

    #[test]
    fn test_stale_import_is_rejected() {
        let local = organizer_copy();
        let mut incoming = organizer_copy();
        incoming.sequence = 1;
        let own = BTreeSet::from(["a@example.com".to_string()]);
        let err = import_request(Some(&local), &incoming, Method::Request, &own).unwrap_err();
        assert!(matches!(err, SchedError::StaleWrite(_)));
    }

    #[test]
    fn test_cancel_import_marks_cancelled_and_frees_time() {
        let local = organizer_copy();
        let mut incoming = organizer_copy();
        incoming.sequence = 3;
        let own = BTreeSet::from(["a@example.com".to_string()]);
        let merged = import_request(Some(&local), &incoming, Method::Cancel, &own).unwrap();
        assert_eq!(merged.status, EventStatus::Cancelled);
        assert_eq!(merged.free_busy, FreeBusyStatus::Free);
    }

    #[test]
    fn test_reset_skips_non_participant_role() {
        let mut event = organizer_copy();
        event
            .attendees
            .push(Attendee::new("fyi@example.com").with_role(Role::NonParticipant).with_status(ParticipationStatus::Accepted));
        crate::itip::reset_participation(&mut event);
        assert_eq!(
            event.find_attendee("fyi@example.com").unwrap().status,
            ParticipationStatus::Accepted
        );
    }
}
