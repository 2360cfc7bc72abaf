//! iTIP scheduling state machine.
//!
//! Computes the state transitions and notification messages for event
//! mutations (create, edit, move, resize, remove) and inbound scheduling
//! messages (REQUEST, REPLY, CANCEL). The machine is pure: it consumes
//! old/new event snapshots plus an acting identity and returns the updated
//! event with the messages to deliver; persistence and delivery are the
//! caller's concern.

pub mod inbound;
pub mod recipients;
pub mod reschedule;

use std::collections::BTreeSet;

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::NotifyPolicy;
use crate::error::{SchedError, SchedResult};
use crate::event::{
    Attendee, Event, EventPatch, EventStatus, ParticipationStatus, RecurrenceException, Role,
};

/// iTIP method of a scheduling message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING-KEBAB-CASE")]
pub enum Method {
    Request,
    Reply,
    Cancel,
}

/// A scheduling message to deliver. Constructed per mutation, never
/// persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulingMessage {
    pub method: Method,
    /// Snapshot of the event (or materialized instance) the message is about.
    pub event: Event,
    pub comment: Option<String>,
    pub recipients: Vec<Attendee>,
}

/// Mutations the scheduling machine understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulingAction {
    New,
    Edit,
    Move,
    Resize,
    Remove,
}

/// Identity and policy under which a mutation is applied.
#[derive(Debug, Clone)]
pub struct MutationContext<'a> {
    /// Primary address of the acting user.
    pub actor_email: &'a str,
    /// Every address (lower-cased) belonging to the acting user.
    pub actor_emails: &'a BTreeSet<String>,
    pub policy: &'a NotifyPolicy,
}

/// Result of applying a mutation: the event to persist plus the scheduling
/// messages to deliver afterwards.
#[derive(Debug, Clone)]
pub struct MutationOutcome {
    pub event: Event,
    /// Whether the mutation changed scheduling-relevant properties.
    pub reschedule: bool,
    pub messages: Vec<SchedulingMessage>,
}

/// Apply a scheduling mutation to an event.
///
/// `old` is the stored snapshot (`None` only for [`SchedulingAction::New`]).
/// Organizer-only actions by a non-organizer are rejected with
/// `PermissionDenied`; the returned event carries a bumped sequence and
/// refreshed modification instant.
pub fn apply_mutation(
    action: SchedulingAction,
    old: Option<&Event>,
    mut event: Event,
    ctx: &MutationContext,
) -> SchedResult<MutationOutcome> {
    let mut reschedule = false;

    match action {
        SchedulingAction::New => {
            if old.is_some() {
                return Err(SchedError::Validation(format!(
                    "event '{}' already exists",
                    event.uid
                )));
            }
            initialize_new(&mut event, ctx);
        }
        _ => {
            let old = old.ok_or_else(|| {
                SchedError::Validation("mutation on an event without a stored snapshot".into())
            })?;

            // Only the organizer may change a scheduled event; plain events
            // without attendees have no organizer to check.
            if old.organizer.is_some() && !old.is_organized_by(ctx.actor_emails) {
                return Err(SchedError::PermissionDenied(format!(
                    "'{}' is not the organizer of event '{}'",
                    ctx.actor_email, old.uid
                )));
            }

            if action == SchedulingAction::Remove {
                event.status = EventStatus::Cancelled;
            } else {
                reschedule = reschedule::is_reschedule(old, &event);
                if reschedule && old.is_organized_by(ctx.actor_emails) {
                    reset_participation(&mut event);
                    debug!(uid = %event.uid, "reschedule: attendee participation reset");
                }
            }

            event.sequence = old.sequence + 1;
        }
    }

    event.changed = Some(Utc::now());
    event.validate()?;

    let messages = build_messages(action, old, &event, ctx);
    Ok(MutationOutcome {
        event,
        reschedule,
        messages,
    })
}

fn initialize_new(event: &mut Event, ctx: &MutationContext) {
    if event.uid.is_empty() {
        event.uid = uuid::Uuid::new_v4().to_string();
    }
    event.sequence = 0;

    if !event.attendees.is_empty() {
        if event.organizer.is_none() {
            event.organizer = Some(Attendee::organizer(ctx.actor_email));
        }
        let organizer_email = event.organizer.as_ref().map(|o| o.email.clone());
        if let Some(email) = organizer_email {
            if event.find_attendee(&email).is_none() {
                event.attendees.insert(0, Attendee::organizer(email));
            }
        }
        for attendee in &mut event.attendees {
            if attendee.role == Role::Organizer {
                continue;
            }
            attendee.status = ParticipationStatus::NeedsAction;
            attendee.rsvp = !attendee.noreply;
        }
    }
}

/// Reset participation after a reschedule: every attendee other than the
/// organizer, non-participants and delegated entries goes back to
/// needs-action with a reply requested.
pub fn reset_participation(event: &mut Event) {
    for attendee in &mut event.attendees {
        if matches!(attendee.role, Role::Organizer | Role::NonParticipant) {
            continue;
        }
        if attendee.status == ParticipationStatus::Delegated {
            continue;
        }
        attendee.status = ParticipationStatus::NeedsAction;
        attendee.rsvp = true;
    }
}

fn build_messages(
    action: SchedulingAction,
    old: Option<&Event>,
    event: &Event,
    ctx: &MutationContext,
) -> Vec<SchedulingMessage> {
    let (request, cancel) = recipients::compute_recipients(
        action,
        old.map(|o| o.attendees.as_slice()).unwrap_or(&[]),
        &event.attendees,
        ctx.actor_emails,
        ctx.policy,
    );

    let mut messages = Vec::new();
    if !cancel.is_empty() {
        let mut snapshot = old.cloned().unwrap_or_else(|| event.clone());
        snapshot.status = EventStatus::Cancelled;
        snapshot.sequence = event.sequence;
        messages.push(SchedulingMessage {
            method: Method::Cancel,
            event: snapshot,
            comment: None,
            recipients: cancel,
        });
    }
    if !request.is_empty() {
        messages.push(SchedulingMessage {
            method: Method::Request,
            event: event.clone(),
            comment: None,
            recipients: request,
        });
    }
    messages
}

/// Record an override for a single occurrence on the master event.
///
/// A reply or edit targeting one occurrence never mutates series-wide
/// fields; it becomes a `recurrence_exceptions` entry keyed by the
/// occurrence's original date. "This and future" targets set the
/// corresponding flag on the exception.
pub fn record_instance_override(
    master: &mut Event,
    instance_id: &str,
    patch: EventPatch,
    this_and_future: bool,
) -> SchedResult<()> {
    let date = parse_instance_date(instance_id)?;
    let rule = master.recurrence.as_mut().ok_or_else(|| {
        SchedError::Validation(format!(
            "event '{}' is not recurring; instance '{}' cannot be overridden",
            master.uid, instance_id
        ))
    })?;
    rule.exceptions
        .insert(date, RecurrenceException { this_and_future, patch });
    Ok(())
}

/// Parse the date component of an instance identifier
/// (`YYYYMMDD` or `YYYYMMDDTHHMMSS`).
pub fn parse_instance_date(instance_id: &str) -> SchedResult<NaiveDate> {
    instance_id
        .get(..8)
        .and_then(|prefix| NaiveDate::parse_from_str(prefix, "%Y%m%d").ok())
        .ok_or_else(|| {
            SchedError::Validation(format!("malformed instance identifier '{}'", instance_id))
        })
}
