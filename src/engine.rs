//! Scheduling engine facade.
//!
//! Bundles the collaborator interfaces (store, message transport, free/busy
//! source, identity resolution) behind the engine operations. Everything is
//! injected through the constructor; the engine holds no global or lazily
//! discovered state.
//!
//! Commit protocol: every accepted mutation re-validates the stored
//! revision immediately before writing, via the store's compare-and-swap.
//! A losing writer surfaces [`SchedError::StaleWrite`] and may retry by
//! re-fetching and reapplying.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::config::EngineConfig;
use crate::date_range::DateRange;
use crate::error::{SchedError, SchedResult};
use crate::event::Event;
use crate::freebusy::aggregate::{AvailabilityGrid, FreeBusySource, collect_availability};
use crate::identity::IdentityResolver;
use crate::instance::{Instance, ResolveOptions, resolve_instances};
use crate::itip::{
    self, Method, MutationContext, SchedulingAction, SchedulingMessage, inbound,
};
use crate::notify::{DeliveryReport, MessageSender, deliver_all};
use crate::recurrence::{Occurrence, RecurrenceIter};
use crate::slots::{SearchDirection, find_slot, off_hours_mask};
use crate::store::EventStore;

pub struct SchedulingEngine {
    store: Arc<dyn EventStore>,
    sender: Arc<dyn MessageSender>,
    freebusy: Arc<dyn FreeBusySource>,
    identity: Arc<dyn IdentityResolver>,
    config: EngineConfig,
}

impl SchedulingEngine {
    pub fn new(
        store: Arc<dyn EventStore>,
        sender: Arc<dyn MessageSender>,
        freebusy: Arc<dyn FreeBusySource>,
        identity: Arc<dyn IdentityResolver>,
        config: EngineConfig,
    ) -> Self {
        SchedulingEngine {
            store,
            sender,
            freebusy,
            identity,
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Expand a recurring event into the raw occurrences overlapping
    /// `window`. Hitting the safety cap logs a warning and returns the
    /// partial sequence.
    pub fn expand_recurrence(
        &self,
        event: &Event,
        window: &DateRange,
    ) -> SchedResult<Vec<Occurrence>> {
        let rule = match &event.recurrence {
            Some(rule) => rule,
            None => return Ok(Vec::new()),
        };

        let mut occurrences = Vec::new();
        let iter =
            RecurrenceIter::new(rule, &event.start, &event.end, self.config.recurrence_cap)?;
        for item in iter {
            match item {
                Ok(occ) => {
                    if occ.start.to_utc() >= window.end_utc() {
                        break;
                    }
                    if window.overlaps(occ.start.to_utc(), occ.end.to_utc_end()) {
                        occurrences.push(occ);
                    }
                }
                Err(SchedError::RecurrenceLimitExceeded(cap)) => {
                    warn!(uid = %event.uid, cap, "recurrence expansion truncated at safety cap");
                    break;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(occurrences)
    }

    /// Resolve one occurrence of a stored event by instance identifier.
    pub async fn resolve_instance(
        &self,
        uid: &str,
        instance_id: &str,
        window: &DateRange,
    ) -> SchedResult<Option<Instance>> {
        let event = self
            .store
            .get(uid)
            .await?
            .ok_or_else(|| SchedError::EventNotFound(uid.to_string()))?;

        let opts = ResolveOptions {
            wanted_instance_id: Some(instance_id),
            limit: None,
            cap: self.config.recurrence_cap,
        };
        let mut instances = resolve_instances(&event, window, &opts)?;
        Ok(instances.pop())
    }

    /// All instances of a stored event overlapping `window`.
    pub async fn instances(&self, uid: &str, window: &DateRange) -> SchedResult<Vec<Instance>> {
        let event = self
            .store
            .get(uid)
            .await?
            .ok_or_else(|| SchedError::EventNotFound(uid.to_string()))?;
        let opts = ResolveOptions {
            cap: self.config.recurrence_cap,
            ..ResolveOptions::default()
        };
        resolve_instances(&event, window, &opts)
    }

    /// Apply a scheduling mutation and commit it.
    ///
    /// Returns the persisted event plus the scheduling messages to deliver
    /// (delivery is a separate step: a save must succeed even if
    /// notification later fails).
    pub async fn apply_scheduling_mutation(
        &self,
        action: SchedulingAction,
        event: Event,
        acting: &str,
    ) -> SchedResult<(Event, Vec<SchedulingMessage>)> {
        let actor_emails = self.identity.emails_of(acting);
        let stored = self.store.get(&event.uid).await?;

        if action != SchedulingAction::New && stored.is_none() {
            return Err(SchedError::EventNotFound(event.uid.clone()));
        }

        let expected_sequence = stored.as_ref().map(|e| e.sequence).unwrap_or(0);
        let ctx = MutationContext {
            actor_email: acting,
            actor_emails: &actor_emails,
            policy: &self.config.notify,
        };
        let outcome = itip::apply_mutation(action, stored.as_ref(), event, &ctx)?;

        // Compare-and-swap against the revision we read: concurrent
        // writers lose here instead of silently overwriting.
        let committed = self
            .store
            .put_if_sequence(&outcome.event, expected_sequence)
            .await?;
        if !committed {
            return Err(SchedError::StaleWrite(format!(
                "event '{}' changed concurrently (expected sequence {})",
                outcome.event.uid, expected_sequence
            )));
        }

        debug!(
            uid = %outcome.event.uid,
            sequence = outcome.event.sequence,
            reschedule = outcome.reschedule,
            messages = outcome.messages.len(),
            "mutation committed"
        );
        Ok((outcome.event, outcome.messages))
    }

    /// Import an inbound scheduling message for the acting identity.
    ///
    /// REPLY updates the organizer's copy; REQUEST/CANCEL update (or
    /// create) the attendee's copy. All paths are gated by the revision
    /// guard and committed via compare-and-swap.
    pub async fn import_inbound(
        &self,
        message: &SchedulingMessage,
        acting: &str,
    ) -> SchedResult<Event> {
        let own_emails = self.identity.emails_of(acting);
        let uid = &message.event.uid;
        let stored = self.store.get(uid).await?;

        let (updated, expected_sequence) = match message.method {
            Method::Reply => {
                let mut stored = stored
                    .ok_or_else(|| SchedError::EventNotFound(uid.clone()))?;
                let expected = stored.sequence;
                inbound::apply_reply(&mut stored, &message.event)?;
                (stored, expected)
            }
            Method::Request | Method::Cancel => {
                let expected = stored.as_ref().map(|e| e.sequence).unwrap_or(0);
                let merged = inbound::import_request(
                    stored.as_ref(),
                    &message.event,
                    message.method,
                    &own_emails,
                )?;
                (merged, expected)
            }
        };

        let committed = self.store.put_if_sequence(&updated, expected_sequence).await?;
        if !committed {
            return Err(SchedError::StaleWrite(format!(
                "event '{}' changed concurrently during import",
                uid
            )));
        }
        Ok(updated)
    }

    /// Deliver scheduling messages, per recipient, independently.
    pub async fn notify(&self, messages: &[SchedulingMessage]) -> DeliveryReport {
        deliver_all(self.sender.as_ref(), messages).await
    }

    /// Collect the availability grid for an event's attendees.
    pub async fn availability_grid(
        &self,
        attendees: &[crate::event::Attendee],
        window: &DateRange,
        viewer_tz: chrono_tz::Tz,
    ) -> SchedResult<AvailabilityGrid> {
        collect_availability(
            self.freebusy.as_ref(),
            attendees,
            window,
            self.config.slot_minutes,
            viewer_tz,
            self.config.freebusy_timeout,
        )
        .await
    }

    /// Search the grid for a free block of `duration_slots`, optionally
    /// excluding off-hours slots per the configured business hours.
    pub fn find_slot(
        &self,
        grid: &AvailabilityGrid,
        duration_slots: usize,
        anchor_slot: usize,
        direction: SearchDirection,
        exclude_off_hours: bool,
        viewer_tz: chrono_tz::Tz,
    ) -> Option<usize> {
        let mask = exclude_off_hours.then(|| {
            off_hours_mask(
                grid.window.start_utc(),
                grid.slot_minutes,
                grid.slot_count(),
                viewer_tz,
                &self.config.business_hours,
            )
        });
        find_slot(grid, duration_slots, anchor_slot, direction, mask.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use crate::event::{Attendee, EventTime, FreeBusyStatus, ParticipationStatus};
    use crate::freebusy::FreeBusyInterval;
    use crate::identity::StaticIdentity;
    use crate::store::MemoryEventStore;

    struct NullSender;

    #[async_trait]
    impl MessageSender for NullSender {
        async fn send(
            &self,
            _message: &SchedulingMessage,
            _recipient: &Attendee,
        ) -> SchedResult<()> {
            Ok(())
        }
    }

    struct EmptySource;

    #[async_trait]
    impl FreeBusySource for EmptySource {
        async fn lookup(
            &self,
            identity: &str,
            _window: &DateRange,
        ) -> SchedResult<Vec<FreeBusyInterval>> {
            if identity == "a@example.com" {
                Ok(vec![FreeBusyInterval::new(
                    Utc.with_ymd_and_hms(2024, 1, 10, 9, 0, 0).unwrap(),
                    Utc.with_ymd_and_hms(2024, 1, 10, 10, 0, 0).unwrap(),
                    FreeBusyStatus::Busy,
                )])
            } else {
                Ok(Vec::new())
            }
        }
    }

    fn engine() -> SchedulingEngine {
        SchedulingEngine::new(
            Arc::new(MemoryEventStore::new()),
            Arc::new(NullSender),
            Arc::new(EmptySource),
            Arc::new(StaticIdentity::new("boss@example.com")),
            EngineConfig::default(),
        )
    }

    fn dt(d: u32, h: u32) -> EventTime {
        EventTime::DateTime(Utc.with_ymd_and_hms(2024, 1, d, h, 0, 0).unwrap())
    }

    fn meeting() -> Event {
        let mut event = Event::new("planning", dt(10, 9), dt(10, 10));
        event.organizer = Some(Attendee::organizer("boss@example.com"));
        event.attendees = vec![
            Attendee::organizer("boss@example.com"),
            Attendee::new("a@example.com"),
        ];
        event
    }

    #[tokio::test]
    async fn test_create_then_edit_bumps_sequence_and_commits() {
        let engine = engine();
        let (created, messages) = engine
            .apply_scheduling_mutation(SchedulingAction::New, meeting(), "boss@example.com")
            .await
            .unwrap();
        assert_eq!(created.sequence, 0);
        assert_eq!(messages.len(), 1);

        let mut edited = created.clone();
        edited.start = dt(10, 11);
        edited.end = dt(10, 12);
        let (updated, _) = engine
            .apply_scheduling_mutation(SchedulingAction::Move, edited, "boss@example.com")
            .await
            .unwrap();
        assert_eq!(updated.sequence, 1);
        assert_eq!(
            updated.find_attendee("a@example.com").unwrap().status,
            ParticipationStatus::NeedsAction
        );
    }

    #[tokio::test]
    async fn test_concurrent_edit_from_stale_snapshot_is_rejected() {
        let engine = engine();
        let (created, _) = engine
            .apply_scheduling_mutation(SchedulingAction::New, meeting(), "boss@example.com")
            .await
            .unwrap();

        // First editor wins.
        let mut first = created.clone();
        first.start = dt(10, 11);
        engine
            .apply_scheduling_mutation(SchedulingAction::Move, first, "boss@example.com")
            .await
            .unwrap();

        // Second writer still holds the pre-edit snapshot.
        let mut stale_reply = created.clone();
        stale_reply.sequence = created.sequence; // 0, stored copy is at 1
        stale_reply.attendees =
            vec![Attendee::new("a@example.com").with_status(ParticipationStatus::Accepted)];
        let message = SchedulingMessage {
            method: Method::Reply,
            event: stale_reply,
            comment: None,
            recipients: Vec::new(),
        };
        let err = engine
            .import_inbound(&message, "boss@example.com")
            .await
            .unwrap_err();
        assert!(matches!(err, SchedError::StaleWrite(_)));
    }

    #[tokio::test]
    async fn test_import_reply_updates_stored_copy() {
        let engine = engine();
        let (created, _) = engine
            .apply_scheduling_mutation(SchedulingAction::New, meeting(), "boss@example.com")
            .await
            .unwrap();

        let mut reply_event = created.clone();
        reply_event.attendees =
            vec![Attendee::new("a@example.com").with_status(ParticipationStatus::Accepted)];
        let message = SchedulingMessage {
            method: Method::Reply,
            event: reply_event,
            comment: Some("works for me".into()),
            recipients: Vec::new(),
        };

        let updated = engine
            .import_inbound(&message, "boss@example.com")
            .await
            .unwrap();
        assert_eq!(
            updated.find_attendee("a@example.com").unwrap().status,
            ParticipationStatus::Accepted
        );
    }

    #[tokio::test]
    async fn test_grid_and_slot_search() {
        let engine = engine();
        let window = DateRange::new(
            Utc.with_ymd_and_hms(2024, 1, 10, 9, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2024, 1, 10, 12, 0, 0).unwrap(),
        )
        .unwrap();

        let attendees = vec![Attendee::new("a@example.com"), Attendee::new("b@example.com")];
        let grid = engine
            .availability_grid(&attendees, &window, chrono_tz::UTC)
            .await
            .unwrap();
        assert_eq!(grid.slot_count(), 6);
        assert!(grid.required_busy(0), "a@ is busy 9-10");

        // Two consecutive free 30-minute slots, scanning forward from 9:00.
        let found = engine.find_slot(&grid, 2, 0, SearchDirection::Forward, false, chrono_tz::UTC);
        assert_eq!(found, Some(2), "first free hour starts at 10:00");
    }

    #[tokio::test]
    async fn test_expand_recurrence_respects_window() {
        let engine = engine();
        let mut event = meeting();
        event.recurrence = Some(
            crate::event::RecurrenceRule::new(crate::event::Frequency::Daily).with_count(30),
        );
        let window = DateRange::new(
            Utc.with_ymd_and_hms(2024, 1, 10, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2024, 1, 15, 0, 0, 0).unwrap(),
        )
        .unwrap();
        let occs = engine.expand_recurrence(&event, &window).unwrap();
        assert_eq!(occs.len(), 5, "Jan 10..14 inclusive");
    }
}
