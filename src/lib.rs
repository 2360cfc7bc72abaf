//! Calendar scheduling engine.
//!
//! The three concerns this crate owns:
//! - expanding recurring event definitions into concrete occurrences,
//!   honoring exceptions and exclusions (`recurrence`, `instance`);
//! - the iTIP scheduling state machine keeping organizer and attendee
//!   participation consistent across REQUEST/REPLY/CANCEL (`itip`);
//! - free/busy aggregation into point statuses and availability grids,
//!   with slot search on top (`freebusy`, `slots`).
//!
//! Storage, mail delivery, identity lookup and free/busy sources are
//! collaborator traits (`store`, `notify`, `identity`,
//! `freebusy::aggregate`); the [`engine::SchedulingEngine`] facade wires
//! them together with an [`config::EngineConfig`].

pub mod config;
pub mod date_range;
pub mod engine;
pub mod error;
pub mod event;
pub mod freebusy;
pub mod identity;
pub mod instance;
pub mod itip;
pub mod notify;
pub mod recurrence;
pub mod slots;
pub mod store;
pub mod undo;

pub use config::EngineConfig;
pub use date_range::DateRange;
pub use engine::SchedulingEngine;
pub use error::{SchedError, SchedResult};
pub use event::{
    Attendee, Event, EventPatch, EventStatus, EventTime, FreeBusyStatus, Frequency,
    ParticipationStatus, RecurrenceRule, Role,
};
pub use freebusy::{
    AvailabilityGrid, FreeBusyInterval, FreeBusySource, grid, point_status,
};
pub use identity::{IdentityResolver, StaticIdentity};
pub use instance::{Instance, ResolveOptions, resolve_instances};
pub use itip::{Method, SchedulingAction, SchedulingMessage};
pub use notify::{DeliveryReport, MessageSender};
pub use recurrence::{Occurrence, RecurrenceIter};
pub use slots::{SearchDirection, find_slot};
pub use store::{EventStore, MemoryEventStore};
pub use undo::UndoLedger;
