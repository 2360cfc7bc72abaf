//! Scheduling-neutral event types.
//!
//! These types represent calendar events the way the scheduling engine
//! consumes them: a master `Event` (optionally recurring, with keyed
//! exception overrides), attendees with iTIP participation state, and the
//! free/busy classification used by the aggregator. Wire formats (iCalendar,
//! provider APIs) are converted into these types by collaborators.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{SchedError, SchedResult};

/// Start or end of an event: an absolute instant, or a calendar date for
/// all-day events. All-day-ness is carried by the variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventTime {
    DateTime(DateTime<Utc>),
    Date(NaiveDate),
}

impl EventTime {
    /// The instant this time begins. Dates resolve to midnight UTC.
    pub fn to_utc(&self) -> DateTime<Utc> {
        match self {
            EventTime::DateTime(dt) => *dt,
            EventTime::Date(d) => d.and_hms_opt(0, 0, 0).unwrap().and_utc(),
        }
    }

    /// The instant this time ends when used as an (inclusive) end bound.
    /// Dates resolve to 23:59:59 UTC of the same day.
    pub fn to_utc_end(&self) -> DateTime<Utc> {
        match self {
            EventTime::DateTime(dt) => *dt,
            EventTime::Date(d) => d.and_hms_opt(23, 59, 59).unwrap().and_utc(),
        }
    }

    pub fn date(&self) -> NaiveDate {
        match self {
            EventTime::DateTime(dt) => dt.date_naive(),
            EventTime::Date(d) => *d,
        }
    }

    /// Time-of-day, if this is a timed value.
    pub fn time(&self) -> Option<NaiveTime> {
        match self {
            EventTime::DateTime(dt) => Some(dt.time()),
            EventTime::Date(_) => None,
        }
    }

    pub fn is_date(&self) -> bool {
        matches!(self, EventTime::Date(_))
    }

    /// Compact occurrence stamp: `YYYYMMDD` for dates,
    /// `YYYYMMDDTHHMMSS` for instants. Instance identifiers are built
    /// from this, so it must stay stable across releases.
    pub fn instance_stamp(&self) -> String {
        match self {
            EventTime::DateTime(dt) => dt.format("%Y%m%dT%H%M%S").to_string(),
            EventTime::Date(d) => d.format("%Y%m%d").to_string(),
        }
    }

    /// Same value carried onto a different calendar date, keeping the
    /// time-of-day (and variant) intact.
    pub fn on_date(&self, date: NaiveDate) -> EventTime {
        match self {
            EventTime::DateTime(dt) => EventTime::DateTime(date.and_time(dt.time()).and_utc()),
            EventTime::Date(_) => EventTime::Date(date),
        }
    }
}

impl fmt::Display for EventTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventTime::DateTime(dt) => write!(f, "{}", dt.format("%Y-%m-%d %H:%M:%S")),
            EventTime::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING-KEBAB-CASE")]
pub enum EventStatus {
    Confirmed,
    Tentative,
    Cancelled,
}

/// Free/busy classification of an event or interval.
///
/// Ordering of severity: Busy > Tentative > OutOfOffice > Free > Unknown.
/// `Unknown` marks missing data (an unreachable source) and never outranks
/// an actual status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING-KEBAB-CASE")]
pub enum FreeBusyStatus {
    Unknown,
    Free,
    Busy,
    Tentative,
    OutOfOffice,
}

impl FreeBusyStatus {
    /// Precedence rank for aggregation.
    pub fn rank(self) -> u8 {
        match self {
            FreeBusyStatus::Busy => 4,
            FreeBusyStatus::Tentative => 3,
            FreeBusyStatus::OutOfOffice => 2,
            FreeBusyStatus::Free => 1,
            FreeBusyStatus::Unknown => 0,
        }
    }

    /// True for statuses that block a scheduling slot.
    pub fn is_non_free(self) -> bool {
        matches!(
            self,
            FreeBusyStatus::Busy | FreeBusyStatus::Tentative | FreeBusyStatus::OutOfOffice
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING-KEBAB-CASE")]
pub enum Role {
    Organizer,
    Chair,
    ReqParticipant,
    OptParticipant,
    NonParticipant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING-KEBAB-CASE")]
pub enum CuType {
    Individual,
    Group,
    Resource,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING-KEBAB-CASE")]
pub enum ParticipationStatus {
    NeedsAction,
    Accepted,
    Declined,
    Tentative,
    Delegated,
}

/// An event attendee (also used for the organizer entry).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attendee {
    pub email: String,
    pub name: Option<String>,
    pub role: Role,
    pub cutype: CuType,
    pub status: ParticipationStatus,
    /// Whether a reply is requested from this attendee.
    pub rsvp: bool,
    /// Attendee opted out of notification mail.
    #[serde(default)]
    pub noreply: bool,
    pub delegated_to: Option<String>,
    pub delegated_from: Option<String>,
}

impl Attendee {
    pub fn new(email: impl Into<String>) -> Self {
        Attendee {
            email: email.into(),
            name: None,
            role: Role::ReqParticipant,
            cutype: CuType::Individual,
            status: ParticipationStatus::NeedsAction,
            rsvp: true,
            noreply: false,
            delegated_to: None,
            delegated_from: None,
        }
    }

    pub fn organizer(email: impl Into<String>) -> Self {
        Attendee {
            role: Role::Organizer,
            status: ParticipationStatus::Accepted,
            rsvp: false,
            ..Attendee::new(email)
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_role(mut self, role: Role) -> Self {
        self.role = role;
        self
    }

    pub fn with_status(mut self, status: ParticipationStatus) -> Self {
        self.status = status;
        self
    }

    /// Case-insensitive email comparison, the identity rule for attendees.
    pub fn matches_email(&self, email: &str) -> bool {
        self.email.eq_ignore_ascii_case(email)
    }
}

/// Recurrence frequency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING-KEBAB-CASE")]
pub enum Frequency {
    Daily,
    Weekly,
    Monthly,
    Yearly,
}

/// A weekday selector with an optional ordinal: `(2, Tuesday)` is the second
/// Tuesday of the period, `(-1, Friday)` the last Friday.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ByDay {
    pub ordinal: Option<i8>,
    pub weekday: chrono::Weekday,
}

impl ByDay {
    pub fn every(weekday: chrono::Weekday) -> Self {
        ByDay {
            ordinal: None,
            weekday,
        }
    }

    pub fn nth(ordinal: i8, weekday: chrono::Weekday) -> Self {
        ByDay {
            ordinal: Some(ordinal),
            weekday,
        }
    }
}

/// A persisted override of one occurrence's properties, keyed by the
/// occurrence's original date in [`RecurrenceRule::exceptions`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecurrenceException {
    /// Applies to the matched date and all subsequent occurrences until a
    /// later this-and-future override supersedes it.
    #[serde(default)]
    pub this_and_future: bool,
    pub patch: EventPatch,
}

/// Partial event override: every field optional, `None` meaning
/// "keep the master's value".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventPatch {
    pub start: Option<EventTime>,
    pub end: Option<EventTime>,
    pub summary: Option<String>,
    pub description: Option<String>,
    pub location: Option<String>,
    pub status: Option<EventStatus>,
    pub free_busy: Option<FreeBusyStatus>,
    pub attendees: Option<Vec<Attendee>>,
    pub categories: Option<Vec<String>>,
}

impl EventPatch {
    /// Apply every set field onto `event`.
    pub fn apply_to(&self, event: &mut Event) {
        if let Some(start) = &self.start {
            event.start = start.clone();
        }
        if let Some(end) = &self.end {
            event.end = end.clone();
        }
        if let Some(summary) = &self.summary {
            event.summary = summary.clone();
        }
        if let Some(description) = &self.description {
            event.description = Some(description.clone());
        }
        if let Some(location) = &self.location {
            event.location = Some(location.clone());
        }
        if let Some(status) = self.status {
            event.status = status;
        }
        if let Some(free_busy) = self.free_busy {
            event.free_busy = free_busy;
        }
        if let Some(attendees) = &self.attendees {
            event.attendees = attendees.clone();
        }
        if let Some(categories) = &self.categories {
            event.categories = categories.clone();
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == EventPatch::default()
    }
}

/// A recurrence rule, already decomposed into its structured fields.
/// Invariant: `count` and `until` are never both set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecurrenceRule {
    pub freq: Frequency,
    pub interval: u32,
    pub count: Option<u32>,
    pub until: Option<EventTime>,
    #[serde(default)]
    pub by_day: Vec<ByDay>,
    #[serde(default)]
    pub by_month_day: Vec<i8>,
    #[serde(default)]
    pub by_month: Vec<u8>,
    /// Dates explicitly excluded from the generated set.
    #[serde(default)]
    pub exdates: BTreeSet<NaiveDate>,
    /// Per-occurrence overrides keyed by the occurrence's original date.
    #[serde(default)]
    pub exceptions: BTreeMap<NaiveDate, RecurrenceException>,
}

impl RecurrenceRule {
    pub fn new(freq: Frequency) -> Self {
        RecurrenceRule {
            freq,
            interval: 1,
            count: None,
            until: None,
            by_day: Vec::new(),
            by_month_day: Vec::new(),
            by_month: Vec::new(),
            exdates: BTreeSet::new(),
            exceptions: BTreeMap::new(),
        }
    }

    pub fn with_interval(mut self, interval: u32) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_count(mut self, count: u32) -> Self {
        self.count = Some(count);
        self
    }

    pub fn with_until(mut self, until: EventTime) -> Self {
        self.until = Some(until);
        self
    }

    /// The rule without its exception overlay, for comparisons that must
    /// ignore per-occurrence edits.
    pub fn without_exceptions(&self) -> RecurrenceRule {
        RecurrenceRule {
            exceptions: BTreeMap::new(),
            ..self.clone()
        }
    }

    pub fn validate(&self) -> SchedResult<()> {
        if self.interval == 0 {
            return Err(SchedError::Validation(
                "recurrence interval must be at least 1".into(),
            ));
        }
        if self.count.is_some() && self.until.is_some() {
            return Err(SchedError::Validation(
                "recurrence rule cannot set both count and until".into(),
            ));
        }
        if let Some(d) = self
            .by_month_day
            .iter()
            .find(|d| **d == 0 || d.abs() > 31)
        {
            return Err(SchedError::Validation(format!(
                "by_month_day value {} out of range",
                d
            )));
        }
        if let Some(m) = self.by_month.iter().find(|m| **m == 0 || **m > 12) {
            return Err(SchedError::Validation(format!(
                "by_month value {} out of range",
                m
            )));
        }
        if let Some(b) = self
            .by_day
            .iter()
            .find(|b| b.ordinal.is_some_and(|n| n == 0 || n.abs() > 5))
        {
            return Err(SchedError::Validation(format!(
                "by_day ordinal {:?} out of range",
                b.ordinal
            )));
        }
        Ok(())
    }
}

/// A calendar event: the master stored record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Opaque stable identifier.
    pub uid: String,
    /// Monotonic revision counter, bumped on every organizer-initiated change.
    pub sequence: i64,
    /// Last-modification instant.
    pub changed: Option<DateTime<Utc>>,
    pub summary: String,
    pub description: Option<String>,
    pub location: Option<String>,
    #[serde(default)]
    pub categories: Vec<String>,
    pub start: EventTime,
    pub end: EventTime,
    pub status: EventStatus,
    pub free_busy: FreeBusyStatus,
    /// Optional when the attendee list is empty; required otherwise.
    pub organizer: Option<Attendee>,
    /// Ordered, unique by lower-cased email.
    pub attendees: Vec<Attendee>,
    pub recurrence: Option<RecurrenceRule>,
}

impl Event {
    pub fn new(summary: impl Into<String>, start: EventTime, end: EventTime) -> Self {
        Event {
            uid: String::new(),
            sequence: 0,
            changed: None,
            summary: summary.into(),
            description: None,
            location: None,
            categories: Vec::new(),
            start,
            end,
            status: EventStatus::Confirmed,
            free_busy: FreeBusyStatus::Busy,
            organizer: None,
            attendees: Vec::new(),
            recurrence: None,
        }
    }

    pub fn is_allday(&self) -> bool {
        self.start.is_date()
    }

    /// The event's duration, taken from the anchor start/end pair.
    pub fn duration(&self) -> Duration {
        self.end.to_utc() - self.start.to_utc()
    }

    /// Revision key for optimistic-concurrency ordering: compares by
    /// sequence first, modification instant second.
    pub fn revision(&self) -> (i64, DateTime<Utc>) {
        (
            self.sequence,
            self.changed.unwrap_or(DateTime::<Utc>::UNIX_EPOCH),
        )
    }

    pub fn find_attendee(&self, email: &str) -> Option<&Attendee> {
        self.attendees.iter().find(|a| a.matches_email(email))
    }

    pub fn find_attendee_mut(&mut self, email: &str) -> Option<&mut Attendee> {
        self.attendees.iter_mut().find(|a| a.matches_email(email))
    }

    /// Whether any of the given addresses appears as the organizer.
    pub fn is_organized_by(&self, emails: &BTreeSet<String>) -> bool {
        self.organizer
            .as_ref()
            .is_some_and(|o| emails.iter().any(|e| o.matches_email(e)))
    }

    /// Check the structural invariants of the attendee/organizer model.
    pub fn validate(&self) -> SchedResult<()> {
        if !self.attendees.is_empty() && self.organizer.is_none() {
            return Err(SchedError::Validation(format!(
                "event '{}' has attendees but no organizer",
                self.uid
            )));
        }

        let organizer_roles: Vec<&Attendee> = self
            .attendees
            .iter()
            .filter(|a| a.role == Role::Organizer)
            .collect();
        if organizer_roles.len() > 1 {
            return Err(SchedError::Validation(format!(
                "event '{}' has more than one attendee with the organizer role",
                self.uid
            )));
        }
        if let (Some(entry), Some(organizer)) = (organizer_roles.first(), &self.organizer) {
            if !entry.matches_email(&organizer.email) {
                return Err(SchedError::Validation(format!(
                    "event '{}': organizer-role attendee '{}' does not match organizer '{}'",
                    self.uid, entry.email, organizer.email
                )));
            }
        }

        let mut seen = BTreeSet::new();
        for a in &self.attendees {
            if !seen.insert(a.email.to_lowercase()) {
                return Err(SchedError::Validation(format!(
                    "event '{}' lists attendee '{}' more than once",
                    self.uid, a.email
                )));
            }
            if a.status == ParticipationStatus::Delegated
                && a.delegated_to.as_deref().unwrap_or("").is_empty()
                && !self
                    .attendees
                    .iter()
                    .any(|d| d.delegated_from.as_deref().is_some_and(|f| a.matches_email(f)))
            {
                return Err(SchedError::Validation(format!(
                    "delegated attendee '{}' has no delegatee",
                    a.email
                )));
            }
        }

        if let Some(rule) = &self.recurrence {
            rule.validate()?;
        }

        Ok(())
    }
}
