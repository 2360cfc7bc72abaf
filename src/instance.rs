//! Instance resolution for recurring events.
//!
//! Expands a master event into materialized instances within a window,
//! merging exception overrides and honoring EXDATEs. The master itself is
//! never returned; every result is an occurrence with `recurrence_id` set
//! to the master's uid.
//!
//! Identifier rule: an instance's `instance_id` is computed from the
//! occurrence's *unmodified* candidate start, so moving an occurrence via
//! an exception never changes its identifier.

use chrono::NaiveDate;
use tracing::{debug, warn};

use crate::date_range::DateRange;
use crate::error::{SchedError, SchedResult};
use crate::event::{Event, EventPatch, EventTime};
use crate::recurrence::{DEFAULT_RECURRENCE_CAP, Occurrence, RecurrenceIter};

/// A materialized occurrence of a (possibly recurring) event.
#[derive(Debug, Clone, PartialEq)]
pub struct Instance {
    /// Uid of the master event this instance derives from.
    pub recurrence_id: String,
    /// Deterministic identifier encoding the original occurrence start.
    pub instance_id: String,
    /// True when an exception override shaped this instance.
    pub is_exception: bool,
    /// The event data with any overrides applied. `recurrence` is cleared;
    /// instances carry no rule of their own.
    pub event: Event,
}

/// Options for [`resolve_instances`].
#[derive(Debug, Clone)]
pub struct ResolveOptions<'a> {
    /// Return only the instance with this identifier, stopping early.
    pub wanted_instance_id: Option<&'a str>,
    /// Stop after this many instances.
    pub limit: Option<usize>,
    /// Iteration safety cap for the underlying expansion.
    pub cap: u32,
}

impl Default for ResolveOptions<'_> {
    fn default() -> Self {
        ResolveOptions {
            wanted_instance_id: None,
            limit: None,
            cap: DEFAULT_RECURRENCE_CAP,
        }
    }
}

/// Resolve the instances of `event` overlapping `window`.
///
/// Non-recurring events resolve to their single instance. For recurring
/// events the expansion honors EXDATEs (exact date match), single-instance
/// exception overrides, and rolling this-and-future overrides. Hitting the
/// iteration cap logs a warning and returns the partial list.
pub fn resolve_instances(
    event: &Event,
    window: &DateRange,
    opts: &ResolveOptions,
) -> SchedResult<Vec<Instance>> {
    event.validate()?;

    let rule = match &event.recurrence {
        Some(rule) => rule,
        None => {
            let mut out = Vec::new();
            if window.overlaps(event.start.to_utc(), event.end.to_utc_end()) {
                let inst = plain_instance(event, &event.start, &event.end);
                if accept(&inst, opts) {
                    out.push(inst);
                }
            }
            return Ok(out);
        }
    };

    let mut out: Vec<Instance> = Vec::new();

    // The master's own start may itself have been moved by an exception.
    // If its original date would not appear in-window, the moved instance
    // still must, when its overridden times land there.
    let anchor_date = event.start.date();
    if let Some(exc) = rule.exceptions.get(&anchor_date) {
        let moved = exception_instance(event, &event.start, &event.end, &exc.patch);
        let original_in_window = window.overlaps(event.start.to_utc(), event.end.to_utc_end());
        let moved_in_window =
            window.overlaps(moved.event.start.to_utc(), moved.event.end.to_utc_end());
        if !original_in_window && moved_in_window {
            if opts.wanted_instance_id == Some(moved.instance_id.as_str()) {
                return Ok(vec![moved]);
            }
            if opts.wanted_instance_id.is_none() {
                out.push(moved);
            }
        }
    }

    let mut rolling: Option<(NaiveDate, EventPatch)> = None;
    let mut truncated = false;

    let iter = RecurrenceIter::new(rule, &event.start, &event.end, opts.cap)?;
    for item in iter {
        let occ = match item {
            Ok(occ) => occ,
            Err(SchedError::RecurrenceLimitExceeded(cap)) => {
                truncated = true;
                warn!(
                    uid = %event.uid,
                    cap,
                    "recurrence expansion hit the iteration cap; returning partial results"
                );
                break;
            }
            Err(e) => return Err(e),
        };

        if occ.start.to_utc() >= window.end_utc() {
            break;
        }

        let date = occ.start.date();
        if rule.exdates.contains(&date) {
            continue;
        }

        // Most specific override wins: an exact-date exception shadows the
        // rolling this-and-future override, but a this-and-future exception
        // still becomes the rolling override for subsequent dates.
        let exact = rule.exceptions.get(&date);
        if let Some(exc) = exact {
            if exc.this_and_future {
                rolling = Some((date, exc.patch.clone()));
            }
        }

        let inst = match (exact, &rolling) {
            (Some(exc), _) => exception_instance(event, &occ.start, &occ.end, &exc.patch),
            (None, Some((_, patch))) => rolling_instance(event, &occ, patch),
            (None, None) => plain_instance(event, &occ.start, &occ.end),
        };

        // Out-of-window occurrences still thread the rolling override state.
        if !window.overlaps(inst.event.start.to_utc(), inst.event.end.to_utc_end()) {
            continue;
        }
        if out.iter().any(|i| i.instance_id == inst.instance_id) {
            continue;
        }

        if let Some(wanted) = opts.wanted_instance_id {
            if inst.instance_id == wanted {
                return Ok(vec![inst]);
            }
            continue;
        }

        out.push(inst);
        if opts.limit.is_some_and(|limit| out.len() >= limit) {
            break;
        }
    }

    if opts.wanted_instance_id.is_some() {
        // Wanted id never matched within the window.
        debug!(uid = %event.uid, "wanted instance not found in window");
        return Ok(Vec::new());
    }

    out.sort_by_key(|i| i.event.start.to_utc());
    if truncated {
        debug!(uid = %event.uid, produced = out.len(), "partial instance list after cap");
    }
    Ok(out)
}

fn accept(inst: &Instance, opts: &ResolveOptions) -> bool {
    match opts.wanted_instance_id {
        Some(wanted) => inst.instance_id == wanted,
        None => true,
    }
}

fn base_event(master: &Event, start: &EventTime, end: &EventTime) -> Event {
    Event {
        start: start.clone(),
        end: end.clone(),
        recurrence: None,
        ..master.clone()
    }
}

fn plain_instance(master: &Event, start: &EventTime, end: &EventTime) -> Instance {
    Instance {
        recurrence_id: master.uid.clone(),
        instance_id: start.instance_stamp(),
        is_exception: false,
        event: base_event(master, start, end),
    }
}

/// Full single-instance override: the patch's start/end replace the
/// occurrence's outright. The identifier stays that of the original start.
fn exception_instance(
    master: &Event,
    original_start: &EventTime,
    original_end: &EventTime,
    patch: &EventPatch,
) -> Instance {
    let mut event = base_event(master, original_start, original_end);
    patch.apply_to(&mut event);
    Instance {
        recurrence_id: master.uid.clone(),
        instance_id: original_start.instance_stamp(),
        is_exception: true,
        event,
    }
}

/// Rolling this-and-future override: non-temporal fields apply as-is, but
/// start/end contribute only time-of-day and duration, carried onto the
/// occurrence's own date (one absolute start applied to every subsequent
/// occurrence would collapse the series).
fn rolling_instance(master: &Event, occ: &Occurrence, patch: &EventPatch) -> Instance {
    let mut event = base_event(master, &occ.start, &occ.end);

    let mut temporal = patch.clone();
    let patch_start = temporal.start.take();
    let patch_end = temporal.end.take();
    temporal.apply_to(&mut event);

    if let Some(ps) = &patch_start {
        event.start = ps.on_date(occ.start.date());
        match (&patch_end, ps) {
            (Some(pe), _) => {
                let duration = pe.to_utc() - ps.to_utc();
                event.end = match &event.start {
                    EventTime::DateTime(dt) => EventTime::DateTime(*dt + duration),
                    EventTime::Date(d) => EventTime::Date(*d + chrono::Duration::days(duration.num_days())),
                };
            }
            (None, _) => {
                let duration = occ.end.to_utc() - occ.start.to_utc();
                event.end = match &event.start {
                    EventTime::DateTime(dt) => EventTime::DateTime(*dt + duration),
                    EventTime::Date(d) => EventTime::Date(*d + chrono::Duration::days(duration.num_days())),
                };
            }
        }
    } else if let Some(pe) = &patch_end {
        event.end = pe.on_date(occ.end.date());
    }

    Instance {
        recurrence_id: master.uid.clone(),
        instance_id: occ.start.instance_stamp(),
        is_exception: true,
        event,
    }
}
