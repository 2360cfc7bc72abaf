//! Undo ledger for removed events.
//!
//! A caller-owned buffer holding recently removed events for a bounded
//! time, so a remove can be taken back before the window closes. Explicit
//! state passed into the engine's callers; there is no global pending-undo
//! buffer anywhere.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::event::Event;

/// Recently removed events, recoverable until their TTL expires.
#[derive(Debug)]
pub struct UndoLedger {
    ttl: Duration,
    entries: HashMap<String, (Event, Instant)>,
}

impl UndoLedger {
    pub fn new(ttl: Duration) -> Self {
        UndoLedger {
            ttl,
            entries: HashMap::new(),
        }
    }

    /// Remember a removed event. Replaces any previous entry for the uid.
    pub fn record(&mut self, event: Event) {
        self.prune();
        self.entries
            .insert(event.uid.clone(), (event, Instant::now()));
    }

    /// Take a removed event back out, if its window is still open.
    pub fn take(&mut self, uid: &str) -> Option<Event> {
        self.prune();
        self.entries.remove(uid).map(|(event, _)| event)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn prune(&mut self) {
        let ttl = self.ttl;
        self.entries.retain(|_, (_, stored)| stored.elapsed() < ttl);
    }
}
