//! Event storage interface.
//!
//! The engine depends only on this trait; concrete backends (document
//! stores, CalDAV collections) implement it elsewhere. The contract that
//! matters is `put_if_sequence`: a compare-and-swap on the stored revision,
//! the primitive behind the engine's optimistic-concurrency guarantee.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::date_range::DateRange;
use crate::error::{SchedError, SchedResult};
use crate::event::Event;

#[async_trait]
pub trait EventStore: Send + Sync {
    /// Fetch an event by uid.
    async fn get(&self, uid: &str) -> SchedResult<Option<Event>>;

    /// Store `event` only if the current stored sequence equals
    /// `expected_sequence` (0 with no stored copy creates it). Returns
    /// false when the comparison fails, leaving the store unchanged.
    async fn put_if_sequence(&self, event: &Event, expected_sequence: i64) -> SchedResult<bool>;

    /// Events whose span overlaps the window.
    async fn query(&self, window: &DateRange) -> SchedResult<Vec<Event>>;
}

/// In-memory document store, used by tests and as the reference
/// implementation of the compare-and-swap contract. Events are kept as
/// serialized JSON documents keyed by uid, the same shape a document
/// backend would hold.
#[derive(Default)]
pub struct MemoryEventStore {
    documents: RwLock<HashMap<String, String>>,
}

impl MemoryEventStore {
    pub fn new() -> Self {
        MemoryEventStore::default()
    }

    pub async fn len(&self) -> usize {
        self.documents.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.documents.read().await.is_empty()
    }

    fn decode(document: &str) -> SchedResult<Event> {
        serde_json::from_str(document).map_err(|e| SchedError::Storage(e.to_string()))
    }

    fn encode(event: &Event) -> SchedResult<String> {
        serde_json::to_string(event).map_err(|e| SchedError::Storage(e.to_string()))
    }
}

#[async_trait]
impl EventStore for MemoryEventStore {
    async fn get(&self, uid: &str) -> SchedResult<Option<Event>> {
        self.documents
            .read()
            .await
            .get(uid)
            .map(|doc| Self::decode(doc))
            .transpose()
    }

    async fn put_if_sequence(&self, event: &Event, expected_sequence: i64) -> SchedResult<bool> {
        let mut documents = self.documents.write().await;
        let accept = match documents.get(&event.uid) {
            Some(doc) => Self::decode(doc)?.sequence == expected_sequence,
            None => expected_sequence == 0,
        };
        if accept {
            documents.insert(event.uid.clone(), Self::encode(event)?);
        }
        Ok(accept)
    }

    async fn query(&self, window: &DateRange) -> SchedResult<Vec<Event>> {
        let documents = self.documents.read().await;
        let mut matching = Vec::new();
        for doc in documents.values() {
            let event = Self::decode(doc)?;
            if window.overlaps(event.start.to_utc(), event.end.to_utc_end()) {
                matching.push(event);
            }
        }
        matching.sort_by_key(|e| e.start.to_utc());
        Ok(matching)
    }
}
