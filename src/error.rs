//! Error types for the scheduling engine.

use thiserror::Error;

/// Errors that can occur in scheduling operations.
#[derive(Error, Debug)]
pub enum SchedError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Stale write rejected: {0}")]
    StaleWrite(String),

    #[error("Scheduling permission denied: {0}")]
    PermissionDenied(String),

    /// The recurrence expansion hit the iteration safety cap. Non-fatal:
    /// callers may keep the occurrences produced so far, but must report
    /// the truncation rather than swallow it.
    #[error("Recurrence expansion exceeded safety cap of {0} iterations")]
    RecurrenceLimitExceeded(u32),

    #[error("Event not found: {0}")]
    EventNotFound(String),

    #[error("Free/busy source unavailable for '{identity}': {reason}")]
    FreeBusyUnavailable { identity: String, reason: String },

    #[error("Delivery to '{recipient}' failed: {reason}")]
    Delivery { recipient: String, reason: String },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type alias for scheduling operations.
pub type SchedResult<T> = Result<T, SchedError>;
