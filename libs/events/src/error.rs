//! Error types for event handling.

use thiserror::Error;

/// Errors that can occur when constructing or writing events.
#[derive(Debug, Error, Clone)]
pub enum EventError {
    /// The sink rejected the batch; nothing was persisted.
    #[error("event sink rejected batch of {count}: {reason}")]
    Rejected { count: usize, reason: String },

    /// The sink is unreachable.
    #[error("event sink unavailable: {0}")]
    Unavailable(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for EventError {
    fn from(err: serde_json::Error) -> Self {
        EventError::Serialization(err.to_string())
    }
}
