//! Error types for calver.

use thiserror::Error;

use crate::event::EventId;
use crate::permission::Action;

/// Errors that can occur in calver operations.
#[derive(Error, Debug)]
pub enum CalverError {
    #[error("No authenticated user")]
    Unauthorized,

    #[error("Not allowed to {action} event {event}")]
    Forbidden { action: Action, event: EventId },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Version conflict: expected {expected}, current is {actual}")]
    ConcurrencyConflict { expected: u32, actual: u32 },

    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl CalverError {
    /// Conflicts are the only errors a caller can recover from by
    /// re-reading the event and retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CalverError::ConcurrencyConflict { .. })
    }

    pub(crate) fn event_not_found(id: EventId) -> Self {
        CalverError::NotFound(format!("event {id}"))
    }

    pub(crate) fn version_not_found(id: EventId, version: u32) -> Self {
        CalverError::NotFound(format!("version {version} of event {id}"))
    }

    pub(crate) fn poisoned() -> Self {
        CalverError::Internal("store lock poisoned".into())
    }
}

impl From<serde_json::Error> for CalverError {
    fn from(e: serde_json::Error) -> Self {
        CalverError::Serialization(e.to_string())
    }
}

/// Result type alias for calver operations.
pub type CalverResult<T> = Result<T, CalverError>;
