//! Vedrfolnir error types

use std::time::Duration;

use crate::ratelimit::RejectReason;

/// Vedrfolnir error types
#[derive(Debug, thiserror::Error)]
pub enum GovernorError {
    // Admission errors
    /// The rate limiter rejected the request. The only error this crate
    /// deliberately propagates to callers during normal operation.
    #[error("rate limited ({reason}), retry after {retry_after:?}")]
    RateLimited {
        reason: RejectReason,
        retry_after: Option<Duration>,
        /// Unix epoch milliseconds at which the blocking window frees up.
        reset_at: u64,
    },

    // Durable tier errors
    #[error("storage error: {0}")]
    Storage(String),

    #[error("storage full, could not write '{key}'")]
    StorageFull { key: String },

    #[error("corrupt cache entry '{key}': {reason}")]
    CorruptEntry { key: String, reason: String },

    // Data errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    // Configuration errors
    #[error("configuration error: {0}")]
    Configuration(String),

    // Collaborator errors
    /// The caller-supplied generation function failed.
    #[error("generation failed: {0}")]
    Generation(String),
}

impl GovernorError {
    /// How long the caller should wait before trying again, if known.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            GovernorError::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// Whether this is a rate-limit rejection.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, GovernorError::RateLimited { .. })
    }

    /// Whether retrying the same operation might succeed without any
    /// change on the caller's side.
    ///
    /// Storage and I/O faults are transient. Rate-limit rejections are not:
    /// the caller has to wait out `retry_after` first.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            GovernorError::Storage(_) | GovernorError::StorageFull { .. } | GovernorError::Io(_)
        )
    }
}

/// Result type alias for Vedrfolnir operations
pub type Result<T> = std::result::Result<T, GovernorError>;
