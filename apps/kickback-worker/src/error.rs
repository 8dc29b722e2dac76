//! Error types for a validation pass.
//!
//! Every collaborator call returns [`EngineError`]. The pass uses
//! [`EngineError::is_fatal`] to decide between skipping one record and
//! aborting the run.

use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    /// The store could not be reached at all. Aborts the run.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// A single store operation failed.
    #[error("store operation failed: {0:#}")]
    Store(#[from] anyhow::Error),

    /// The subscription lookup failed for one user.
    #[error("subscription lookup failed for user {user_id}: {message}")]
    Oracle { user_id: i64, message: String },

    #[error("{operation} timed out after {}s", .after.as_secs_f32())]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    #[error("notification delivery failed: {0}")]
    Notify(String),
}

impl EngineError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, EngineError::Unavailable(_))
    }
}
