//! Error taxonomy for the scheduling core.
//!
//! Validation and not-found errors fail fast to the caller. Conflicts carry
//! the full conflict report so clients can resolve or force. Publish
//! failures stay inside the queue retry loop and only surface on the parent
//! entity once retries exhaust.

use thiserror::Error;

use crate::conflict::ConflictData;
use crate::schedule::WorkflowStage;

/// Errors surfaced by the scheduling core.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Malformed create/update request, rejected before touching the store.
    #[error("validation: {0}")]
    Validation(String),

    /// High-severity scheduling conflict blocked the operation.
    #[error("blocked by {} scheduling conflict(s)", .0.len())]
    Conflict(Vec<ConflictData>),

    /// No matching workflow rule, guard evaluated false, or role check failed.
    #[error("invalid transition {from} -> {to}: {reason}")]
    InvalidTransition {
        from: WorkflowStage,
        to: WorkflowStage,
        reason: String,
    },

    /// Another transition is already in flight for the same schedule.
    #[error("transition already in flight for schedule {0}")]
    ConcurrentTransition(String),

    /// The publish collaborator reported failure.
    #[error("publish failed: {0}")]
    PublishFailure(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("database: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("serialization: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
