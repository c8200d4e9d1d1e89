//! ABOUTME: Error taxonomy shared by the orchestrator, the bus client, and every worker
//! ABOUTME: Mirrors the error table in the workflow-orchestration specification

use thiserror::Error;

/// Error taxonomy for the orchestration core.
///
/// Each variant corresponds to one row of the error-disposition table:
/// `BadInput` and `Poison` are non-retryable, `TransientUpstream` and
/// `StageTimeout` are retried up to `max_attempts`, `BusUnavailable` drives
/// the reconnect loop, and `WorkflowConflict` triggers a bounded
/// reload-and-retry inside the completion handler.
#[derive(Debug, Error)]
pub enum NewsflowError {
    #[error("bad input: {message}")]
    BadInput { message: String },

    #[error("transient upstream failure: {message}")]
    TransientUpstream { message: String },

    #[error("poison message: {message}")]
    Poison { message: String },

    #[error("bus unavailable: {message}")]
    BusUnavailable { message: String },

    #[error("workflow store conflict for {correlation_id}")]
    WorkflowConflict { correlation_id: String },

    #[error("stage timed out after {0:?}")]
    StageTimeout(std::time::Duration),

    #[error("workflow cancelled")]
    Cancelled,

    #[error("workflow {correlation_id} not found")]
    NotFound { correlation_id: String },

    #[error("internal error: {message}")]
    Internal { message: String },
}

impl NewsflowError {
    /// The error kind as it appears on the wire in `WorkflowRecord::last_error`
    /// and in a worker's `task_failed` completion payload.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::BadInput { .. } => "BAD_INPUT",
            Self::TransientUpstream { .. } => "TRANSIENT_UPSTREAM",
            Self::Poison { .. } => "POISON_MESSAGE",
            Self::BusUnavailable { .. } => "BUS_UNAVAILABLE",
            Self::WorkflowConflict { .. } => "WORKFLOW_CONFLICT",
            Self::StageTimeout(_) => "STAGE_TIMEOUT",
            Self::Cancelled => "CANCELLED",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::Internal { .. } => "INTERNAL",
        }
    }

    /// Whether a worker should retry the task that produced this error
    /// (subject to `max_attempts`), per the error-disposition table.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::TransientUpstream { .. } | Self::StageTimeout(_))
    }
}

/// Convenience result alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, NewsflowError>;
