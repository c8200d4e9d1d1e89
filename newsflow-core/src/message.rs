//! ABOUTME: Wire schemas for task and completion messages
//! ABOUTME: Every message carries an explicit schema_version; unknown versions are poison

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// The only schema version this implementation understands.
pub const SCHEMA_VERSION: &str = "1";

/// A task dispatched to a worker over `tasks.<stage>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskMessage {
    pub schema_version: String,
    pub correlation_id: Uuid,
    pub task: String,
    pub attempt: u32,
    pub child_key: Option<String>,
    pub payload: Value,
}

impl TaskMessage {
    #[must_use]
    pub fn new(correlation_id: Uuid, task: impl Into<String>, attempt: u32, payload: Value) -> Self {
        Self {
            schema_version: SCHEMA_VERSION.to_string(),
            correlation_id,
            task: task.into(),
            attempt,
            child_key: None,
            payload,
        }
    }

    #[must_use]
    pub fn with_child_key(mut self, child_key: impl Into<String>) -> Self {
        self.child_key = Some(child_key.into());
        self
    }

    /// `true` iff this message's schema version is one this binary understands.
    #[must_use]
    pub fn has_known_schema(&self) -> bool {
        self.schema_version == SCHEMA_VERSION
    }
}

/// Terminal outcome of a single task attempt, published by a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionStatus {
    TaskSucceeded,
    TaskFailed,
}

/// A completion message consumed by the orchestrator from `tasks.completion`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionMessage {
    pub schema_version: String,
    pub correlation_id: Uuid,
    pub status: CompletionStatus,
    pub produced_by: String,
    pub child_key: Option<String>,
    pub payload: Value,
}

impl CompletionMessage {
    #[must_use]
    pub fn succeeded(correlation_id: Uuid, produced_by: impl Into<String>, payload: Value) -> Self {
        Self {
            schema_version: SCHEMA_VERSION.to_string(),
            correlation_id,
            status: CompletionStatus::TaskSucceeded,
            produced_by: produced_by.into(),
            child_key: None,
            payload,
        }
    }

    #[must_use]
    pub fn failed(correlation_id: Uuid, produced_by: impl Into<String>, error: &crate::error::NewsflowError) -> Self {
        Self {
            schema_version: SCHEMA_VERSION.to_string(),
            correlation_id,
            status: CompletionStatus::TaskFailed,
            produced_by: produced_by.into(),
            child_key: None,
            payload: serde_json::json!({
                "error": { "kind": error.kind(), "message": error.to_string() }
            }),
        }
    }

    #[must_use]
    pub fn with_child_key(mut self, child_key: impl Into<String>) -> Self {
        self.child_key = Some(child_key.into());
        self
    }

    #[must_use]
    pub fn has_known_schema(&self) -> bool {
        self.schema_version == SCHEMA_VERSION
    }
}
