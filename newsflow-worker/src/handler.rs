//! ABOUTME: The single seam a worker binary implements: take a stage's payload, produce a result
//! ABOUTME: Everything else (consume, retry, publish, idempotency) is shared by WorkerLoop

use async_trait::async_trait;
use newsflow_core::NewsflowError;
use serde_json::Value;

/// Executes one stage's work for a single task delivery.
///
/// Implementors own the collaborator calls (scraping, LLM calls, document
/// storage, vector indexing) and report outcomes through `NewsflowError`'s
/// taxonomy so [`crate::loop_::WorkerLoop`] can decide retry vs. poison vs.
/// bus-unavailable disposition without knowing anything about the stage's
/// domain.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    /// The task name this handler answers to, matched against
    /// `TaskMessage::task` before dispatch (a defensive check; the bus
    /// topology already routes by queue).
    fn stage_name(&self) -> &str;

    /// Run the stage against `payload`, returning the value that becomes
    /// `CompletionMessage::payload` on success.
    ///
    /// # Errors
    /// Any `NewsflowError`. `is_retryable()` on the returned error decides
    /// whether the loop retries (bounded by the task's `attempt` count) or
    /// reports `task_failed` immediately.
    async fn execute(&self, payload: Value) -> Result<Value, NewsflowError>;
}
