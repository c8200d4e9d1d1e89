//! ABOUTME: The WorkflowStore trait: CAS-guarded persistence keyed by correlation id
//! ABOUTME: Only the orchestrator is permitted to call these methods; workers never touch it

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use newsflow_core::{NewsflowError, WorkflowRecord};
use uuid::Uuid;

/// Outcome of a `create` call.
#[derive(Debug, PartialEq, Eq)]
pub enum CreateOutcome {
    Created,
    /// A record already exists for this correlation id.
    Conflict,
}

/// Outcome of a `compare_and_set` call.
#[derive(Debug, PartialEq, Eq)]
pub enum CasOutcome {
    Ok,
    /// `expected_version` did not match the stored version; the caller
    /// should reload and retry (`WORKFLOW_CONFLICT` in the error taxonomy).
    Conflict,
}

/// Persistent, keyed storage for workflow records with optimistic
/// concurrency via a version counter.
///
/// Every method is atomic per `correlation_id`. Implementations must
/// survive orchestrator restart; an in-memory implementation exists only
/// for tests.
#[async_trait]
pub trait WorkflowStore: Send + Sync {
    /// # Errors
    /// `Internal` on a storage I/O failure.
    async fn create(&self, record: WorkflowRecord) -> Result<CreateOutcome, NewsflowError>;

    /// # Errors
    /// `Internal` on a storage I/O failure.
    async fn load(&self, correlation_id: Uuid) -> Result<Option<WorkflowRecord>, NewsflowError>;

    /// Replace the stored record only if its current version equals
    /// `expected_version`.
    ///
    /// # Errors
    /// `Internal` on a storage I/O failure. Returns `Ok(CasOutcome::Conflict)`,
    /// not an error, when the version does not match.
    async fn compare_and_set(
        &self,
        correlation_id: Uuid,
        expected_version: u64,
        new_record: WorkflowRecord,
    ) -> Result<CasOutcome, NewsflowError>;

    /// Workflows still `Running` (or `Pending`) whose `updated_at` is older
    /// than `older_than`, for the janitor sweep.
    ///
    /// # Errors
    /// `Internal` on a storage I/O failure.
    async fn list_stuck(
        &self,
        older_than: DateTime<Utc>,
    ) -> Result<Vec<WorkflowRecord>, NewsflowError>;

    /// Look up a correlation id previously created with this idempotency
    /// key, supporting `POST /workflows`' `Idempotency-Key` header.
    ///
    /// # Errors
    /// `Internal` on a storage I/O failure.
    async fn find_by_idempotency_key(
        &self,
        idempotency_key: &str,
    ) -> Result<Option<Uuid>, NewsflowError>;
}
