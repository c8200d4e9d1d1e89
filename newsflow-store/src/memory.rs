//! ABOUTME: In-memory WorkflowStore backed by DashMap, used by tests and the fake bus harness
//! ABOUTME: Same CAS semantics as the persistent backend; no shortcuts taken for convenience

use crate::trait_def::{CasOutcome, CreateOutcome, WorkflowStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use newsflow_core::{NewsflowError, WorkflowRecord};
use uuid::Uuid;

#[derive(Default)]
pub struct InMemoryWorkflowStore {
    records: DashMap<Uuid, WorkflowRecord>,
    idempotency_keys: DashMap<String, Uuid>,
}

impl InMemoryWorkflowStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WorkflowStore for InMemoryWorkflowStore {
    async fn create(&self, record: WorkflowRecord) -> Result<CreateOutcome, NewsflowError> {
        if self.records.contains_key(&record.correlation_id) {
            return Ok(CreateOutcome::Conflict);
        }
        if let Some(key) = record.idempotency_key.clone() {
            self.idempotency_keys.insert(key, record.correlation_id);
        }
        self.records.insert(record.correlation_id, record);
        Ok(CreateOutcome::Created)
    }

    async fn load(&self, correlation_id: Uuid) -> Result<Option<WorkflowRecord>, NewsflowError> {
        Ok(self.records.get(&correlation_id).map(|r| r.clone()))
    }

    async fn compare_and_set(
        &self,
        correlation_id: Uuid,
        expected_version: u64,
        new_record: WorkflowRecord,
    ) -> Result<CasOutcome, NewsflowError> {
        let mut entry = match self.records.get_mut(&correlation_id) {
            Some(entry) => entry,
            None => {
                return Err(NewsflowError::NotFound {
                    correlation_id: correlation_id.to_string(),
                })
            }
        };
        if entry.version != expected_version {
            return Ok(CasOutcome::Conflict);
        }
        *entry = new_record;
        Ok(CasOutcome::Ok)
    }

    async fn list_stuck(
        &self,
        older_than: DateTime<Utc>,
    ) -> Result<Vec<WorkflowRecord>, NewsflowError> {
        Ok(self
            .records
            .iter()
            .filter(|entry| !entry.is_terminal() && entry.updated_at < older_than)
            .map(|entry| entry.clone())
            .collect())
    }

    async fn find_by_idempotency_key(
        &self,
        idempotency_key: &str,
    ) -> Result<Option<Uuid>, NewsflowError> {
        Ok(self.idempotency_keys.get(idempotency_key).map(|v| *v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use newsflow_core::Stage;

    fn sample_record() -> WorkflowRecord {
        WorkflowRecord::new(
            Uuid::new_v4(),
            "verify",
            vec![Stage::verification()],
            serde_json::json!({"claim": "x"}),
            None,
        )
    }

    #[tokio::test]
    async fn create_then_load_round_trips() {
        let store = InMemoryWorkflowStore::new();
        let record = sample_record();
        let id = record.correlation_id;
        assert_eq!(store.create(record).await.unwrap(), CreateOutcome::Created);
        let loaded = store.load(id).await.unwrap().unwrap();
        assert_eq!(loaded.correlation_id, id);
    }

    #[tokio::test]
    async fn duplicate_create_conflicts() {
        let store = InMemoryWorkflowStore::new();
        let record = sample_record();
        let dup = record.clone();
        store.create(record).await.unwrap();
        assert_eq!(store.create(dup).await.unwrap(), CreateOutcome::Conflict);
    }

    #[tokio::test]
    async fn cas_detects_stale_version() {
        let store = InMemoryWorkflowStore::new();
        let record = sample_record();
        let id = record.correlation_id;
        store.create(record.clone()).await.unwrap();

        let mut updated = record.clone();
        updated.version = 1;
        let outcome = store
            .compare_and_set(id, 1, updated)
            .await
            .unwrap();
        assert_eq!(outcome, CasOutcome::Conflict, "expected version was 0, not 1");
    }

    #[tokio::test]
    async fn idempotency_key_resolves_to_same_correlation_id() {
        let store = InMemoryWorkflowStore::new();
        let mut record = sample_record();
        record.idempotency_key = Some("client-key-1".to_string());
        let id = record.correlation_id;
        store.create(record).await.unwrap();

        let found = store.find_by_idempotency_key("client-key-1").await.unwrap();
        assert_eq!(found, Some(id));
    }
}
