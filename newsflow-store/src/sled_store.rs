//! ABOUTME: sled-backed persistent WorkflowStore, surviving orchestrator restart
//! ABOUTME: Records are MessagePack-encoded; CAS is implemented on sled's compare_and_swap

use crate::trait_def::{CasOutcome, CreateOutcome, WorkflowStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use newsflow_core::{NewsflowError, WorkflowRecord};
use std::path::Path;
use uuid::Uuid;

pub struct SledWorkflowStore {
    records: sled::Tree,
    idempotency_keys: sled::Tree,
}

impl SledWorkflowStore {
    /// # Errors
    /// `Internal` if the database cannot be opened at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, NewsflowError> {
        let db = sled::open(path).map_err(|e| NewsflowError::Internal {
            message: format!("failed to open workflow store: {e}"),
        })?;
        let records = db
            .open_tree("workflow_records")
            .map_err(|e| NewsflowError::Internal {
                message: format!("failed to open workflow_records tree: {e}"),
            })?;
        let idempotency_keys =
            db.open_tree("idempotency_keys")
                .map_err(|e| NewsflowError::Internal {
                    message: format!("failed to open idempotency_keys tree: {e}"),
                })?;
        Ok(Self {
            records,
            idempotency_keys,
        })
    }

    fn encode(record: &WorkflowRecord) -> Result<Vec<u8>, NewsflowError> {
        rmp_serde::to_vec(record).map_err(|e| NewsflowError::Internal {
            message: format!("failed to encode workflow record: {e}"),
        })
    }

    fn decode(bytes: &[u8]) -> Result<WorkflowRecord, NewsflowError> {
        rmp_serde::from_slice(bytes).map_err(|e| NewsflowError::Internal {
            message: format!("failed to decode workflow record: {e}"),
        })
    }
}

#[async_trait]
impl WorkflowStore for SledWorkflowStore {
    async fn create(&self, record: WorkflowRecord) -> Result<CreateOutcome, NewsflowError> {
        let key = record.correlation_id.as_bytes().to_vec();
        let encoded = Self::encode(&record)?;

        let result = self
            .records
            .compare_and_swap(&key, None::<&[u8]>, Some(encoded))
            .map_err(|e| NewsflowError::Internal {
                message: format!("sled compare_and_swap failed: {e}"),
            })?;

        if result.is_err() {
            return Ok(CreateOutcome::Conflict);
        }
        if let Some(idempotency_key) = record.idempotency_key.clone() {
            self.idempotency_keys
                .insert(idempotency_key.as_bytes(), record.correlation_id.as_bytes())
                .map_err(|e| NewsflowError::Internal {
                    message: format!("sled insert failed: {e}"),
                })?;
        }
        self.records.flush_async().await.map_err(|e| NewsflowError::Internal {
            message: format!("sled flush failed: {e}"),
        })?;
        Ok(CreateOutcome::Created)
    }

    async fn load(&self, correlation_id: Uuid) -> Result<Option<WorkflowRecord>, NewsflowError> {
        let bytes = self
            .records
            .get(correlation_id.as_bytes())
            .map_err(|e| NewsflowError::Internal {
                message: format!("sled get failed: {e}"),
            })?;
        bytes.map(|b| Self::decode(&b)).transpose()
    }

    async fn compare_and_set(
        &self,
        correlation_id: Uuid,
        expected_version: u64,
        new_record: WorkflowRecord,
    ) -> Result<CasOutcome, NewsflowError> {
        let key = correlation_id.as_bytes().to_vec();
        let current = self
            .records
            .get(&key)
            .map_err(|e| NewsflowError::Internal {
                message: format!("sled get failed: {e}"),
            })?
            .ok_or_else(|| NewsflowError::NotFound {
                correlation_id: correlation_id.to_string(),
            })?;
        let current_record = Self::decode(&current)?;
        if current_record.version != expected_version {
            return Ok(CasOutcome::Conflict);
        }

        let encoded = Self::encode(&new_record)?;
        let result = self
            .records
            .compare_and_swap(&key, Some(current.as_ref()), Some(encoded))
            .map_err(|e| NewsflowError::Internal {
                message: format!("sled compare_and_swap failed: {e}"),
            })?;

        if result.is_err() {
            return Ok(CasOutcome::Conflict);
        }
        self.records.flush_async().await.map_err(|e| NewsflowError::Internal {
            message: format!("sled flush failed: {e}"),
        })?;
        Ok(CasOutcome::Ok)
    }

    async fn list_stuck(
        &self,
        older_than: DateTime<Utc>,
    ) -> Result<Vec<WorkflowRecord>, NewsflowError> {
        let mut stuck = Vec::new();
        for entry in self.records.iter() {
            let (_key, value) = entry.map_err(|e| NewsflowError::Internal {
                message: format!("sled iteration failed: {e}"),
            })?;
            let record = Self::decode(&value)?;
            if !record.is_terminal() && record.updated_at < older_than {
                stuck.push(record);
            }
        }
        Ok(stuck)
    }

    async fn find_by_idempotency_key(
        &self,
        idempotency_key: &str,
    ) -> Result<Option<Uuid>, NewsflowError> {
        let bytes = self
            .idempotency_keys
            .get(idempotency_key.as_bytes())
            .map_err(|e| NewsflowError::Internal {
                message: format!("sled get failed: {e}"),
            })?;
        Ok(bytes.and_then(|b| Uuid::from_slice(&b).ok()))
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
    async fn create_load_and_cas_survive_a_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let record = sample_record();
        let id = record.correlation_id;

        {
            let store = SledWorkflowStore::open(dir.path()).unwrap();
            store.create(record.clone()).await.unwrap();
        }

        let store = SledWorkflowStore::open(dir.path()).unwrap();
        let loaded = store.load(id).await.unwrap().unwrap();
        assert_eq!(loaded.version, 0);

        let mut updated = loaded.clone();
        updated.record_attempt_failure();
        let outcome = store.compare_and_set(id, 0, updated).await.unwrap();
        assert_eq!(outcome, CasOutcome::Ok);

        let reloaded = store.load(id).await.unwrap().unwrap();
        assert_eq!(reloaded.version, 1);
    }
}
