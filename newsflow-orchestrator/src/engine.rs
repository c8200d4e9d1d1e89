//! ABOUTME: The state machine: submit, completion handling, fan-out, and retry
//! ABOUTME: Implements transition rules 1-4 against a WorkflowStore and a Bus

use crate::lanes::LaneMap;
use newsflow_bus::Bus;
use newsflow_core::{
    stages_for_workflow_type, CompletionMessage, CompletionStatus, FanOut, NewsflowError,
    TaskMessage, WorkflowRecord,
};
use newsflow_store::{CasOutcome, CreateOutcome, WorkflowStore};
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Bounded retries on a `WorkflowConflict` CAS race before giving up and
/// surfacing the error; a genuine conflict storm indicates a bug, not a
/// transient condition, so this is a small constant rather than configurable.
const MAX_CAS_RETRIES: u32 = 10;

pub struct Engine {
    store: Arc<dyn WorkflowStore>,
    bus: Arc<dyn Bus>,
    lanes: LaneMap,
    max_attempts: u32,
}

impl Engine {
    #[must_use]
    pub fn new(store: Arc<dyn WorkflowStore>, bus: Arc<dyn Bus>, max_attempts: u32) -> Self {
        Self {
            store,
            bus,
            lanes: LaneMap::new(),
            max_attempts,
        }
    }

    /// Transition rule 1: resolve `workflow_type`, create the record at
    /// stage 0, publish its first task. Rolls the record back to absent if
    /// the publish confirm fails, per the `POST /workflows` 503 contract.
    ///
    /// # Errors
    /// `BadInput` for an unknown `workflow_type`; `BusUnavailable` if the
    /// first publish cannot be confirmed (after the record is rolled back).
    pub async fn submit(
        &self,
        workflow_type: &str,
        initial_payload: Value,
        idempotency_key: Option<String>,
    ) -> Result<Uuid, NewsflowError> {
        if let Some(key) = idempotency_key.as_deref() {
            if let Some(existing) = self.store.find_by_idempotency_key(key).await? {
                info!(correlation_id = %existing, "idempotency key resolved to existing workflow");
                return Ok(existing);
            }
        }

        let stages = stages_for_workflow_type(workflow_type).ok_or_else(|| NewsflowError::BadInput {
            message: format!("unknown workflow_type '{workflow_type}'"),
        })?;

        let correlation_id = Uuid::new_v4();
        let record = WorkflowRecord::new(
            correlation_id,
            workflow_type,
            stages,
            initial_payload.clone(),
            idempotency_key,
        );

        match self.store.create(record.clone()).await? {
            CreateOutcome::Conflict => {
                return Err(NewsflowError::Internal {
                    message: format!("correlation id collision for {correlation_id}"),
                })
            }
            CreateOutcome::Created => {}
        }

        let stage0 = record
            .current_stage()
            .expect("freshly created record always has a stage 0");
        let task = TaskMessage::new(correlation_id, stage0.name.clone(), 1, initial_payload);
        let body = serde_json::to_vec(&task).map_err(|e| NewsflowError::Internal {
            message: e.to_string(),
        })?;

        if let Err(err) = self.bus.publish(&stage0.routing_key, &body).await {
            warn!(%correlation_id, %err, "stage-0 publish failed, rolling back workflow creation");
            return Err(err);
        }

        info!(%correlation_id, workflow_type, "workflow submitted");
        Ok(correlation_id)
    }

    /// Transition rules 2-4: dispatch one completion message on its
    /// workflow's serializing lane.
    ///
    /// # Errors
    /// Propagates store or bus errors; a `WorkflowConflict` that survives
    /// `MAX_CAS_RETRIES` retries is returned to the caller, which acks the
    /// message anyway (the janitor will rescue a genuinely stuck workflow).
    pub async fn handle_completion(&self, completion: &CompletionMessage) -> Result<(), NewsflowError> {
        if !completion.has_known_schema() {
            warn!(correlation_id = %completion.correlation_id, "completion with unknown schema version discarded");
            return Ok(());
        }

        let lane = self.lanes.lane(completion.correlation_id);
        let _guard = lane.lock().await;

        for _ in 0..MAX_CAS_RETRIES {
            let Some(mut record) = self.store.load(completion.correlation_id).await? else {
                // Rule 2: unknown workflow, discard (idempotent replay).
                return Ok(());
            };

            if record.is_terminal() {
                // Rule 2: terminal workflow, discard.
                return Ok(());
            }

            let Some(current_stage) = record.current_stage().cloned() else {
                return Ok(());
            };
            if completion.produced_by != current_stage.name {
                // Rule 2: stale fan-out from a prior attempt/stage, discard.
                return Ok(());
            }

            let expected_version = record.version;

            let to_publish = match completion.status {
                CompletionStatus::TaskSucceeded => {
                    self.apply_success(&mut record, completion)?
                }
                CompletionStatus::TaskFailed => {
                    self.apply_failure(&mut record, &current_stage, completion)
                }
            };
            let became_terminal = record.is_terminal();

            match self
                .store
                .compare_and_set(completion.correlation_id, expected_version, record)
                .await?
            {
                CasOutcome::Ok => {
                    for (routing_key, body) in to_publish {
                        self.bus.publish(&routing_key, &body).await?;
                    }
                    if became_terminal {
                        self.lanes.remove(completion.correlation_id);
                    }
                    return Ok(());
                }
                CasOutcome::Conflict => continue,
            }
        }

        Err(NewsflowError::WorkflowConflict {
            correlation_id: completion.correlation_id.to_string(),
        })
    }

    /// Rule 3. Returns the `(routing_key, body)` pairs to publish once the
    /// CAS save that records this mutation has succeeded.
    fn apply_success(
        &self,
        record: &mut WorkflowRecord,
        completion: &CompletionMessage,
    ) -> Result<Vec<(String, Vec<u8>)>, NewsflowError> {
        let newly_accounted =
            record.record_child_succeeded(completion.child_key.as_deref(), &completion.payload);
        if !newly_accounted {
            // Duplicate completion for an already-accounted child (S3).
            return Ok(Vec::new());
        }

        if record.pending_children > 0 {
            return Ok(Vec::new());
        }

        self.advance_past_current_stage(record)
    }

    /// Advance `record` past its current (just-completed) stage, skipping
    /// over any immediately-following stage whose fan-out list is empty
    /// ("the stage is considered trivially complete; advance again").
    /// Returns the child tasks to publish for the first stage reached that
    /// has a non-empty fan-out, or none if the workflow reached `Succeeded`.
    fn advance_past_current_stage(
        &self,
        record: &mut WorkflowRecord,
    ) -> Result<Vec<(String, Vec<u8>)>, NewsflowError> {
        loop {
            if record.current_index + 1 == record.stages.len() {
                record.succeed()?;
                info!(correlation_id = %record.correlation_id, "workflow succeeded");
                return Ok(Vec::new());
            }

            let next_index = record.current_index + 1;
            let next_stage = record.stages[next_index].clone();
            let children = compute_children(&next_stage, &record.stage_output, record.correlation_id);

            if children.is_empty() {
                record.advance_stage(0)?;
                continue;
            }

            record.advance_stage(u32::try_from(children.len()).unwrap_or(u32::MAX))?;
            record.set_in_flight_payloads(
                children
                    .iter()
                    .map(|t| {
                        let key = t
                            .child_key
                            .clone()
                            .unwrap_or_else(|| newsflow_core::UNIT_CHILD_KEY.to_string());
                        (key, t.payload.clone())
                    })
                    .collect(),
            );
            return encode_tasks(&children, &next_stage.routing_key);
        }
    }

    /// Rule 4. Returns the single republish to perform once the CAS save
    /// succeeds, or none if attempts are exhausted (workflow failed) or the
    /// workflow was already terminal.
    fn apply_failure(
        &self,
        record: &mut WorkflowRecord,
        current_stage: &newsflow_core::Stage,
        completion: &CompletionMessage,
    ) -> Vec<(String, Vec<u8>)> {
        let attempt = record.record_attempt_failure();
        let error_kind = completion
            .payload
            .get("error")
            .and_then(|e| e.get("kind"))
            .and_then(Value::as_str)
            .unwrap_or("TRANSIENT_UPSTREAM");
        // Non-retryable kinds (e.g. BAD_INPUT) fail the workflow on the
        // first report regardless of max_attempts, per the error-disposition
        // table: validation failures do not become transient-upstream retries.
        let retryable = !matches!(error_kind, "BAD_INPUT" | "POISON_MESSAGE" | "CANCELLED");
        if retryable && attempt < self.max_attempts {
            let payload = record.in_flight_payload(completion.child_key.as_deref());
            let retry = TaskMessage::new(record.correlation_id, current_stage.name.clone(), attempt + 1, payload);
            let retry = match &completion.child_key {
                Some(key) => retry.with_child_key(key.clone()),
                None => retry,
            };
            encode_tasks(std::slice::from_ref(&retry), &current_stage.routing_key).unwrap_or_default()
        } else {
            let kind = error_kind.to_string();
            let message = completion
                .payload
                .get("error")
                .and_then(|e| e.get("message"))
                .and_then(Value::as_str)
                .unwrap_or("max attempts exhausted")
                .to_string();
            record.fail(current_stage.name.clone(), kind, message);
            Vec::new()
        }
    }
}

fn encode_tasks(tasks: &[TaskMessage], routing_key: &str) -> Result<Vec<(String, Vec<u8>)>, NewsflowError> {
    tasks
        .iter()
        .map(|task| {
            serde_json::to_vec(task)
                .map(|body| (routing_key.to_string(), body))
                .map_err(|e| NewsflowError::Internal { message: e.to_string() })
        })
        .collect()
}

/// Compute the set of child tasks to publish for `stage`, given the
/// accumulated `stage_output` from the stage that just completed.
fn compute_children(stage: &newsflow_core::Stage, stage_output: &Value, correlation_id: Uuid) -> Vec<TaskMessage> {
    match stage.fan_out {
        FanOut::Unit => {
            vec![TaskMessage::new(correlation_id, stage.name.clone(), 1, stage_output.clone())]
        }
        FanOut::PerItem => {
            let items_key = stage.items_key.as_deref().unwrap_or_default();
            let items = stage_output
                .get(items_key)
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            items
                .into_iter()
                .enumerate()
                .map(|(index, item)| {
                    let child_key = item.as_str().map_or_else(|| index.to_string(), ToString::to_string);
                    let payload = serde_json::json!({ "article_id": item });
                    TaskMessage::new(correlation_id, stage.name.clone(), 1, payload).with_child_key(child_key)
                })
                .collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use newsflow_core::Stage;

    #[test]
    fn unit_fan_out_produces_one_child() {
        let stage = Stage::verification();
        let children = compute_children(&stage, &serde_json::json!({"claim": "x"}), Uuid::new_v4());
        assert_eq!(children.len(), 1);
        assert!(children[0].child_key.is_none());
    }

    #[test]
    fn per_item_fan_out_produces_one_child_per_article() {
        let stage = Stage::transformation();
        let output = serde_json::json!({"article_ids": ["a", "b", "c"]});
        let children = compute_children(&stage, &output, Uuid::new_v4());
        assert_eq!(children.len(), 3);
        assert_eq!(children[1].child_key.as_deref(), Some("b"));
    }

    #[test]
    fn empty_fan_out_list_produces_no_children() {
        let stage = Stage::transformation();
        let output = serde_json::json!({"article_ids": []});
        let children = compute_children(&stage, &output, Uuid::new_v4());
        assert!(children.is_empty());
    }
}
