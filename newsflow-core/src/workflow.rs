//! ABOUTME: The workflow record and the invariant-enforcing mutators on it
//! ABOUTME: The orchestrator is the only component allowed to call these mutators

use crate::error::NewsflowError;
use crate::stage::Stage;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

/// Lifecycle status of a workflow record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl WorkflowStatus {
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }
}

/// The last error recorded against a workflow, surfaced by `GET /workflows/{id}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowErrorInfo {
    pub stage: String,
    pub kind: String,
    pub message: String,
}

/// A durable, correlation-tracked record of one pipeline's progress.
///
/// `version` is the optimistic-concurrency counter used by
/// `WorkflowStore::compare_and_set`; every mutator on this type that
/// changes persisted state bumps it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowRecord {
    pub correlation_id: Uuid,
    pub workflow_type: String,
    pub idempotency_key: Option<String>,
    pub stages: Vec<Stage>,
    pub current_index: usize,
    pub initial_payload: Value,
    pub stage_output: Value,
    pub pending_children: u32,
    /// Child keys already accounted for at the current stage; guards
    /// against double-decrementing `pending_children` on redelivery.
    pub completed_children: HashSet<String>,
    pub status: WorkflowStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub attempts_per_stage: HashMap<String, u32>,
    pub last_error: Option<WorkflowErrorInfo>,
    /// The payload last dispatched to each in-flight child of the current
    /// stage, keyed by `child_key` (or `"__unit__"` for a non-fan-out
    /// stage). Needed to republish an unchanged payload on retry, since a
    /// failed task's original payload is otherwise not recoverable once the
    /// task message itself has been acked/nacked off the bus.
    #[serde(default)]
    pub in_flight_payloads: HashMap<String, Value>,
    pub version: u64,
}

/// The key `record_child_succeeded`/`in_flight_payloads` use for a
/// non-fan-out stage's single child.
pub const UNIT_CHILD_KEY: &str = "__unit__";

impl WorkflowRecord {
    /// Create a workflow already `Running` at stage 0 with one pending task,
    /// matching transition rule 1: creation and the first publish are one
    /// atomic step from the caller's point of view.
    #[must_use]
    pub fn new(
        correlation_id: Uuid,
        workflow_type: impl Into<String>,
        stages: Vec<Stage>,
        initial_payload: Value,
        idempotency_key: Option<String>,
    ) -> Self {
        let now = Utc::now();
        let initial_payload_for_stage0 = initial_payload.clone();
        Self {
            correlation_id,
            workflow_type: workflow_type.into(),
            idempotency_key,
            stages,
            current_index: 0,
            initial_payload,
            stage_output: Value::Object(serde_json::Map::new()),
            pending_children: 1,
            completed_children: HashSet::new(),
            status: WorkflowStatus::Running,
            created_at: now,
            updated_at: now,
            attempts_per_stage: HashMap::new(),
            last_error: None,
            in_flight_payloads: HashMap::from([(UNIT_CHILD_KEY.to_string(), initial_payload_for_stage0)]),
            version: 0,
        }
    }

    #[must_use]
    pub fn current_stage(&self) -> Option<&Stage> {
        self.stages.get(self.current_index)
    }

    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
        self.version += 1;
    }

    /// Merge a succeeded child's payload into the accumulator and decrement
    /// `pending_children`, unless `child_key` was already accounted for at
    /// this stage (redelivery / duplicate completion). Returns whether the
    /// child was newly accounted for.
    ///
    /// # Errors
    /// Returns `WorkflowConflict`-shaped errors never; this call cannot fail
    /// on a non-terminal record. Callers must check `is_terminal()` first.
    pub fn record_child_succeeded(
        &mut self,
        child_key: Option<&str>,
        payload: &Value,
    ) -> bool {
        let key = child_key.unwrap_or(UNIT_CHILD_KEY).to_string();
        if self.completed_children.contains(&key) {
            return false;
        }
        self.completed_children.insert(key.clone());

        if let Value::Object(ref mut out) = self.stage_output {
            if let Value::Object(fields) = payload {
                for (k, v) in fields {
                    if child_key.is_some() {
                        out.entry(k.clone())
                            .or_insert_with(|| Value::Array(Vec::new()));
                        if let Some(Value::Array(arr)) = out.get_mut(k) {
                            arr.push(v.clone());
                        }
                    } else {
                        out.insert(k.clone(), v.clone());
                    }
                }
            }
        }
        self.pending_children = self.pending_children.saturating_sub(1);
        self.touch();
        true
    }

    /// Advance to the next stage with `next_pending_children` tasks in
    /// flight. Only valid once `pending_children == 0` at the current
    /// stage and there is a next stage to enter.
    ///
    /// # Errors
    /// `Internal` if called while children are still outstanding or past
    /// the last stage (both indicate an orchestrator bug, not a runtime
    /// condition a caller should routinely hit).
    pub fn advance_stage(&mut self, next_pending_children: u32) -> Result<(), NewsflowError> {
        if self.pending_children != 0 {
            return Err(NewsflowError::Internal {
                message: "advance_stage called with pending_children > 0".to_string(),
            });
        }
        if self.current_index + 1 >= self.stages.len() {
            return Err(NewsflowError::Internal {
                message: "advance_stage called past the last stage".to_string(),
            });
        }
        self.current_index += 1;
        self.pending_children = next_pending_children;
        self.completed_children.clear();
        self.in_flight_payloads.clear();
        self.touch();
        Ok(())
    }

    /// Record the payload dispatched to each child of the current stage,
    /// keyed by `child_key` (or [`UNIT_CHILD_KEY`]). Called immediately
    /// after `advance_stage` (or workflow creation) by the code that
    /// computed the fan-out, so a later retry can republish an unchanged
    /// payload.
    pub fn set_in_flight_payloads(&mut self, payloads: HashMap<String, Value>) {
        self.in_flight_payloads = payloads;
        self.touch();
    }

    /// The payload last dispatched for `child_key` at the current stage, if
    /// known. Falls back to `initial_payload` for a stage-0 task whose
    /// in-flight record predates this field (defensive default, not
    /// expected in practice since `new` always populates it).
    #[must_use]
    pub fn in_flight_payload(&self, child_key: Option<&str>) -> Value {
        let key = child_key.unwrap_or(UNIT_CHILD_KEY);
        self.in_flight_payloads
            .get(key)
            .cloned()
            .unwrap_or_else(|| self.initial_payload.clone())
    }

    /// Mark the workflow `Succeeded`. Only valid at the last stage with no
    /// children outstanding.
    ///
    /// # Errors
    /// `Internal` if called while children are outstanding or before the
    /// last stage has been reached.
    pub fn succeed(&mut self) -> Result<(), NewsflowError> {
        if self.pending_children != 0 || self.current_index + 1 != self.stages.len() {
            return Err(NewsflowError::Internal {
                message: "succeed called before the last stage completed".to_string(),
            });
        }
        self.current_index = self.stages.len();
        self.status = WorkflowStatus::Succeeded;
        self.touch();
        Ok(())
    }

    /// Increment the attempt counter for the current stage. Returns the new
    /// attempt count.
    pub fn record_attempt_failure(&mut self) -> u32 {
        let stage_name = self
            .current_stage()
            .map(|s| s.name.clone())
            .unwrap_or_default();
        let count = self.attempts_per_stage.entry(stage_name).or_insert(0);
        *count += 1;
        let value = *count;
        self.touch();
        value
    }

    #[must_use]
    pub fn attempts_for_current_stage(&self) -> u32 {
        self.current_stage()
            .and_then(|s| self.attempts_per_stage.get(&s.name))
            .copied()
            .unwrap_or(0)
    }

    pub fn fail(&mut self, stage: impl Into<String>, kind: impl Into<String>, message: impl Into<String>) {
        self.status = WorkflowStatus::Failed;
        self.last_error = Some(WorkflowErrorInfo {
            stage: stage.into(),
            kind: kind.into(),
            message: message.into(),
        });
        self.touch();
    }

    pub fn cancel(&mut self) {
        self.status = WorkflowStatus::Cancelled;
        self.touch();
    }
}
