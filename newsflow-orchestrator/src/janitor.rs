//! ABOUTME: Periodic sweep rescuing workflows stuck RUNNING past a watchdog threshold
//! ABOUTME: Republishes a known-lost stage's tasks, or fails the workflow with STAGE_TIMEOUT

use chrono::{Duration as ChronoDuration, Utc};
use newsflow_bus::Bus;
use newsflow_core::{NewsflowError, TaskMessage};
use newsflow_store::{CasOutcome, WorkflowStore};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Sweeps the workflow store for records stuck `Running` with no recent
/// completion, per §7's janitor sweep: either republish the current stage's
/// in-flight tasks (recoverable, e.g. after a worker crash) or mark the
/// workflow `Failed` with `STAGE_TIMEOUT` once it has been stuck long enough
/// that a republish is unlikely to help.
pub struct Janitor {
    store: Arc<dyn WorkflowStore>,
    bus: Arc<dyn Bus>,
    stuck_threshold: Duration,
    fail_threshold: Duration,
    sweep_interval: Duration,
}

impl Janitor {
    #[must_use]
    pub fn new(store: Arc<dyn WorkflowStore>, bus: Arc<dyn Bus>, stuck_threshold: Duration, sweep_interval: Duration) -> Self {
        Self {
            store,
            bus,
            stuck_threshold,
            fail_threshold: stuck_threshold * 3,
            sweep_interval,
        }
    }

    pub async fn run(&self, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.sweep_interval);
        loop {
            tokio::select! {
                () = shutdown.cancelled() => return,
                _ = ticker.tick() => {
                    if let Err(err) = self.sweep_once().await {
                        warn!(%err, "janitor sweep failed");
                    }
                }
            }
        }
    }

    /// # Errors
    /// `Internal` on a storage I/O failure while listing stuck workflows.
    pub async fn sweep_once(&self) -> Result<(), NewsflowError> {
        let stuck_cutoff = Utc::now() - ChronoDuration::from_std(self.stuck_threshold).unwrap_or(ChronoDuration::zero());
        let candidates = self.store.list_stuck(stuck_cutoff).await?;

        for record in candidates {
            let age = Utc::now() - record.updated_at;
            let fail_cutoff = ChronoDuration::from_std(self.fail_threshold).unwrap_or(ChronoDuration::zero());

            if age >= fail_cutoff {
                let mut failing = record.clone();
                let stage_name = failing
                    .current_stage()
                    .map(|s| s.name.clone())
                    .unwrap_or_else(|| "unknown".to_string());
                failing.fail(stage_name, "STAGE_TIMEOUT", "watchdog threshold exceeded with no completion");
                match self
                    .store
                    .compare_and_set(record.correlation_id, record.version, failing)
                    .await?
                {
                    CasOutcome::Ok => {
                        warn!(correlation_id = %record.correlation_id, "workflow failed by janitor after exceeding watchdog threshold");
                    }
                    CasOutcome::Conflict => {
                        info!(correlation_id = %record.correlation_id, "janitor lost a race, skipping");
                    }
                }
                continue;
            }

            let Some(stage) = record.current_stage() else { continue };
            for (child_key, payload) in &record.in_flight_payloads {
                let child_key_opt = if child_key == newsflow_core::UNIT_CHILD_KEY {
                    None
                } else {
                    Some(child_key.clone())
                };
                let attempt = record.attempts_for_current_stage().max(1);
                let mut task = TaskMessage::new(record.correlation_id, stage.name.clone(), attempt, payload.clone());
                if let Some(key) = child_key_opt {
                    task = task.with_child_key(key);
                }
                let body = serde_json::to_vec(&task).map_err(|e| NewsflowError::Internal { message: e.to_string() })?;
                self.bus.publish(&stage.routing_key, &body).await?;
            }
            warn!(correlation_id = %record.correlation_id, stage = %stage.name, "janitor republished in-flight tasks for a stuck workflow");
        }
        Ok(())
    }
}
