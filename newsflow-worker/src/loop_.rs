//! ABOUTME: The consume -> execute -> publish loop shared by every worker binary
//! ABOUTME: Structured concurrency: CONCURRENCY in-process tasks per queue, cancellable as a group

use crate::handler::TaskHandler;
use crate::idempotency::IdempotencyGuard;
use newsflow_bus::{topology, Bus};
use newsflow_core::{CompletionMessage, NewsflowError, TaskMessage};
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Drives [`TaskHandler::execute`] against deliveries from one queue,
/// `concurrency`-many at a time, each a single-task-at-a-time loop (the bus
/// already enforces prefetch = 1 per consumer).
pub struct WorkerLoop<H: TaskHandler + 'static> {
    bus: Arc<dyn Bus>,
    handler: Arc<H>,
    guard: Arc<IdempotencyGuard>,
    queue: &'static str,
    concurrency: usize,
}

impl<H: TaskHandler + 'static> WorkerLoop<H> {
    #[must_use]
    pub fn new(bus: Arc<dyn Bus>, handler: H, queue: &'static str, concurrency: usize) -> Self {
        Self {
            bus,
            handler: Arc::new(handler),
            guard: Arc::new(IdempotencyGuard::for_concurrency(concurrency)),
            queue,
            concurrency: concurrency.max(1),
        }
    }

    /// Run until `shutdown` is cancelled. Each of `concurrency` worker tasks
    /// opens its own consumer on `queue`; a cancelled token lets in-flight
    /// tasks finish their current delivery before the `JoinSet` drains,
    /// matching the orchestrator's "in-flight tasks run to completion"
    /// cancellation contract.
    ///
    /// # Errors
    /// `NewsflowError::BusUnavailable` if a consumer could not be opened.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<(), NewsflowError> {
        let mut tasks = JoinSet::new();
        for slot in 0..self.concurrency {
            let bus = Arc::clone(&self.bus);
            let handler = Arc::clone(&self.handler);
            let guard = Arc::clone(&self.guard);
            let queue = self.queue;
            let shutdown = shutdown.clone();
            tasks.spawn(async move {
                if let Err(err) = run_slot(slot, bus, handler, guard, queue, shutdown).await {
                    warn!(slot, %err, "worker slot exited with error");
                }
            });
        }
        while tasks.join_next().await.is_some() {}
        Ok(())
    }
}

async fn run_slot<H: TaskHandler + 'static>(
    slot: usize,
    bus: Arc<dyn Bus>,
    handler: Arc<H>,
    guard: Arc<IdempotencyGuard>,
    queue: &'static str,
    shutdown: CancellationToken,
) -> Result<(), NewsflowError> {
    let mut consumer = bus.consume(queue).await?;
    loop {
        let delivery = tokio::select! {
            () = shutdown.cancelled() => return Ok(()),
            next = consumer.next() => next,
        };
        let Some(delivery) = delivery else {
            return Ok(());
        };

        let task: TaskMessage = match serde_json::from_slice(delivery.body()) {
            Ok(task) if task.has_known_schema() => task,
            _ => {
                delivery.nack(false).await?;
                warn!(slot, queue, "poison message routed to dead-letter queue");
                continue;
            }
        };

        if task.task != handler.stage_name() {
            delivery.nack(false).await?;
            warn!(slot, expected = handler.stage_name(), got = %task.task, "task routed to wrong worker");
            continue;
        }

        if guard.seen(task.correlation_id, task.child_key.as_deref(), task.attempt) {
            delivery.ack().await?;
            continue;
        }

        match handler.execute(task.payload.clone()).await {
            Ok(result) => {
                let mut completion =
                    CompletionMessage::succeeded(task.correlation_id, &task.task, result);
                if let Some(child_key) = task.child_key.clone() {
                    completion = completion.with_child_key(child_key);
                }
                let body = serde_json::to_vec(&completion).map_err(|e| NewsflowError::Internal {
                    message: e.to_string(),
                })?;
                bus.publish(topology::COMPLETION.routing_key, &body).await?;
                guard.remember(task.correlation_id, task.child_key.as_deref(), task.attempt);
                delivery.ack().await?;
                info!(slot, correlation_id = %task.correlation_id, task = %task.task, "task completed");
            }
            Err(err) if err.is_retryable() => {
                delivery.nack(false).await?;
                let mut completion = CompletionMessage::failed(task.correlation_id, &task.task, &err);
                if let Some(child_key) = task.child_key.clone() {
                    completion = completion.with_child_key(child_key);
                }
                let body = serde_json::to_vec(&completion).map_err(|e| NewsflowError::Internal {
                    message: e.to_string(),
                })?;
                bus.publish(topology::COMPLETION.routing_key, &body).await?;
                warn!(slot, correlation_id = %task.correlation_id, %err, "transient failure, reported to orchestrator");
            }
            Err(err) => {
                delivery.nack(false).await?;
                let mut completion = CompletionMessage::failed(task.correlation_id, &task.task, &err);
                if let Some(child_key) = task.child_key.clone() {
                    completion = completion.with_child_key(child_key);
                }
                let body = serde_json::to_vec(&completion).map_err(|e| NewsflowError::Internal {
                    message: e.to_string(),
                })?;
                bus.publish(topology::COMPLETION.routing_key, &body).await?;
                warn!(slot, correlation_id = %task.correlation_id, %err, "non-retryable failure, reported to orchestrator and routed to dead-letter");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct EchoHandler {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl TaskHandler for EchoHandler {
        fn stage_name(&self) -> &str {
            "verification"
        }

        async fn execute(&self, payload: Value) -> Result<Value, NewsflowError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(json!({ "echo": payload }))
        }
    }

    #[test]
    fn handler_reports_its_stage_name() {
        let handler = EchoHandler { calls: AtomicUsize::new(0) };
        assert_eq!(handler.stage_name(), "verification");
    }
}
