//! ABOUTME: In-memory Bus: per-queue FIFO channels, no network, no serialization round-trip needed
//! ABOUTME: Publisher confirms are always immediate; routing mirrors newsflow-bus's topology table

use async_trait::async_trait;
use newsflow_bus::{topology, Bus, Consumer, Delivery};
use newsflow_core::NewsflowError;
use parking_lot::Mutex as SyncMutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex as AsyncMutex};

/// The receiver lives behind an async mutex rather than being `take()`n by
/// the first consumer, so a queue can be drawn from by more than one
/// short-lived `Consumer` (e.g. a test that calls `consume` once per message
/// instead of holding one consumer open for the queue's whole lifetime).
struct Queue {
    tx: mpsc::UnboundedSender<FakeDelivery>,
    rx: Arc<AsyncMutex<mpsc::UnboundedReceiver<FakeDelivery>>>,
}

/// A routed, in-memory stand-in for [`newsflow_bus::LapinBus`], used by
/// scenario tests that exercise the orchestrator or a worker's loop without
/// a real broker. Routing follows the same queue/routing-key table as the
/// production topology, plus the completion queue.
pub struct FakeBus {
    queues: SyncMutex<HashMap<&'static str, Arc<Queue>>>,
    published: SyncMutex<Vec<(String, Vec<u8>)>>,
}

impl Default for FakeBus {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeBus {
    #[must_use]
    pub fn new() -> Self {
        let mut queues = HashMap::new();
        for binding in topology::TASK_QUEUES {
            queues.insert(binding.queue, Arc::new(Queue::new()));
        }
        queues.insert(topology::COMPLETION.queue, Arc::new(Queue::new()));
        queues.insert(topology::DEAD_LETTER_QUEUE, Arc::new(Queue::new()));
        Self {
            queues: SyncMutex::new(queues),
            published: SyncMutex::new(Vec::new()),
        }
    }

    /// Every `(routing_key, body)` ever published, in publish order, for
    /// assertions that don't want to drain a queue.
    #[must_use]
    pub fn published(&self) -> Vec<(String, Vec<u8>)> {
        self.published.lock().clone()
    }

    fn queue_for_routing_key(&self, routing_key: &str) -> Option<Arc<Queue>> {
        let queue_name = topology::queue_for_routing_key(routing_key)
            .map(|b| b.queue)
            .or_else(|| (routing_key == topology::COMPLETION.routing_key).then_some(topology::COMPLETION.queue))?;
        self.queues.lock().get(queue_name).cloned()
    }
}

impl Queue {
    fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Arc::new(AsyncMutex::new(rx)),
        }
    }
}

#[async_trait]
impl Bus for FakeBus {
    async fn publish(&self, routing_key: &str, body: &[u8]) -> Result<(), NewsflowError> {
        self.publish_with_headers(routing_key, body, &[]).await
    }

    async fn publish_with_headers(
        &self,
        routing_key: &str,
        body: &[u8],
        _headers: &[(&str, String)],
    ) -> Result<(), NewsflowError> {
        self.published.lock().push((routing_key.to_string(), body.to_vec()));
        let queue = self.queue_for_routing_key(routing_key).ok_or_else(|| NewsflowError::Internal {
            message: format!("no queue bound to routing key '{routing_key}'"),
        })?;
        queue
            .tx
            .send(FakeDelivery { body: body.to_vec(), routing_key: routing_key.to_string() })
            .map_err(|_| NewsflowError::BusUnavailable {
                message: "fake bus queue dropped".to_string(),
            })
    }

    async fn consume(&self, queue: &str) -> Result<Box<dyn Consumer>, NewsflowError> {
        let queue = self
            .queues
            .lock()
            .get(queue)
            .cloned()
            .ok_or_else(|| NewsflowError::Internal {
                message: format!("no such queue '{queue}'"),
            })?;
        Ok(Box::new(FakeConsumer { rx: Arc::clone(&queue.rx) }))
    }
}

/// Borrows the queue's shared receiver rather than owning it, so repeated
/// `consume` calls on the same queue each get a working consumer; draws
/// still come out in FIFO order across whichever consumer happens to poll
/// next, same as a real broker redistributing among a consumer group.
struct FakeConsumer {
    rx: Arc<AsyncMutex<mpsc::UnboundedReceiver<FakeDelivery>>>,
}

#[async_trait]
impl Consumer for FakeConsumer {
    async fn next(&mut self) -> Option<Box<dyn Delivery>> {
        self.rx.lock().await.recv().await.map(|d| Box::new(d) as Box<dyn Delivery>)
    }
}

struct FakeDelivery {
    body: Vec<u8>,
    routing_key: String,
}

#[async_trait]
impl Delivery for FakeDelivery {
    fn body(&self) -> &[u8] {
        &self.body
    }

    fn routing_key(&self) -> &str {
        &self.routing_key
    }

    fn redelivered(&self) -> bool {
        false
    }

    async fn ack(self: Box<Self>) -> Result<(), NewsflowError> {
        Ok(())
    }

    async fn nack(self: Box<Self>, _requeue: bool) -> Result<(), NewsflowError> {
        Ok(())
    }
}
