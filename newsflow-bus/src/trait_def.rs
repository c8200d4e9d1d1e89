//! ABOUTME: Transport-agnostic bus trait so the orchestrator and workers can run against
//! ABOUTME: either the real AMQP client or newsflow-testing's in-memory FakeBus

use async_trait::async_trait;
use newsflow_core::NewsflowError;

/// A message handed to a consumer, with explicit manual ack/nack.
///
/// Acknowledgement is never implicit: a consumer that drops a `Delivery`
/// without calling `ack` or `nack` leaves the message unacknowledged and it
/// will be redelivered once the channel is recycled, matching at-least-once
/// delivery semantics.
#[async_trait]
pub trait Delivery: Send {
    fn body(&self) -> &[u8];
    fn routing_key(&self) -> &str;
    /// Redelivery count as tracked by the broker (or the fake bus), used by
    /// callers that want to log/inspect without deciding retry themselves
    /// (retry counting is a property of the task payload's `attempt` field,
    /// not of broker redelivery).
    fn redelivered(&self) -> bool;

    async fn ack(self: Box<Self>) -> Result<(), NewsflowError>;
    /// `requeue = false` is what every consumer in this workspace uses: a
    /// nacked message is either broker-redelivered on connection loss or
    /// dead-lettered once the queue's dead-letter policy triggers, never
    /// requeued to the front of the same queue.
    async fn nack(self: Box<Self>, requeue: bool) -> Result<(), NewsflowError>;
}

/// A handle that yields deliveries for one queue, one at a time, honoring
/// prefetch = 1 (the broker will not hand this consumer a second
/// unacknowledged message).
#[async_trait]
pub trait Consumer: Send {
    async fn next(&mut self) -> Option<Box<dyn Delivery>>;
}

/// The bus: publish with confirms, and open consumers bound to a queue.
#[async_trait]
pub trait Bus: Send + Sync {
    /// Publish a persistent message and wait for the broker's confirm.
    /// Returns `Err(BusUnavailable)` if the confirm could not be obtained.
    async fn publish(&self, routing_key: &str, body: &[u8]) -> Result<(), NewsflowError>;

    /// Publish with dead-letter diagnostic headers
    /// (`x-death-reason`, `x-last-error`, `x-attempts`) attached, used when a
    /// worker is about to nack a message without requeue.
    async fn publish_with_headers(
        &self,
        routing_key: &str,
        body: &[u8],
        headers: &[(&str, String)],
    ) -> Result<(), NewsflowError>;

    /// Open a consumer on the named queue with prefetch = 1.
    async fn consume(&self, queue: &str) -> Result<Box<dyn Consumer>, NewsflowError>;

    /// `true` iff the bus has a live broker connection, for `GET /healthz`.
    /// Implementations without a real connection to track (e.g. an
    /// in-memory fake) can accept the default `true`.
    async fn is_healthy(&self) -> bool {
        true
    }
}
