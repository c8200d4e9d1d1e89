//! ABOUTME: Consumes tasks.completion and hands each message to the Engine's state machine
//! ABOUTME: Acks regardless of outcome; the engine itself absorbs unknown/stale/duplicate messages

use crate::engine::Engine;
use newsflow_bus::{topology, Bus};
use newsflow_core::{CompletionMessage, NewsflowError};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

pub async fn run(bus: Arc<dyn Bus>, engine: Arc<Engine>, shutdown: CancellationToken) -> Result<(), NewsflowError> {
    let mut consumer = bus.consume(topology::COMPLETION.queue).await?;
    loop {
        let delivery = tokio::select! {
            () = shutdown.cancelled() => return Ok(()),
            next = consumer.next() => next,
        };
        let Some(delivery) = delivery else {
            return Ok(());
        };

        let completion: Result<CompletionMessage, _> = serde_json::from_slice(delivery.body());
        match completion {
            Ok(completion) => {
                if let Err(err) = engine.handle_completion(&completion).await {
                    warn!(%err, correlation_id = %completion.correlation_id, "completion handling failed, message will be redelivered");
                    // requeue=true: a store/bus hiccup is transient, unlike a
                    // poison body, so the message goes back on the same
                    // queue for redelivery rather than to tasks.dead.
                    delivery.nack(true).await?;
                    continue;
                }
                delivery.ack().await?;
            }
            Err(err) => {
                warn!(%err, "unparseable completion message routed to dead-letter queue");
                delivery.nack(false).await?;
            }
        }
    }
}
