//! ABOUTME: Exchange, queue, and routing-key topology for the orchestration bus
//! ABOUTME: One durable topic exchange, four task queues, one dead-letter queue

/// The single durable topic exchange every task and completion is published through.
pub const EXCHANGE: &str = "orchestration.exchange";

/// Dead-letter exchange and queue: messages whose attempts are exhausted or
/// whose body fails to parse land here, per the poison/exhausted-retry
/// disposition in the error taxonomy.
pub const DEAD_LETTER_EXCHANGE: &str = "orchestration.dead_letter_exchange";
pub const DEAD_LETTER_QUEUE: &str = "tasks.dead";
const DEAD_LETTER_ROUTING_KEY: &str = "dead";

/// One durable queue per routing key, bound to `EXCHANGE`.
pub struct QueueBinding {
    pub queue: &'static str,
    pub routing_key: &'static str,
}

pub const EXTRACTION: QueueBinding = QueueBinding {
    queue: "tasks.extraction",
    routing_key: "extraction",
};
pub const TRANSFORMATION: QueueBinding = QueueBinding {
    queue: "tasks.transformation",
    routing_key: "transformation",
};
pub const VERIFICATION: QueueBinding = QueueBinding {
    queue: "tasks.verification",
    routing_key: "verification",
};
pub const COMPLETION: QueueBinding = QueueBinding {
    queue: "tasks.completion",
    routing_key: "completion",
};

pub const TASK_QUEUES: [QueueBinding; 3] = [EXTRACTION, TRANSFORMATION, VERIFICATION];

/// Look up the task queue bound to a stage's routing key.
#[must_use]
pub fn queue_for_routing_key(routing_key: &str) -> Option<&'static QueueBinding> {
    TASK_QUEUES.iter().find(|b| b.routing_key == routing_key)
}

pub(crate) fn dead_letter_routing_key() -> &'static str {
    DEAD_LETTER_ROUTING_KEY
}
