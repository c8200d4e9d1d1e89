//! ABOUTME: Per-correlation-id serializing lanes for the completion dispatcher
//! ABOUTME: Same workflow processes completions in receipt order; different workflows run in parallel

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Hands out a `Mutex<()>` per `correlation_id` so the completion consumer
/// can serialize work for one workflow while letting unrelated workflows
/// advance concurrently, per the orchestrator's single-serializing-dispatcher
/// concurrency model.
#[derive(Default)]
pub struct LaneMap {
    lanes: DashMap<Uuid, Arc<Mutex<()>>>,
}

impl LaneMap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lane(&self, correlation_id: Uuid) -> Arc<Mutex<()>> {
        Arc::clone(
            self.lanes
                .entry(correlation_id)
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .value(),
        )
    }

    /// Drop the lane for a workflow that has reached a terminal status, so a
    /// long-running orchestrator does not accumulate one entry per workflow
    /// ever seen.
    pub fn remove(&self, correlation_id: Uuid) {
        self.lanes.remove(&correlation_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn same_id_returns_the_same_lane() {
        let lanes = LaneMap::new();
        let id = Uuid::new_v4();
        let a = lanes.lane(id);
        let b = lanes.lane(id);
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[tokio::test]
    async fn different_ids_return_different_lanes() {
        let lanes = LaneMap::new();
        let a = lanes.lane(Uuid::new_v4());
        let b = lanes.lane(Uuid::new_v4());
        assert!(!Arc::ptr_eq(&a, &b));
    }
}
