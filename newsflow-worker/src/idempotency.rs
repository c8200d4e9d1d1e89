//! ABOUTME: Bounded LRU guard preventing a redelivered task from executing twice
//! ABOUTME: Pure optimization where side effects are naturally idempotent (upsert by key)

use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use uuid::Uuid;

type SeenKey = (Uuid, Option<String>, u32);

/// Tracks `(correlation_id, child_key, attempt)` triples this worker has
/// already executed, so a task delivered twice (because its ack was lost,
/// not because the orchestrator republished a new attempt) does not run
/// its side effects twice.
pub struct IdempotencyGuard {
    seen: Mutex<LruCache<SeenKey, ()>>,
}

impl IdempotencyGuard {
    /// `capacity` should scale with `CONCURRENCY`; a default of
    /// `concurrency * 256` comfortably covers in-flight redeliveries
    /// without unbounded memory growth.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).expect("capacity clamped to >= 1");
        Self {
            seen: Mutex::new(LruCache::new(capacity)),
        }
    }

    #[must_use]
    pub fn for_concurrency(concurrency: usize) -> Self {
        Self::new(concurrency.saturating_mul(256).max(256))
    }

    /// `true` if this exact `(correlation_id, child_key, attempt)` has
    /// already been executed.
    pub fn seen(&self, correlation_id: Uuid, child_key: Option<&str>, attempt: u32) -> bool {
        let key = (correlation_id, child_key.map(str::to_string), attempt);
        self.seen.lock().contains(&key)
    }

    /// Record that this task was executed.
    pub fn remember(&self, correlation_id: Uuid, child_key: Option<&str>, attempt: u32) {
        let key = (correlation_id, child_key.map(str::to_string), attempt);
        self.seen.lock().put(key, ());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unseen_task_is_not_seen_until_remembered() {
        let guard = IdempotencyGuard::new(16);
        let id = Uuid::new_v4();
        assert!(!guard.seen(id, Some("a"), 1));
        guard.remember(id, Some("a"), 1);
        assert!(guard.seen(id, Some("a"), 1));
    }

    #[test]
    fn different_attempts_are_distinct() {
        let guard = IdempotencyGuard::new(16);
        let id = Uuid::new_v4();
        guard.remember(id, None, 1);
        assert!(guard.seen(id, None, 1));
        assert!(!guard.seen(id, None, 2));
    }

    #[test]
    fn eviction_under_capacity_pressure_is_bounded() {
        let guard = IdempotencyGuard::new(2);
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let c = Uuid::new_v4();
        guard.remember(a, None, 1);
        guard.remember(b, None, 1);
        guard.remember(c, None, 1);
        // `a` was evicted once capacity (2) was exceeded by a third entry.
        assert!(!guard.seen(a, None, 1));
        assert!(guard.seen(c, None, 1));
    }
}
