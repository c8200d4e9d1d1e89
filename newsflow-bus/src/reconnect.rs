//! ABOUTME: Exponential-backoff reconnect state machine for the AMQP connection
//! ABOUTME: initial 500ms, cap 30s, +/-20% jitter, as specified for bus recovery

use rand::Rng;
use std::time::Duration;

const INITIAL: Duration = Duration::from_millis(500);
const CAP: Duration = Duration::from_secs(30);
const JITTER_FRACTION: f64 = 0.20;

/// Tracks the next delay to use before attempting to reconnect.
#[derive(Debug, Clone)]
pub struct Backoff {
    current: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self { current: INITIAL }
    }
}

impl Backoff {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset to the initial delay, called after a successful reconnect.
    pub fn reset(&mut self) {
        self.current = INITIAL;
    }

    /// The delay to sleep before the next attempt, with jitter applied.
    /// Doubles the underlying delay (capped at `CAP`) for next time.
    pub fn next_delay(&mut self) -> Duration {
        let jitter = {
            let mut rng = rand::thread_rng();
            let factor = rng.gen_range(-JITTER_FRACTION..=JITTER_FRACTION);
            let millis = self.current.as_millis() as f64 * (1.0 + factor);
            Duration::from_millis(millis.max(0.0) as u64)
        };
        let doubled = self.current.saturating_mul(2);
        self.current = if doubled > CAP { CAP } else { doubled };
        jitter
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_near_initial_and_grows_toward_cap() {
        let mut backoff = Backoff::new();
        let first = backoff.next_delay();
        assert!(first.as_millis() >= 400 && first.as_millis() <= 600);

        for _ in 0..20 {
            backoff.next_delay();
        }
        // After many doublings the underlying delay is pinned at the cap;
        // jitter keeps samples within +/-20% of it.
        let late = backoff.next_delay();
        assert!(late <= CAP + CAP.mul_f64(JITTER_FRACTION));
    }

    #[test]
    fn reset_returns_to_initial() {
        let mut backoff = Backoff::new();
        backoff.next_delay();
        backoff.next_delay();
        backoff.reset();
        let after_reset = backoff.next_delay();
        assert!(after_reset.as_millis() >= 400 && after_reset.as_millis() <= 600);
    }
}
