//! Bounded exponential backoff for backend errors.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Retry delay policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackoffPolicy {
    /// Delay after the first failure
    pub initial: Duration,
    /// Ceiling for any delay
    pub max: Duration,
    /// Growth factor between consecutive failures
    pub multiplier: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(60),
            multiplier: 2.0,
        }
    }
}

impl BackoffPolicy {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            ..Self::default()
        }
    }

    pub fn multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }
}

/// Failure counter producing delays from a [`BackoffPolicy`].
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: BackoffPolicy,
    failures: u32,
}

impl Backoff {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            policy,
            failures: 0,
        }
    }

    /// Record a failure and return how long to wait before retrying.
    pub fn next_delay(&mut self) -> Duration {
        let factor = self.policy.multiplier.max(1.0).powi(self.failures as i32);
        self.failures = self.failures.saturating_add(1);
        let nanos = self.policy.initial.as_nanos() as f64 * factor;
        if !nanos.is_finite() || nanos >= self.policy.max.as_nanos() as f64 {
            self.policy.max
        } else {
            Duration::from_nanos(nanos as u64)
        }
    }

    /// Forget previous failures.
    pub fn reset(&mut self) {
        self.failures = 0;
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delays_grow_to_ceiling() {
        let mut backoff = Backoff::new(BackoffPolicy::new(
            Duration::from_millis(100),
            Duration::from_millis(500),
        ));
        assert_eq!(backoff.next_delay(), Duration::from_millis(100));
        assert_eq!(backoff.next_delay(), Duration::from_millis(200));
        assert_eq!(backoff.next_delay(), Duration::from_millis(400));
        assert_eq!(backoff.next_delay(), Duration::from_millis(500));
        for _ in 0..100 {
            assert_eq!(backoff.next_delay(), Duration::from_millis(500));
        }
    }

    #[test]
    fn test_custom_multiplier() {
        let mut backoff = Backoff::new(
            BackoffPolicy::new(Duration::from_millis(10), Duration::from_secs(1)).multiplier(3.0),
        );
        assert_eq!(backoff.next_delay(), Duration::from_millis(10));
        assert_eq!(backoff.next_delay(), Duration::from_millis(30));
        assert_eq!(backoff.next_delay(), Duration::from_millis(90));
    }

    #[test]
    fn test_reset() {
        let mut backoff = Backoff::new(BackoffPolicy::default());
        backoff.next_delay();
        backoff.next_delay();
        assert_eq!(backoff.failures(), 2);
        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_secs(1));
    }
}
