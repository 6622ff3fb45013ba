//! # Reconnect Backoff
//!
//! Exponential delay between reconnect attempts. The delay grows by a fixed
//! factor after every failure and is clamped to a ceiling; the attempt count is
//! never capped, so a long outage is retried forever at the ceiling interval.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Parameters of the backoff curve.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BackoffPolicy {
    /// Delay before the first retry, and the value restored after a success.
    pub initial: Duration,
    /// Multiplier applied after each failed attempt. Must be greater than 1.
    pub factor: f64,
    /// Upper bound on any single delay.
    pub max: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(1000),
            factor: 2.0,
            max: Duration::from_millis(60000),
        }
    }
}

impl BackoffPolicy {
    /// Build a policy from millisecond values.
    pub fn from_millis(initial_ms: u64, max_ms: u64, factor: f64) -> Self {
        Self {
            initial: Duration::from_millis(initial_ms),
            factor,
            max: Duration::from_millis(max_ms),
        }
    }

    /// Whether the policy describes a growing, bounded curve.
    pub fn is_valid(&self) -> bool {
        self.factor.is_finite() && self.factor > 1.0 && !self.initial.is_zero() && self.initial <= self.max
    }
}

/// Running backoff state.
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: BackoffPolicy,
    current: Duration,
    attempts: u32,
}

impl Backoff {
    /// Start at the policy's initial delay.
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            current: policy.initial.min(policy.max),
            policy,
            attempts: 0,
        }
    }

    /// The delay the next failure will be scheduled with.
    pub fn current(&self) -> Duration {
        self.current
    }

    /// Failed attempts since the last success.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// The policy in force.
    pub fn policy(&self) -> &BackoffPolicy {
        &self.policy
    }

    /// Record a failure: returns the delay to wait now and grows the next one.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.attempts = self.attempts.saturating_add(1);

        // Millisecond resolution keeps the curve exact for integral factors.
        let grown_ms = (self.current.as_millis() as f64 * self.policy.factor).round();
        let grown = if grown_ms.is_finite() && grown_ms < u64::MAX as f64 {
            Duration::from_millis(grown_ms as u64)
        } else {
            self.policy.max
        };
        self.current = grown.min(self.policy.max).max(delay);
        delay
    }

    /// Record a success: back to the initial delay.
    pub fn reset(&mut self) {
        self.current = self.policy.initial.min(self.policy.max);
        self.attempts = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> BackoffPolicy {
        BackoffPolicy::from_millis(100, 1000, 2.0)
    }

    #[test]
    fn delays_double_until_capped() {
        let mut backoff = Backoff::new(policy());
        let delays: Vec<u64> = (0..6).map(|_| backoff.next_delay().as_millis() as u64).collect();
        assert_eq!(delays, vec![100, 200, 400, 800, 1000, 1000]);
        assert_eq!(backoff.attempts(), 6);
    }

    #[test]
    fn delays_are_monotonic_and_bounded_for_many_failures() {
        let mut backoff = Backoff::new(BackoffPolicy::from_millis(250, 30_000, 1.7));
        let mut previous = Duration::ZERO;
        for _ in 0..200 {
            let delay = backoff.next_delay();
            assert!(delay >= previous);
            assert!(delay <= Duration::from_millis(30_000));
            previous = delay;
        }
    }

    #[test]
    fn reset_restores_initial_delay() {
        let mut backoff = Backoff::new(policy());
        backoff.next_delay();
        backoff.next_delay();
        backoff.reset();
        assert_eq!(backoff.attempts(), 0);
        assert_eq!(backoff.next_delay(), Duration::from_millis(100));
    }

    #[test]
    fn validity_checks() {
        assert!(policy().is_valid());
        assert!(!BackoffPolicy::from_millis(100, 1000, 1.0).is_valid());
        assert!(!BackoffPolicy::from_millis(2000, 1000, 2.0).is_valid());
        assert!(!BackoffPolicy::from_millis(0, 1000, 2.0).is_valid());
    }
}
