//! Retry schedule for one-shot requests.

use std::time::Duration;

/// Linear-scaled backoff schedule.
///
/// `delay(attempt) = min(max_delay, base_delay * backoff_factor * attempt)`.
/// The growth is linear in the attempt number, not exponential: with a base
/// of 1s and a factor of 2.0 the retries wait 2s, 4s, 6s, ...
///
/// `max_attempts` counts retries after the initial attempt, so a call makes at
/// most `max_attempts + 1` attempts in total.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
    backoff_factor: f64,
}

impl RetryPolicy {
    #[must_use]
    pub const fn new(
        max_attempts: u32,
        base_delay: Duration,
        max_delay: Duration,
        backoff_factor: f64,
    ) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
            backoff_factor,
        }
    }

    /// A policy that never retries.
    #[must_use]
    pub const fn none() -> Self {
        Self::new(0, Duration::ZERO, Duration::ZERO, 0.0)
    }

    /// Wait before retry number `attempt` (1-based). Attempt 0 is the initial
    /// request and never waits.
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        let scaled = self.base_delay.as_secs_f64() * self.backoff_factor * f64::from(attempt);
        if !scaled.is_finite() || scaled <= 0.0 {
            return Duration::ZERO;
        }
        if scaled >= self.max_delay.as_secs_f64() {
            return self.max_delay;
        }
        Duration::from_secs_f64(scaled)
    }

    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    #[must_use]
    pub const fn base_delay(&self) -> Duration {
        self.base_delay
    }

    #[must_use]
    pub const fn max_delay(&self) -> Duration {
        self.max_delay
    }

    #[must_use]
    pub const fn backoff_factor(&self) -> f64 {
        self.backoff_factor
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(1), Duration::from_secs(30), 2.0)
    }
}
