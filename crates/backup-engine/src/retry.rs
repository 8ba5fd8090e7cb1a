//! Retry schedule for retryable connector failures.

use std::time::Duration;

use backoff::backoff::Backoff;
use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use backup_types::RetryConfig;

/// Attempt counter plus the delay before the next attempt.
///
/// Delays double from `base_delay_ms` up to `max_delay_ms` with no jitter.
/// Once `max_attempts` attempts have been made, [`next_delay`] returns
/// `None`.
///
/// [`next_delay`]: RetrySchedule::next_delay
#[derive(Debug)]
pub struct RetrySchedule {
    backoff: ExponentialBackoff,
    attempts: u32,
    max_attempts: u32,
}

impl RetrySchedule {
    pub fn new(config: &RetryConfig) -> Self {
        let backoff = ExponentialBackoffBuilder::new()
            .with_initial_interval(config.base_delay())
            .with_randomization_factor(0.0)
            .with_multiplier(2.0)
            .with_max_interval(config.max_delay())
            .with_max_elapsed_time(None)
            .build();

        Self {
            backoff,
            attempts: 0,
            max_attempts: config.max_attempts.max(1),
        }
    }

    /// Attempts started so far.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Count a new attempt and return its 1-based number.
    pub fn start_attempt(&mut self) -> u32 {
        self.attempts += 1;
        self.attempts
    }

    /// Delay before the next attempt, or `None` when the budget is spent.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempts >= self.max_attempts {
            return None;
        }
        self.backoff.next_backoff()
    }
}
