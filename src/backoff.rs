//! Exponential backoff schedule shared by every retrying caller.
//!
//! [`BackoffController`] computes `min(base * 2^attempt, max)` with uniform
//! jitter, and stops yielding delays once the retry budget is exhausted so
//! callers back off to a terminal failure instead of tight-looping.
//!
//! The controller itself cannot error; the only state is the attempt
//! counter, advanced by [`next_delay`](BackoffController::next_delay) and
//! cleared by [`reset`](BackoffController::reset) on success.

use crate::config::BackoffConfig;
use rand::Rng;
use std::time::Duration;

/// Stateful exponential-backoff delay calculator.
#[derive(Debug, Clone)]
pub struct BackoffController {
    config: BackoffConfig,
    attempt: u32,
}

impl BackoffController {
    /// Create a controller with the given schedule.
    #[must_use]
    pub fn new(config: BackoffConfig) -> Self {
        Self { config, attempt: 0 }
    }

    /// Create a controller with the default schedule (1s base, 32s cap, 5 retries).
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(BackoffConfig::default())
    }

    /// Number of failed attempts recorded so far.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Jittered delay for an explicit attempt number, without touching state.
    ///
    /// Returns `None` once `attempt >= max_retries`, signalling the caller to
    /// stop retrying.
    pub fn delay_for_attempt(&self, attempt: u32) -> Option<Duration> {
        if attempt >= self.config.max_retries {
            return None;
        }
        let shift = attempt.min(63);
        let multiplier = 1u64.checked_shl(shift).unwrap_or(u64::MAX);
        let raw_ms = self
            .config
            .base_delay_ms
            .saturating_mul(multiplier)
            .min(self.config.max_delay_ms);

        let jitter = self.config.jitter.clamp(0.0, 1.0);
        let factor = rand::thread_rng().gen_range(1.0 - jitter..=1.0 + jitter);
        let jittered_ms = (raw_ms as f64 * factor).round() as u64;
        Some(Duration::from_millis(jittered_ms))
    }

    /// Delay before the next retry, advancing the attempt counter.
    ///
    /// Call once per failed attempt. Returns `None` when the retry budget is
    /// exhausted; the caller maps that to a terminal failure, never a tight
    /// retry loop.
    pub fn next_delay(&mut self) -> Option<Duration> {
        let delay = self.delay_for_attempt(self.attempt);
        if delay.is_some() {
            self.attempt = self.attempt.saturating_add(1);
        }
        delay
    }

    /// Clear the attempt counter after a success.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

impl Default for BackoffController {
    fn default() -> Self {
        Self::with_defaults()
    }
}
