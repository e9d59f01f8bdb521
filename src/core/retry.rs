// src/core/retry.rs

//! Linear backoff with jitter, used by the reconnect supervisor and every
//! resource watcher. Pure and synchronous; owns no I/O of its own.

use rand::Rng;
use std::time::Duration;

/// Configuration for a `Retry` scheduler.
#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    /// The delay before the first retry.
    pub first: Duration,
    /// The amount added to the delay after each `increment()`.
    pub step: Duration,
    /// The ceiling the delay never exceeds.
    pub max: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            first: Duration::from_millis(500),
            step: Duration::from_secs(1),
            max: Duration::from_secs(30),
        }
    }
}

/// A linear backoff scheduler: `first`, `first+step`, `first+2*step`, ...,
/// capped at `max`, with an independent jitter factor applied to every
/// yielded value. Pure, no I/O; `after()` hands back a duration rather than
/// sleeping itself so callers can combine it with `tokio::select!`.
#[derive(Debug, Clone)]
pub struct Retry {
    config: RetryConfig,
    attempt: u32,
}

impl Retry {
    pub fn new(config: RetryConfig) -> Self {
        Self { config, attempt: 0 }
    }

    /// The unjittered duration for the current attempt count, capped at `max`.
    fn base_duration(&self) -> Duration {
        let scaled = self.config.step.saturating_mul(self.attempt);
        self.config.first.saturating_add(scaled).min(self.config.max)
    }

    /// The jittered delay a caller should wait before the next attempt.
    /// Each call applies an independent jitter factor in `[0.5, 1.0)` of the
    /// base duration (a "half jitter"), so repeated calls without
    /// `increment()` do not return identical values.
    pub fn current_duration(&self) -> Duration {
        let base = self.base_duration();
        let factor = rand::thread_rng().gen_range(0.5..1.0);
        Duration::from_secs_f64(base.as_secs_f64() * factor).min(self.config.max)
    }

    /// Returns a deadline `current_duration()` from now, suitable for
    /// `tokio::time::sleep_until` or awaiting directly inside `select!`.
    pub async fn after(&self) {
        tokio::time::sleep(self.current_duration()).await;
    }

    /// Advances to the next, larger delay.
    pub fn increment(&mut self) {
        self.attempt = self.attempt.saturating_add(1);
    }

    /// Resets the schedule back to `first`.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}
