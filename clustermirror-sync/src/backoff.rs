//! Reconnect backoff.

use rand::Rng;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackoffConfig {
    /// Delay after the first failure.
    pub initial: Duration,
    /// Ceiling for the exponential delay.
    pub max: Duration,
    /// A healthy stretch this long forgets earlier failures.
    pub reset_after: Duration,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(500),
            max: Duration::from_secs(60),
            reset_after: Duration::from_secs(120),
        }
    }
}

impl BackoffConfig {
    /// Un-jittered delay before retry number `attempt` (0-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.min(20));
        self.initial.saturating_mul(factor).min(self.max)
    }
}

/// Exponential backoff with jitter for one retry loop.
#[derive(Debug, Clone)]
pub struct Backoff {
    config: BackoffConfig,
    failures: u32,
    healthy_since: Option<Instant>,
}

impl Backoff {
    pub fn new(config: BackoffConfig) -> Self {
        Self {
            config,
            failures: 0,
            healthy_since: None,
        }
    }

    /// Records a failure and returns how long to wait before retrying.
    ///
    /// The delay is drawn from `[d/2, d]` where `d` doubles with every
    /// consecutive failure up to the configured ceiling.
    pub fn next_delay(&mut self) -> Duration {
        self.maybe_reset();
        self.healthy_since = None;

        let ceiling = self.config.delay(self.failures);
        self.failures = self.failures.saturating_add(1);

        let ceiling_ms = ceiling.as_millis() as u64;
        if ceiling_ms < 2 {
            return ceiling;
        }
        Duration::from_millis(rand::thread_rng().gen_range(ceiling_ms / 2..=ceiling_ms))
    }

    /// Marks the loop as making progress. Consecutive failures are forgotten
    /// once progress has been sustained for `reset_after`.
    pub fn record_success(&mut self) {
        if self.healthy_since.is_none() {
            self.healthy_since = Some(Instant::now());
        }
        self.maybe_reset();
    }

    fn maybe_reset(&mut self) {
        if let Some(since) = self.healthy_since {
            if since.elapsed() >= self.config.reset_after {
                self.failures = 0;
            }
        }
    }
}
