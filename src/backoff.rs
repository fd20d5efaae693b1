use rand::Rng;
use std::time::Duration;

/// Bounded retry schedule for transient request failures: exponential growth from
/// `base_ms`, capped at `max_ms`, plus up to `jitter_percent` of random slack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_retries: u32,
    base_ms: u64,
    max_ms: u64,
    jitter_percent: u64,
}

impl RetryPolicy {
    pub const fn new(max_retries: u32, base_ms: u64, max_ms: u64) -> Self {
        Self {
            max_retries,
            base_ms,
            max_ms,
            jitter_percent: 10,
        }
    }

    pub const fn none() -> Self {
        Self::new(0, 0, 0)
    }

    pub fn with_jitter(mut self, jitter_percent: u64) -> Self {
        self.jitter_percent = jitter_percent;
        self
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// `retry` counts from 1 for the first retry.
    pub fn allows(&self, retry: u32) -> bool {
        retry <= self.max_retries
    }

    pub fn delay(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(20);
        let capped = self
            .base_ms
            .saturating_mul(2u64.saturating_pow(exponent))
            .min(self.max_ms);
        let jitter = if self.jitter_percent > 0 && capped > 0 {
            rand::thread_rng().gen_range(0..=capped * self.jitter_percent / 100)
        } else {
            0
        };
        Duration::from_millis(capped + jitter)
    }
}
