use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Statuses treated as transient server failures.
pub const RETRYABLE_STATUSES: [u16; 4] = [500, 502, 503, 504];

fn default_max_retries() -> u32 {
    5
}
fn default_base_delay_ms() -> u64 {
    1000
}

/// Exponential backoff retry rule for transient server errors.
///
/// `attempt` counts from 1. A cycle makes at most `max_retries` calls in
/// total; the wait before the call following attempt `n` is
/// `base_delay_ms * 2^(n-1)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay_ms: u64) -> Self {
        Self {
            max_retries,
            base_delay_ms,
        }
    }

    pub fn is_retryable_status(status: u16) -> bool {
        RETRYABLE_STATUSES.contains(&status)
    }

    pub fn should_retry(&self, attempt: u32, status: u16) -> bool {
        attempt < self.max_retries && Self::is_retryable_status(status)
    }

    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.max(1) - 1;
        let multiplier = 2u64.checked_pow(exponent).unwrap_or(u64::MAX);
        Duration::from_millis(self.base_delay_ms.saturating_mul(multiplier))
    }
}

/// Per-cycle retry bookkeeping. Dropped with the cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryContext {
    pub attempt: u32,
    pub last_status: Option<u16>,
}

impl Default for RetryContext {
    fn default() -> Self {
        Self::new()
    }
}

impl RetryContext {
    pub fn new() -> Self {
        Self {
            attempt: 1,
            last_status: None,
        }
    }

    pub fn record(&mut self, status: u16) {
        self.last_status = Some(status);
    }

    pub fn advance(&mut self) {
        self.attempt += 1;
    }
}
