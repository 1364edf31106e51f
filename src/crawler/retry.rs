//! Exponential backoff policy shared by page fetches and AI calls

use crate::config::{ExtractionConfig, FetcherConfig};
use std::time::Duration;

/// How many times to try an operation and how long to wait in between
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub backoff_factor: f64,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            backoff_factor: 2.0,
            max_delay: Duration::from_secs(60),
        }
    }

    /// A single attempt with no retries
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
            backoff_factor: 1.0,
            max_delay: Duration::ZERO,
        }
    }

    pub fn with_backoff_factor(mut self, factor: f64) -> Self {
        self.backoff_factor = factor;
        self
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    pub fn from_fetcher_config(config: &FetcherConfig) -> Self {
        Self::new(config.max_attempts, Duration::from_millis(config.base_delay_ms))
            .with_backoff_factor(config.backoff_factor)
            .with_max_delay(Duration::from_millis(config.max_delay_ms))
    }

    /// Extraction retries wait a flat delay; rate-limit hints may stretch it
    pub fn from_extraction_config(config: &ExtractionConfig) -> Self {
        let delay = Duration::from_millis(config.retry_delay_ms);
        Self::new(config.max_attempts, delay)
            .with_backoff_factor(1.0)
            .with_max_delay(delay.max(Duration::from_secs(60)))
    }

    /// Returns true if another attempt is allowed after `attempt` attempts
    pub fn allows_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    /// Delay to wait after the given (1-based) failed attempt
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32) as i32;
        let millis = self.base_delay.as_millis() as f64 * self.backoff_factor.powi(exponent);
        let capped = millis.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped.max(0.0) as u64)
    }

    /// Caps a server-provided delay hint at the maximum delay
    pub fn cap(&self, hint: Duration) -> Duration {
        hint.min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(5, Duration::from_secs(1))
    }
}
