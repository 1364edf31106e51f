//! Token-bucket throttling for outbound calls
//!
//! The marketplace and the AI backend each get their own bucket.

use governor::{Quota, RateLimiter};
use std::num::NonZeroU32;
use std::time::Duration;
use tracing::trace;

type DirectRateLimiter = RateLimiter<
    governor::state::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// A named token bucket; a rate of zero disables it
pub struct CallLimiter {
    name: &'static str,
    inner: Option<DirectRateLimiter>,
}

impl CallLimiter {
    /// Creates a limiter refilling `requests_per_second` tokens per second
    ///
    /// # Arguments
    ///
    /// * `name` - Label used in trace logs
    /// * `requests_per_second` - Sustained rate; fractional rates are allowed
    /// * `burst` - Tokens available at once
    pub fn new(name: &'static str, requests_per_second: f64, burst: u32) -> Self {
        let inner = quota_for(requests_per_second, burst).map(RateLimiter::direct);
        Self { name, inner }
    }

    /// A limiter that never waits
    pub fn unlimited(name: &'static str) -> Self {
        Self { name, inner: None }
    }

    pub fn is_limited(&self) -> bool {
        self.inner.is_some()
    }

    /// Waits until a token is available
    pub async fn until_ready(&self) {
        if let Some(limiter) = &self.inner {
            trace!(limiter = self.name, "Waiting for rate limit token");
            limiter.until_ready().await;
        }
    }
}

fn quota_for(requests_per_second: f64, burst: u32) -> Option<Quota> {
    if !requests_per_second.is_finite() || requests_per_second <= 0.0 {
        return None;
    }

    let period = Duration::from_secs_f64(1.0 / requests_per_second);
    let burst = NonZeroU32::new(burst.max(1))?;
    Quota::with_period(period).map(|q| q.allow_burst(burst))
}
