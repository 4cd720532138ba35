//! Asynchronous token bucket rate limiting.
//!
//! The bucket is refilled lazily: every call computes how many tokens accrued
//! since the previous call, so no background ticker is needed and the level is
//! always a function of `(tokens, last_refill, now)`.
//!
//! ## Configuration
//!
//! ```toml
//! [limiter]
//! rate = 200.0        # tokens per second
//! burst = 200.0       # bucket capacity, defaults to rate
//! init_tokens = 0.0   # starting level, defaults to burst
//! ```
//!
//! ## Fairness
//!
//! Waiters are not queued. A caller that wakes up re-checks the bucket and
//! may find that another caller took the tokens first, in which case it sleeps
//! again. Long-run throughput still converges to `rate`, but an individual
//! waiter can be outraced repeatedly.

use serde::{Deserialize, Serialize};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::trace;

use crate::error::{Error, Result};
use crate::metrics;

/// Rate limit configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Tokens added per second.
    pub rate: f64,
    /// Bucket capacity. `None` means `rate`.
    #[serde(default)]
    pub burst: Option<f64>,
    /// Starting token level. `None` means a full bucket.
    #[serde(default)]
    pub init_tokens: Option<f64>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self::per_second(200.0)
    }
}

impl RateLimitConfig {
    /// Create a config admitting `requests` per second.
    pub fn per_second(requests: f64) -> Self {
        Self {
            rate: requests,
            burst: None,
            init_tokens: None,
        }
    }

    /// Create a config admitting `requests` per minute, with a burst of one.
    pub fn per_minute(requests: f64) -> Self {
        Self {
            rate: requests / 60.0,
            burst: Some(1.0),
            init_tokens: None,
        }
    }

    /// Set burst size.
    pub fn with_burst(mut self, burst: f64) -> Self {
        self.burst = Some(burst);
        self
    }

    /// Set the starting token level.
    pub fn with_init_tokens(mut self, tokens: f64) -> Self {
        self.init_tokens = Some(tokens);
        self
    }

    /// Bucket capacity after defaulting.
    pub fn capacity(&self) -> f64 {
        self.burst.unwrap_or(self.rate)
    }
}

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

impl BucketState {
    fn refill(&mut self, now: Instant, rate: f64, capacity: f64) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * rate).min(capacity);
        self.last_refill = now;
    }
}

/// Token bucket rate limiter.
///
/// Share it between tasks behind an `Arc`; all accounting happens under one
/// short critical section that is never held across a sleep.
#[derive(Debug)]
pub struct RateLimiter {
    rate: f64,
    capacity: f64,
    state: Mutex<BucketState>,
}

impl RateLimiter {
    /// Create a limiter from a configuration.
    pub fn new(config: &RateLimitConfig) -> Result<Self> {
        if !config.rate.is_finite() || config.rate <= 0.0 {
            return Err(Error::Config(format!(
                "rate must be a positive number, got {}",
                config.rate
            )));
        }
        let capacity = config.capacity();
        if !capacity.is_finite() || capacity < 0.0 {
            return Err(Error::Config(format!(
                "burst must be a non-negative number, got {}",
                capacity
            )));
        }
        let tokens = config.init_tokens.unwrap_or(capacity).clamp(0.0, capacity);

        Ok(Self {
            rate: config.rate,
            capacity,
            state: Mutex::new(BucketState {
                tokens,
                last_refill: Instant::now(),
            }),
        })
    }

    /// Create a limiter with `rate` tokens per second and default burst.
    pub fn per_second(rate: f64) -> Result<Self> {
        Self::new(&RateLimitConfig::per_second(rate))
    }

    /// Tokens added per second.
    pub fn rate(&self) -> f64 {
        self.rate
    }

    /// Maximum number of tokens the bucket holds.
    pub fn capacity(&self) -> f64 {
        self.capacity
    }

    /// Current token level after refilling.
    pub fn available_tokens(&self) -> f64 {
        let mut state = self.lock();
        state.refill(Instant::now(), self.rate, self.capacity);
        state.tokens
    }

    /// Take `n` tokens if they are available right now.
    pub fn try_acquire(&self, n: f64) -> Result<bool> {
        self.check_request(n)?;
        Ok(self.take_or_wait(n).is_none())
    }

    /// Wait until `n` tokens are available, then take them.
    ///
    /// Fails immediately with [`Error::InvalidRequest`] when `n` exceeds the
    /// bucket capacity, since such a request could never be satisfied.
    pub async fn acquire(&self, n: f64) -> Result<()> {
        self.check_request(n)?;

        let started = Instant::now();
        let mut waited = false;
        while let Some(wait) = self.take_or_wait(n) {
            trace!(tokens = n, wait_ms = wait.as_secs_f64() * 1e3, "Rate limited");
            waited = true;
            sleep(wait).await;
        }
        if waited {
            metrics::record_rate_limit_wait(started.elapsed());
        }
        Ok(())
    }

    fn check_request(&self, n: f64) -> Result<()> {
        if n.is_nan() || n < 0.0 {
            return Err(Error::InvalidRequest(format!(
                "token count must be a non-negative number, got {}",
                n
            )));
        }
        if n > self.capacity {
            return Err(Error::InvalidRequest(format!(
                "requested tokens exceed bucket capacity, n={}, cap={}",
                n, self.capacity
            )));
        }
        Ok(())
    }

    /// Refill, then either debit `n` tokens (`None`) or report how long the
    /// caller should sleep before trying again.
    fn take_or_wait(&self, n: f64) -> Option<Duration> {
        let mut state = self.lock();
        state.refill(Instant::now(), self.rate, self.capacity);
        if state.tokens >= n {
            state.tokens -= n;
            return None;
        }
        let need = n - state.tokens;
        // A tiny rate can put the wait past what a Duration holds.
        Some(Duration::try_from_secs_f64(need / self.rate).unwrap_or(Duration::MAX))
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BucketState> {
        // The state is two plain numbers; a panic elsewhere cannot leave it torn.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
