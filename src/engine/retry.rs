//! Timeout and exponential-backoff retry around a single operation.
//!
//! Attempt `i` (zero based) that fails with a retryable error is followed by a
//! sleep of `base_delay * 2^i + base_delay * jitter`, with the jitter fraction
//! drawn from an injectable [`Jitter`] source in `[0, 1)`.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::metrics;

/// Source of backoff jitter.
pub trait Jitter: Send + Sync {
    /// Next jitter fraction, in `[0, 1)`.
    fn fraction(&self) -> f64;
}

/// Seedable pseudo-random jitter.
#[derive(Debug)]
pub struct SeededJitter {
    rng: Mutex<StdRng>,
}

impl SeededJitter {
    /// Reproducible jitter sequence.
    pub fn new(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    /// Jitter seeded from the operating system.
    pub fn from_entropy() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }
}

impl Jitter for SeededJitter {
    fn fraction(&self) -> f64 {
        self.rng
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .gen::<f64>()
    }
}

/// Constant jitter fraction, mostly useful in tests.
#[derive(Debug, Clone, Copy)]
pub struct FixedJitter(pub f64);

impl Jitter for FixedJitter {
    fn fraction(&self) -> f64 {
        self.0.clamp(0.0, 1.0 - f64::EPSILON)
    }
}

/// Retry configuration for one operation.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt; `0` means a single attempt.
    pub retries: u32,
    /// Backoff unit.
    pub base_delay: Duration,
    /// Per-attempt time bound. `None` lets an attempt run to completion.
    pub timeout: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: 2,
            base_delay: Duration::from_millis(50),
            timeout: Some(Duration::from_secs(1)),
        }
    }
}

impl RetryPolicy {
    pub fn new(retries: u32, base_delay: Duration, timeout: Option<Duration>) -> Self {
        Self {
            retries,
            base_delay,
            timeout,
        }
    }

    /// Sleep before attempt `attempt + 1`, given a jitter fraction in `[0, 1)`.
    pub fn backoff_delay(&self, attempt: u32, jitter: f64) -> Duration {
        let exponential = 2u32
            .checked_pow(attempt)
            .and_then(|factor| self.base_delay.checked_mul(factor))
            .unwrap_or(Duration::MAX);
        exponential.saturating_add(self.base_delay.mul_f64(jitter.clamp(0.0, 1.0)))
    }
}

/// Runs operations under a [`RetryPolicy`].
///
/// Holds no per-call state, so one executor can serve many concurrent calls.
#[derive(Clone)]
pub struct RetryExecutor {
    policy: RetryPolicy,
    jitter: Arc<dyn Jitter>,
}

impl std::fmt::Debug for RetryExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryExecutor")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl RetryExecutor {
    /// Create an executor with entropy-seeded jitter.
    pub fn new(policy: RetryPolicy) -> Result<Self> {
        Self::with_jitter(policy, Arc::new(SeededJitter::from_entropy()))
    }

    /// Create an executor with an explicit jitter source.
    pub fn with_jitter(policy: RetryPolicy, jitter: Arc<dyn Jitter>) -> Result<Self> {
        if policy.base_delay.is_zero() {
            return Err(Error::Config("base_delay must be positive".to_string()));
        }
        if policy.timeout.is_some_and(|t| t.is_zero()) {
            return Err(Error::Config(
                "timeout must be positive; use no timeout instead of zero".to_string(),
            ));
        }
        Ok(Self { policy, jitter })
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or the
    /// retry budget is spent. The last error is returned unchanged.
    pub async fn run<T, F, Fut>(&self, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0u32;

        loop {
            let started = Instant::now();
            let outcome = match self.policy.timeout {
                Some(limit) => match timeout(limit, op()).await {
                    Ok(result) => result,
                    Err(_) => Err(Error::Timeout(limit)),
                },
                None => op().await,
            };

            let err = match outcome {
                Ok(value) => {
                    metrics::record_attempt("success");
                    return Ok(value);
                }
                Err(err) => err,
            };

            if !err.is_retryable() {
                metrics::record_attempt("fatal");
                debug!(attempt, error = %err, "Attempt failed with non-retryable error");
                return Err(err);
            }
            if attempt >= self.policy.retries {
                metrics::record_attempt("exhausted");
                debug!(
                    attempts = attempt + 1,
                    error = %err,
                    "Retry budget exhausted"
                );
                return Err(err);
            }

            metrics::record_attempt("retry");
            let delay = self.policy.backoff_delay(attempt, self.jitter.fraction());
            warn!(
                "Attempt {}/{} failed after {:?}: {}. Retrying in {:?}",
                attempt + 1,
                self.policy.retries + 1,
                started.elapsed(),
                err,
                delay
            );

            sleep(delay).await;
            attempt += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn executor(retries: u32, timeout: Option<Duration>) -> RetryExecutor {
        RetryExecutor::with_jitter(
            RetryPolicy::new(retries, Duration::from_millis(50), timeout),
            Arc::new(FixedJitter(0.5)),
        )
        .unwrap()
    }

    /// Fails `failures` times with a transient error, then returns the attempt count.
    fn flaky(calls: &AtomicU32, failures: u32) -> impl Future<Output = Result<u32>> + '_ {
        let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
        async move {
            if n <= failures {
                Err(Error::transient(format!("failure {n}")))
            } else {
                Ok(n)
            }
        }
    }

    #[test]
    fn test_backoff_delay_bounds() {
        let policy = RetryPolicy::new(5, Duration::from_millis(50), None);
        for attempt in 0..5 {
            let floor = Duration::from_millis(50) * (1 << attempt);
            assert_eq!(policy.backoff_delay(attempt, 0.0), floor);
            let high = policy.backoff_delay(attempt, 0.999);
            assert!(high >= floor && high < floor + Duration::from_millis(50));
        }
    }

    #[test]
    fn test_backoff_delay_saturates() {
        let policy = RetryPolicy::new(100, Duration::from_secs(1), None);
        assert_eq!(policy.backoff_delay(90, 0.5), Duration::MAX);
    }

    #[test]
    fn test_seeded_jitter_is_reproducible() {
        let a = SeededJitter::new(42);
        let b = SeededJitter::new(42);
        for _ in 0..16 {
            let x = a.fraction();
            assert_eq!(x, b.fraction());
            assert!((0.0..1.0).contains(&x));
        }
    }

    #[test]
    fn test_rejects_zero_durations() {
        let zero_delay = RetryPolicy::new(1, Duration::ZERO, None);
        assert!(matches!(RetryExecutor::new(zero_delay), Err(Error::Config(_))));

        let zero_timeout = RetryPolicy::new(1, Duration::from_millis(1), Some(Duration::ZERO));
        assert!(matches!(RetryExecutor::new(zero_timeout), Err(Error::Config(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_first_try_has_no_delay() {
        let calls = AtomicU32::new(0);
        let start = Instant::now();
        let value = executor(3, None).run(|| flaky(&calls, 0)).await.unwrap();
        assert_eq!(value, 1);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_within_budget() {
        let calls = AtomicU32::new(0);
        let value = executor(3, None).run(|| flaky(&calls, 3)).await.unwrap();
        assert_eq!(value, 4);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_after_retries_plus_one_attempts() {
        let calls = AtomicU32::new(0);
        let err = executor(2, None).run(|| flaky(&calls, 5)).await.unwrap_err();
        assert!(matches!(err, Error::Transient(ref msg) if msg == "failure 3"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_retries_is_single_attempt() {
        let calls = AtomicU32::new(0);
        let result = executor(0, None).run(|| flaky(&calls, 1)).await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_surfaces_immediately() {
        let calls = AtomicU32::new(0);
        let start = Instant::now();
        let err = executor(5, None)
            .run(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(Error::operation("bad input")) }
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Operation(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_counts_as_retryable_failure() {
        let calls = AtomicU32::new(0);
        let err = executor(1, Some(Duration::from_millis(20)))
            .run(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async {
                    sleep(Duration::from_secs(10)).await;
                    Ok(())
                }
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout(d) if d == Duration::from_millis(20)));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_then_success() {
        let calls = AtomicU32::new(0);
        let value = executor(2, Some(Duration::from_millis(20)))
            .run(|| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        sleep(Duration::from_secs(1)).await;
                    }
                    Ok(n)
                }
            })
            .await
            .unwrap();
        assert_eq!(value, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_timeout_runs_to_completion() {
        let value = executor(0, None)
            .run(|| async {
                sleep(Duration::from_secs(3600)).await;
                Ok("done")
            })
            .await
            .unwrap();
        assert_eq!(value, "done");
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_growth_between_attempts() {
        let stamps = Mutex::new(Vec::new());
        let base = Duration::from_millis(50);
        let retry = RetryExecutor::with_jitter(
            RetryPolicy::new(3, base, None),
            Arc::new(FixedJitter(0.25)),
        )
        .unwrap();

        let _ = retry
            .run(|| {
                stamps.lock().unwrap().push(Instant::now());
                async { Err::<(), _>(Error::transient("down")) }
            })
            .await;

        let stamps = stamps.into_inner().unwrap();
        assert_eq!(stamps.len(), 4);
        for (i, pair) in stamps.windows(2).enumerate() {
            let gap = pair[1] - pair[0];
            let floor = base * (1 << i);
            assert!(gap >= floor, "gap {i} = {gap:?}");
            assert!(gap < floor + base, "gap {i} = {gap:?}");
        }
    }
}
