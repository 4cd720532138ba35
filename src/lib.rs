//! flowgate - bounded-concurrency execution and async rate limiting
//!
//! flowgate provides two independent primitives:
//!
//! - **Bounded executor**: runs a fallible async operation over an ordered
//!   batch of inputs with a hard cap on in-flight work, a per-attempt timeout
//!   and exponential-backoff retry. Results come back in input order; failed
//!   items are dropped (or abort the batch, in fail-fast mode).
//! - **Rate limiter**: a lazily refilled token bucket that throttles how
//!   *often* work starts, independently of how much may run at once.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use flowgate::{bounded_execute, RateLimitConfig, RateLimiter};
//!
//! # async fn example() -> flowgate::Result<()> {
//! let limiter = Arc::new(RateLimiter::new(&RateLimitConfig::per_second(200.0))?);
//!
//! let doubled = bounded_execute(
//!     0..1000u64,
//!     move |n| {
//!         let limiter = limiter.clone();
//!         async move {
//!             limiter.acquire(1.0).await?;
//!             Ok::<_, flowgate::Error>(n * 2)
//!         }
//!     },
//!     64,
//!     2,
//!     Some(Duration::from_millis(200)),
//! )
//! .await?;
//! # Ok(())
//! # }
//! ```

pub mod cancel;
pub mod config;
pub mod demo;
pub mod engine;
pub mod error;
pub mod metrics;
pub mod telemetry;
pub mod workload;

pub use cancel::CancelSignal;
pub use engine::{
    bounded_execute, BatchOutcome, BoundedExecutor, ExecutorConfig, FailureMode, RateLimitConfig,
    RateLimiter, RetryExecutor, RetryPolicy,
};
pub use error::{Error, Result};
