//! Concurrency primitives: bounded batch execution, retry, rate limiting.

mod executor;
pub mod rate_limiter;
pub mod retry;

pub use executor::{
    bounded_execute, BatchOutcome, BoundedExecutor, ExecutorConfig, FailureMode, ItemFailure,
};
pub use rate_limiter::{RateLimitConfig, RateLimiter};
pub use retry::{FixedJitter, Jitter, RetryExecutor, RetryPolicy, SeededJitter};
