//! Bounded-concurrency batch executor.
//!
//! One task is spawned per input item. Each task waits for a permit from a
//! shared semaphore, runs the operation through [`RetryExecutor`], and reports
//! `(index, result)` back to the collector, which writes the value into the
//! slot for that index. Results therefore come back in input order no matter
//! which items finish first.
//!
//! ## Failure modes
//!
//! - [`FailureMode::Partial`] (default): an item that is still failing after
//!   its retry budget is dropped, and the batch returns the survivors.
//! - [`FailureMode::FailFast`]: the first unrecovered failure aborts every
//!   sibling, waits for them to unwind, and returns [`Error::ItemFailed`].
//!
//! Permits are owned by the task and released on drop, so abort, panic and
//! cancellation all give the permit back.

use futures_util::FutureExt;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, debug_span, error, info, instrument, warn, Instrument, Span};

use crate::cancel::CancelSignal;
use crate::engine::retry::{Jitter, RetryExecutor, RetryPolicy, SeededJitter};
use crate::error::{Error, Result};
use crate::metrics;

/// What to do when an item fails for good.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureMode {
    /// Drop the item and keep going.
    #[default]
    Partial,
    /// Abort the whole batch on the first failure.
    FailFast,
}

/// Batch executor configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutorConfig {
    /// Maximum number of operations in progress at once.
    pub concurrency: usize,
    /// Retry policy applied to each item.
    pub retry: RetryPolicy,
    pub failure_mode: FailureMode,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            concurrency: 256,
            retry: RetryPolicy::new(1, Duration::from_millis(50), Some(Duration::from_millis(200))),
            failure_mode: FailureMode::Partial,
        }
    }
}

impl ExecutorConfig {
    pub fn new(concurrency: usize, retries: u32, timeout: Option<Duration>) -> Self {
        let defaults = Self::default();
        Self {
            concurrency,
            retry: RetryPolicy::new(retries, defaults.retry.base_delay, timeout),
            failure_mode: defaults.failure_mode,
        }
    }

    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.retry.base_delay = base_delay;
        self
    }

    pub fn with_failure_mode(mut self, mode: FailureMode) -> Self {
        self.failure_mode = mode;
        self
    }
}

/// An item that did not produce a value.
#[derive(Debug)]
pub struct ItemFailure {
    pub index: usize,
    pub error: Error,
}

/// Full result of a batch run.
#[derive(Debug)]
pub struct BatchOutcome<R> {
    /// One slot per input item; `None` where the item failed.
    pub slots: Vec<Option<R>>,
    /// Failed items, in completion order.
    pub failures: Vec<ItemFailure>,
    pub elapsed: Duration,
}

impl<R> BatchOutcome<R> {
    /// Number of items that produced a value.
    pub fn succeeded(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    /// Surviving values in input order.
    pub fn into_results(self) -> Vec<R> {
        self.slots.into_iter().flatten().collect()
    }
}

/// Runs batches of fallible async operations under a concurrency cap.
#[derive(Debug, Clone)]
pub struct BoundedExecutor {
    concurrency: usize,
    failure_mode: FailureMode,
    retry: RetryExecutor,
    cancel: Option<CancelSignal>,
}

impl BoundedExecutor {
    /// Create an executor with entropy-seeded backoff jitter.
    pub fn new(config: ExecutorConfig) -> Result<Self> {
        Self::with_jitter(config, Arc::new(SeededJitter::from_entropy()))
    }

    /// Create an executor with an explicit jitter source.
    pub fn with_jitter(config: ExecutorConfig, jitter: Arc<dyn Jitter>) -> Result<Self> {
        if config.concurrency == 0 || config.concurrency > Semaphore::MAX_PERMITS {
            return Err(Error::Config(format!(
                "concurrency must be between 1 and {}, got {}",
                Semaphore::MAX_PERMITS,
                config.concurrency
            )));
        }
        Ok(Self {
            concurrency: config.concurrency,
            failure_mode: config.failure_mode,
            retry: RetryExecutor::with_jitter(config.retry, jitter)?,
            cancel: None,
        })
    }

    /// Abort the batch with [`Error::Cancelled`] once `signal` fires.
    pub fn with_cancel_signal(mut self, signal: CancelSignal) -> Self {
        self.cancel = Some(signal);
        self
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    pub fn failure_mode(&self) -> FailureMode {
        self.failure_mode
    }

    /// Run `op` over every item and return the successful results in input order.
    pub async fn run<T, R, F, Fut>(&self, items: impl IntoIterator<Item = T>, op: F) -> Result<Vec<R>>
    where
        T: Clone + Send + 'static,
        R: Send + 'static,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R>> + Send + 'static,
    {
        Ok(self.run_detailed(items, op).await?.into_results())
    }

    /// Like [`run`](Self::run), but keep the slot array and the failures.
    #[instrument(
        name = "batch.run",
        skip(self, items, op),
        fields(
            concurrency = self.concurrency,
            failure_mode = ?self.failure_mode,
            items = tracing::field::Empty,
        )
    )]
    pub async fn run_detailed<T, R, F, Fut>(
        &self,
        items: impl IntoIterator<Item = T>,
        op: F,
    ) -> Result<BatchOutcome<R>>
    where
        T: Clone + Send + 'static,
        R: Send + 'static,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R>> + Send + 'static,
    {
        let items: Vec<T> = items.into_iter().collect();
        let total = items.len();
        Span::current().record("items", total);

        let started = Instant::now();
        let mut slots: Vec<Option<R>> = std::iter::repeat_with(|| None).take(total).collect();
        let mut failures = Vec::new();

        if self.cancel.as_ref().is_some_and(CancelSignal::is_cancelled) {
            return Err(Error::Cancelled);
        }

        let gate = Arc::new(Semaphore::new(self.concurrency));
        let op = Arc::new(op);
        let mut join_set: JoinSet<(usize, Result<R>)> = JoinSet::new();

        for (index, item) in items.into_iter().enumerate() {
            spawn_item(&mut join_set, index, item, &gate, &op, &self.retry);
        }
        debug!("Spawned {} tasks", total);

        loop {
            let joined = tokio::select! {
                biased;
                _ = wait_cancelled(self.cancel.as_ref()) => {
                    warn!("Batch cancelled with {} tasks outstanding", join_set.len());
                    abort_and_drain(&mut join_set).await;
                    return Err(Error::Cancelled);
                }
                joined = join_set.join_next() => joined,
            };
            let Some(joined) = joined else {
                break;
            };

            match joined {
                Ok((idx, Ok(value))) => {
                    debug_assert!(slots[idx].is_none(), "slot {idx} written twice");
                    slots[idx] = Some(value);
                }
                Ok((idx, Err(e))) => match self.failure_mode {
                    FailureMode::Partial => {
                        error!("Item {} failed (dropping): {}", idx, e);
                        failures.push(ItemFailure { index: idx, error: e });
                    }
                    FailureMode::FailFast => {
                        error!("Item {} failed, aborting batch: {}", idx, e);
                        abort_and_drain(&mut join_set).await;
                        return Err(Error::ItemFailed {
                            index: idx,
                            source: Box::new(e),
                        });
                    }
                },
                Err(e) => {
                    abort_and_drain(&mut join_set).await;
                    return Err(Error::Internal(format!("worker task join failed: {}", e)));
                }
            }
        }

        let outcome = BatchOutcome {
            slots,
            failures,
            elapsed: started.elapsed(),
        };
        info!(
            succeeded = outcome.succeeded(),
            failed = outcome.failures.len(),
            elapsed_ms = outcome.elapsed.as_millis() as u64,
            "Batch complete"
        );
        Ok(outcome)
    }
}

/// Run `op` over `items` with `concurrency` permits, `retries` retries per
/// item and an optional per-attempt `timeout`, dropping failed items.
pub async fn bounded_execute<T, R, F, Fut>(
    items: impl IntoIterator<Item = T>,
    op: F,
    concurrency: usize,
    retries: u32,
    timeout: Option<Duration>,
) -> Result<Vec<R>>
where
    T: Clone + Send + 'static,
    R: Send + 'static,
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R>> + Send + 'static,
{
    BoundedExecutor::new(ExecutorConfig::new(concurrency, retries, timeout))?
        .run(items, op)
        .await
}

/// A held concurrency permit. Dropping it releases the permit.
struct InFlight {
    _permit: OwnedSemaphorePermit,
}

impl InFlight {
    fn new(permit: OwnedSemaphorePermit) -> Self {
        metrics::inc_in_flight();
        Self { _permit: permit }
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        metrics::dec_in_flight();
    }
}

fn spawn_item<T, R, F, Fut>(
    join_set: &mut JoinSet<(usize, Result<R>)>,
    index: usize,
    item: T,
    gate: &Arc<Semaphore>,
    op: &Arc<F>,
    retry: &RetryExecutor,
) where
    T: Clone + Send + 'static,
    R: Send + 'static,
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R>> + Send + 'static,
{
    let gate = gate.clone();
    let op = op.clone();
    let retry = retry.clone();

    let task = async move {
        let _in_flight = match gate.acquire_owned().await {
            Ok(permit) => InFlight::new(permit),
            Err(_) => return (index, Err(Error::Cancelled)),
        };
        let started = Instant::now();

        let result = AssertUnwindSafe(retry.run(move || (*op)(item.clone())))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(Error::Internal(panic_message(panic))));

        let status = if result.is_ok() { "success" } else { "failed" };
        metrics::record_item(status, started.elapsed());
        (index, result)
    };

    join_set.spawn(task.instrument(debug_span!("batch.item", index)));
}

async fn wait_cancelled(signal: Option<&CancelSignal>) {
    match signal {
        Some(signal) => signal.cancelled().await,
        None => std::future::pending().await,
    }
}

async fn abort_and_drain<R: 'static>(join_set: &mut JoinSet<R>) {
    join_set.abort_all();
    while join_set.join_next().await.is_some() {}
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    let detail = panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    format!("operation panicked: {}", detail)
}
