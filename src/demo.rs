//! Demo driver for the CLI.
//!
//! Each demo builds its executor or limiter from the loaded configuration,
//! runs one of the simulated workloads and returns a [`DemoReport`].

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::info;

use crate::cancel::CancelSignal;
use crate::engine::{BoundedExecutor, ExecutorConfig, RateLimitConfig, RateLimiter};
use crate::error::Result;
use crate::workload::{heavy_compute, heavy_compute_parallel, io_task, order_task};

/// Latency percentiles in milliseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Percentiles {
    pub p50_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
}

impl Percentiles {
    /// Nearest-rank percentiles over an unsorted sample.
    pub fn from_latencies(latencies: &[Duration]) -> Self {
        if latencies.is_empty() {
            return Self::default();
        }
        let mut sorted = latencies.to_vec();
        sorted.sort_unstable();
        let pick = |q: f64| {
            let idx = ((q * sorted.len() as f64) as usize).min(sorted.len() - 1);
            sorted[idx].as_secs_f64() * 1e3
        };
        Self {
            p50_ms: pick(0.50),
            p95_ms: pick(0.95),
            p99_ms: pick(0.99),
        }
    }
}

/// Outcome of one demo run.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "demo", rename_all = "snake_case")]
pub enum DemoReport {
    Io {
        requested: usize,
        completed: usize,
        elapsed_secs: f64,
        throughput: f64,
        latency: Percentiles,
    },
    Orders {
        orders: usize,
        elapsed_secs: f64,
        achieved_rate: f64,
        target_rate: f64,
    },
    Compute {
        workers: usize,
        iterations: u64,
        elapsed_secs: f64,
        million_iters_per_sec: f64,
        checksum: f64,
    },
}

impl std::fmt::Display for DemoReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DemoReport::Io {
                requested,
                completed,
                elapsed_secs,
                throughput,
                latency,
            } => write!(
                f,
                "completed {}/{} tasks in {:.3}s  throughput~{:.0}/s  p50={:.1}ms  p95={:.1}ms  p99={:.1}ms",
                completed,
                requested,
                elapsed_secs,
                throughput,
                latency.p50_ms,
                latency.p95_ms,
                latency.p99_ms
            ),
            DemoReport::Orders {
                orders,
                elapsed_secs,
                achieved_rate,
                target_rate,
            } => write!(
                f,
                "{} orders in {:.3}s  rate~{:.1}/s (target {:.1}/s)",
                orders, elapsed_secs, achieved_rate, target_rate
            ),
            DemoReport::Compute {
                workers,
                iterations,
                elapsed_secs,
                million_iters_per_sec,
                checksum,
            } => write!(
                f,
                "{} workers, {} iterations in {:.3}s  throughput~{:.2} M it/s  checksum={:.3e}",
                workers, iterations, elapsed_secs, million_iters_per_sec, checksum
            ),
        }
    }
}

fn per_second(count: f64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs > 0.0 {
        count / secs
    } else {
        0.0
    }
}

fn build_executor(config: ExecutorConfig, cancel: &CancelSignal) -> Result<BoundedExecutor> {
    Ok(BoundedExecutor::new(config)?.with_cancel_signal(cancel.clone()))
}

/// Fan `count` simulated I/O calls out through the bounded executor.
pub async fn run_io_demo(
    count: usize,
    config: ExecutorConfig,
    cancel: &CancelSignal,
) -> Result<DemoReport> {
    let executor = build_executor(config, cancel)?;
    info!(count, concurrency = executor.concurrency(), "Starting I/O demo");

    let started = Instant::now();
    let results = executor.run(0..count as u64, io_task).await?;
    let elapsed = started.elapsed();

    let latencies: Vec<Duration> = results.iter().map(|(_, latency)| *latency).collect();
    Ok(DemoReport::Io {
        requested: count,
        completed: results.len(),
        elapsed_secs: elapsed.as_secs_f64(),
        throughput: per_second(results.len() as f64, elapsed),
        latency: Percentiles::from_latencies(&latencies),
    })
}

/// Submit `count` orders at high concurrency, throttled by a token bucket.
pub async fn run_order_demo(
    count: usize,
    config: ExecutorConfig,
    limit: RateLimitConfig,
    cancel: &CancelSignal,
) -> Result<DemoReport> {
    let executor = build_executor(config, cancel)?;
    let limiter = Arc::new(RateLimiter::new(&limit)?);
    info!(
        count,
        rate = limiter.rate(),
        capacity = limiter.capacity(),
        "Starting order demo"
    );

    let started = Instant::now();
    let orders = executor
        .run(0..count as u64, move |n| {
            let limiter = limiter.clone();
            async move {
                limiter.acquire(1.0).await?;
                order_task(n).await
            }
        })
        .await?;
    let elapsed = started.elapsed();

    Ok(DemoReport::Orders {
        orders: orders.len(),
        elapsed_secs: elapsed.as_secs_f64(),
        achieved_rate: per_second(orders.len() as f64, elapsed),
        target_rate: limit.rate,
    })
}

/// Run the CPU kernel across `workers` blocking threads after a warm-up.
pub async fn run_compute_demo(iterations: u64, workers: usize) -> Result<DemoReport> {
    let workers = workers.max(1);
    info!(iterations, workers, "Starting compute demo");

    // Warm-up so thread spawning is not counted.
    heavy_compute_parallel(10_000, workers).await?;

    let started = Instant::now();
    let checksum = if workers == 1 {
        tokio::task::spawn_blocking(move || heavy_compute(iterations))
            .await
            .map_err(|e| crate::error::Error::Internal(format!("compute worker failed: {}", e)))?
    } else {
        heavy_compute_parallel(iterations, workers).await?
    };
    let elapsed = started.elapsed();

    Ok(DemoReport::Compute {
        workers,
        iterations,
        elapsed_secs: elapsed.as_secs_f64(),
        million_iters_per_sec: per_second(iterations as f64, elapsed) / 1e6,
        checksum,
    })
}
