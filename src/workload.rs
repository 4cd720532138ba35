//! Simulated workloads used by the demos and tests.
//!
//! None of these know anything about the executor; they are ordinary async
//! or blocking functions passed in as the per-item operation.

use rand::Rng;
use std::time::Duration;
use tokio::time::{sleep, Instant};

use crate::error::{Error, Result};

/// Mean of the exponential part of [`io_task`] latency.
pub const IO_MEAN_LATENCY: Duration = Duration::from_millis(3);
/// Upper bound of the uniform part of [`io_task`] latency.
pub const IO_EXTRA_LATENCY: Duration = Duration::from_millis(2);
/// Probability that an [`io_task`] call fails.
pub const IO_FAILURE_RATE: f64 = 0.01;

/// Simulated I/O call: roughly p50 3ms, p95 20ms, 1% random failures.
///
/// Returns the input and the observed latency.
pub async fn io_task(n: u64) -> Result<(u64, Duration)> {
    let started = Instant::now();
    let (latency, fail) = {
        let mut rng = rand::thread_rng();
        // Inverse-CDF sample of an exponential distribution.
        let u: f64 = rng.gen_range(f64::EPSILON..1.0);
        let exp = -u.ln() * IO_MEAN_LATENCY.as_secs_f64();
        let extra = rng.gen::<f64>() * IO_EXTRA_LATENCY.as_secs_f64();
        (
            Duration::from_secs_f64(exp + extra),
            rng.gen_bool(IO_FAILURE_RATE),
        )
    };

    sleep(latency).await;
    if fail {
        return Err(std::io::Error::new(std::io::ErrorKind::Other, "random I/O failure").into());
    }
    Ok((n, started.elapsed()))
}

/// Simulated order submission.
pub async fn order_task(n: u64) -> Result<u64> {
    sleep(Duration::from_millis(1)).await;
    Ok(n)
}

/// CPU-bound kernel: sum of `(i * 0.001)^2` for `i` in `0..n`.
pub fn heavy_compute(n: u64) -> f64 {
    heavy_compute_range(0, n)
}

fn heavy_compute_range(start: u64, end: u64) -> f64 {
    let mut total = 0.0;
    for i in start..end {
        let x = i as f64 * 0.001;
        total += x * x;
    }
    total
}

/// Split `n` iterations evenly over `workers`, giving the remainder to the
/// first few. Returns half-open ranges.
pub fn partition(n: u64, workers: usize) -> Vec<(u64, u64)> {
    let workers = workers.max(1) as u64;
    let base = n / workers;
    let rem = n % workers;
    let mut start = 0;
    (0..workers)
        .map(|i| {
            let len = base + u64::from(i < rem);
            let range = (start, start + len);
            start += len;
            range
        })
        .collect()
}

/// [`heavy_compute`] split across `workers` blocking threads.
pub async fn heavy_compute_parallel(n: u64, workers: usize) -> Result<f64> {
    let handles: Vec<_> = partition(n, workers)
        .into_iter()
        .map(|(start, end)| tokio::task::spawn_blocking(move || heavy_compute_range(start, end)))
        .collect();

    let mut total = 0.0;
    for handle in handles {
        total += handle
            .await
            .map_err(|e| Error::Internal(format!("compute worker failed: {}", e)))?;
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heavy_compute_small() {
        // 0 + 0.000001 + 0.000004
        let total = heavy_compute(3);
        assert!((total - 0.000005).abs() < 1e-12);
        assert_eq!(heavy_compute(0), 0.0);
    }

    #[test]
    fn test_partition_covers_range() {
        let parts = partition(10, 3);
        assert_eq!(parts, vec![(0, 4), (4, 7), (7, 10)]);

        let parts = partition(2, 4);
        assert_eq!(parts, vec![(0, 1), (1, 2), (2, 2), (2, 2)]);

        assert_eq!(partition(5, 0), vec![(0, 5)]);
    }

    #[tokio::test]
    async fn test_parallel_matches_serial() {
        let serial = heavy_compute(100_000);
        let parallel = heavy_compute_parallel(100_000, 4).await.unwrap();
        assert!((serial - parallel).abs() / serial < 1e-9);
    }

    #[tokio::test(start_paused = true)]
    async fn test_order_task_echoes_input() {
        assert_eq!(order_task(42).await.unwrap(), 42);
    }

    #[tokio::test(start_paused = true)]
    async fn test_io_task_mostly_succeeds() {
        let mut ok = 0;
        for n in 0..500 {
            match io_task(n).await {
                Ok((echo, latency)) => {
                    assert_eq!(echo, n);
                    assert!(latency < Duration::from_secs(1));
                    ok += 1;
                }
                Err(e) => assert!(e.is_retryable()),
            }
        }
        assert!(ok >= 480, "only {ok} of 500 succeeded");
    }
}
