use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use flowgate::config::Config;
use flowgate::engine::{FixedJitter, SeededJitter};
use flowgate::workload::io_task;
use flowgate::{
    bounded_execute, BoundedExecutor, CancelSignal, Error, ExecutorConfig, FailureMode,
    RateLimitConfig, RateLimiter,
};
use tokio::time::{sleep, Instant};

#[tokio::test(start_paused = true)]
async fn io_fan_out_keeps_nearly_every_item() {
    let out = bounded_execute(
        0..10_000u64,
        io_task,
        256,
        2,
        Some(Duration::from_millis(50)),
    )
    .await
    .unwrap();

    assert!(out.len() >= 9_900, "only {} items survived", out.len());
    // Survivors keep input order.
    assert!(out.windows(2).all(|w| w[0].0 < w[1].0));
}

#[tokio::test(start_paused = true)]
async fn rate_limiter_paces_sequential_acquires() {
    let limiter = RateLimiter::new(
        &RateLimitConfig::per_second(200.0)
            .with_burst(200.0)
            .with_init_tokens(0.0),
    )
    .unwrap();

    let start = Instant::now();
    for _ in 0..1_000 {
        limiter.acquire(1.0).await.unwrap();
    }
    let elapsed = start.elapsed().as_secs_f64();
    assert!((4.5..=5.5).contains(&elapsed), "elapsed {elapsed}");
}

#[tokio::test(start_paused = true)]
async fn limiter_inside_operation_caps_rate_not_concurrency() {
    let limiter = Arc::new(
        RateLimiter::new(&RateLimitConfig::per_second(50.0).with_init_tokens(0.0)).unwrap(),
    );
    let in_flight = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let executor = BoundedExecutor::with_jitter(
        ExecutorConfig::new(20, 0, None),
        Arc::new(SeededJitter::new(7)),
    )
    .unwrap();

    let (l, f, p) = (limiter.clone(), in_flight.clone(), peak.clone());
    let start = Instant::now();
    let out = executor
        .run(0..100u32, move |i| {
            let (l, f, p) = (l.clone(), f.clone(), p.clone());
            async move {
                let now = f.fetch_add(1, Ordering::SeqCst) + 1;
                p.fetch_max(now, Ordering::SeqCst);
                let result = l.acquire(1.0).await.map(|_| i);
                f.fetch_sub(1, Ordering::SeqCst);
                result
            }
        })
        .await
        .unwrap();

    assert_eq!(out, (0..100).collect::<Vec<_>>());
    assert!(peak.load(Ordering::SeqCst) <= 20);
    // 100 tokens at 50/s from an empty bucket.
    let elapsed = start.elapsed().as_secs_f64();
    assert!((1.9..=2.3).contains(&elapsed), "elapsed {elapsed}");
}

#[tokio::test(start_paused = true)]
async fn over_capacity_acquire_is_not_retried() {
    let limiter = Arc::new(RateLimiter::per_second(5.0).unwrap());
    let calls = Arc::new(AtomicUsize::new(0));
    let (l, c) = (limiter.clone(), calls.clone());

    let outcome = BoundedExecutor::with_jitter(
        ExecutorConfig::new(4, 3, None),
        Arc::new(FixedJitter(0.0)),
    )
    .unwrap()
    .run_detailed(0..3u32, move |i| {
        let l = l.clone();
        c.fetch_add(1, Ordering::SeqCst);
        async move {
            l.acquire(10.0).await?;
            Ok::<_, Error>(i)
        }
    })
    .await
    .unwrap();

    assert_eq!(outcome.succeeded(), 0);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert!(outcome
        .failures
        .iter()
        .all(|f| matches!(f.error, Error::InvalidRequest(_))));
}

#[tokio::test(start_paused = true)]
async fn fail_fast_and_partial_disagree_on_same_input() {
    let op = |i: u32| async move {
        if i == 3 {
            Err(Error::operation("item three is invalid"))
        } else {
            sleep(Duration::from_millis(10)).await;
            Ok(i)
        }
    };

    let partial = BoundedExecutor::new(ExecutorConfig::new(2, 0, None))
        .unwrap()
        .run(0..6u32, op)
        .await
        .unwrap();
    assert_eq!(partial, vec![0, 1, 2, 4, 5]);

    let err = BoundedExecutor::new(
        ExecutorConfig::new(2, 0, None).with_failure_mode(FailureMode::FailFast),
    )
    .unwrap()
    .run(0..6u32, op)
    .await
    .unwrap_err();
    assert!(matches!(err, Error::ItemFailed { index: 3, .. }));
}

#[tokio::test(start_paused = true)]
async fn dropping_the_batch_future_aborts_tasks() {
    let live = Arc::new(AtomicUsize::new(0));
    let l = live.clone();

    struct Live(Arc<AtomicUsize>);
    impl Drop for Live {
        fn drop(&mut self) {
            self.0.fetch_sub(1, Ordering::SeqCst);
        }
    }

    let executor = BoundedExecutor::new(ExecutorConfig::new(8, 0, None)).unwrap();
    let batch = executor.run(0..32u32, move |i| {
        l.fetch_add(1, Ordering::SeqCst);
        let guard = Live(l.clone());
        async move {
            let _guard = guard;
            sleep(Duration::from_secs(3600)).await;
            Ok(i)
        }
    });

    let timed_out = tokio::time::timeout(Duration::from_millis(100), batch).await;
    assert!(timed_out.is_err());

    // Aborted tasks are dropped by the runtime; give it a turn to do so.
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
    assert_eq!(live.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn cancel_signal_stops_retry_backoff() {
    let signal = CancelSignal::new();
    let trigger = signal.clone();
    tokio::spawn(async move {
        sleep(Duration::from_millis(30)).await;
        trigger.cancel();
    });

    let start = Instant::now();
    let err = BoundedExecutor::with_jitter(
        ExecutorConfig::new(2, 10, None).with_base_delay(Duration::from_secs(5)),
        Arc::new(FixedJitter(0.0)),
    )
    .unwrap()
    .with_cancel_signal(signal)
    .run(0..4u32, |_| async { Err::<u32, _>(Error::transient("unavailable")) })
    .await
    .unwrap_err();

    assert!(matches!(err, Error::Cancelled));
    assert!(start.elapsed() < Duration::from_secs(5));
}

#[test]
fn config_file_feeds_engine() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
[executor]
concurrency = 12
retries = 1
timeout_ms = 250

[limiter]
rate = 40.0
burst = 10.0
"#
    )
    .unwrap();

    let config = Config::from_toml_str(&std::fs::read_to_string(file.path()).unwrap()).unwrap();
    let executor = config.executor.to_executor_config().unwrap();
    assert_eq!(executor.concurrency, 12);
    assert_eq!(executor.retry.timeout, Some(Duration::from_millis(250)));

    let limit = config.limiter.to_rate_limit_config().unwrap();
    let limiter = RateLimiter::new(&limit).unwrap();
    assert_eq!(limiter.capacity(), 10.0);
    assert_eq!(limiter.rate(), 40.0);
}
