//! Prometheus metrics for flowgate.
//!
//! Recording goes through the `metrics` facade and is a no-op until
//! [`init_metrics`] installs a recorder.
//!
//! ## Metrics
//!
//! ### Counters
//! - `flowgate_items_total` - Batch items by final status (success/failed)
//! - `flowgate_attempts_total` - Operation attempts by outcome (success/retry/exhausted/fatal)
//! - `flowgate_rate_limiter_waits_total` - Acquire calls that had to sleep
//!
//! ### Histograms
//! - `flowgate_item_duration_seconds` - Time from permit acquisition to item completion
//! - `flowgate_rate_limiter_wait_seconds` - Time spent waiting for tokens
//!
//! ### Gauges
//! - `flowgate_in_flight` - Items currently holding a concurrency permit

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use std::time::Duration;

/// Global Prometheus handle for rendering metrics.
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the Prometheus recorder.
///
/// Safe to call more than once; later calls return the existing handle.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }
    let handle = PrometheusBuilder::new().install_recorder()?;
    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
}

/// Render current metrics in Prometheus text format.
pub fn render_metrics() -> String {
    match PROMETHEUS_HANDLE.get() {
        Some(handle) => handle.render(),
        None => "# Metrics not initialized\n".to_string(),
    }
}

// =============================================================================
// Executor Metrics
// =============================================================================

/// Record the final status of one batch item.
pub fn record_item(status: &'static str, duration: Duration) {
    counter!("flowgate_items_total", "status" => status).increment(1);
    histogram!("flowgate_item_duration_seconds").record(duration.as_secs_f64());
}

/// Record one operation attempt.
pub fn record_attempt(outcome: &'static str) {
    counter!("flowgate_attempts_total", "outcome" => outcome).increment(1);
}

pub fn inc_in_flight() {
    gauge!("flowgate_in_flight").increment(1.0);
}

pub fn dec_in_flight() {
    gauge!("flowgate_in_flight").decrement(1.0);
}

// =============================================================================
// Rate Limiter Metrics
// =============================================================================

/// Record an acquire call that had to sleep for tokens.
pub fn record_rate_limit_wait(waited: Duration) {
    counter!("flowgate_rate_limiter_waits_total").increment(1);
    histogram!("flowgate_rate_limiter_wait_seconds").record(waited.as_secs_f64());
}
