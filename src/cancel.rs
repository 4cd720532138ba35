//! Cooperative cancellation for running batches.
//!
//! A [`CancelSignal`] is a cloneable flag plus a notifier. Every clone observes
//! the same state, so the caller keeps one clone and hands another to the
//! executor. Cancellation is one-way and idempotent.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::signal;
use tokio::sync::Notify;
use tracing::{info, warn};

#[derive(Debug, Default)]
struct Inner {
    cancelled: AtomicBool,
    notify: Notify,
}

/// Shared cancellation flag.
///
/// ```rust
/// use flowgate::cancel::CancelSignal;
///
/// async fn example() {
///     let signal = CancelSignal::new();
///     let watcher = signal.clone();
///
///     tokio::spawn(async move {
///         watcher.cancelled().await;
///         // stop work
///     });
///
///     signal.cancel();
/// }
/// ```
#[derive(Debug, Clone, Default)]
pub struct CancelSignal {
    inner: Arc<Inner>,
}

impl CancelSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation and wake every waiter.
    pub fn cancel(&self) {
        let was_cancelled = self.inner.cancelled.swap(true, Ordering::SeqCst);
        if !was_cancelled {
            info!("Cancellation requested");
            self.inner.notify.notify_waiters();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Resolve once cancellation has been requested.
    ///
    /// Returns immediately if it already was.
    pub async fn cancelled(&self) {
        let notified = self.inner.notify.notified();
        tokio::pin!(notified);
        // Register before checking the flag so a concurrent `cancel` is not missed.
        notified.as_mut().enable();
        if self.is_cancelled() {
            return;
        }
        notified.await;
    }

    /// Cancel when the process receives Ctrl-C (or SIGTERM on Unix).
    pub fn listen_for_os_signals(&self) {
        let signal_handle = self.clone();

        tokio::spawn(async move {
            #[cfg(unix)]
            {
                let mut sigterm = match signal::unix::signal(signal::unix::SignalKind::terminate())
                {
                    Ok(s) => s,
                    Err(e) => {
                        warn!("Failed to create SIGTERM handler: {}", e);
                        if signal::ctrl_c().await.is_ok() {
                            signal_handle.cancel();
                        }
                        return;
                    }
                };

                tokio::select! {
                    _ = sigterm.recv() => {
                        info!("Received SIGTERM, cancelling");
                    }
                    result = signal::ctrl_c() => {
                        if let Err(e) = result {
                            warn!("Failed to listen for Ctrl+C: {}", e);
                            return;
                        }
                        info!("Received Ctrl+C, cancelling");
                    }
                }
            }

            #[cfg(not(unix))]
            {
                if let Err(e) = signal::ctrl_c().await {
                    warn!("Failed to listen for Ctrl+C: {}", e);
                    return;
                }
                info!("Received Ctrl+C, cancelling");
            }

            signal_handle.cancel();
        });
    }
}
