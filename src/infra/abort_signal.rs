//! Cooperative cancellation for expansion runs.
//!
//! An `AbortHandle` is checked before each entry and before each external
//! process launch. Processes that already started run to completion.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

/// A cooperative abort handle.
///
/// Clone-cheap (wraps `Arc`). Signal once, observe from any clone. Safe to
/// call `abort()` before any waiter has registered.
#[derive(Debug, Clone)]
pub struct AbortHandle {
    aborted: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl AbortHandle {
    pub fn new() -> Self {
        Self {
            aborted: Arc::new(AtomicBool::new(false)),
            notify: Arc::new(Notify::new()),
        }
    }

    /// Signal every clone that the run should stop.
    pub fn abort(&self) {
        self.aborted.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::Acquire)
    }

    /// Wait until an abort signal is received.
    ///
    /// Returns immediately if `abort()` was already called.
    pub async fn wait_for_abort(&self) {
        // Register before checking the flag so a concurrent abort() is not missed.
        loop {
            let notified = self.notify.notified();
            if self.aborted.load(Ordering::Acquire) {
                return;
            }
            notified.await;
        }
    }
}

impl Default for AbortHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Abort `handle` when the process receives Ctrl+C.
///
/// The returned task ends after the first signal or when it is aborted.
pub fn abort_on_ctrl_c(handle: AbortHandle) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                if result.is_ok() {
                    tracing::warn!("interrupt received, stopping after the current step");
                    handle.abort();
                }
            }
            _ = handle.wait_for_abort() => {}
        }
    })
}
