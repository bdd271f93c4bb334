use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Notify;
use tokio::task::JoinHandle;

/// Shared flag for cooperative cancellation of a run.
///
/// Any clone may call [`set`](Self::set). The scheduler observes the flag at
/// its polling points and calls [`clear`](Self::clear) once the cancellation
/// has been fully handled, so the same signal can drive a later run.
#[derive(Clone, Debug, Default)]
pub struct CancellationSignal {
    inner: Arc<SignalInner>,
}

#[derive(Debug, Default)]
struct SignalInner {
    set: AtomicBool,
    notify: Notify,
}

impl CancellationSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Idempotent.
    pub fn set(&self) {
        self.inner.set.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_set(&self) -> bool {
        self.inner.set.load(Ordering::SeqCst)
    }

    /// Reset to unset.
    pub fn clear(&self) {
        self.inner.set.store(false, Ordering::SeqCst);
    }

    /// Wait until the signal is set.
    pub async fn wait(&self) {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            // Register before checking so a concurrent set() is not missed.
            notified.as_mut().enable();
            if self.is_set() {
                return;
            }
            notified.await;
        }
    }
}

/// Set `signal` when the process receives Ctrl-C.
///
/// Intended for command-line batch drivers; GUI callers set the signal from
/// their own cancel action instead.
pub fn cancel_on_ctrl_c(signal: CancellationSignal) -> JoinHandle<()> {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("Received interrupt, cancelling run");
                signal.set();
            }
            Err(err) => {
                tracing::warn!("failed to listen for interrupt: {err}");
            }
        }
    })
}
