use std::sync::Arc;

use tokio::sync::watch;
use tracing::{info, warn};

// ---------------------------------------------------------------------------
// ShutdownSignal: cooperative shutdown coordination
// ---------------------------------------------------------------------------

/// Watch-based shutdown flag shared between the daemon and the bridge.
///
/// The bridge `select!`s on [`wait`](Self::wait) next to its reader, so a
/// trigger moves it to draining even while it is blocked on input. A
/// trigger that happens before anyone waits is not lost.
///
/// ```ignore
/// let shutdown = ShutdownSignal::new();
/// let bridge_signal = shutdown.clone();
///
/// tokio::select! {
///     _ = bridge_signal.wait() => { /* drain */ }
///     line = reader.next_line() => { /* serve */ }
/// }
/// ```
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Check if shutdown has been triggered (non-blocking).
    pub fn is_shutting_down(&self) -> bool {
        *self.tx.borrow()
    }

    /// Trigger shutdown for every waiter. Idempotent.
    pub fn trigger(&self) {
        if self.tx.send_if_modified(|down| !std::mem::replace(down, true)) {
            info!("shutdown signal triggered");
        } else {
            warn!("shutdown already triggered");
        }
    }

    /// Resolve once shutdown has been triggered.
    pub async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives in `self`, so this only returns once the flag is set.
        let _ = rx.wait_for(|down| *down).await;
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}
