//! Cooperative cancellation flag shared between the extraction loop, the
//! retry executor's backoff sleeps, and the Ctrl-C handler.

use std::sync::Arc;

use tokio::sync::watch;

/// Cloneable stop request. Checked at suspension points, never delivered
/// asynchronously into the middle of an operation.
#[derive(Clone)]
pub struct CancelFlag {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelFlag {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Request a stop. Idempotent; wakes every pending [`cancelled`](Self::cancelled) wait.
    pub fn request_stop(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once a stop has been requested. Safe to race against a
    /// sleep inside `tokio::select!`.
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        while !*rx.borrow_and_update() {
            if rx.changed().await.is_err() {
                break;
            }
        }
    }
}

impl Default for CancelFlag {
    fn default() -> Self {
        Self::new()
    }
}
