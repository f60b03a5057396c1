//! Per-session cancellation signal.

use std::sync::Arc;

use tokio::sync::watch;

/// Cancellation token shared by everything a session spawns.
///
/// Cancelling is idempotent; only the first call reports `true`.
#[derive(Debug, Clone)]
pub struct SessionSignal {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl SessionSignal {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            tx: Arc::new(tx),
            rx,
        }
    }

    /// Cancel the session. Returns `true` if this call flipped the signal.
    pub fn cancel(&self) -> bool {
        self.tx.send_if_modified(|cancelled| {
            if *cancelled {
                false
            } else {
                *cancelled = true;
                true
            }
        })
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once the session has been cancelled.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        // The sender lives as long as any clone of `self`, so this cannot fail.
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}

impl Default for SessionSignal {
    fn default() -> Self {
        Self::new()
    }
}
