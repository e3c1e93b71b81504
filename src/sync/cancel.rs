use std::sync::Arc;

use tokio::sync::watch;

/// Shared cancellation signal for background loops.
///
/// Clones observe the same signal. A child created with [`CancelSignal::child`]
/// is cancelled with its parent but can also be cancelled on its own.
#[derive(Clone, Debug)]
pub struct CancelSignal {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl Default for CancelSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelSignal {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            tx: Arc::new(tx),
            rx,
        }
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once the signal is cancelled
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        // the sender lives as long as `self`, so this only returns on cancel
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }

    /// A signal cancelled together with this one. Must be called inside a
    /// tokio runtime.
    pub fn child(&self) -> CancelSignal {
        let child = CancelSignal::new();
        if self.is_cancelled() {
            child.cancel();
            return child;
        }

        let parent = self.clone();
        let linked = child.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = parent.cancelled() => linked.cancel(),
                _ = linked.cancelled() => {}
            }
        });
        child
    }
}
