//! `RealtimeUpdated` notifications and subscription handles.
//!
//! Notifications fan out over a `broadcast` channel. Every notification
//! carries a full snapshot, so a subscriber that falls behind simply skips
//! to the newest one.

use std::sync::Arc;

use tokio::sync::broadcast::{self, error::RecvError};
use tracing::debug;

const CHANNEL_CAPACITY: usize = 64;

/// Why a notification was raised
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateSource {
    /// A change event from the stream was applied
    Stream,
    /// The watchdog re-fetched the collection
    Fallback,
}

/// The replica changed (or was re-confirmed); `items` is the full snapshot
#[derive(Debug, Clone)]
pub struct RealtimeUpdated<T> {
    pub items: Arc<Vec<T>>,
    pub source: UpdateSource,
}

pub(crate) struct Notifier<T> {
    tx: broadcast::Sender<RealtimeUpdated<T>>,
}

impl<T: Clone + Send + Sync + 'static> Notifier<T> {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }

    /// Returns the number of subscribers reached
    pub fn publish(&self, items: Vec<T>, source: UpdateSource) -> usize {
        self.tx
            .send(RealtimeUpdated {
                items: Arc::new(items),
                source,
            })
            .unwrap_or(0)
    }

    pub fn subscribe(&self) -> Subscription<T> {
        Subscription {
            rx: Some(self.tx.subscribe()),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

/// Handle to a stream of notifications; dropping it unsubscribes
pub struct Subscription<T> {
    rx: Option<broadcast::Receiver<RealtimeUpdated<T>>>,
}

impl<T: Clone> Subscription<T> {
    /// Next notification; `None` once cancelled or the synchronizer is gone
    pub async fn recv(&mut self) -> Option<RealtimeUpdated<T>> {
        loop {
            let rx = self.rx.as_mut()?;
            match rx.recv().await {
                Ok(update) => return Some(update),
                Err(RecvError::Lagged(skipped)) => {
                    debug!(skipped, "subscriber lagged, skipping to newest snapshot");
                }
                Err(RecvError::Closed) => {
                    self.rx = None;
                    return None;
                }
            }
        }
    }

    pub fn cancel(&mut self) {
        self.rx = None;
    }

    pub fn is_active(&self) -> bool {
        self.rx.is_some()
    }
}
