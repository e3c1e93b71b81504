/// Entity synchronizer
///
/// Owns the replica of one collection. Reads are served from the replica
/// (fetching once when it is empty), writes go straight to the remote store,
/// and the replica itself only changes through stream events and watchdog
/// re-fetches. Two background tasks run while listening: the stream loop and
/// the watchdog, both stopped by one cancellation signal.
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::cancel::CancelSignal;
use super::merge::{self, MergeReport};
use super::notify::{Notifier, Subscription, UpdateSource};
use super::watchdog;
use crate::entity::{Entity, KeySpace};
use crate::error::{ReplicaError, Result};
use crate::replica::Replica;
use crate::store::RemoteStoreClient;
use crate::stream::{ChangeEvent, EventKind, StreamListener};

/// Timing of the background loops
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncTiming {
    /// Pause before reconnecting a failed stream
    pub reconnect_delay: Duration,
    /// How often the watchdog checks for staleness
    pub watchdog_interval: Duration,
    /// Event silence after which the watchdog re-fetches
    pub staleness_threshold: Duration,
    /// Silence on an open stream after which it is dropped and reopened
    pub stream_idle_timeout: Duration,
}

impl Default for SyncTiming {
    fn default() -> Self {
        Self {
            reconnect_delay: Duration::from_secs(5),
            watchdog_interval: Duration::from_secs(10),
            staleness_threshold: Duration::from_secs(30),
            stream_idle_timeout: crate::stream::DEFAULT_IDLE_TIMEOUT,
        }
    }
}

struct Listening {
    cancel: CancelSignal,
    tasks: Vec<JoinHandle<()>>,
}

impl Listening {
    fn is_running(&self) -> bool {
        !self.cancel.is_cancelled() && self.tasks.iter().any(|t| !t.is_finished())
    }
}

pub(crate) struct Inner<T: Entity> {
    client: RemoteStoreClient,
    timing: SyncTiming,
    replica: Replica<T>,
    notifier: Notifier<T>,
    last_event: Mutex<Instant>,
    listening: Mutex<Option<Listening>>,
}

impl<T: Entity> Drop for Inner<T> {
    fn drop(&mut self) {
        if let Some(listening) = self.listening.get_mut().take() {
            listening.cancel.cancel();
        }
    }
}

pub struct EntitySynchronizer<T: Entity> {
    inner: Arc<Inner<T>>,
}

impl<T: Entity> Clone for EntitySynchronizer<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Entity> std::fmt::Debug for EntitySynchronizer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntitySynchronizer")
            .field("collection", &T::COLLECTION)
            .field("entries", &self.inner.replica.len())
            .field("listening", &self.is_listening())
            .finish()
    }
}

impl<T: Entity> EntitySynchronizer<T> {
    /// Create a synchronizer with an empty replica
    pub fn new(client: RemoteStoreClient, timing: SyncTiming) -> Self {
        Self {
            inner: Arc::new(Inner {
                client,
                timing,
                replica: Replica::new(),
                notifier: Notifier::new(),
                last_event: Mutex::new(Instant::now()),
                listening: Mutex::new(None),
            }),
        }
    }

    pub(crate) fn downgrade(&self) -> Weak<Inner<T>> {
        Arc::downgrade(&self.inner)
    }

    pub(crate) fn upgrade(inner: &Weak<Inner<T>>) -> Option<Self> {
        inner.upgrade().map(|inner| Self { inner })
    }

    pub fn collection(&self) -> &'static str {
        T::COLLECTION
    }

    pub fn timing(&self) -> SyncTiming {
        self.inner.timing
    }

    pub fn len(&self) -> usize {
        self.inner.replica.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.replica.is_empty()
    }

    /// Current replica content without any fetch
    pub fn cached(&self) -> Vec<T> {
        self.inner.replica.snapshot()
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// All records; an empty replica is populated by one full fetch first
    pub async fn get_all(&self) -> Result<Vec<T>> {
        if !self.inner.replica.is_empty() {
            return Ok(self.inner.replica.snapshot());
        }
        self.populate().await?;
        Ok(self.inner.replica.snapshot())
    }

    /// Same contract as [`EntitySynchronizer::get_all`]; used to prime consumers
    pub async fn get_snapshot(&self) -> Result<Vec<T>> {
        self.get_all().await
    }

    /// A record from the replica, or fetched from the store when absent.
    /// Fetched records are not written into the replica.
    ///
    /// Nested records may be named `owner/key`; a bare id matches the first
    /// record with that id in key order.
    pub async fn get_by_id(&self, id: &str) -> Result<Option<T>> {
        if id.is_empty() {
            return Ok(None);
        }
        if let Some(found) = self.inner.replica.get(id) {
            return Ok(Some(found));
        }
        if let Some(found) = self.inner.replica.find(|e| e.id().as_deref() == Some(id)) {
            return Ok(Some(found));
        }

        match T::KEY_SPACE {
            KeySpace::Flat => {
                let body = self.inner.client.get(T::COLLECTION, &[id]).await?;
                if body.is_null() {
                    return Ok(None);
                }
                merge::decode::<T>(id, &body).map(Some)
            }
            KeySpace::Nested => {
                let body = self.inner.client.get(T::COLLECTION, &[]).await?;
                let mut report = MergeReport::default();
                let found = merge::decode_collection::<T>(&body, &mut report)
                    .unwrap_or_default()
                    .into_iter()
                    .find(|(key, entity)| key == id || entity.id().as_deref() == Some(id))
                    .map(|(_, entity)| entity);
                Ok(found)
            }
        }
    }

    async fn populate(&self) -> Result<MergeReport> {
        let body = self.inner.client.get(T::COLLECTION, &[]).await?;
        let report = merge::replace_root(&self.inner.replica, &body);
        info!(
            collection = T::COLLECTION,
            entries = self.inner.replica.len(),
            skipped = report.skipped,
            "snapshot fetched"
        );
        Ok(report)
    }

    // ------------------------------------------------------------------
    // Writes (write-through only; the replica follows via the stream)
    // ------------------------------------------------------------------

    fn record_path(entity: &T) -> Result<Vec<String>> {
        let id = entity.id().ok_or_else(|| ReplicaError::MissingId {
            collection: T::COLLECTION.to_string(),
        })?;
        match T::KEY_SPACE {
            KeySpace::Flat => Ok(vec![id]),
            KeySpace::Nested => {
                let owner = entity.owner().ok_or_else(|| ReplicaError::MissingOwner {
                    collection: T::COLLECTION.to_string(),
                    id: id.clone(),
                })?;
                Ok(vec![owner, id])
            }
        }
    }

    async fn put_record(&self, entity: &T) -> Result<()> {
        let path = Self::record_path(entity)?;
        let segments: Vec<&str> = path.iter().map(String::as_str).collect();
        self.inner
            .client
            .put(T::COLLECTION, &segments, entity)
            .await
    }

    /// Write a new record, assigning an id when it has none
    pub async fn create(&self, mut entity: T) -> Result<T> {
        if entity.id().is_none() {
            entity.set_id_if_missing(&T::generate_id());
        }
        self.put_record(&entity).await?;
        debug!(collection = T::COLLECTION, id = ?entity.id(), "record created");
        Ok(entity)
    }

    /// Overwrite a record. A nested record without an owner takes the owner
    /// of the stored record with the same id.
    pub async fn update(&self, mut entity: T) -> Result<()> {
        let id = entity.id().ok_or_else(|| ReplicaError::MissingId {
            collection: T::COLLECTION.to_string(),
        })?;

        if T::KEY_SPACE == KeySpace::Nested && entity.owner().is_none() {
            let owner = self
                .get_by_id(&id)
                .await?
                .and_then(|existing| existing.owner())
                .ok_or_else(|| ReplicaError::MissingOwner {
                    collection: T::COLLECTION.to_string(),
                    id: id.clone(),
                })?;
            entity.set_owner(&owner);
        }

        self.put_record(&entity).await
    }

    pub async fn delete(&self, entity: &T) -> Result<()> {
        let path = Self::record_path(entity)?;
        let segments: Vec<&str> = path.iter().map(String::as_str).collect();
        self.inner.client.delete(T::COLLECTION, &segments).await
    }

    /// Delete by id; `false` when no such record exists
    pub async fn delete_by_id(&self, id: &str) -> Result<bool> {
        match self.get_by_id(id).await? {
            Some(found) => {
                self.delete(&found).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    // ------------------------------------------------------------------
    // Change events
    // ------------------------------------------------------------------

    pub fn subscribe(&self) -> Subscription<T> {
        self.inner.notifier.subscribe()
    }

    /// Time since the last applied event (or fallback fetch)
    pub fn last_event_age(&self) -> Duration {
        self.inner.last_event.lock().elapsed()
    }

    fn mark_event(&self) {
        *self.inner.last_event.lock() = Instant::now();
    }

    /// Apply one change event and raise exactly one notification for it.
    /// Keep-alives only refresh the staleness timer.
    pub fn apply_event(&self, event: ChangeEvent) -> MergeReport {
        self.mark_event();

        let report = match event.kind {
            EventKind::KeepAlive | EventKind::Cancel | EventKind::AuthRevoked => {
                return MergeReport::default();
            }
            EventKind::Patch => merge::apply_patch(&self.inner.replica, &event.scope, &event.payload),
            EventKind::Put | EventKind::Other(_) => {
                merge::apply_put(&self.inner.replica, &event.scope, &event.payload)
            }
        };

        if report.skipped > 0 {
            debug!(
                collection = T::COLLECTION,
                scope = %event.scope,
                skipped = report.skipped,
                "event applied with skipped records"
            );
        }

        self.inner
            .notifier
            .publish(self.inner.replica.snapshot(), UpdateSource::Stream);
        report
    }

    /// Re-fetch the whole collection, replace the replica and notify as if
    /// the change had been pushed
    pub async fn resync(&self) -> Result<MergeReport> {
        let body: Value = self.inner.client.get(T::COLLECTION, &[]).await?;
        let report = merge::replace_root(&self.inner.replica, &body);
        self.mark_event();

        info!(
            collection = T::COLLECTION,
            entries = self.inner.replica.len(),
            "fallback snapshot applied"
        );
        self.inner
            .notifier
            .publish(self.inner.replica.snapshot(), UpdateSource::Fallback);
        Ok(report)
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    pub fn is_listening(&self) -> bool {
        self.inner
            .listening
            .lock()
            .as_ref()
            .is_some_and(Listening::is_running)
    }

    /// Start the stream loop and the watchdog. Returns `false` when already
    /// listening. Both tasks stop when `parent` or [`Self::stop_listening`]
    /// cancels them.
    pub fn start_listening(&self, parent: &CancelSignal) -> bool {
        let mut listening = self.inner.listening.lock();
        if listening.as_ref().is_some_and(Listening::is_running) {
            return false;
        }

        let cancel = parent.child();
        self.mark_event();

        let listener = StreamListener::new(
            self.inner.client.clone(),
            T::COLLECTION,
            self.inner.timing.reconnect_delay,
        )
        .with_idle_timeout(self.inner.timing.stream_idle_timeout);
        let weak = self.downgrade();
        let stream_cancel = cancel.clone();
        let stream_task = tokio::spawn(async move {
            listener
                .start(&stream_cancel, move |event| {
                    if let Some(sync) = EntitySynchronizer::upgrade(&weak) {
                        sync.apply_event(event);
                    }
                })
                .await;
        });

        let watchdog_task = tokio::spawn(watchdog::run(
            self.downgrade(),
            cancel.clone(),
            self.inner.timing,
        ));

        *listening = Some(Listening {
            cancel,
            tasks: vec![stream_task, watchdog_task],
        });
        info!(collection = T::COLLECTION, "listening started");
        true
    }

    /// Cancel both background tasks; safe to call repeatedly
    pub fn stop_listening(&self) {
        if let Some(listening) = self.inner.listening.lock().take() {
            listening.cancel.cancel();
            info!(collection = T::COLLECTION, "listening stopped");
        } else {
            debug!(collection = T::COLLECTION, "stop requested but not listening");
        }
    }
}
