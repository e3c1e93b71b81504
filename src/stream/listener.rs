/// Event stream listener
///
/// Holds one long-lived streaming GET against a collection, decodes blocks
/// into [`ChangeEvent`]s and hands them to a callback in arrival order.
/// Connection and read failures are logged and followed by a reconnect after
/// a fixed delay; only cancellation ends [`StreamListener::start`]. A
/// connection that stays silent past the idle timeout counts as a read
/// failure. Events sent while disconnected are lost, which the synchronizer's
/// watchdog covers.
use std::time::Duration;

use futures::StreamExt;
use tracing::{debug, error, info, warn};

use super::event::{ChangeEvent, EventKind};
use super::parser::{BlockParser, LineBuffer};
use crate::error::{ReplicaError, Result};
use crate::store::RemoteStoreClient;
use crate::sync::CancelSignal;

/// How one connection ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamEnd {
    Closed,
    AuthRevoked,
}

#[derive(Debug, Clone)]
pub struct StreamListener {
    client: RemoteStoreClient,
    collection: String,
    reconnect_delay: Duration,
    idle_timeout: Duration,
}

/// The store sends a keep-alive every 30s; twice that without any data means
/// the connection is dead
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

impl StreamListener {
    pub fn new(
        client: RemoteStoreClient,
        collection: impl Into<String>,
        reconnect_delay: Duration,
    ) -> Self {
        Self {
            client,
            collection: collection.into(),
            reconnect_delay,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
        }
    }

    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Run until `cancel` fires, calling `on_event` for every decoded event
    pub async fn start<F>(&self, cancel: &CancelSignal, mut on_event: F)
    where
        F: FnMut(ChangeEvent) + Send,
    {
        info!(collection = %self.collection, "stream listener started");

        while !cancel.is_cancelled() {
            let outcome = tokio::select! {
                _ = cancel.cancelled() => break,
                outcome = self.read_stream(&mut on_event) => outcome,
            };

            match outcome {
                Ok(StreamEnd::Closed) => {
                    warn!(collection = %self.collection, "stream ended, reconnecting")
                }
                Ok(StreamEnd::AuthRevoked) => {
                    warn!(collection = %self.collection, "stream credential revoked, reconnecting")
                }
                Err(e) => error!(
                    collection = %self.collection,
                    error = %e,
                    "stream error, reconnecting in {}s",
                    self.reconnect_delay.as_secs_f64()
                ),
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.reconnect_delay) => {}
            }
        }

        info!(collection = %self.collection, "stream listener stopped");
    }

    async fn read_stream<F>(&self, on_event: &mut F) -> Result<StreamEnd>
    where
        F: FnMut(ChangeEvent) + Send,
    {
        let response = self.client.open_stream(&self.collection).await?;
        info!(collection = %self.collection, "stream connected");

        let mut body = response.bytes_stream();
        let mut lines = LineBuffer::new();
        let mut parser = BlockParser::new();

        loop {
            let next = tokio::time::timeout(self.idle_timeout, body.next())
                .await
                .map_err(|_| ReplicaError::StreamIdle {
                    collection: self.collection.clone(),
                    idle: self.idle_timeout,
                })?;
            let Some(chunk) = next else {
                break;
            };
            let chunk = chunk?;
            for line in lines.push(&chunk) {
                let Some(block) = parser.push_line(&line) else {
                    continue;
                };

                let event = ChangeEvent::from_block(block.event.as_deref(), &block.data);
                match event.kind {
                    EventKind::Cancel => {
                        warn!(collection = %self.collection, data = %block.data, "stream cancelled by store");
                    }
                    EventKind::AuthRevoked => return Ok(StreamEnd::AuthRevoked),
                    _ => {
                        debug!(collection = %self.collection, scope = %event.scope, "stream event");
                        on_event(event);
                    }
                }
            }
        }

        Ok(StreamEnd::Closed)
    }
}
