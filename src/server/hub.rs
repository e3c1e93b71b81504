//! WebSocket push hub.
//!
//! One `broadcast` sender per channel. The last payload of every channel is
//! kept so that a client connecting late starts from the current snapshot.

use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::debug;

use crate::bridge::PushTransport;

const CHANNEL_CAPACITY: usize = 128;

/// Message sent to hub clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HubMessage {
    pub channel: String,
    pub data: Value,
}

struct ChannelState {
    tx: broadcast::Sender<Arc<HubMessage>>,
    last: Option<Arc<HubMessage>>,
}

impl ChannelState {
    fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx, last: None }
    }
}

#[derive(Clone, Default)]
pub struct PushHub {
    channels: Arc<DashMap<String, ChannelState>>,
}

impl PushHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to `channel`; returns the last payload (if any) together
    /// with the receiver for everything after it
    pub fn subscribe(
        &self,
        channel: &str,
    ) -> (Option<Arc<HubMessage>>, broadcast::Receiver<Arc<HubMessage>>) {
        let state = self
            .channels
            .entry(channel.to_string())
            .or_insert_with(ChannelState::new);
        (state.last.clone(), state.tx.subscribe())
    }

    pub fn last(&self, channel: &str) -> Option<Arc<HubMessage>> {
        self.channels.get(channel).and_then(|state| state.last.clone())
    }

    pub fn channels(&self) -> Vec<String> {
        let mut names: Vec<String> = self.channels.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn client_count(&self, channel: &str) -> usize {
        self.channels
            .get(channel)
            .map_or(0, |state| state.tx.receiver_count())
    }
}

impl PushTransport for PushHub {
    fn publish(&self, channel: &str, payload: &Value) -> anyhow::Result<()> {
        let message = Arc::new(HubMessage {
            channel: channel.to_string(),
            data: payload.clone(),
        });

        let mut state = self
            .channels
            .entry(channel.to_string())
            .or_insert_with(ChannelState::new);
        state.last = Some(message.clone());
        // no connected clients is not an error
        let reached = state.tx.send(message).unwrap_or(0);
        debug!(channel, clients = reached, "hub message published");
        Ok(())
    }
}
