//! # Replica - realtime read cache over a remote document store
//!
//! Keeps an in-memory replica of each collection of a hierarchical JSON store
//! current through its server-sent change stream, falls back to full
//! re-fetches when the stream goes quiet, and forwards membership changes to
//! WebSocket clients.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use dx_replica::{CancelSignal, EntitySynchronizer, RemoteStoreClient, StoreConfig, SyncTiming};
//! use dx_replica::models::Food;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let client = RemoteStoreClient::new(StoreConfig::new("https://demo.firebaseio.com"))?;
//!     let foods = EntitySynchronizer::<Food>::new(client, SyncTiming::default());
//!
//!     let shutdown = CancelSignal::new();
//!     foods.start_listening(&shutdown);
//!
//!     let mut updates = foods.subscribe();
//!     while let Some(update) = updates.recv().await {
//!         println!("{} foods", update.items.len());
//!     }
//!     Ok(())
//! }
//! ```

pub mod bridge;
pub mod config;
pub mod entity;
pub mod error;
pub mod logging;
pub mod models;
pub mod replica;
pub mod server;
pub mod store;
pub mod stream;
pub mod sync;

// Re-export main types for library consumers
pub use bridge::{ChangeBroadcastBridge, IdentityDiff, PushTransport};
pub use config::{ReplicaConfig, StoreConfig};
pub use entity::{Entity, KeySpace};
pub use error::{ErrorCategory, ReplicaError, Result};
pub use server::PushHub;
pub use store::RemoteStoreClient;
pub use stream::{ChangeEvent, EventKind, ScopePath, StreamListener};
pub use sync::{
    CancelSignal, EntitySynchronizer, MergeReport, RealtimeUpdated, Subscription, SyncTiming,
    UpdateSource,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
