//! Request/response access to the remote document store.

pub mod client;

pub use client::RemoteStoreClient;
