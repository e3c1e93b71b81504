pub mod api;
pub mod hub;

use std::net::SocketAddr;

use anyhow::Result;

pub use hub::{HubMessage, PushHub};

pub async fn start(addr: SocketAddr, hub: PushHub) -> Result<()> {
    api::serve(addr, hub).await
}
