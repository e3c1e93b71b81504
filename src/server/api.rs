use std::net::SocketAddr;

use anyhow::{Context, Result};
use axum::{
    Json, Router,
    extract::{Path, State},
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
};
use colored::*;
use futures::{SinkExt, StreamExt};
use serde_json::json;
use tokio::sync::broadcast::error::RecvError;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use super::hub::{HubMessage, PushHub};

#[derive(Clone)]
pub struct AppState {
    pub hub: PushHub,
}

pub fn router(hub: PushHub) -> Router {
    Router::new()
        .route("/", get(|| async { "Replica Push Hub" }))
        .route("/health", get(|| async { Json("OK") }))
        .route("/channels", get(list_channels))
        .route("/channels/{channel}", get(last_payload))
        .route("/hubs/{channel}", get(ws_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(AppState { hub })
}

pub async fn serve(addr: SocketAddr, hub: PushHub) -> Result<()> {
    let app = router(hub);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    println!(
        "{} Push hub running at {}",
        "✓".green(),
        format!("http://{}", addr).bright_blue()
    );
    info!(%addr, "push hub listening");

    axum::serve(listener, app).await?;
    Ok(())
}

async fn list_channels(State(state): State<AppState>) -> impl IntoResponse {
    let channels: Vec<_> = state
        .hub
        .channels()
        .into_iter()
        .map(|name| {
            let clients = state.hub.client_count(&name);
            json!({ "channel": name, "clients": clients })
        })
        .collect();
    Json(channels)
}

async fn last_payload(
    State(state): State<AppState>,
    Path(channel): Path<String>,
) -> Result<Json<HubMessage>, StatusCode> {
    state
        .hub
        .last(&channel)
        .map(|message| Json((*message).clone()))
        .ok_or(StatusCode::NOT_FOUND)
}

async fn ws_handler(
    State(state): State<AppState>,
    Path(channel): Path<String>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_ws(state, channel, socket))
}

async fn send_message(
    sender: &mut futures::stream::SplitSink<WebSocket, Message>,
    message: &HubMessage,
) -> bool {
    match serde_json::to_string(message) {
        Ok(text) => sender.send(Message::Text(text.into())).await.is_ok(),
        Err(e) => {
            warn!(channel = %message.channel, error = %e, "failed to encode hub message");
            true
        }
    }
}

async fn handle_ws(state: AppState, channel: String, socket: WebSocket) {
    let (mut sender, mut receiver) = socket.split();
    let (last, mut rx) = state.hub.subscribe(&channel);
    debug!(channel = %channel, "hub client connected");

    // Forward hub messages, starting with the current snapshot
    let send_channel = channel.clone();
    let mut send_task = tokio::spawn(async move {
        if let Some(last) = last {
            if !send_message(&mut sender, &last).await {
                return;
            }
        }
        loop {
            match rx.recv().await {
                Ok(message) => {
                    if !send_message(&mut sender, &message).await {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    debug!(channel = %send_channel, skipped, "hub client lagged");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    // Clients only listen; reading drains pings and notices the close
    let mut recv_task = tokio::spawn(async move {
        while let Some(msg) = receiver.next().await {
            match msg {
                Ok(Message::Close(_)) | Err(_) => break,
                Ok(_) => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }
    debug!(channel = %channel, "hub client disconnected");
}
