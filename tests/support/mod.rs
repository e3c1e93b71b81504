//! In-process mock of the remote document store: a JSON tree served over
//! REST plus per-collection event streams.
#![allow(dead_code)]

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::{Body, Bytes},
    extract::{Path, Query, State},
    http::{header, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::any,
    Json, Router,
};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::{json, Map, Value};
use tokio::sync::mpsc;

use dx_replica::{RemoteStoreClient, StoreConfig, SyncTiming};

#[derive(Default)]
struct MockState {
    tree: Mutex<Value>,
    streams: Mutex<Vec<(String, mpsc::UnboundedSender<String>)>>,
    gets: DashMap<String, usize>,
    stream_connects: AtomicUsize,
    fail_gets: AtomicBool,
    echo_writes: AtomicBool,
    token: Mutex<Option<String>>,
}

pub struct MockStore {
    pub base_url: String,
    state: Arc<MockState>,
    server: tokio::task::JoinHandle<()>,
}

impl Drop for MockStore {
    fn drop(&mut self) {
        self.server.abort();
    }
}

impl MockStore {
    pub async fn start(initial: Value) -> Self {
        let state = Arc::new(MockState::default());
        *state.tree.lock() = initial;
        state.echo_writes.store(true, Ordering::SeqCst);

        let app = Router::new()
            .route("/{*path}", any(handle))
            .with_state(state.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Self {
            base_url: format!("http://{addr}"),
            state,
            server,
        }
    }

    pub fn config(&self) -> StoreConfig {
        StoreConfig::new(self.base_url.clone())
    }

    pub fn client(&self) -> RemoteStoreClient {
        RemoteStoreClient::new(self.config()).unwrap()
    }

    /// Reject requests whose `auth` parameter differs from `token`
    pub fn require_token(&self, token: &str) {
        *self.state.token.lock() = Some(token.to_string());
    }

    /// Answer collection reads with 500
    pub fn fail_gets(&self, fail: bool) {
        self.state.fail_gets.store(fail, Ordering::SeqCst);
    }

    /// Whether REST writes are echoed to open streams
    pub fn echo_writes(&self, echo: bool) {
        self.state.echo_writes.store(echo, Ordering::SeqCst);
    }

    /// Number of plain (non-stream) GETs of `path`, e.g. "food" or "food/1"
    pub fn gets(&self, path: &str) -> usize {
        self.state.gets.get(path).map_or(0, |n| *n)
    }

    pub fn stream_connects(&self) -> usize {
        self.state.stream_connects.load(Ordering::SeqCst)
    }

    pub fn value_at(&self, path: &str) -> Value {
        get_at(&self.state.tree.lock(), &segments(path)).clone()
    }

    /// Change the tree without telling any stream
    pub fn set_silently(&self, path: &str, value: Value) {
        set_at(&mut self.state.tree.lock(), &segments(path), value);
    }

    /// Send a raw block to every open stream of `collection`
    pub fn send_raw(&self, collection: &str, block: &str) {
        let streams = self.state.streams.lock();
        for (name, tx) in streams.iter() {
            if name == collection {
                let _ = tx.send(block.to_string());
            }
        }
    }

    /// Send an enveloped event to every open stream of `collection`
    pub fn send_event(&self, collection: &str, kind: &str, path: &str, data: Value) {
        self.send_raw(collection, &block(kind, path, &data));
    }

    pub fn send_keep_alive(&self, collection: &str) {
        self.send_raw(collection, "event: keep-alive\ndata: null\n\n");
    }

    /// Close every open stream
    pub fn close_streams(&self) {
        self.state.streams.lock().clear();
    }

    pub async fn wait_for_streams(&self, count: usize) {
        for _ in 0..200 {
            if self.stream_connects() >= count {
                // let the initial block reach the client
                tokio::time::sleep(Duration::from_millis(50)).await;
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("stream was not opened {count} time(s)");
    }
}

/// Short timings so watchdog and reconnect behavior fit in a test
pub fn fast_timing() -> SyncTiming {
    SyncTiming {
        reconnect_delay: Duration::from_millis(100),
        watchdog_interval: Duration::from_millis(50),
        staleness_threshold: Duration::from_millis(300),
        stream_idle_timeout: Duration::from_secs(5),
    }
}

/// Poll `check` until it holds or two seconds pass
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}

fn block(kind: &str, path: &str, data: &Value) -> String {
    format!("event: {kind}\ndata: {}\n\n", json!({ "path": path, "data": data }))
}

fn segments(path: &str) -> Vec<String> {
    path.split('/')
        .filter(|s| !s.is_empty())
        .map(|s| s.strip_suffix(".json").unwrap_or(s).to_string())
        .collect()
}

static NULL: Value = Value::Null;

fn get_at<'a>(tree: &'a Value, path: &[String]) -> &'a Value {
    let mut node = tree;
    for segment in path {
        node = match node.get(segment) {
            Some(child) => child,
            None => return &NULL,
        };
    }
    node
}

fn set_at(tree: &mut Value, path: &[String], value: Value) {
    let Some((last, parents)) = path.split_last() else {
        *tree = value;
        return;
    };
    let mut node = tree;
    for segment in parents {
        if !node.is_object() {
            *node = Value::Object(Map::new());
        }
        node = node
            .as_object_mut()
            .unwrap()
            .entry(segment.clone())
            .or_insert(Value::Null);
    }
    if !node.is_object() {
        *node = Value::Object(Map::new());
    }
    let map = node.as_object_mut().unwrap();
    if value.is_null() {
        map.remove(last);
    } else {
        map.insert(last.clone(), value);
    }
}

async fn handle(
    State(state): State<Arc<MockState>>,
    method: Method,
    Path(path): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    body: Bytes,
) -> Response {
    if let Some(token) = state.token.lock().clone() {
        if query.get("auth") != Some(&token) {
            return (StatusCode::UNAUTHORIZED, Json(json!({"error": "Permission denied"})))
                .into_response();
        }
    }

    let path = segments(&path);
    let Some(collection) = path.first().cloned() else {
        return StatusCode::BAD_REQUEST.into_response();
    };

    let streaming = query.get("stream").map(String::as_str) == Some("true");
    if method == Method::GET && streaming {
        return open_stream(&state, collection);
    }

    if method == Method::GET {
        *state.gets.entry(path.join("/")).or_insert(0) += 1;
        if state.fail_gets.load(Ordering::SeqCst) {
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
        let value = get_at(&state.tree.lock(), &path).clone();
        return Json(value).into_response();
    }

    if method == Method::PUT {
        let value: Value = match serde_json::from_slice(&body) {
            Ok(value) => value,
            Err(_) => return StatusCode::BAD_REQUEST.into_response(),
        };
        set_at(&mut state.tree.lock(), &path, value.clone());
        echo(&state, &collection, &path[1..], value.clone());
        return Json(value).into_response();
    }

    if method == Method::DELETE {
        set_at(&mut state.tree.lock(), &path, Value::Null);
        echo(&state, &collection, &path[1..], Value::Null);
        return Json(Value::Null).into_response();
    }

    StatusCode::METHOD_NOT_ALLOWED.into_response()
}

fn echo(state: &MockState, collection: &str, rest: &[String], data: Value) {
    if !state.echo_writes.load(Ordering::SeqCst) {
        return;
    }
    let text = block("put", &format!("/{}", rest.join("/")), &data);
    for (name, tx) in state.streams.lock().iter() {
        if name == collection {
            let _ = tx.send(text.clone());
        }
    }
}

fn open_stream(state: &MockState, collection: String) -> Response {
    let (tx, rx) = mpsc::unbounded_channel::<String>();

    let current = get_at(&state.tree.lock(), &[collection.clone()]).clone();
    let _ = tx.send(block("put", "/", &current));
    state.streams.lock().push((collection, tx));
    state.stream_connects.fetch_add(1, Ordering::SeqCst);

    let stream = futures::stream::unfold(rx, |mut rx| async move {
        rx.recv()
            .await
            .map(|text| (Ok::<_, Infallible>(Bytes::from(text)), rx))
    });

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .body(Body::from_stream(stream))
        .unwrap()
}
