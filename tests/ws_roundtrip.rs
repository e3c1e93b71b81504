mod support;

use std::time::Duration;

use futures::StreamExt;
use serde_json::json;
use tokio_tungstenite::tungstenite::Message;

use dx_replica::models::Food;
use dx_replica::server::{api, HubMessage, PushHub};
use dx_replica::{CancelSignal, ChangeBroadcastBridge, EntitySynchronizer, PushTransport, SyncTiming};
use support::MockStore;

async fn start_hub(hub: PushHub) -> (String, tokio::task::JoinHandle<()>) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = tokio::spawn(async move {
        let _ = axum::serve(listener, api::router(hub)).await;
    });
    (addr.to_string(), server)
}

async fn next_message<S>(read: &mut S) -> HubMessage
where
    S: futures::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    let deadline = Duration::from_secs(3);
    loop {
        let msg = tokio::time::timeout(deadline, read.next())
            .await
            .expect("no hub message in time")
            .expect("socket closed")
            .expect("socket error");
        if let Message::Text(text) = msg {
            return serde_json::from_str(text.as_str()).unwrap();
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn hub_delivers_last_and_new_payloads() {
    let hub = PushHub::new();
    hub.publish("FoodsUpdated", &json!([{"id": 1}])).unwrap();
    let (addr, server) = start_hub(hub.clone()).await;

    let (ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/hubs/FoodsUpdated"))
        .await
        .expect("ws connect");
    let (_write, mut read) = ws.split();

    let first = next_message(&mut read).await;
    assert_eq!(first.channel, "FoodsUpdated");
    assert_eq!(first.data, json!([{"id": 1}]));

    hub.publish("UsersUpdated", &json!([])).unwrap();
    hub.publish("FoodsUpdated", &json!([{"id": 1}, {"id": 2}])).unwrap();
    let second = next_message(&mut read).await;
    assert_eq!(second.data, json!([{"id": 1}, {"id": 2}]));

    server.abort();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn channel_endpoint_serves_last_payload() {
    let hub = PushHub::new();
    hub.publish("BookingsUpdated", &json!([{"id": 5}])).unwrap();
    let (addr, server) = start_hub(hub).await;

    let health = reqwest::get(format!("http://{addr}/health")).await.unwrap();
    assert!(health.status().is_success());

    let last: HubMessage = reqwest::get(format!("http://{addr}/channels/BookingsUpdated"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(last.data, json!([{"id": 5}]));

    let missing = reqwest::get(format!("http://{addr}/channels/Nothing")).await.unwrap();
    assert_eq!(missing.status().as_u16(), 404);

    server.abort();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn store_change_reaches_websocket_clients() {
    let store = MockStore::start(json!({"food": {"1": {"name": "pho"}}})).await;
    let hub = PushHub::new();
    let (addr, server) = start_hub(hub.clone()).await;

    let foods = EntitySynchronizer::<Food>::new(store.client(), SyncTiming::default());
    let _bridge = ChangeBroadcastBridge::start(foods.clone(), std::sync::Arc::new(hub), "FoodsUpdated").await;
    let root = CancelSignal::new();
    foods.start_listening(&root);
    store.wait_for_streams(1).await;

    let (ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/hubs/FoodsUpdated"))
        .await
        .expect("ws connect");
    let (_write, mut read) = ws.split();

    let primed = next_message(&mut read).await;
    assert_eq!(primed.data.as_array().unwrap().len(), 1);

    foods
        .create(Food {
            id: 2,
            name: "bun".into(),
            ..Default::default()
        })
        .await
        .unwrap();

    let pushed = next_message(&mut read).await;
    let names: Vec<&str> = pushed
        .data
        .as_array()
        .unwrap()
        .iter()
        .map(|f| f["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["pho", "bun"]);

    root.cancel();
    server.abort();
}
