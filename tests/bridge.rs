mod support;

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::{json, Value};

use dx_replica::models::Feedback;
use dx_replica::{ChangeBroadcastBridge, ChangeEvent, EntitySynchronizer, PushTransport, SyncTiming};
use support::{eventually, MockStore};

#[derive(Default)]
struct RecordingTransport {
    pushes: Mutex<Vec<(String, Value)>>,
    fail: bool,
}

impl RecordingTransport {
    fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    fn count(&self) -> usize {
        self.pushes.lock().len()
    }

    fn ids(&self, index: usize) -> Vec<String> {
        let pushes = self.pushes.lock();
        pushes[index]
            .1
            .as_array()
            .unwrap()
            .iter()
            .map(|item| item["id"].as_str().unwrap().to_string())
            .collect()
    }
}

impl PushTransport for RecordingTransport {
    fn publish(&self, channel: &str, payload: &Value) -> anyhow::Result<()> {
        self.pushes.lock().push((channel.to_string(), payload.clone()));
        if self.fail {
            anyhow::bail!("transport down");
        }
        Ok(())
    }
}

async fn feedback_sync(store: &MockStore) -> EntitySynchronizer<Feedback> {
    EntitySynchronizer::new(store.client(), SyncTiming::default())
}

#[tokio::test(flavor = "multi_thread")]
async fn pushes_only_membership_changes() {
    let store = MockStore::start(json!({"feedback": {"A": {"comment": "good"}, "B": {"comment": "ok"}}})).await;
    let sync = feedback_sync(&store).await;
    let transport = Arc::new(RecordingTransport::default());

    let bridge = ChangeBroadcastBridge::start(sync.clone(), transport.clone(), "FeedbacksUpdated").await;
    assert_eq!(transport.count(), 1);
    assert_eq!(transport.pushes.lock()[0].0, "FeedbacksUpdated");
    assert_eq!(transport.ids(0), vec!["A", "B"]);

    // same members, edited field: suppressed
    sync.apply_event(ChangeEvent::put("/A", json!({"comment": "great"})));
    // B removed: pushed
    sync.apply_event(ChangeEvent::put("/B", Value::Null));

    assert!(eventually(|| transport.count() == 2).await);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(transport.count(), 2);
    assert_eq!(transport.ids(1), vec!["A"]);

    bridge.stop();
    tokio::time::sleep(Duration::from_millis(50)).await;
    sync.apply_event(ChangeEvent::put("/C", json!({"comment": "new"})));
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(transport.count(), 2);
    assert!(!bridge.is_running());
}

#[tokio::test(flavor = "multi_thread")]
async fn transport_errors_do_not_stop_the_bridge() {
    let store = MockStore::start(json!({"feedback": {}})).await;
    let sync = feedback_sync(&store).await;
    let transport = Arc::new(RecordingTransport::failing());

    let bridge = ChangeBroadcastBridge::start(sync.clone(), transport.clone(), "FeedbacksUpdated").await;
    assert_eq!(transport.count(), 1);

    sync.apply_event(ChangeEvent::put("/f1", json!({"comment": "a"})));
    sync.apply_event(ChangeEvent::put("/f2", json!({"comment": "b"})));
    assert!(eventually(|| transport.count() == 3).await);
    assert!(bridge.is_running());
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_initial_snapshot_is_logged_not_raised() {
    let store = MockStore::start(json!({"feedback": {"A": {}}})).await;
    store.fail_gets(true);
    let sync = feedback_sync(&store).await;
    let transport = Arc::new(RecordingTransport::default());

    let bridge = ChangeBroadcastBridge::start(sync.clone(), transport.clone(), "FeedbacksUpdated").await;
    assert_eq!(transport.count(), 0);

    sync.apply_event(ChangeEvent::put("/", json!({"A": {}})));
    assert!(eventually(|| transport.count() == 1).await);
    assert_eq!(transport.ids(0), vec!["A"]);
    drop(bridge);
}

#[tokio::test(flavor = "multi_thread")]
async fn dropping_the_bridge_unsubscribes() {
    let store = MockStore::start(json!({"feedback": {"A": {}}})).await;
    let sync = feedback_sync(&store).await;
    let transport = Arc::new(RecordingTransport::default());

    let bridge = ChangeBroadcastBridge::start(sync.clone(), transport.clone(), "FeedbacksUpdated").await;
    drop(bridge);
    tokio::time::sleep(Duration::from_millis(50)).await;

    sync.apply_event(ChangeEvent::put("/B", json!({})));
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(transport.count(), 1);
}
