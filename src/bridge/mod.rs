//! Change broadcast bridge.
//!
//! Forwards synchronizer snapshots to a push transport, but only when the set
//! of record ids changed since the last push. Field edits that keep the same
//! membership are not forwarded.

use std::collections::HashSet;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::entity::Entity;
use crate::replica::Replica;
use crate::sync::{CancelSignal, EntitySynchronizer, Subscription};

/// Outbound, fire-and-forget push channel
pub trait PushTransport: Send + Sync {
    fn publish(&self, channel: &str, payload: &Value) -> anyhow::Result<()>;
}

/// Membership change between two snapshots
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IdentityDiff {
    pub added: usize,
    pub removed: usize,
}

impl IdentityDiff {
    pub fn between(previous: &HashSet<String>, next: &HashSet<String>) -> Self {
        Self {
            added: next.difference(previous).count(),
            removed: previous.difference(next).count(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.added == 0 && self.removed == 0
    }
}

/// Ids of `items`, qualified by owner in nested collections; records without
/// an id are not part of the set
pub fn identity_set<T: Entity>(items: &[T]) -> HashSet<String> {
    items
        .iter()
        .filter_map(|item| {
            let id = item.id()?;
            Some(Replica::<T>::record_key(item.owner().as_deref(), &id))
        })
        .collect()
}

fn push<S: Serialize + ?Sized>(transport: &dyn PushTransport, channel: &str, items: &S) {
    let payload = match serde_json::to_value(items) {
        Ok(payload) => payload,
        Err(e) => {
            error!(channel, error = %e, "failed to encode snapshot for push");
            return;
        }
    };
    if let Err(e) = transport.publish(channel, &payload) {
        error!(channel, error = %e, "push to clients failed");
    }
}

pub struct ChangeBroadcastBridge {
    channel: String,
    cancel: CancelSignal,
    task: JoinHandle<()>,
}

impl ChangeBroadcastBridge {
    /// Subscribe to `sync`, push its current snapshot once, then keep pushing
    /// on membership changes until stopped
    pub async fn start<T: Entity>(
        sync: EntitySynchronizer<T>,
        transport: Arc<dyn PushTransport>,
        channel: impl Into<String>,
    ) -> Self {
        let channel = channel.into();
        let subscription = sync.subscribe();

        let mut last_ids = HashSet::new();
        match sync.get_snapshot().await {
            Ok(items) => {
                last_ids = identity_set(&items);
                info!(channel = %channel, count = items.len(), "initial snapshot pushed");
                push(transport.as_ref(), &channel, &items);
            }
            Err(e) => error!(channel = %channel, error = %e, "initial snapshot failed"),
        }

        let cancel = CancelSignal::new();
        let task = tokio::spawn(forward(
            subscription,
            transport,
            channel.clone(),
            last_ids,
            cancel.clone(),
        ));

        Self {
            channel,
            cancel,
            task,
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Drop the subscription; nothing is pushed afterwards
    pub fn stop(&self) {
        self.cancel.cancel();
    }
}

impl Drop for ChangeBroadcastBridge {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn forward<T: Entity>(
    mut subscription: Subscription<T>,
    transport: Arc<dyn PushTransport>,
    channel: String,
    mut last_ids: HashSet<String>,
    cancel: CancelSignal,
) {
    loop {
        let update = tokio::select! {
            _ = cancel.cancelled() => break,
            update = subscription.recv() => match update {
                Some(update) => update,
                None => break,
            },
        };

        let ids = identity_set(&update.items);
        let diff = IdentityDiff::between(&last_ids, &ids);
        if diff.is_empty() {
            debug!(channel = %channel, "membership unchanged, push suppressed");
            continue;
        }

        info!(
            channel = %channel,
            added = diff.added,
            removed = diff.removed,
            count = ids.len(),
            "data changed, pushing snapshot"
        );
        last_ids = ids;
        push(transport.as_ref(), &channel, update.items.as_slice());
    }

    subscription.cancel();
    debug!(channel = %channel, "bridge stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(ids: &[&str]) -> HashSet<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_identity_diff_counts() {
        let diff = IdentityDiff::between(&set(&["A", "B"]), &set(&["A"]));
        assert_eq!(diff, IdentityDiff { added: 0, removed: 1 });

        let diff = IdentityDiff::between(&set(&["A"]), &set(&["B", "C"]));
        assert_eq!(diff, IdentityDiff { added: 2, removed: 1 });

        assert!(IdentityDiff::between(&set(&["A"]), &set(&["A"])).is_empty());
    }

    #[test]
    fn test_identity_set_skips_records_without_id() {
        use crate::models::Feedback;
        let items = vec![
            Feedback {
                id: "f1".into(),
                ..Default::default()
            },
            Feedback::default(),
        ];
        assert_eq!(identity_set(&items), set(&["f1"]));
    }

    #[test]
    fn test_identity_set_qualifies_nested_ids_by_owner() {
        use crate::models::Booking;
        let booking = |owner: &str| Booking {
            id: 1,
            account_id: owner.into(),
            ..Default::default()
        };
        let items = vec![booking("acct1"), booking("acct2")];
        assert_eq!(identity_set(&items), set(&["acct1/1", "acct2/1"]));
    }
}
