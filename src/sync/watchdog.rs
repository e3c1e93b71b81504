//! Staleness watchdog.
//!
//! Every `watchdog_interval` it checks how long the stream has been silent.
//! Past `staleness_threshold` it re-fetches the whole collection. A failed
//! re-fetch leaves the timer alone so the next tick tries again.

use std::sync::Weak;

use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::cancel::CancelSignal;
use super::synchronizer::{EntitySynchronizer, Inner, SyncTiming};
use crate::entity::Entity;

pub(crate) async fn run<T: Entity>(inner: Weak<Inner<T>>, cancel: CancelSignal, timing: SyncTiming) {
    let mut ticker = interval(timing.watchdog_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // the first tick completes immediately
    ticker.tick().await;

    debug!(
        collection = T::COLLECTION,
        interval = ?timing.watchdog_interval,
        threshold = ?timing.staleness_threshold,
        "watchdog started"
    );

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let Some(sync) = EntitySynchronizer::upgrade(&inner) else {
            break;
        };

        let silence = sync.last_event_age();
        if silence <= timing.staleness_threshold {
            continue;
        }

        info!(
            collection = T::COLLECTION,
            silent_for = ?silence,
            "no stream events, fetching snapshot"
        );
        tokio::select! {
            _ = cancel.cancelled() => break,
            result = sync.resync() => {
                if let Err(e) = result {
                    warn!(collection = T::COLLECTION, error = %e, "fallback fetch failed, retrying next tick");
                }
            }
        }
    }

    debug!(collection = T::COLLECTION, "watchdog stopped");
}
