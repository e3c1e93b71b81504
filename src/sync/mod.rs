pub mod cancel;
pub mod merge;
pub mod notify;
pub mod synchronizer;
mod watchdog;

pub use cancel::CancelSignal;
pub use merge::MergeReport;
pub use notify::{RealtimeUpdated, Subscription, UpdateSource};
pub use synchronizer::{EntitySynchronizer, SyncTiming};

// Entity synchronization: a replica per collection kept current by the event
// stream, with a staleness watchdog that falls back to full re-fetches and a
// broadcast channel that tells subscribers whenever the replica was touched.
