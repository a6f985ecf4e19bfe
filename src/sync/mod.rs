//! Background sync: connectivity tracking and draining the outbox.

mod connectivity;
mod engine;
mod status;

pub use connectivity::{ConnectivityMonitor, ConnectivityState};
pub use engine::{SyncEngine, SyncOutcome, SyncReport};
pub use status::{SyncStatus, SyncTracker};
