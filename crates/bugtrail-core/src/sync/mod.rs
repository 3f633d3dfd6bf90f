//! Sync domain module.
//!
//! - `status`: `SyncStatus` state machine and the observable `SyncStatusTracker`
//! - `remote`: `RemoteStore` trait and remote layout helpers
//! - `job`: `SyncJob` work items, `SyncQueue` and `SnapshotSource` seams

mod job;
pub mod remote;
mod status;

pub use job::{SnapshotSource, SyncJob, SyncQueue};
pub use remote::{RemoteStore, layout};
pub use status::{SyncState, SyncStatus, SyncStatusTracker};
