//! Application layer for Bugtrail.
//!
//! Implements the record repository over the tiered store, the sync engine
//! and its queue, the background task scheduler, and the [`Engine`] facade
//! that wires them together.

pub mod engine;
pub mod records;
pub mod scheduler;
pub mod sync;

pub use engine::Engine;
pub use records::StoreRecordRepository;
pub use scheduler::{SchedulerError, TaskOutcome, TaskScheduler};
pub use sync::{SyncEngine, SyncWorker};
