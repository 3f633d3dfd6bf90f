//! Sync module.
//!
//! - `engine`: `SyncEngine`, per-entity remote writes under the status tracker
//! - `worker`: `SyncWorker`, the queue between the repository and the engine

mod engine;
mod worker;

pub use engine::SyncEngine;
pub use worker::SyncWorker;
