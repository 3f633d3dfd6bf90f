//! Record repository module.
//!
//! - `keys`: durable-local key layout
//! - `locks`: per-key async mutexes serializing read-modify-write sequences
//! - `repository`: `StoreRecordRepository`, the `RecordRepository` over the tiered store

pub mod keys;
pub mod locks;
mod repository;

pub use locks::KeyedLocks;
pub use repository::StoreRecordRepository;
