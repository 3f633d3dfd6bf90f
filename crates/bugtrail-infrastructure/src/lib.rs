//! Infrastructure layer for Bugtrail.
//!
//! Concrete storage (tiered store and its backends), payload compression,
//! quota estimation, remote stores, configuration and logging.

pub mod compressor;
pub mod config;
pub mod logging;
pub mod paths;
pub mod quota;
pub mod remote;
pub mod storage;

pub use compressor::{CompressError, CompressedImage, PayloadCompressor};
pub use config::{EngineConfig, RemoteConfig, SchedulerConfig, StorageConfig};
pub use logging::init_logging;
pub use paths::BugtrailPaths;
pub use quota::QuotaGuard;
pub use remote::{HttpRemoteStore, InMemoryRemoteStore};
pub use storage::{StorageTier, StoreOptions, TierSet, TieredStore};
