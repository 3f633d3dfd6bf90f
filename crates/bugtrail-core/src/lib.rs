//! Domain layer of the Bugtrail storage and sync engine.
//!
//! Holds the record models, the shared error type, the event vocabulary and
//! the traits at the seams between the store, the repository and the sync
//! engine.

pub mod error;
pub mod event;
pub mod host;
pub mod repository;
pub mod session;
pub mod settings;
pub mod storage;
pub mod sync;
pub mod task;

pub use error::{BugtrailError, Result};
pub use event::{EngineEvent, EventBus, WarningSeverity};
pub use host::HostSignal;
pub use repository::RecordRepository;
pub use settings::Settings;
