//! Session domain module.
//!
//! - `model`: session listing record (`SessionMeta`), hydrated `Session`, `SessionPatch`
//! - `issue`: `Issue` and its captured diagnostics, plus the `DataUrl` helper

mod issue;
mod model;

pub use issue::{ConsoleError, DataUrl, Issue, IssueSeverity, NetworkError};
pub use model::{BrowserInfo, Session, SessionMeta, SessionPatch};
