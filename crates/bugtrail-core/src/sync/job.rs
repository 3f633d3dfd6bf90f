//! Work items exchanged between the record repository and the sync engine.

use crate::error::Result;
use crate::session::{Issue, Session, SessionMeta};
use async_trait::async_trait;

/// A unit of sync work enqueued by the repository.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncJob {
    /// Session metadata plus a fan-out over every issue
    Session(Session),
    /// Session metadata only (issue count, timestamps)
    SessionMeta(SessionMeta),
    Issue { session_id: String, issue: Issue },
    DeleteSession { session_id: String },
    DeleteIssue { session_id: String, issue_id: String },
    /// Mirror the whole local state
    ResyncAll,
}

impl SyncJob {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Session(_) => "session",
            Self::SessionMeta(_) => "session_meta",
            Self::Issue { .. } => "issue",
            Self::DeleteSession { .. } => "delete_session",
            Self::DeleteIssue { .. } => "delete_issue",
            Self::ResyncAll => "resync_all",
        }
    }
}

/// Fire-and-forget sink for sync work.
pub trait SyncQueue: Send + Sync {
    fn enqueue(&self, job: SyncJob);

    /// Whether the host is currently online; offline work is not enqueued.
    fn is_online(&self) -> bool;
}

/// Source of the full local state used for resynchronization.
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    /// Returns every session, hydrated with its issues.
    async fn load_snapshot(&self) -> Result<Vec<Session>>;
}
