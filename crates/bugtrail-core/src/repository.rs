//! Record repository trait.
//!
//! Defines the CRUD surface the UI layer uses to manage sessions and issues.

use crate::error::Result;
use crate::session::{BrowserInfo, Issue, Session, SessionMeta, SessionPatch};
use crate::settings::Settings;
use async_trait::async_trait;

/// An abstract repository for sessions and their issues.
///
/// Implementations own the eviction policy (oldest session, oldest issue) and
/// keep the session listing free of issue bodies.
#[async_trait]
pub trait RecordRepository: Send + Sync {
    /// Evicts as needed, then creates a session and makes it the active one.
    async fn create_session(&self, url: &str, browser_info: BrowserInfo) -> Result<Session>;

    /// Lists sessions in the lightweight form, oldest first.
    async fn get_sessions(&self) -> Result<Vec<SessionMeta>>;

    /// Finds a session and hydrates its issues.
    ///
    /// - `Ok(Some(Session))`: Session found
    /// - `Ok(None)`: Session not found
    async fn get_session_by_id(&self, session_id: &str) -> Result<Option<Session>>;

    /// Returns the active session, hydrated.
    async fn get_current_session(&self) -> Result<Option<Session>>;

    /// Makes an existing session the active one.
    async fn set_current_session(&self, session_id: &str) -> Result<()>;

    /// Upserts the session into the listing and persists every issue individually.
    async fn save_session(&self, session: &Session) -> Result<()>;

    /// Applies a metadata patch (name, description, creator).
    async fn update_session(&self, session_id: &str, patch: SessionPatch) -> Result<SessionMeta>;

    /// Copies a session's metadata under a fresh id and start time, without issues.
    async fn clone_session(&self, session_id: &str) -> Result<Session>;

    /// Deletes a session and every issue keyed under it.
    async fn delete_session(&self, session_id: &str) -> Result<()>;

    /// Returns a session's issues ordered by timestamp.
    async fn get_issues(&self, session_id: &str) -> Result<Vec<Issue>>;

    async fn get_issue(&self, session_id: &str, issue_id: &str) -> Result<Option<Issue>>;

    /// Adds an issue, evicting the oldest one when the session is at its cap.
    ///
    /// Returns the issue as stored (its screenshot may have been recompressed
    /// or dropped).
    async fn add_issue(&self, session_id: &str, issue: Issue) -> Result<Issue>;

    async fn update_issue(&self, session_id: &str, issue: Issue) -> Result<Issue>;

    async fn delete_issue(&self, session_id: &str, issue_id: &str) -> Result<()>;

    /// Deletes several issues, returning how many existed and were removed.
    async fn delete_multiple_issues(&self, session_id: &str, issue_ids: &[String])
    -> Result<usize>;

    /// Runs session eviction, returning how many sessions were removed.
    async fn cleanup_storage(&self) -> Result<usize>;

    async fn get_settings(&self) -> Result<Settings>;

    async fn save_settings(&self, settings: &Settings) -> Result<()>;

    /// Removes every session, issue and the active-session pointer.
    async fn clear_all(&self) -> Result<()>;
}
