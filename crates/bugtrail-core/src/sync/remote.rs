//! Remote durable store abstraction.
//!
//! The remote side is a document store (one document per session with a
//! subordinate `issues` collection) plus a blob store for screenshots.

use crate::error::Result;
use async_trait::async_trait;
use serde_json::Value;

/// Remote document + blob store used by the sync engine.
///
/// All document writes use merge semantics: fields in the new value overlay
/// the existing document, absent fields are kept. There is no conflict
/// detection; the last writer wins.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Merges `fields` (a JSON object) into the document at `path`, creating it if needed.
    async fn merge_document(&self, path: &str, fields: Value) -> Result<()>;

    /// Reads a document, `Ok(None)` if it does not exist.
    async fn get_document(&self, path: &str) -> Result<Option<Value>>;

    /// Deletes a document. Deleting a missing document succeeds.
    async fn delete_document(&self, path: &str) -> Result<()>;

    /// Lists the document ids directly under a collection path.
    async fn list_collection(&self, path: &str) -> Result<Vec<String>>;

    /// Atomically adds `delta` to a numeric field of a document.
    async fn increment_field(&self, path: &str, field: &str, delta: i64) -> Result<()>;

    /// Uploads a blob and returns the URL it can be fetched from.
    async fn upload_blob(&self, path: &str, bytes: Vec<u8>, content_type: &str) -> Result<String>;

    /// Deletes a blob. Deleting a missing blob succeeds.
    async fn delete_blob(&self, path: &str) -> Result<()>;
}

/// Remote layout helpers.
pub mod layout {
    pub const SESSIONS_COLLECTION: &str = "sessions";
    pub const ISSUES_COLLECTION: &str = "issues";

    pub fn session_doc(session_id: &str) -> String {
        format!("{}/{}", SESSIONS_COLLECTION, session_id)
    }

    pub fn issues_collection(session_id: &str) -> String {
        format!("{}/{}", session_doc(session_id), ISSUES_COLLECTION)
    }

    pub fn issue_doc(session_id: &str, issue_id: &str) -> String {
        format!("{}/{}", issues_collection(session_id), issue_id)
    }

    /// Screenshots are addressed by `sessionId/issueId`.
    pub fn screenshot_blob(session_id: &str, issue_id: &str) -> String {
        format!("{}/{}", session_id, issue_id)
    }
}

#[cfg(test)]
mod tests {
    use super::layout;

    #[test]
    fn test_layout_paths() {
        assert_eq!(layout::session_doc("s1"), "sessions/s1");
        assert_eq!(layout::issues_collection("s1"), "sessions/s1/issues");
        assert_eq!(layout::issue_doc("s1", "i1"), "sessions/s1/issues/i1");
        assert_eq!(layout::screenshot_blob("s1", "i1"), "s1/i1");
    }
}
