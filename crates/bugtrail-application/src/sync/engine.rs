//! Sync engine: mirrors local records to the remote store.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use bugtrail_core::session::{DataUrl, Issue, Session, SessionMeta};
use bugtrail_core::sync::{RemoteStore, SnapshotSource, SyncJob, SyncStatusTracker, layout};
use bugtrail_core::{BugtrailError, Result};
use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, Weak};

const SYNCED_AT: &str = "syncedAt";
const ISSUE_COUNT: &str = "issueCount";

/// Serializes `value` as a JSON object and stamps it with `syncedAt`.
fn stamped<T: Serialize>(value: &T) -> Result<Value> {
    let mut json = serde_json::to_value(value)?;
    if let Value::Object(fields) = &mut json {
        fields.insert(SYNCED_AT.to_string(), Value::from(Utc::now().to_rfc3339()));
    }
    Ok(json)
}

/// Reduces fan-out failures to one error, preferring a connectivity failure.
fn collapse(mut errors: Vec<BugtrailError>) -> Result<()> {
    if let Some(index) = errors.iter().position(BugtrailError::is_network_unavailable) {
        return Err(errors.swap_remove(index));
    }
    match BugtrailError::from_many(errors) {
        Some(error) => Err(error),
        None => Ok(()),
    }
}

/// Pushes sessions and issues to a [`RemoteStore`] and tracks progress.
///
/// Every operation is a no-op while offline. Each one increments the pending
/// counter on start and settles it on completion, so the status only reaches
/// `synced` once all in-flight work has drained.
pub struct SyncEngine {
    remote: Arc<dyn RemoteStore>,
    tracker: Arc<SyncStatusTracker>,
    online: AtomicBool,
    snapshot: OnceLock<Weak<dyn SnapshotSource>>,
}

impl SyncEngine {
    pub fn new(remote: Arc<dyn RemoteStore>, tracker: Arc<SyncStatusTracker>) -> Self {
        Self {
            remote,
            tracker,
            online: AtomicBool::new(true),
            snapshot: OnceLock::new(),
        }
    }

    /// Registers the source read by [`resync_all`](Self::resync_all).
    ///
    /// Held weakly; the repository owns the engine's queue, not the reverse.
    pub fn attach_snapshot(&self, source: &Arc<dyn SnapshotSource>) -> bool {
        self.snapshot.set(Arc::downgrade(source)).is_ok()
    }

    pub fn tracker(&self) -> &Arc<SyncStatusTracker> {
        &self.tracker
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    pub fn set_offline(&self) {
        if self.online.swap(false, Ordering::SeqCst) {
            tracing::info!("[SyncEngine] Host went offline, sync paused");
        }
        self.tracker.set_offline();
    }

    /// Marks the host online. The caller schedules the follow-up resync.
    pub fn set_online(&self) {
        if !self.online.swap(true, Ordering::SeqCst) {
            tracing::info!("[SyncEngine] Host is back online");
        }
        self.tracker.set_online();
    }

    /// Runs `operation` under the pending counter.
    async fn tracked<F>(&self, label: &str, operation: F) -> Result<()>
    where
        F: Future<Output = Result<()>>,
    {
        if !self.is_online() {
            tracing::debug!("[SyncEngine] Offline, skipping {}", label);
            return Ok(());
        }

        self.tracker.begin();
        match operation.await {
            Ok(()) => {
                self.tracker.succeed();
                Ok(())
            }
            Err(e) if e.is_network_unavailable() => {
                tracing::warn!("[SyncEngine] {} abandoned, remote unreachable: {}", label, e);
                self.online.store(false, Ordering::SeqCst);
                self.tracker.abandon_offline();
                Err(e)
            }
            Err(e) => {
                tracing::error!("[SyncEngine] {} failed: {}", label, e);
                self.tracker.fail(e.to_string());
                Err(e)
            }
        }
    }

    /// Writes session metadata only.
    pub async fn sync_session_meta(&self, meta: &SessionMeta) -> Result<()> {
        self.tracked("sync_session_meta", async {
            self.remote
                .merge_document(&layout::session_doc(&meta.id), stamped(meta)?)
                .await
        })
        .await
    }

    /// Writes session metadata, then every issue.
    pub async fn sync_session(&self, session: &Session) -> Result<()> {
        self.tracked("sync_session", async {
            let meta = session.to_meta();
            self.remote
                .merge_document(&layout::session_doc(&meta.id), stamped(&meta)?)
                .await?;

            let mut errors = Vec::new();
            for issue in &session.issues {
                if let Err(e) = self.sync_issue(&meta.id, issue).await {
                    errors.push(e);
                }
            }
            collapse(errors)
        })
        .await
    }

    /// Uploads an inline screenshot as a blob, then writes the issue document
    /// referencing the blob by URL.
    pub async fn sync_issue(&self, session_id: &str, issue: &Issue) -> Result<()> {
        self.tracked("sync_issue", async {
            let mut remote_issue = issue.clone();
            if let Some(url) = self.upload_screenshot(session_id, issue).await? {
                remote_issue.screenshot = Some(url);
            } else if issue.has_inline_screenshot() {
                remote_issue.screenshot = None;
            }
            self.remote
                .merge_document(
                    &layout::issue_doc(session_id, &issue.id),
                    stamped(&remote_issue)?,
                )
                .await
        })
        .await
    }

    /// Returns the blob URL, or `None` when there is nothing to upload or the
    /// inline payload is not valid base64.
    async fn upload_screenshot(&self, session_id: &str, issue: &Issue) -> Result<Option<String>> {
        let Some(data_url) = issue.screenshot.as_deref().and_then(DataUrl::parse) else {
            return Ok(None);
        };
        let bytes = match STANDARD.decode(data_url.base64_payload) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(
                    "[SyncEngine] Screenshot of issue {} is not valid base64, not uploading: {}",
                    issue.id,
                    e
                );
                return Ok(None);
            }
        };
        let url = self
            .remote
            .upload_blob(
                &layout::screenshot_blob(session_id, &issue.id),
                bytes,
                data_url.mime_type,
            )
            .await?;
        tracing::debug!("[SyncEngine] Uploaded screenshot of issue {} to {}", issue.id, url);
        Ok(Some(url))
    }

    /// Removes the session document, its issue documents and their blobs.
    pub async fn delete_session_from_cloud(&self, session_id: &str) -> Result<()> {
        self.tracked("delete_session", async {
            let issue_ids = self
                .remote
                .list_collection(&layout::issues_collection(session_id))
                .await?;
            for issue_id in &issue_ids {
                self.remote
                    .delete_document(&layout::issue_doc(session_id, issue_id))
                    .await?;
                self.remote
                    .delete_blob(&layout::screenshot_blob(session_id, issue_id))
                    .await?;
            }
            self.remote
                .delete_document(&layout::session_doc(session_id))
                .await
        })
        .await
    }

    /// Removes one issue document and its blob and decrements the remote issue count.
    pub async fn delete_issue_from_cloud(&self, session_id: &str, issue_id: &str) -> Result<()> {
        self.tracked("delete_issue", async {
            self.remote
                .delete_document(&layout::issue_doc(session_id, issue_id))
                .await?;
            self.remote
                .delete_blob(&layout::screenshot_blob(session_id, issue_id))
                .await?;
            self.remote
                .increment_field(&layout::session_doc(session_id), ISSUE_COUNT, -1)
                .await
        })
        .await
    }

    /// Mirrors every local session and issue.
    pub async fn resync_all(&self) -> Result<()> {
        let Some(source) = self.snapshot.get().and_then(Weak::upgrade) else {
            tracing::debug!("[SyncEngine] No snapshot source attached, skipping resync");
            return Ok(());
        };

        self.tracked("resync_all", async {
            let sessions = source.load_snapshot().await?;
            tracing::info!("[SyncEngine] Resyncing {} session(s)", sessions.len());
            let mut errors = Vec::new();
            for session in &sessions {
                if let Err(e) = self.sync_session(session).await {
                    errors.push(e);
                }
            }
            collapse(errors)
        })
        .await
    }

    pub async fn handle_job(&self, job: SyncJob) -> Result<()> {
        match job {
            SyncJob::Session(session) => self.sync_session(&session).await,
            SyncJob::SessionMeta(meta) => self.sync_session_meta(&meta).await,
            SyncJob::Issue { session_id, issue } => self.sync_issue(&session_id, &issue).await,
            SyncJob::DeleteSession { session_id } => {
                self.delete_session_from_cloud(&session_id).await
            }
            SyncJob::DeleteIssue {
                session_id,
                issue_id,
            } => self.delete_issue_from_cloud(&session_id, &issue_id).await,
            SyncJob::ResyncAll => self.resync_all().await,
        }
    }
}
