//! `RecordRepository` over the tiered store.
//!
//! Layout in the durable-local tier:
//!
//! - `bugtrail_sessions`: `Vec<SessionMeta>` ordered by `start_time`, never
//!   holding issue bodies, only `issue_count`
//! - `bugtrail_current_session`: `SessionMeta` copy of the active session
//! - `bugtrail_issue:<session>:<issue>`: one `Issue` per key, both ids
//!   base64url-encoded
//! - `bugtrail_settings`: user `Settings`
//!
//! Lock order is always session lock, then listing lock.

use super::keys::{self, CURRENT_SESSION_KEY, SESSIONS_KEY, SETTINGS_KEY};
use super::locks::KeyedLocks;
use async_trait::async_trait;
use bugtrail_core::session::{BrowserInfo, Issue, Session, SessionMeta, SessionPatch};
use bugtrail_core::storage::StorageCleanup;
use bugtrail_core::sync::{SnapshotSource, SyncJob, SyncQueue};
use bugtrail_core::{BugtrailError, EngineEvent, EventBus, RecordRepository, Result, Settings};
use bugtrail_infrastructure::compressor::{CompressedImage, PayloadCompressor};
use bugtrail_infrastructure::storage::{StorageTier, StoreOptions, TieredStore};
use std::sync::{Arc, OnceLock};
use uuid::Uuid;

const LISTING_LOCK: &str = SESSIONS_KEY;

fn options() -> StoreOptions {
    StoreOptions::tier(StorageTier::DurableLocal)
}

/// Removes the oldest sessions (by `start_time`) until at most `keep` remain.
fn drain_oldest(listing: &mut Vec<SessionMeta>, keep: usize) -> Vec<SessionMeta> {
    if listing.len() <= keep {
        return Vec::new();
    }
    listing.sort_by_key(|meta| meta.start_time);
    let excess = listing.len() - keep;
    listing.drain(..excess).collect()
}

/// Session and issue storage with eviction and capacity fallbacks.
pub struct StoreRecordRepository {
    store: Arc<TieredStore>,
    events: EventBus,
    compressor: PayloadCompressor,
    locks: KeyedLocks,
    sync_queue: OnceLock<Arc<dyn SyncQueue>>,
}

impl StoreRecordRepository {
    pub fn new(store: Arc<TieredStore>, events: EventBus) -> Self {
        Self {
            store,
            events,
            compressor: PayloadCompressor::new(),
            locks: KeyedLocks::new(),
            sync_queue: OnceLock::new(),
        }
    }

    /// Connects the sync queue. Returns `false` if one was already attached.
    pub fn attach_sync(&self, queue: Arc<dyn SyncQueue>) -> bool {
        self.sync_queue.set(queue).is_ok()
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    fn enqueue(&self, settings: &Settings, job: SyncJob) {
        if !settings.sync_enabled {
            return;
        }
        if let Some(queue) = self.sync_queue.get()
            && queue.is_online()
        {
            tracing::debug!("[Records] Enqueue sync job: {}", job.label());
            queue.enqueue(job);
        }
    }

    fn fail_storage<T>(&self, message: String, error: BugtrailError) -> Result<T> {
        tracing::error!("[Records] {}: {}", message, error);
        self.events.emit(EngineEvent::StorageError { message });
        Err(error)
    }

    // ------------------------------------------------------------------
    // Listing and pointer
    // ------------------------------------------------------------------

    async fn load_listing(&self) -> Result<Vec<SessionMeta>> {
        let mut listing: Vec<SessionMeta> = self
            .store
            .get(SESSIONS_KEY, options())
            .await?
            .unwrap_or_default();
        listing.sort_by_key(|meta| meta.start_time);
        Ok(listing)
    }

    async fn find_meta(&self, session_id: &str) -> Result<SessionMeta> {
        self.load_listing()
            .await?
            .into_iter()
            .find(|meta| meta.id == session_id)
            .ok_or_else(|| BugtrailError::not_found("session", session_id))
    }

    /// Writes the listing; the caller holds the listing lock.
    ///
    /// On a capacity error, evicts down to the session cap and retries once.
    async fn commit_listing(&self, listing: &mut Vec<SessionMeta>, settings: &Settings) -> Result<()> {
        let error = match self.store.set(SESSIONS_KEY, &*listing, options()).await {
            Ok(()) => return Ok(()),
            Err(e) if e.is_capacity_exceeded() => e,
            Err(e) => return Err(e),
        };

        tracing::warn!("[Records] Session listing write hit capacity, running eviction");
        let removed = drain_oldest(listing, settings.max_sessions_count);
        if removed.is_empty() {
            return self.fail_storage("Failed to save session list".to_string(), error);
        }
        match self.store.set(SESSIONS_KEY, &*listing, options()).await {
            Ok(()) => self.finish_eviction(listing, &removed, settings).await,
            Err(e) => self.fail_storage("Failed to save session list".to_string(), e),
        }
    }

    async fn load_pointer(&self) -> Result<Option<SessionMeta>> {
        self.store.get(CURRENT_SESSION_KEY, options()).await
    }

    async fn store_pointer(&self, meta: Option<&SessionMeta>) -> Result<()> {
        match meta {
            Some(meta) => self.store.set(CURRENT_SESSION_KEY, meta, options()).await,
            None => self.store.remove(CURRENT_SESSION_KEY, options()).await,
        }
    }

    /// Writes the pointer; the caller must not hold the listing lock.
    ///
    /// On a capacity error, runs eviction and retries once.
    async fn commit_pointer(&self, meta: Option<&SessionMeta>, settings: &Settings) -> Result<()> {
        match self.store_pointer(meta).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_capacity_exceeded() => {
                tracing::warn!("[Records] Current session write hit capacity, running eviction");
                self.cleanup_sessions(settings).await?;
                match self.store_pointer(meta).await {
                    Ok(()) => Ok(()),
                    Err(e) => self.fail_storage("Failed to set current session".to_string(), e),
                }
            }
            Err(e) => Err(e),
        }
    }

    async fn refresh_pointer_if_current(&self, meta: &SessionMeta, settings: &Settings) -> Result<()> {
        match self.load_pointer().await? {
            Some(current) if current.id == meta.id => self.commit_pointer(Some(meta), settings).await,
            _ => Ok(()),
        }
    }

    // ------------------------------------------------------------------
    // Eviction
    // ------------------------------------------------------------------

    /// Deletes evicted sessions' issues, repoints the active session if it
    /// was evicted, and reports the cleanup. `listing` is what remains.
    async fn finish_eviction(
        &self,
        listing: &[SessionMeta],
        removed: &[SessionMeta],
        settings: &Settings,
    ) -> Result<()> {
        for meta in removed {
            self.remove_issue_keys(&meta.id).await?;
            self.locks.forget(&meta.id);
        }

        if let Some(current) = self.load_pointer().await?
            && removed.iter().any(|meta| meta.id == current.id)
        {
            self.store_pointer(listing.first()).await?;
        }

        tracing::warn!(
            "[Records] Evicted {} session(s): {:?}",
            removed.len(),
            removed.iter().map(|m| m.id.as_str()).collect::<Vec<_>>()
        );
        self.events.emit(EngineEvent::StorageCleanup {
            count: removed.len(),
        });
        for meta in removed {
            self.enqueue(
                settings,
                SyncJob::DeleteSession {
                    session_id: meta.id.clone(),
                },
            );
        }
        Ok(())
    }

    /// Enforces the session cap; a no-op when within it.
    async fn cleanup_sessions(&self, settings: &Settings) -> Result<usize> {
        let _listing_guard = self.locks.lock(LISTING_LOCK).await;
        let mut listing = self.load_listing().await?;
        let removed = drain_oldest(&mut listing, settings.max_sessions_count);
        if removed.is_empty() {
            return Ok(0);
        }
        self.store.set(SESSIONS_KEY, &listing, options()).await?;
        self.finish_eviction(&listing, &removed, settings).await?;
        Ok(removed.len())
    }

    // ------------------------------------------------------------------
    // Issues
    // ------------------------------------------------------------------

    async fn issue_keys(&self, session_id: &str) -> Result<Vec<String>> {
        let prefix = keys::issue_prefix(session_id);
        Ok(self
            .store
            .keys(options())
            .await?
            .into_iter()
            .filter(|key| key.starts_with(&prefix))
            .collect())
    }

    async fn remove_issue_keys(&self, session_id: &str) -> Result<usize> {
        let keys = self.issue_keys(session_id).await?;
        for key in &keys {
            self.store.remove(key, options()).await?;
        }
        Ok(keys.len())
    }

    async fn load_issues(&self, session_id: &str) -> Result<Vec<Issue>> {
        let mut issues = Vec::new();
        for key in self.issue_keys(session_id).await? {
            if let Some(issue) = self.store.get::<Issue>(&key, options()).await? {
                issues.push(issue);
            }
        }
        issues.sort_by_key(|issue| issue.timestamp);
        Ok(issues)
    }

    async fn hydrate(&self, mut meta: SessionMeta) -> Result<Session> {
        let issues = self.load_issues(&meta.id).await?;
        meta.issue_count = issues.len();
        Ok(Session { meta, issues })
    }

    /// Recompresses an inline screenshot off the async executor.
    async fn compress_screenshot(&self, issue: &Issue) -> Option<CompressedImage> {
        if !issue.has_inline_screenshot() {
            return None;
        }
        let screenshot = issue.screenshot.clone()?;
        let compressor = self.compressor;
        match tokio::task::spawn_blocking(move || compressor.compress(&screenshot)).await {
            Ok(Ok(compressed)) => Some(compressed),
            Ok(Err(e)) => {
                tracing::warn!("[Records] Screenshot of issue {} not compressible: {}", issue.id, e);
                None
            }
            Err(e) => {
                tracing::warn!("[Records] Screenshot compression task failed: {}", e);
                None
            }
        }
    }

    /// Replaces the screenshot with its compressed form when that is smaller.
    async fn shrink_screenshot(&self, issue: &mut Issue) -> bool {
        let Some(compressed) = self.compress_screenshot(issue).await else {
            return false;
        };
        if compressed.compressed_len >= compressed.original_len {
            return false;
        }
        tracing::info!(
            "[Records] Compressed screenshot of issue {}: {} -> {} bytes",
            issue.id,
            compressed.original_len,
            compressed.compressed_len
        );
        issue.screenshot = Some(compressed.data_url);
        true
    }

    /// `Ok(None)` on success, `Ok(Some(err))` on a capacity error.
    async fn try_write_issue(&self, key: &str, issue: &Issue) -> Result<Option<BugtrailError>> {
        match self.store.set(key, issue, options()).await {
            Ok(()) => Ok(None),
            Err(e) if e.is_capacity_exceeded() => Ok(Some(e)),
            Err(e) => Err(e),
        }
    }

    /// Writes one issue, falling back through eviction, recompression and
    /// dropping the screenshot. Returns the issue as stored.
    async fn save_issue_individually(
        &self,
        session_id: &str,
        mut issue: Issue,
        settings: &Settings,
    ) -> Result<Issue> {
        let key = keys::issue_key(session_id, &issue.id);
        let Some(error) = self.try_write_issue(&key, &issue).await? else {
            return Ok(issue);
        };

        tracing::warn!(
            "[Records] Issue {} hit capacity ({}), running eviction",
            issue.id,
            error
        );
        self.cleanup_sessions(settings).await?;
        let Some(mut last_error) = self.try_write_issue(&key, &issue).await? else {
            return Ok(issue);
        };

        if self.shrink_screenshot(&mut issue).await {
            match self.try_write_issue(&key, &issue).await? {
                None => return Ok(issue),
                Some(e) => last_error = e,
            }
        }

        if issue.screenshot.take().is_some() {
            tracing::warn!("[Records] Dropping screenshot of issue {} to fit storage", issue.id);
            match self.try_write_issue(&key, &issue).await? {
                None => return Ok(issue),
                Some(e) => last_error = e,
            }
        }

        self.fail_storage(
            format!("Failed to save issue {}: storage is full", issue.id),
            last_error,
        )
    }

    /// Recomputes `issue_count`, bumps `last_updated`, and refreshes the
    /// active-session pointer when it points at this session.
    async fn refresh_session_meta(&self, session_id: &str, settings: &Settings) -> Result<SessionMeta> {
        let count = self.issue_keys(session_id).await?.len();
        let meta = {
            let _listing_guard = self.locks.lock(LISTING_LOCK).await;
            let mut listing = self.load_listing().await?;
            let Some(meta) = listing.iter_mut().find(|meta| meta.id == session_id) else {
                return Err(BugtrailError::not_found("session", session_id));
            };
            meta.issue_count = count;
            meta.touch();
            let meta = meta.clone();
            self.commit_listing(&mut listing, settings).await?;
            meta
        };
        self.refresh_pointer_if_current(&meta, settings).await?;
        Ok(meta)
    }

    /// Puts issue keys back the way they were before a failed bulk write.
    async fn restore_issues(&self, written: Vec<(String, Option<Issue>)>) {
        for (key, previous) in written.into_iter().rev() {
            let restored = match &previous {
                Some(issue) => self.store.set(&key, issue, options()).await,
                None => self.store.remove(&key, options()).await,
            };
            if let Err(e) = restored {
                tracing::warn!("[Records] Could not restore {}: {}", key, e);
            }
        }
    }

    async fn ensure_session(&self, session_id: &str) -> Result<()> {
        self.find_meta(session_id).await.map(|_| ())
    }

    async fn delete_issues_locked(
        &self,
        session_id: &str,
        issue_ids: &[String],
        settings: &Settings,
    ) -> Result<usize> {
        self.ensure_session(session_id).await?;
        let mut deleted = Vec::new();
        for issue_id in issue_ids {
            let key = keys::issue_key(session_id, issue_id);
            if self.store.get::<Issue>(&key, options()).await?.is_some() {
                self.store.remove(&key, options()).await?;
                deleted.push(issue_id.clone());
            }
        }
        let meta = self.refresh_session_meta(session_id, settings).await?;
        for issue_id in &deleted {
            self.enqueue(
                settings,
                SyncJob::DeleteIssue {
                    session_id: session_id.to_string(),
                    issue_id: issue_id.clone(),
                },
            );
        }
        if !deleted.is_empty() {
            self.enqueue(settings, SyncJob::SessionMeta(meta));
        }
        Ok(deleted.len())
    }
}

#[async_trait]
impl RecordRepository for StoreRecordRepository {
    async fn create_session(&self, url: &str, browser_info: BrowserInfo) -> Result<Session> {
        let settings = self.get_settings().await?;
        let meta = SessionMeta::new(Uuid::new_v4().to_string(), url, browser_info);

        {
            let _listing_guard = self.locks.lock(LISTING_LOCK).await;
            let mut listing = self.load_listing().await?;
            // Leave room for the session being created
            let removed = drain_oldest(
                &mut listing,
                settings.max_sessions_count.saturating_sub(1),
            );
            listing.push(meta.clone());
            self.commit_listing(&mut listing, &settings).await?;
            if !removed.is_empty() {
                self.finish_eviction(&listing, &removed, &settings).await?;
            }
        }

        self.commit_pointer(Some(&meta), &settings).await?;
        tracing::info!("[Records] Created session {} for {}", meta.id, meta.url);
        self.enqueue(&settings, SyncJob::SessionMeta(meta.clone()));
        Ok(Session::new(meta))
    }

    async fn get_sessions(&self) -> Result<Vec<SessionMeta>> {
        self.load_listing().await
    }

    async fn get_session_by_id(&self, session_id: &str) -> Result<Option<Session>> {
        let meta = self
            .load_listing()
            .await?
            .into_iter()
            .find(|meta| meta.id == session_id);
        match meta {
            Some(meta) => Ok(Some(self.hydrate(meta).await?)),
            None => Ok(None),
        }
    }

    async fn get_current_session(&self) -> Result<Option<Session>> {
        let Some(pointer) = self.load_pointer().await? else {
            return Ok(None);
        };
        match self.get_session_by_id(&pointer.id).await? {
            Some(session) => Ok(Some(session)),
            None => {
                tracing::warn!(
                    "[Records] Current session {} is not in the listing, clearing pointer",
                    pointer.id
                );
                self.store_pointer(None).await?;
                Ok(None)
            }
        }
    }

    async fn set_current_session(&self, session_id: &str) -> Result<()> {
        let settings = self.get_settings().await?;
        let meta = self.find_meta(session_id).await?;
        self.commit_pointer(Some(&meta), &settings).await?;
        tracing::debug!("[Records] Current session set to {}", session_id);
        Ok(())
    }

    async fn save_session(&self, session: &Session) -> Result<()> {
        let settings = self.get_settings().await?;
        let session_id = session.id().to_string();
        let _session_guard = self.locks.lock(&session_id).await;

        let mut written = Vec::with_capacity(session.issues.len());
        let saved: Result<(SessionMeta, Vec<Issue>)> = async {
            let mut stored_issues = Vec::with_capacity(session.issues.len());
            for issue in &session.issues {
                let key = keys::issue_key(&session_id, &issue.id);
                let previous: Option<Issue> = self.store.get(&key, options()).await?;
                let stored = self
                    .save_issue_individually(&session_id, issue.clone(), &settings)
                    .await?;
                written.push((key, previous));
                stored_issues.push(stored);
            }

            let mut meta = session.meta.clone();
            meta.issue_count = stored_issues.len();
            meta.touch();
            let _listing_guard = self.locks.lock(LISTING_LOCK).await;
            let mut listing = self.load_listing().await?;
            match listing.iter_mut().find(|m| m.id == session_id) {
                Some(existing) => *existing = meta.clone(),
                None => {
                    listing.push(meta.clone());
                    listing.sort_by_key(|m| m.start_time);
                }
            }
            self.commit_listing(&mut listing, &settings).await?;
            Ok((meta, stored_issues))
        }
        .await;

        let (meta, mut stored_issues) = match saved {
            Ok(saved) => saved,
            Err(e) => {
                self.restore_issues(written).await;
                return Err(e);
            }
        };

        // Drop issues no longer part of the session
        let wanted: Vec<String> = session
            .issues
            .iter()
            .map(|issue| keys::issue_key(&session_id, &issue.id))
            .collect();
        for key in self.issue_keys(&session_id).await? {
            if !wanted.contains(&key) {
                self.store.remove(&key, options()).await?;
            }
        }
        self.refresh_pointer_if_current(&meta, &settings).await?;

        stored_issues.sort_by_key(|issue| issue.timestamp);
        tracing::debug!(
            "[Records] Saved session {} with {} issue(s)",
            session_id,
            stored_issues.len()
        );
        self.enqueue(
            &settings,
            SyncJob::Session(Session {
                meta,
                issues: stored_issues,
            }),
        );
        Ok(())
    }

    async fn update_session(&self, session_id: &str, patch: SessionPatch) -> Result<SessionMeta> {
        let result: Result<(SessionMeta, Settings)> = async {
            let settings = self.get_settings().await?;
            let _session_guard = self.locks.lock(session_id).await;
            let meta = {
                let _listing_guard = self.locks.lock(LISTING_LOCK).await;
                let mut listing = self.load_listing().await?;
                let meta = listing
                    .iter_mut()
                    .find(|meta| meta.id == session_id)
                    .ok_or_else(|| BugtrailError::not_found("session", session_id))?;
                patch.apply(meta);
                meta.touch();
                let meta = meta.clone();
                self.commit_listing(&mut listing, &settings).await?;
                meta
            };
            self.refresh_pointer_if_current(&meta, &settings).await?;
            Ok((meta, settings))
        }
        .await;

        match result {
            Ok((meta, settings)) => {
                self.events.emit(EngineEvent::SessionUpdateSuccess {
                    session_id: session_id.to_string(),
                });
                self.enqueue(&settings, SyncJob::SessionMeta(meta.clone()));
                Ok(meta)
            }
            Err(e) => {
                tracing::error!("[Records] Failed to update session {}: {}", session_id, e);
                self.events.emit(EngineEvent::SessionUpdateError {
                    message: e.to_string(),
                });
                Err(e)
            }
        }
    }

    async fn clone_session(&self, session_id: &str) -> Result<Session> {
        let settings = self.get_settings().await?;
        let meta = {
            let _listing_guard = self.locks.lock(LISTING_LOCK).await;
            let mut listing = self.load_listing().await?;
            let source = listing
                .iter()
                .find(|meta| meta.id == session_id)
                .cloned()
                .ok_or_else(|| BugtrailError::not_found("session", session_id))?;

            let mut meta = SessionMeta::new(
                Uuid::new_v4().to_string(),
                source.url.clone(),
                source.browser_info.clone(),
            );
            meta.name = source.name;
            meta.description = source.description;
            meta.created_by = source.created_by;

            let removed = drain_oldest(
                &mut listing,
                settings.max_sessions_count.saturating_sub(1),
            );
            listing.push(meta.clone());
            self.commit_listing(&mut listing, &settings).await?;
            if !removed.is_empty() {
                self.finish_eviction(&listing, &removed, &settings).await?;
            }
            meta
        };

        tracing::info!("[Records] Cloned session {} into {}", session_id, meta.id);
        self.enqueue(&settings, SyncJob::SessionMeta(meta.clone()));
        Ok(Session::new(meta))
    }

    async fn delete_session(&self, session_id: &str) -> Result<()> {
        let settings = self.get_settings().await?;
        {
            let _session_guard = self.locks.lock(session_id).await;
            let _listing_guard = self.locks.lock(LISTING_LOCK).await;
            let mut listing = self.load_listing().await?;
            let Some(index) = listing.iter().position(|meta| meta.id == session_id) else {
                return Err(BugtrailError::not_found("session", session_id));
            };
            listing.remove(index);
            self.commit_listing(&mut listing, &settings).await?;
            let removed_issues = self.remove_issue_keys(session_id).await?;

            if let Some(current) = self.load_pointer().await?
                && current.id == session_id
            {
                // Next-oldest remaining session becomes active
                self.store_pointer(listing.first()).await?;
            }
            tracing::info!(
                "[Records] Deleted session {} ({} issue(s))",
                session_id,
                removed_issues
            );
        }
        self.locks.forget(session_id);
        self.enqueue(
            &settings,
            SyncJob::DeleteSession {
                session_id: session_id.to_string(),
            },
        );
        Ok(())
    }

    async fn get_issues(&self, session_id: &str) -> Result<Vec<Issue>> {
        self.ensure_session(session_id).await?;
        self.load_issues(session_id).await
    }

    async fn get_issue(&self, session_id: &str, issue_id: &str) -> Result<Option<Issue>> {
        self.store
            .get(&keys::issue_key(session_id, issue_id), options())
            .await
    }

    async fn add_issue(&self, session_id: &str, issue: Issue) -> Result<Issue> {
        let settings = self.get_settings().await?;
        let _session_guard = self.locks.lock(session_id).await;
        self.ensure_session(session_id).await?;

        let key = keys::issue_key(session_id, &issue.id);
        if self.store.get::<Issue>(&key, options()).await?.is_some() {
            return Err(BugtrailError::conflict("issue", issue.id));
        }

        // Oldest issues that make room for one more; removed only once the
        // new issue is stored
        let mut existing = self.load_issues(session_id).await?;
        let excess = (existing.len() + 1).saturating_sub(settings.max_issues_per_session);
        let evicted: Vec<Issue> = existing.drain(..excess).collect();

        let mut issue = issue;
        self.shrink_screenshot(&mut issue).await;
        let stored = self
            .save_issue_individually(session_id, issue, &settings)
            .await?;

        for oldest in &evicted {
            self.store
                .remove(&keys::issue_key(session_id, &oldest.id), options())
                .await?;
            tracing::warn!(
                "[Records] Session {} reached {} issues, evicted oldest issue {}",
                session_id,
                settings.max_issues_per_session,
                oldest.id
            );
            self.events.emit(EngineEvent::IssueLimitReached {
                session_id: session_id.to_string(),
                evicted_issue_id: oldest.id.clone(),
            });
        }

        let meta = match self.refresh_session_meta(session_id, &settings).await {
            Ok(meta) => meta,
            Err(e) if e.is_not_found() => {
                // Evicted while the issue was being written
                self.store.remove(&key, options()).await?;
                return Err(e);
            }
            Err(e) => return Err(e),
        };

        for oldest in evicted {
            self.enqueue(
                &settings,
                SyncJob::DeleteIssue {
                    session_id: session_id.to_string(),
                    issue_id: oldest.id,
                },
            );
        }
        self.enqueue(
            &settings,
            SyncJob::Issue {
                session_id: session_id.to_string(),
                issue: stored.clone(),
            },
        );
        self.enqueue(&settings, SyncJob::SessionMeta(meta));
        Ok(stored)
    }

    async fn update_issue(&self, session_id: &str, issue: Issue) -> Result<Issue> {
        let settings = self.get_settings().await?;
        let _session_guard = self.locks.lock(session_id).await;
        self.ensure_session(session_id).await?;

        let key = keys::issue_key(session_id, &issue.id);
        if self.store.get::<Issue>(&key, options()).await?.is_none() {
            return Err(BugtrailError::not_found("issue", issue.id));
        }

        let stored = self
            .save_issue_individually(session_id, issue, &settings)
            .await?;
        let meta = self.refresh_session_meta(session_id, &settings).await?;

        self.enqueue(
            &settings,
            SyncJob::Issue {
                session_id: session_id.to_string(),
                issue: stored.clone(),
            },
        );
        self.enqueue(&settings, SyncJob::SessionMeta(meta));
        Ok(stored)
    }

    async fn delete_issue(&self, session_id: &str, issue_id: &str) -> Result<()> {
        let settings = self.get_settings().await?;
        let _session_guard = self.locks.lock(session_id).await;
        let deleted = self
            .delete_issues_locked(session_id, &[issue_id.to_string()], &settings)
            .await?;
        if deleted == 0 {
            return Err(BugtrailError::not_found("issue", issue_id));
        }
        Ok(())
    }

    async fn delete_multiple_issues(&self, session_id: &str, issue_ids: &[String]) -> Result<usize> {
        let result: Result<usize> = async {
            let settings = self.get_settings().await?;
            let _session_guard = self.locks.lock(session_id).await;
            self.delete_issues_locked(session_id, issue_ids, &settings)
                .await
        }
        .await;

        match result {
            Ok(count) => {
                tracing::info!("[Records] Deleted {} issue(s) from {}", count, session_id);
                self.events.emit(EngineEvent::BulkDeleteSuccess { count });
                Ok(count)
            }
            Err(e) => {
                tracing::error!("[Records] Bulk delete in {} failed: {}", session_id, e);
                self.events.emit(EngineEvent::BulkDeleteError {
                    message: e.to_string(),
                });
                Err(e)
            }
        }
    }

    async fn cleanup_storage(&self) -> Result<usize> {
        let settings = self.get_settings().await?;
        self.cleanup_sessions(&settings).await
    }

    async fn get_settings(&self) -> Result<Settings> {
        let settings: Option<Settings> = self.store.get(SETTINGS_KEY, options()).await?;
        Ok(settings.unwrap_or_default().normalized())
    }

    async fn save_settings(&self, settings: &Settings) -> Result<()> {
        let settings = settings.clone().normalized();
        self.store.set(SETTINGS_KEY, &settings, options()).await?;
        tracing::info!("[Records] Settings saved");
        Ok(())
    }

    async fn clear_all(&self) -> Result<()> {
        let _listing_guard = self.locks.lock(LISTING_LOCK).await;
        let prefix = format!("{}:", keys::ISSUE_PREFIX);
        let mut removed = 0;
        for key in self.store.keys(options()).await? {
            if key.starts_with(&prefix) {
                self.store.remove(&key, options()).await?;
                removed += 1;
            }
        }
        self.store.remove(SESSIONS_KEY, options()).await?;
        self.store_pointer(None).await?;
        tracing::info!("[Records] Cleared all sessions ({} issue(s) removed)", removed);
        Ok(())
    }
}

#[async_trait]
impl StorageCleanup for StoreRecordRepository {
    async fn cleanup_storage(&self) -> Result<usize> {
        RecordRepository::cleanup_storage(self).await
    }
}

#[async_trait]
impl SnapshotSource for StoreRecordRepository {
    async fn load_snapshot(&self) -> Result<Vec<Session>> {
        let mut sessions = Vec::new();
        for meta in self.load_listing().await? {
            sessions.push(self.hydrate(meta).await?);
        }
        Ok(sessions)
    }
}
