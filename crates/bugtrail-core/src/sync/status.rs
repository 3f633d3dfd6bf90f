//! Sync status state machine and its observable tracker.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

/// Process-wide sync status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    /// Nothing has happened since start-up
    #[default]
    Idle,
    Syncing,
    Offline,
    Error,
    Synced,
}

/// Snapshot of the tracker state delivered to observers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncState {
    pub status: SyncStatus,
    pub last_synced: Option<DateTime<Utc>>,
    /// Number of in-flight sync operations; never negative.
    pub pending_changes: u32,
    pub last_error: Option<String>,
}

/// Observable holder of the [`SyncState`].
///
/// Constructed explicitly and shared through `Arc`; observers call
/// [`subscribe`](Self::subscribe) and drop the receiver to unsubscribe.
#[derive(Debug)]
pub struct SyncStatusTracker {
    state: watch::Sender<SyncState>,
}

impl SyncStatusTracker {
    pub fn new() -> Self {
        let (state, _) = watch::channel(SyncState::default());
        Self { state }
    }

    pub fn subscribe(&self) -> watch::Receiver<SyncState> {
        self.state.subscribe()
    }

    pub fn snapshot(&self) -> SyncState {
        self.state.borrow().clone()
    }

    pub fn status(&self) -> SyncStatus {
        self.state.borrow().status
    }

    pub fn pending_changes(&self) -> u32 {
        self.state.borrow().pending_changes
    }

    /// A sync operation started. An offline status stays offline.
    pub fn begin(&self) {
        self.state.send_modify(|state| {
            if state.status != SyncStatus::Offline {
                state.status = SyncStatus::Syncing;
            }
            state.pending_changes += 1;
        });
    }

    /// A sync operation finished successfully.
    ///
    /// If the host went offline while it was in flight, the status stays
    /// `Offline` even once the counter drains.
    pub fn succeed(&self) {
        self.state.send_modify(|state| {
            state.pending_changes = state.pending_changes.saturating_sub(1);
            if state.pending_changes == 0 {
                state.last_synced = Some(Utc::now());
                state.last_error = None;
                if state.status != SyncStatus::Offline {
                    state.status = SyncStatus::Synced;
                }
            }
        });
    }

    /// A sync operation failed; the error is surfaced but not retried.
    pub fn fail(&self, error: impl Into<String>) {
        let error = error.into();
        self.state.send_modify(|state| {
            state.pending_changes = state.pending_changes.saturating_sub(1);
            state.status = SyncStatus::Error;
            state.last_error = Some(error);
        });
    }

    /// A sync operation was abandoned because the remote became unreachable.
    pub fn abandon_offline(&self) {
        self.state.send_modify(|state| {
            state.pending_changes = state.pending_changes.saturating_sub(1);
            state.status = SyncStatus::Offline;
        });
    }

    pub fn set_offline(&self) {
        self.state.send_modify(|state| state.status = SyncStatus::Offline);
    }

    /// Optimistically marks the engine synced when connectivity returns.
    pub fn set_online(&self) {
        self.state.send_modify(|state| {
            state.status = SyncStatus::Synced;
            state.last_error = None;
        });
    }
}

impl Default for SyncStatusTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_synced_only_when_counter_drains() {
        let tracker = SyncStatusTracker::new();
        assert_eq!(tracker.status(), SyncStatus::Idle);

        tracker.begin();
        tracker.begin();
        assert_eq!(tracker.status(), SyncStatus::Syncing);
        assert_eq!(tracker.pending_changes(), 2);

        tracker.succeed();
        assert_eq!(tracker.status(), SyncStatus::Syncing);
        assert!(tracker.snapshot().last_synced.is_none());

        tracker.succeed();
        assert_eq!(tracker.status(), SyncStatus::Synced);
        assert!(tracker.snapshot().last_synced.is_some());
    }

    #[test]
    fn test_offline_during_operation_is_not_reported_synced() {
        let tracker = SyncStatusTracker::new();
        tracker.begin();
        tracker.set_offline();
        tracker.succeed();

        let state = tracker.snapshot();
        assert_eq!(state.status, SyncStatus::Offline);
        assert_eq!(state.pending_changes, 0);

        tracker.set_online();
        assert_eq!(tracker.status(), SyncStatus::Synced);
    }

    #[test]
    fn test_failure_sets_error_and_decrements() {
        let tracker = SyncStatusTracker::new();
        tracker.begin();
        tracker.fail("remote returned 500");

        let state = tracker.snapshot();
        assert_eq!(state.status, SyncStatus::Error);
        assert_eq!(state.pending_changes, 0);
        assert_eq!(state.last_error.as_deref(), Some("remote returned 500"));
    }

    #[test]
    fn test_counter_never_negative() {
        let tracker = SyncStatusTracker::new();
        tracker.succeed();
        tracker.fail("x");
        tracker.abandon_offline();
        assert_eq!(tracker.pending_changes(), 0);
    }

    #[tokio::test]
    async fn test_subscribers_observe_transitions() {
        let tracker = SyncStatusTracker::new();
        let mut rx = tracker.subscribe();

        tracker.set_offline();
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow_and_update().status, SyncStatus::Offline);

        tracker.set_online();
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow_and_update().status, SyncStatus::Synced);
    }
}
