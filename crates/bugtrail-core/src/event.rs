//! Signals emitted by the engine for UI collaborators.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

const DEFAULT_EVENT_CAPACITY: usize = 256;

/// How urgently a storage warning should be shown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WarningSeverity {
    Warning,
    Critical,
}

/// Events published on the [`EventBus`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum EngineEvent {
    /// Store usage crossed the warning threshold.
    StorageWarning {
        message: String,
        severity: WarningSeverity,
    },
    /// A write could not be completed even after every fallback.
    StorageError { message: String },
    /// Eviction removed `count` sessions.
    StorageCleanup { count: usize },
    /// A session hit its issue cap and its oldest issue was evicted.
    IssueLimitReached {
        session_id: String,
        evicted_issue_id: String,
    },
    BulkDeleteSuccess { count: usize },
    BulkDeleteError { message: String },
    SessionUpdateSuccess { session_id: String },
    SessionUpdateError { message: String },
}

/// Broadcast channel for [`EngineEvent`]s.
///
/// Emitting never blocks and never fails; with no subscribers events are dropped.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_EVENT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn emit(&self, event: EngineEvent) {
        tracing::debug!(?event, "Emitting engine event");
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
