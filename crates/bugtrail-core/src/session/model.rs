//! Session domain model.
//!
//! A session is a unit of bug-capture work. The listing form (`SessionMeta`)
//! never carries issue bodies; the hydrated form (`Session`) adds them.

use super::issue::Issue;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Browser environment captured when a session starts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BrowserInfo {
    pub user_agent: String,
    pub platform: Option<String>,
    pub language: Option<String>,
    pub viewport_width: Option<u32>,
    pub viewport_height: Option<u32>,
}

impl BrowserInfo {
    pub fn new(user_agent: impl Into<String>) -> Self {
        Self {
            user_agent: user_agent.into(),
            ..Self::default()
        }
    }
}

/// Lightweight session record stored in the session listing.
///
/// `issue_count` is denormalized from the per-issue keys so the listing can be
/// rendered without reading any issue body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionMeta {
    /// Unique session identifier (UUID format)
    pub id: String,
    /// When the session was started
    pub start_time: DateTime<Utc>,
    /// Bumped on every mutation of the session or one of its issues
    pub last_updated: DateTime<Utc>,
    /// Page the session was started on
    pub url: String,
    #[serde(default)]
    pub browser_info: BrowserInfo,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
    #[serde(default)]
    pub issue_count: usize,
}

impl SessionMeta {
    /// Creates a fresh session record with `start_time == last_updated == now`.
    pub fn new(id: impl Into<String>, url: impl Into<String>, browser_info: BrowserInfo) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            start_time: now,
            last_updated: now,
            url: url.into(),
            browser_info,
            name: None,
            description: None,
            created_by: None,
            issue_count: 0,
        }
    }

    /// Marks the session as modified now.
    pub fn touch(&mut self) {
        self.last_updated = Utc::now();
    }
}

/// Partial update applied by `update_session`.
///
/// `None` leaves a field untouched; `Some(None)` clears it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionPatch {
    pub name: Option<Option<String>>,
    pub description: Option<Option<String>>,
    pub created_by: Option<Option<String>>,
}

impl SessionPatch {
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(Some(name.into()));
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(Some(description.into()));
        self
    }

    pub fn created_by(mut self, created_by: impl Into<String>) -> Self {
        self.created_by = Some(Some(created_by.into()));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.description.is_none() && self.created_by.is_none()
    }

    /// Applies the patch, returning whether anything changed.
    pub fn apply(&self, meta: &mut SessionMeta) -> bool {
        let mut changed = false;
        if let Some(name) = &self.name {
            changed |= meta.name != *name;
            meta.name = name.clone();
        }
        if let Some(description) = &self.description {
            changed |= meta.description != *description;
            meta.description = description.clone();
        }
        if let Some(created_by) = &self.created_by {
            changed |= meta.created_by != *created_by;
            meta.created_by = created_by.clone();
        }
        changed
    }
}

/// Hydrated session: the listing record plus its issues ordered by timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    #[serde(flatten)]
    pub meta: SessionMeta,
    #[serde(default)]
    pub issues: Vec<Issue>,
}

impl Session {
    pub fn new(meta: SessionMeta) -> Self {
        Self {
            meta,
            issues: Vec::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.meta.id
    }

    /// Listing form of this session with `issue_count` taken from the issues held.
    pub fn to_meta(&self) -> SessionMeta {
        let mut meta = self.meta.clone();
        meta.issue_count = self.issues.len();
        meta
    }
}
