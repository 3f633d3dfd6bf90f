//! Issue domain model.
//!
//! Issues belong to exactly one session. The owning session id is part of the
//! storage key, not a field of the issue.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// How bad a captured issue is.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueSeverity {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

/// A console error captured alongside an issue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsoleError {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

/// A failed network request captured alongside an issue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkError {
    pub url: String,
    #[serde(default)]
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// A single captured issue.
///
/// `screenshot` is either an inline data URL (local form) or a remote URL
/// (after the sync engine has uploaded the blob).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Issue {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub title: String,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub severity: IssueSeverity,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshot: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub console_errors: Option<Vec<ConsoleError>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_errors: Option<Vec<NetworkError>>,
}

impl Issue {
    /// Creates an issue with a fresh id and `timestamp = now`.
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            title: title.into(),
            notes: String::new(),
            severity: IssueSeverity::default(),
            tags: Vec::new(),
            category: None,
            screenshot: None,
            console_errors: None,
            network_errors: None,
        }
    }

    pub fn with_screenshot(mut self, screenshot: impl Into<String>) -> Self {
        self.screenshot = Some(screenshot.into());
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Returns true when the screenshot is held inline rather than by reference.
    pub fn has_inline_screenshot(&self) -> bool {
        self.screenshot
            .as_deref()
            .is_some_and(|s| DataUrl::parse(s).is_some())
    }
}

/// A borrowed view over a `data:<mime>;base64,<payload>` URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataUrl<'a> {
    pub mime_type: &'a str,
    pub base64_payload: &'a str,
}

impl<'a> DataUrl<'a> {
    /// Parses a base64 data URL. Non-base64 data URLs are not supported.
    pub fn parse(input: &'a str) -> Option<Self> {
        let rest = input.strip_prefix("data:")?;
        let (header, payload) = rest.split_once(',')?;
        let mime_type = header.strip_suffix(";base64")?;
        if mime_type.is_empty() {
            return None;
        }
        Some(Self {
            mime_type,
            base64_payload: payload,
        })
    }

    /// Formats a data URL from a mime type and an already base64-encoded payload.
    pub fn format(mime_type: &str, base64_payload: &str) -> String {
        format!("data:{};base64,{}", mime_type, base64_payload)
    }
}
