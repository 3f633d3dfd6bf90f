//! Durable-local key naming.

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;

/// Session listing (lightweight `SessionMeta` records, oldest first).
pub const SESSIONS_KEY: &str = "bugtrail_sessions";
/// Copy of the active session's `SessionMeta`.
pub const CURRENT_SESSION_KEY: &str = "bugtrail_current_session";
pub const SETTINGS_KEY: &str = "bugtrail_settings";
pub const ISSUE_PREFIX: &str = "bugtrail_issue";

/// Ids are opaque, so each segment is base64url-encoded to keep `:` out of it.
fn segment(id: &str) -> String {
    URL_SAFE_NO_PAD.encode(id.as_bytes())
}

pub fn issue_key(session_id: &str, issue_id: &str) -> String {
    format!("{}:{}:{}", ISSUE_PREFIX, segment(session_id), segment(issue_id))
}

/// Prefix shared by every issue key of one session.
pub fn issue_prefix(session_id: &str) -> String {
    format!("{}:{}:", ISSUE_PREFIX, segment(session_id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_issue_keys_are_scoped_by_session() {
        assert_eq!(issue_key("s1", "i1"), "bugtrail_issue:czE:aTE");
        assert!(issue_key("s1", "i1").starts_with(&issue_prefix("s1")));
        assert!(!issue_key("s10", "i1").starts_with(&issue_prefix("s1")));
    }

    #[test]
    fn test_colon_in_session_id_does_not_leak_into_another_session() {
        assert!(!issue_key("s1:x", "i1").starts_with(&issue_prefix("s1")));
        assert!(!issue_key("s1", "x:i1").starts_with(&issue_prefix("s1:x")));
        assert_ne!(issue_key("a:b", "c"), issue_key("a", "b:c"));
    }
}
