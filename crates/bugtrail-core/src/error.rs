//! Error types for the Bugtrail engine.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A shared error type for the entire Bugtrail engine.
///
/// Every layer (tiered store, record repository, sync engine) reports failures
/// through this enum so that callers can branch on the failure class without
/// knowing which component raised it.
#[derive(Error, Debug, Clone, Serialize, Deserialize)]
pub enum BugtrailError {
    /// Entity not found error with type information
    #[error("Entity not found: {entity_type} '{id}'")]
    NotFound {
        entity_type: &'static str,
        id: String,
    },

    /// Entity already exists where a fresh one was expected
    #[error("Entity already exists: {entity_type} '{id}'")]
    Conflict {
        entity_type: &'static str,
        id: String,
    },

    /// IO error (file system operations)
    #[error("IO error: {message}")]
    Io { message: String },

    /// Data access error (repository/storage layer)
    #[error("Data access error: {0}")]
    DataAccess(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {format} - {message}")]
    Serialization { format: String, message: String },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// A local store rejected a write because it would exceed its limits
    #[error("Capacity exceeded in {tier}: requested {requested} bytes, {available} available")]
    CapacityExceeded {
        tier: String,
        requested: u64,
        available: u64,
    },

    /// A stored item could not be decoded
    #[error("Decode failure: {0}")]
    Decode(String),

    /// Encryption or decryption failure
    #[error("Crypto error: {0}")]
    Crypto(String),

    /// The remote store could not be reached
    #[error("Network unavailable: {0}")]
    NetworkUnavailable(String),

    /// The remote store rejected or failed an operation
    #[error("Remote operation failed ({status}): {message}")]
    Remote { status: u16, message: String },

    /// Task execution error
    #[error("Task execution error: {0}")]
    Execution(String),

    /// Internal error (should not happen in normal operation)
    #[error("Internal error: {0}")]
    Internal(String),

    /// Multiple errors
    #[error("Multiple errors occurred ({} total)", .0.len())]
    Multiple(Vec<BugtrailError>),
}

impl BugtrailError {
    // ============================================================================
    // Constructor helpers
    // ============================================================================

    /// Creates a NotFound error
    pub fn not_found(entity_type: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity_type,
            id: id.into(),
        }
    }

    /// Creates a Conflict error
    pub fn conflict(entity_type: &'static str, id: impl Into<String>) -> Self {
        Self::Conflict {
            entity_type,
            id: id.into(),
        }
    }

    /// Creates an IO error
    pub fn io(message: impl Into<String>) -> Self {
        Self::Io {
            message: message.into(),
        }
    }

    /// Creates a Config error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Creates a DataAccess error
    pub fn data_access(message: impl Into<String>) -> Self {
        Self::DataAccess(message.into())
    }

    /// Creates a CapacityExceeded error
    pub fn capacity_exceeded(tier: impl Into<String>, requested: u64, available: u64) -> Self {
        Self::CapacityExceeded {
            tier: tier.into(),
            requested,
            available,
        }
    }

    /// Creates a Decode error
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode(message.into())
    }

    /// Creates a Remote error
    pub fn remote(status: u16, message: impl Into<String>) -> Self {
        Self::Remote {
            status,
            message: message.into(),
        }
    }

    /// Creates an Internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Collapses a list of errors into a single error.
    ///
    /// Returns `None` for an empty list and the error itself for a single entry.
    pub fn from_many(mut errors: Vec<BugtrailError>) -> Option<Self> {
        match errors.len() {
            0 => None,
            1 => errors.pop(),
            _ => Some(Self::Multiple(errors)),
        }
    }

    // ============================================================================
    // Type checking methods
    // ============================================================================

    /// Check if this is a NotFound error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Check if this is a CapacityExceeded error
    pub fn is_capacity_exceeded(&self) -> bool {
        matches!(self, Self::CapacityExceeded { .. })
    }

    /// Check if this is a decode-class failure (corrupt payload, bad ciphertext)
    pub fn is_decode(&self) -> bool {
        matches!(
            self,
            Self::Decode(_) | Self::Crypto(_) | Self::Serialization { .. }
        )
    }

    /// Check if this error means the remote store is unreachable
    pub fn is_network_unavailable(&self) -> bool {
        matches!(self, Self::NetworkUnavailable(_))
    }
}

// ============================================================================
// From implementations for automatic conversion
// ============================================================================

impl From<std::io::Error> for BugtrailError {
    fn from(err: std::io::Error) -> Self {
        Self::Io {
            message: format!("{} (kind: {:?})", err, err.kind()),
        }
    }
}

impl From<serde_json::Error> for BugtrailError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization {
            format: "JSON".to_string(),
            message: err.to_string(),
        }
    }
}

impl From<toml::de::Error> for BugtrailError {
    fn from(err: toml::de::Error) -> Self {
        Self::Serialization {
            format: "TOML".to_string(),
            message: err.to_string(),
        }
    }
}

impl From<toml::ser::Error> for BugtrailError {
    fn from(err: toml::ser::Error) -> Self {
        Self::Serialization {
            format: "TOML".to_string(),
            message: err.to_string(),
        }
    }
}

/// Conversion from anyhow::Error, used at task-body boundaries
impl From<anyhow::Error> for BugtrailError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

/// A type alias for `Result<T, BugtrailError>`.
pub type Result<T> = std::result::Result<T, BugtrailError>;
