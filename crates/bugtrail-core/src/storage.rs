//! Storage-facing seams shared between the store, the quota guard and the
//! record repository.

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Host-reported store usage.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotaReport {
    pub used: u64,
    pub quota: u64,
    /// Fraction in `[0, 1]` (may exceed 1 if the host over-reports usage).
    pub percent_used: f64,
}

impl QuotaReport {
    pub fn new(used: u64, quota: u64) -> Self {
        let percent_used = if quota == 0 {
            1.0
        } else {
            used as f64 / quota as f64
        };
        Self {
            used,
            quota,
            percent_used,
        }
    }
}

/// Something able to free local storage by evicting records.
#[async_trait]
pub trait StorageCleanup: Send + Sync {
    /// Runs the eviction policy and returns the number of sessions removed.
    async fn cleanup_storage(&self) -> Result<usize>;
}
