//! Signals reported by the host environment.

use serde::{Deserialize, Serialize};

/// Connectivity, activity and lifecycle signals from the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HostSignal {
    Online,
    Offline,
    Idle,
    Locked,
    Active,
    Suspend,
    Resume,
}

impl HostSignal {
    pub fn is_connectivity(self) -> bool {
        matches!(self, Self::Online | Self::Offline)
    }
}
