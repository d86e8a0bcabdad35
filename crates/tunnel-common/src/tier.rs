//! Access tier

use serde::{Deserialize, Serialize};

/// Two-valued access tier, applied to plans, subscribers and servers
///
/// Selection requires `subscriber_tier >= server_tier`; the derived
/// ordering (Free < Premium) encodes that.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    /// No paid entitlement
    Free,
    /// Paid entitlement
    Premium,
}

impl Tier {
    /// Whether a subscriber at this tier may use a server of `server_tier`
    pub fn allows(self, server_tier: Tier) -> bool {
        self >= server_tier
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Free => write!(f, "free"),
            Self::Premium => write!(f, "premium"),
        }
    }
}
