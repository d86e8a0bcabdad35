//! Subscriber record

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A subscriber of the VPN service
///
/// `premium` is a cache of the Entitlement Engine's current decision and
/// is reconciled lazily on admission; it is never authoritative on its own.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscriber {
    /// Stable opaque identifier
    pub id: Uuid,
    /// Short numeric handle used externally
    pub handle: u32,
    /// Unique, stored lowercase
    pub email: String,
    /// Argon2 PHC string
    #[serde(skip_serializing, default)]
    pub password_hash: String,
    /// Display name
    pub name: String,
    pub phone: Option<String>,
    pub country: Option<String>,
    /// Email ownership proven
    pub verified: bool,
    /// Account enabled
    pub active: bool,
    /// Cached entitlement decision
    pub premium: bool,
    /// Operator account, bypasses the protection layer
    pub superuser: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
