//! Tunnel node records

use chrono::{DateTime, Utc};
use ipnetwork::{IpNetwork, Ipv4Network};
use serde::{Deserialize, Serialize};
use tunnel_common::Tier;
use uuid::Uuid;

/// Operational state of a tunnel node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerStatus {
    /// Admitting sessions
    Active,
    /// Temporarily drained
    Maintenance,
    /// Decommissioned or unreachable
    Offline,
}

/// A tunnel node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Server {
    pub id: Uuid,
    pub hostname: String,
    /// Location tag clients filter on, e.g. "us-east"
    pub location: String,
    /// Externally reachable address
    pub endpoint_host: String,
    pub endpoint_port: u16,
    /// Node's tunnel public key
    pub public_key: String,
    /// In-tunnel network; the node itself holds the network address `.ip()`
    pub tunnel_network: Ipv4Network,
    /// Prefixes routed through the tunnel
    pub allowed_prefixes: Vec<IpNetwork>,
    pub tier: Tier,
    pub status: ServerStatus,
    /// Normalized 0.0..=1.0, summary of open sessions
    pub current_load: f64,
    /// Latency estimate in milliseconds
    pub ping_ms: u32,
    pub max_connections: u32,
    /// Open sessions currently placed here
    pub active_sessions: u32,
    pub created_at: DateTime<Utc>,
}

impl Server {
    /// `host:port` form used in rendered tunnel configurations
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.endpoint_host, self.endpoint_port)
    }

    /// Whether the node can take one more session
    pub fn has_capacity(&self) -> bool {
        self.active_sessions < self.max_connections
    }

    /// Load contribution of a single session
    pub fn load_step(&self) -> f64 {
        if self.max_connections == 0 {
            0.0
        } else {
            1.0 / self.max_connections as f64
        }
    }
}

/// Input for registering a tunnel node
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub hostname: String,
    pub location: String,
    pub endpoint_host: String,
    pub endpoint_port: u16,
    pub public_key: String,
    pub tunnel_network: Ipv4Network,
    /// Empty means the default route
    #[serde(default)]
    pub allowed_prefixes: Vec<IpNetwork>,
    pub tier: Tier,
    pub ping_ms: u32,
    pub max_connections: u32,
}

/// Partial update of a tunnel node
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServerUpdate {
    pub hostname: Option<String>,
    pub location: Option<String>,
    pub status: Option<ServerStatus>,
    pub tier: Option<Tier>,
    pub ping_ms: Option<u32>,
    pub max_connections: Option<u32>,
}
