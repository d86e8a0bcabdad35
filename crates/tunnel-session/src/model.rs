//! Session records and operation results

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use tunnel_registry::Server;
use uuid::Uuid;

/// Lifecycle state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Connected,
    Disconnected,
}

/// Who ended the session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EndReason {
    /// Client-requested disconnect
    Client,
    /// Reaped by the stale-session reconciler
    Timeout,
}

/// One tunnel session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    pub subscriber_id: Uuid,
    /// Nullable so the row survives server decommission
    pub server_id: Option<Uuid>,
    /// Leased in-tunnel address
    pub client_address: Ipv4Addr,
    pub client_public_key: String,
    pub status: SessionStatus,
    /// Client-reported, trusted best-effort
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    /// Last heartbeat, feeds the stale reconciler
    pub last_seen: DateTime<Utc>,
    pub ended_by: Option<EndReason>,
}

/// Everything the client needs to attach to the chosen server
#[derive(Debug, Clone, Serialize)]
pub struct ConnectGrant {
    pub session_id: Uuid,
    /// Descriptor of the selected node
    pub server: Server,
    pub client_address: Ipv4Addr,
    /// Rendered tunnel configuration blob
    pub config: String,
    pub started_at: DateTime<Utc>,
}

/// Accounting summary returned on disconnect
#[derive(Debug, Clone, Serialize)]
pub struct DisconnectSummary {
    pub session_id: Uuid,
    pub duration_seconds: u64,
    /// HH:MM:SS rendering of the duration
    pub duration_formatted: String,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub total_bytes: u64,
    /// Transferred volume in MiB
    pub data_mb: f64,
    /// Average throughput in Mbit/s
    pub avg_mbps: f64,
    pub server_location: Option<String>,
}

/// Point-in-time view of a session
#[derive(Debug, Clone, Serialize)]
pub struct SessionStatusView {
    pub session_id: Uuid,
    pub status: SessionStatus,
    pub server: Option<Server>,
    pub client_address: Ipv4Addr,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub duration_seconds: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    /// Throughput derived from the byte counters, Mbit/s
    pub avg_mbps: f64,
    /// Server load at observation time
    pub server_load: Option<f64>,
    /// Server latency estimate at observation time
    pub server_ping_ms: Option<u32>,
}

/// Render a duration as HH:MM:SS
pub(crate) fn format_duration(total_seconds: u64) -> String {
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;
    format!("{hours:02}:{minutes:02}:{seconds:02}")
}

/// Average throughput in Mbit/s for a byte total over a duration
pub(crate) fn throughput_mbps(total_bytes: u64, duration_seconds: u64) -> f64 {
    if duration_seconds == 0 {
        return 0.0;
    }
    total_bytes as f64 * 8.0 / duration_seconds as f64 / 1e6
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(0), "00:00:00");
        assert_eq!(format_duration(61), "00:01:01");
        assert_eq!(format_duration(3600), "01:00:00");
        assert_eq!(format_duration(90061), "25:01:01");
    }

    #[test]
    fn test_throughput() {
        // 3 MiB over an hour is just under 7 Mbit/s of average.
        let mbps = throughput_mbps(3_145_728, 3600);
        assert!((mbps - 6.99).abs() < 0.01);
        assert_eq!(throughput_mbps(1_000_000, 0), 0.0);
    }
}
