//! Snapshot payloads

use chrono::{DateTime, Utc};
use serde::Serialize;
use tunnel_session::SessionStatus;
use uuid::Uuid;

/// One tick of a subscriber's session channel
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub timestamp: DateTime<Utc>,
    pub session_id: Option<Uuid>,
    pub status: SessionStatus,
    /// Bytes sent plus received so far
    pub cumulative_bytes: u64,
    /// Delta-derived throughput since the previous tick, Mbit/s
    pub throughput_mbps: f64,
    /// Server latency estimate at observation time
    pub latency_ms: Option<u32>,
    /// Server load at observation time
    pub server_load: Option<f64>,
}

impl SessionSnapshot {
    /// Terminal snapshot emitted when the session ends
    pub fn disconnected(session_id: Option<Uuid>) -> Self {
        Self {
            timestamp: Utc::now(),
            session_id,
            status: SessionStatus::Disconnected,
            cumulative_bytes: 0,
            throughput_mbps: 0.0,
            latency_ms: None,
            server_load: None,
        }
    }
}

/// One tick of the operator channel
#[derive(Debug, Clone, Serialize)]
pub struct OperatorSnapshot {
    pub timestamp: DateTime<Utc>,
    pub total_subscribers: usize,
    pub active_sessions: usize,
    pub active_servers: usize,
    pub alerts: Vec<String>,
}
