//! Usage log
//!
//! Append-only accounting: one record per session, opened on connect and
//! closed with the transferred volume on disconnect.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use uuid::Uuid;

/// One usage record
#[derive(Debug, Clone, Serialize)]
pub struct UsageRecord {
    pub session_id: Uuid,
    pub subscriber_id: Uuid,
    pub server_id: Option<Uuid>,
    pub connected_at: DateTime<Utc>,
    pub disconnected_at: Option<DateTime<Utc>>,
    /// Transferred volume in MiB, set on close
    pub data_mb: f64,
}

/// Append-only usage log keyed by session
pub struct UsageLog {
    records: DashMap<Uuid, UsageRecord>,
}

impl UsageLog {
    pub fn new() -> Self {
        Self { records: DashMap::new() }
    }

    /// Open a record at connect time
    pub fn open(&self, session_id: Uuid, subscriber_id: Uuid, server_id: Option<Uuid>) {
        self.records.insert(
            session_id,
            UsageRecord {
                session_id,
                subscriber_id,
                server_id,
                connected_at: Utc::now(),
                disconnected_at: None,
                data_mb: 0.0,
            },
        );
    }

    /// Close the record with the final transferred volume
    pub fn close(&self, session_id: Uuid, data_mb: f64) {
        if let Some(mut record) = self.records.get_mut(&session_id) {
            record.disconnected_at = Some(Utc::now());
            record.data_mb = data_mb;
        }
    }

    /// Records for one subscriber, oldest first
    pub fn for_subscriber(&self, subscriber_id: Uuid) -> Vec<UsageRecord> {
        let mut records: Vec<UsageRecord> = self
            .records
            .iter()
            .filter(|r| r.subscriber_id == subscriber_id)
            .map(|r| r.clone())
            .collect();
        records.sort_by_key(|r| r.connected_at);
        records
    }

    /// Total closed volume in MiB
    pub fn total_mb(&self) -> f64 {
        self.records.iter().map(|r| r.data_mb).sum()
    }
}

impl Default for UsageLog {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_close_roundtrip() {
        let log = UsageLog::new();
        let session = Uuid::new_v4();
        let subscriber = Uuid::new_v4();
        log.open(session, subscriber, None);

        log.close(session, 3.0);
        let records = log.for_subscriber(subscriber);
        assert_eq!(records.len(), 1);
        assert!(records[0].disconnected_at.is_some());
        assert_eq!(records[0].data_mb, 3.0);
        assert_eq!(log.total_mb(), 3.0);
    }

    #[test]
    fn test_close_unknown_session_is_harmless() {
        let log = UsageLog::new();
        log.close(Uuid::new_v4(), 1.0);
        assert_eq!(log.total_mb(), 0.0);
    }
}
