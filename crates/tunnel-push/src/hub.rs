//! Per-subscriber push channels
//!
//! Each subscriber gets one bounded broadcast channel; opening a second
//! forcibly closes the first. Lagging receivers skip the oldest queued
//! snapshots rather than stalling the publisher.

use crate::snapshot::SessionSnapshot;
use chrono::Utc;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tunnel_session::{SessionManager, SessionStatus};
use uuid::Uuid;

/// Queued snapshots per channel before the oldest is dropped
const CHANNEL_CAPACITY: usize = 16;

struct ChannelEntry {
    tx: broadcast::Sender<SessionSnapshot>,
    generation: u64,
}

/// Registry of per-subscriber push channels
pub struct PushHub {
    channels: DashMap<Uuid, ChannelEntry>,
    generations: AtomicU64,
}

impl PushHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
            generations: AtomicU64::new(0),
        }
    }

    /// Open the subscriber's channel, superseding any existing one
    ///
    /// Returns the receiver and the channel generation; the publisher
    /// spawned for this open must stop once the generation moves on.
    pub fn open(&self, subscriber: Uuid) -> (broadcast::Receiver<SessionSnapshot>, u64) {
        let generation = self.generations.fetch_add(1, Ordering::Relaxed) + 1;
        let (tx, rx) = broadcast::channel(CHANNEL_CAPACITY);
        let replaced = self
            .channels
            .insert(subscriber, ChannelEntry { tx, generation })
            .is_some();
        if replaced {
            tracing::debug!(%subscriber, "push channel superseded");
        }
        (rx, generation)
    }

    /// Deliver a snapshot; false when no channel is open
    pub fn publish(&self, subscriber: Uuid, snapshot: SessionSnapshot) -> bool {
        match self.channels.get(&subscriber) {
            // Send errors just mean the receiver is gone; the publisher
            // loop notices via the generation check.
            Some(entry) => entry.tx.send(snapshot).is_ok(),
            None => false,
        }
    }

    /// Current generation for a subscriber's channel
    pub fn generation(&self, subscriber: Uuid) -> Option<u64> {
        self.channels.get(&subscriber).map(|e| e.generation)
    }

    /// Close and remove a channel if it still belongs to `generation`
    pub fn close(&self, subscriber: Uuid, generation: u64) {
        self.channels
            .remove_if(&subscriber, |_, entry| entry.generation == generation);
    }

    /// Channels currently open
    pub fn open_count(&self) -> usize {
        self.channels.len()
    }
}

impl Default for PushHub {
    fn default() -> Self {
        Self::new()
    }
}

/// Publisher loop for one subscriber's session channel
///
/// Emits a snapshot every `interval` while the session is connected,
/// then one final disconnected snapshot, and closes the channel. Stops
/// silently when a newer open supersedes this generation.
pub async fn run_session_publisher(
    hub: Arc<PushHub>,
    sessions: Arc<SessionManager>,
    subscriber: Uuid,
    generation: u64,
    interval: Duration,
) {
    let mut ticker = tokio::time::interval(interval);
    let mut last_bytes: Option<u64> = None;
    let mut last_session: Option<Uuid> = None;

    loop {
        ticker.tick().await;

        if hub.generation(subscriber) != Some(generation) {
            return;
        }

        match sessions.connected_session(subscriber) {
            Some(session) => {
                let total = session.bytes_sent + session.bytes_received;
                let delta = last_bytes.map(|prev| total.saturating_sub(prev)).unwrap_or(0);
                last_bytes = Some(total);
                last_session = Some(session.id);

                let view = sessions.session_view(session.id).ok();
                hub.publish(
                    subscriber,
                    SessionSnapshot {
                        timestamp: Utc::now(),
                        session_id: Some(session.id),
                        status: SessionStatus::Connected,
                        cumulative_bytes: total,
                        throughput_mbps: delta as f64 * 8.0 / interval.as_secs_f64().max(0.001) / 1e6,
                        latency_ms: view.as_ref().and_then(|v| v.server_ping_ms),
                        server_load: view.as_ref().and_then(|v| v.server_load),
                    },
                );
            }
            None => {
                hub.publish(subscriber, SessionSnapshot::disconnected(last_session));
                hub.close(subscriber, generation);
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::broadcast::error::RecvError;

    fn snap(bytes: u64) -> SessionSnapshot {
        SessionSnapshot {
            timestamp: Utc::now(),
            session_id: Some(Uuid::new_v4()),
            status: SessionStatus::Connected,
            cumulative_bytes: bytes,
            throughput_mbps: 0.0,
            latency_ms: None,
            server_load: None,
        }
    }

    #[tokio::test]
    async fn test_publish_reaches_open_channel() {
        let hub = PushHub::new();
        let subscriber = Uuid::new_v4();
        let (mut rx, _) = hub.open(subscriber);

        assert!(hub.publish(subscriber, snap(42)));
        assert_eq!(rx.recv().await.unwrap().cumulative_bytes, 42);
    }

    #[tokio::test]
    async fn test_publish_without_channel_is_dropped() {
        let hub = PushHub::new();
        assert!(!hub.publish(Uuid::new_v4(), snap(1)));
    }

    #[tokio::test]
    async fn test_second_open_supersedes_first() {
        let hub = PushHub::new();
        let subscriber = Uuid::new_v4();
        let (mut first, gen1) = hub.open(subscriber);
        let (mut second, gen2) = hub.open(subscriber);
        assert!(gen2 > gen1);

        hub.publish(subscriber, snap(7));
        // The first receiver's channel lost its sender on takeover.
        assert!(matches!(first.recv().await, Err(RecvError::Closed)));
        assert_eq!(second.recv().await.unwrap().cumulative_bytes, 7);

        // Closing with the stale generation must not tear down the new
        // channel.
        hub.close(subscriber, gen1);
        assert_eq!(hub.open_count(), 1);
        hub.close(subscriber, gen2);
        assert_eq!(hub.open_count(), 0);
    }

    #[tokio::test]
    async fn test_publisher_emits_final_disconnected_snapshot() {
        use base64::Engine;
        use tunnel_common::Tier;
        use tunnel_entitlement::{EntitlementEngine, PlanCatalog, SubscriptionManager};
        use tunnel_identity::IdentityStore;
        use tunnel_registry::{ServerConfig, ServerRegistry};

        let identity = Arc::new(IdentityStore::new());
        let subs = Arc::new(SubscriptionManager::new(Arc::new(PlanCatalog::with_defaults())));
        let entitlement = Arc::new(EntitlementEngine::new(identity.clone(), subs));
        let registry = Arc::new(ServerRegistry::new());
        let sessions = Arc::new(SessionManager::new(
            identity.clone(),
            entitlement,
            registry.clone(),
            vec!["1.1.1.1".into()],
        ));

        let sub = identity.register("A", "a@x.test", "pw12345678", None, None).unwrap();
        identity.mark_verified("a@x.test").unwrap();
        registry
            .create(ServerConfig {
                hostname: "nyc-1".into(),
                location: "us-east".into(),
                endpoint_host: "nyc1.vpn.test".into(),
                endpoint_port: 51820,
                public_key: "c2VydmVyLXB1YmxpYy1rZXktMzItYnl0ZXMhIQ==".into(),
                tunnel_network: "10.8.0.1/24".parse().unwrap(),
                allowed_prefixes: Vec::new(),
                tier: Tier::Free,
                ping_ms: 10,
                max_connections: 10,
            })
            .unwrap();
        let key = base64::engine::general_purpose::STANDARD.encode([9u8; 32]);
        let grant = sessions.connect(sub.handle, None, &key, None).unwrap();

        let hub = Arc::new(PushHub::new());
        let (mut rx, generation) = hub.open(sub.id);
        tokio::spawn(run_session_publisher(
            hub.clone(),
            sessions.clone(),
            sub.id,
            generation,
            Duration::from_millis(10),
        ));

        let first = rx.recv().await.unwrap();
        assert_eq!(first.status, SessionStatus::Connected);
        assert_eq!(first.session_id, Some(grant.session_id));
        assert!(first.server_load.is_some());

        sessions.disconnect(grant.session_id, sub.handle, 100, 200).unwrap();

        // Skip any connected ticks still in flight, then expect the
        // terminal snapshot and a closed channel.
        let mut saw_final = false;
        loop {
            match rx.recv().await {
                Ok(snapshot) if snapshot.status == SessionStatus::Disconnected => {
                    assert_eq!(snapshot.session_id, Some(grant.session_id));
                    saw_final = true;
                }
                Ok(_) => continue,
                Err(_) => break,
            }
        }
        assert!(saw_final);
        assert_eq!(hub.open_count(), 0);
    }

    #[tokio::test]
    async fn test_slow_consumer_drops_oldest() {
        let hub = PushHub::new();
        let subscriber = Uuid::new_v4();
        let (mut rx, _) = hub.open(subscriber);

        for i in 0..(CHANNEL_CAPACITY as u64 + 5) {
            hub.publish(subscriber, snap(i));
        }

        // The receiver lagged: oldest snapshots are gone, the stream
        // resumes at the first retained one.
        match rx.recv().await {
            Err(RecvError::Lagged(skipped)) => assert_eq!(skipped, 5),
            other => panic!("expected lag, got {other:?}"),
        }
        assert_eq!(rx.recv().await.unwrap().cumulative_bytes, 5);
    }
}
