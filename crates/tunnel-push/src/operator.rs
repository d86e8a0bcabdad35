//! Operator channel
//!
//! Single broadcast fan-out of plane-wide aggregates, authorized for
//! super-users only and exempt from rate limiting. Authorization happens
//! at the facade; this module only produces and fans out.

use crate::snapshot::OperatorSnapshot;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tunnel_identity::IdentityStore;
use tunnel_protect::ProtectionLayer;
use tunnel_registry::ServerRegistry;
use tunnel_session::SessionManager;

/// Queued snapshots before the oldest is dropped
const CHANNEL_CAPACITY: usize = 64;

/// Aggregate metrics fan-out
pub struct OperatorHub {
    tx: broadcast::Sender<OperatorSnapshot>,
}

impl OperatorHub {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }

    /// Attach an operator consumer
    pub fn subscribe(&self) -> broadcast::Receiver<OperatorSnapshot> {
        self.tx.subscribe()
    }

    /// Fan a snapshot out to all operator consumers
    pub fn publish(&self, snapshot: OperatorSnapshot) {
        let _ = self.tx.send(snapshot);
    }

    /// Operator consumers currently attached
    pub fn consumer_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for OperatorHub {
    fn default() -> Self {
        Self::new()
    }
}

/// Compute the current aggregate snapshot
pub fn aggregate(
    identity: &IdentityStore,
    sessions: &SessionManager,
    registry: &ServerRegistry,
    protect: &ProtectionLayer,
) -> OperatorSnapshot {
    let stats = protect.stats();
    let mut alerts = Vec::new();
    if stats.active_bans > 0 {
        alerts.push(format!("{} ip bans active", stats.active_bans));
    }
    OperatorSnapshot {
        timestamp: Utc::now(),
        total_subscribers: identity.count(),
        active_sessions: sessions.active_count(),
        active_servers: registry.active_count(),
        alerts,
    }
}

/// Publisher loop for the operator channel
pub async fn run_operator_publisher(
    hub: Arc<OperatorHub>,
    identity: Arc<IdentityStore>,
    sessions: Arc<SessionManager>,
    registry: Arc<ServerRegistry>,
    protect: Arc<ProtectionLayer>,
    interval: Duration,
) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        hub.publish(aggregate(&identity, &sessions, &registry, &protect));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::IpAddr;
    use std::sync::Arc;
    use tunnel_common::{Settings, Tier};
    use tunnel_entitlement::{EntitlementEngine, PlanCatalog, SubscriptionManager};
    use tunnel_registry::ServerConfig;

    fn plane() -> (Arc<IdentityStore>, Arc<SessionManager>, Arc<ServerRegistry>, Arc<ProtectionLayer>) {
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
        let protect = Arc::new(ProtectionLayer::new(&Settings::for_tests()));
        (identity, sessions, registry, protect)
    }

    #[tokio::test]
    async fn test_aggregate_counts_the_plane() {
        let (identity, sessions, registry, protect) = plane();
        identity.register("A", "a@x.test", "pw12345678", None, None).unwrap();
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

        let snapshot = aggregate(&identity, &sessions, &registry, &protect);
        assert_eq!(snapshot.total_subscribers, 1);
        assert_eq!(snapshot.active_sessions, 0);
        assert_eq!(snapshot.active_servers, 1);
        assert!(snapshot.alerts.is_empty());
    }

    #[tokio::test]
    async fn test_bans_surface_as_alerts() {
        let (identity, sessions, registry, protect) = plane();
        let attacker: IpAddr = "203.0.113.9".parse().unwrap();
        for _ in 0..60 {
            protect.record_auth_failure(attacker);
        }
        let snapshot = aggregate(&identity, &sessions, &registry, &protect);
        assert_eq!(snapshot.alerts.len(), 1);
    }

    #[tokio::test]
    async fn test_fan_out_reaches_every_consumer() {
        let hub = OperatorHub::new();
        let mut rx1 = hub.subscribe();
        let mut rx2 = hub.subscribe();
        assert_eq!(hub.consumer_count(), 2);

        hub.publish(OperatorSnapshot {
            timestamp: Utc::now(),
            total_subscribers: 5,
            active_sessions: 2,
            active_servers: 1,
            alerts: Vec::new(),
        });

        assert_eq!(rx1.recv().await.unwrap().total_subscribers, 5);
        assert_eq!(rx2.recv().await.unwrap().active_sessions, 2);
    }
}
