//! Connection admission and lifecycle

use crate::address;
use crate::model::{
    format_duration, throughput_mbps, ConnectGrant, DisconnectSummary, EndReason, Session,
    SessionStatus, SessionStatusView,
};
use crate::usage::UsageLog;
use crate::wg;
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::net::Ipv4Addr;
use std::sync::Arc;
use tunnel_common::{CoreError, CoreResult, Tier};
use tunnel_entitlement::EntitlementEngine;
use tunnel_identity::{IdentityStore, Subscriber};
use tunnel_registry::{Server, ServerRegistry};
use uuid::Uuid;

/// Session state machine
///
/// The `connected` index holds at most one entry per subscriber and its
/// entry claim is the serialization point for concurrent connects, the
/// in-process analogue of a partial unique index on
/// `sessions(subscriber) where status = connected`.
pub struct SessionManager {
    identity: Arc<IdentityStore>,
    entitlement: Arc<EntitlementEngine>,
    registry: Arc<ServerRegistry>,
    sessions: DashMap<Uuid, Session>,
    connected: DashMap<Uuid, Uuid>,
    history: DashMap<Uuid, Vec<Uuid>>,
    alloc_locks: DashMap<Uuid, Arc<Mutex<()>>>,
    usage: UsageLog,
    dns_servers: Vec<String>,
}

impl SessionManager {
    pub fn new(
        identity: Arc<IdentityStore>,
        entitlement: Arc<EntitlementEngine>,
        registry: Arc<ServerRegistry>,
        dns_servers: Vec<String>,
    ) -> Self {
        Self {
            identity,
            entitlement,
            registry,
            sessions: DashMap::new(),
            connected: DashMap::new(),
            history: DashMap::new(),
            alloc_locks: DashMap::new(),
            usage: UsageLog::new(),
            dns_servers,
        }
    }

    /// Admit a subscriber and open a session
    ///
    /// Runs the full admission sequence: identity, entitlement, tier
    /// hint, concurrency, selection, address lease, placement. A
    /// `requested_tier` above the effective tier is rejected with
    /// `PremiumRequired` carrying the upgrade hint.
    pub fn connect(
        &self,
        handle: u32,
        location: Option<&str>,
        client_public_key: &str,
        requested_tier: Option<Tier>,
    ) -> CoreResult<ConnectGrant> {
        wg::validate_client_key(client_public_key)?;

        let subscriber = self.identity.get_by_handle(handle)?;
        if !subscriber.active {
            return Err(CoreError::Disabled);
        }
        if !subscriber.verified {
            return Err(CoreError::Unverified);
        }

        let entitlement = self.entitlement.resolve(&subscriber)?;
        if let Some(requested) = requested_tier {
            if requested > entitlement.tier {
                return Err(CoreError::PremiumRequired {
                    upgrade_plan: self.entitlement.upgrade_hint(),
                });
            }
        }
        let ceiling = requested_tier.unwrap_or(entitlement.tier);

        if let Some(existing) = self.connected.get(&subscriber.id) {
            return Err(CoreError::AlreadyConnected {
                session_id: *existing,
            });
        }

        let server = self.registry.select(ceiling, location)?;

        // Claim the one-connected-session slot before touching server
        // state; the loser of a concurrent race sees AlreadyConnected.
        let session_id = Uuid::new_v4();
        match self.connected.entry(subscriber.id) {
            dashmap::mapref::entry::Entry::Occupied(existing) => {
                return Err(CoreError::AlreadyConnected {
                    session_id: *existing.get(),
                });
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(session_id);
            }
        }

        match self.place(session_id, &subscriber, &server, client_public_key) {
            Ok(grant) => Ok(grant),
            Err(err) => {
                // Roll back the claim so the subscriber is not wedged.
                self.connected
                    .remove_if(&subscriber.id, |_, v| *v == session_id);
                Err(err)
            }
        }
    }

    fn place(
        &self,
        session_id: Uuid,
        subscriber: &Subscriber,
        server: &Server,
        client_public_key: &str,
    ) -> CoreResult<ConnectGrant> {
        // Address leases on one server are handed out under its
        // allocation lock so concurrent placements cannot collide.
        let lock = self
            .alloc_locks
            .entry(server.id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = lock.lock();

        let leased: HashSet<Ipv4Addr> = self
            .sessions
            .iter()
            .filter(|s| s.server_id == Some(server.id) && s.status == SessionStatus::Connected)
            .map(|s| s.client_address)
            .collect();
        let client_address = address::allocate(server.tunnel_network, &leased)
            .ok_or(CoreError::AddressExhausted)?;

        // Selection ran on a snapshot; the slot claim re-checks capacity
        // under the row lock.
        let server = self.registry.acquire_slot(server.id)?;

        let now = Utc::now();
        let session = Session {
            id: session_id,
            subscriber_id: subscriber.id,
            server_id: Some(server.id),
            client_address,
            client_public_key: client_public_key.trim().to_string(),
            status: SessionStatus::Connected,
            bytes_sent: 0,
            bytes_received: 0,
            started_at: now,
            ended_at: None,
            last_seen: now,
            ended_by: None,
        };
        self.sessions.insert(session_id, session);
        self.history
            .entry(subscriber.id)
            .or_default()
            .push(session_id);
        self.usage.open(session_id, subscriber.id, Some(server.id));

        let config = wg::render_config(&server, client_address, &self.dns_servers);
        tracing::info!(
            handle = subscriber.handle,
            server = %server.hostname,
            %client_address,
            "session connected"
        );

        Ok(ConnectGrant {
            session_id,
            server,
            client_address,
            config,
            started_at: now,
        })
    }

    /// Close a session with client-reported byte counters
    ///
    /// A foreign or unknown session is `NotFound`; an already
    /// disconnected one is `NotConnected`.
    pub fn disconnect(
        &self,
        session_id: Uuid,
        handle: u32,
        bytes_sent: u64,
        bytes_received: u64,
    ) -> CoreResult<DisconnectSummary> {
        let subscriber = self.identity.get_by_handle(handle)?;
        self.finish(session_id, Some(subscriber.id), bytes_sent, bytes_received, EndReason::Client)
    }

    fn finish(
        &self,
        session_id: Uuid,
        expected_subscriber: Option<Uuid>,
        bytes_sent: u64,
        bytes_received: u64,
        reason: EndReason,
    ) -> CoreResult<DisconnectSummary> {
        let (subscriber_id, server_id, summary) = {
            let mut session = self
                .sessions
                .get_mut(&session_id)
                .ok_or_else(|| CoreError::NotFound(format!("session {session_id}")))?;
            if let Some(expected) = expected_subscriber {
                if session.subscriber_id != expected {
                    return Err(CoreError::NotFound(format!("session {session_id}")));
                }
            }
            if session.status != SessionStatus::Connected {
                return Err(CoreError::NotConnected);
            }

            let now = Utc::now();
            session.status = SessionStatus::Disconnected;
            session.ended_at = Some(now);
            session.bytes_sent = bytes_sent;
            session.bytes_received = bytes_received;
            session.ended_by = Some(reason);

            let duration = (now - session.started_at).num_seconds().max(0) as u64;
            let total_bytes = bytes_sent + bytes_received;
            let summary = DisconnectSummary {
                session_id,
                duration_seconds: duration,
                duration_formatted: format_duration(duration),
                bytes_sent,
                bytes_received,
                total_bytes,
                data_mb: total_bytes as f64 / (1u64 << 20) as f64,
                avg_mbps: throughput_mbps(total_bytes, duration),
                server_location: None,
            };
            (session.subscriber_id, session.server_id, summary)
        };

        self.connected
            .remove_if(&subscriber_id, |_, v| *v == session_id);

        let mut summary = summary;
        if let Some(server_id) = server_id {
            if let Ok(server) = self.registry.get(server_id) {
                summary.server_location = Some(server.location);
            }
            let _ = self.registry.release_slot(server_id);
        }
        self.usage.close(session_id, summary.data_mb);

        tracing::info!(
            session = %session_id,
            reason = ?reason,
            duration = summary.duration_seconds,
            "session disconnected"
        );
        Ok(summary)
    }

    /// Snapshot a session; without an id the subscriber's latest wins
    pub fn status(&self, handle: u32, session_id: Option<Uuid>) -> CoreResult<SessionStatusView> {
        let subscriber = self.identity.get_by_handle(handle)?;
        let session_id = match session_id {
            Some(id) => id,
            None => self
                .history
                .get(&subscriber.id)
                .and_then(|ids| ids.last().copied())
                .ok_or_else(|| CoreError::NotFound("no sessions recorded".into()))?,
        };

        let session = self
            .sessions
            .get(&session_id)
            .ok_or_else(|| CoreError::NotFound(format!("session {session_id}")))?;
        if session.subscriber_id != subscriber.id {
            return Err(CoreError::NotFound(format!("session {session_id}")));
        }

        Ok(self.view(&session))
    }

    fn view(&self, session: &Session) -> SessionStatusView {
        let server = session.server_id.and_then(|id| self.registry.get(id).ok());
        let end = session.ended_at.unwrap_or_else(Utc::now);
        let duration = (end - session.started_at).num_seconds().max(0) as u64;
        let total = session.bytes_sent + session.bytes_received;
        SessionStatusView {
            session_id: session.id,
            status: session.status,
            client_address: session.client_address,
            started_at: session.started_at,
            ended_at: session.ended_at,
            duration_seconds: duration,
            bytes_sent: session.bytes_sent,
            bytes_received: session.bytes_received,
            avg_mbps: throughput_mbps(total, duration),
            server_load: server.as_ref().map(|s| s.current_load),
            server_ping_ms: server.as_ref().map(|s| s.ping_ms),
            server,
        }
    }

    /// Snapshot a session by id, without an ownership check
    ///
    /// Internal surface for the metrics publisher, which already acts
    /// on behalf of the session's owner.
    pub fn session_view(&self, session_id: Uuid) -> CoreResult<SessionStatusView> {
        let session = self
            .sessions
            .get(&session_id)
            .ok_or_else(|| CoreError::NotFound(format!("session {session_id}")))?;
        Ok(self.view(&session))
    }

    /// Record a liveness proof for a connected session
    pub fn touch(&self, session_id: Uuid) -> CoreResult<()> {
        let mut session = self
            .sessions
            .get_mut(&session_id)
            .ok_or_else(|| CoreError::NotFound(format!("session {session_id}")))?;
        if session.status != SessionStatus::Connected {
            return Err(CoreError::NotConnected);
        }
        session.last_seen = Utc::now();
        Ok(())
    }

    /// Force-disconnect sessions whose heartbeat went stale
    ///
    /// Byte counters keep their last reported values; the session is
    /// marked `ended_by = timeout` and the server slot is released.
    pub fn reap_stale(&self, stale_threshold_seconds: u64) -> usize {
        let now = Utc::now();
        let stale: Vec<Uuid> = self
            .sessions
            .iter()
            .filter(|s| {
                s.status == SessionStatus::Connected
                    && (now - s.last_seen).num_seconds() > stale_threshold_seconds as i64
            })
            .map(|s| s.id)
            .collect();

        let mut reaped = 0;
        for id in stale {
            let (sent, received) = match self.sessions.get(&id) {
                Some(s) => (s.bytes_sent, s.bytes_received),
                None => continue,
            };
            if self.finish(id, None, sent, received, EndReason::Timeout).is_ok() {
                tracing::warn!(session = %id, "stale session reaped");
                reaped += 1;
            }
        }
        reaped
    }

    /// Open sessions per server, the authoritative census for load
    /// reconciliation
    pub fn census(&self) -> HashMap<Uuid, u32> {
        let mut counts: HashMap<Uuid, u32> = HashMap::new();
        for session in self.sessions.iter() {
            if session.status == SessionStatus::Connected {
                if let Some(server_id) = session.server_id {
                    *counts.entry(server_id).or_default() += 1;
                }
            }
        }
        counts
    }

    /// The subscriber's connected session, if any
    pub fn connected_session(&self, subscriber_id: Uuid) -> Option<Session> {
        let session_id = *self.connected.get(&subscriber_id)?;
        self.sessions.get(&session_id).map(|s| s.clone())
    }

    /// Sessions currently connected
    pub fn active_count(&self) -> usize {
        self.connected.len()
    }

    /// Accounting log
    pub fn usage(&self) -> &UsageLog {
        &self.usage
    }
}
