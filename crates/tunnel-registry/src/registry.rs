//! Registry operations and server selection

use crate::model::{Server, ServerConfig, ServerStatus, ServerUpdate};
use chrono::Utc;
use dashmap::DashMap;
use ipnetwork::IpNetwork;
use std::collections::HashMap;
use tunnel_common::{CoreError, CoreResult, Tier};
use uuid::Uuid;

/// Listing filter
#[derive(Debug, Clone, Default)]
pub struct ServerFilter {
    pub location: Option<String>,
    pub tier: Option<Tier>,
    pub status: Option<ServerStatus>,
}

/// Registry of tunnel nodes
pub struct ServerRegistry {
    servers: DashMap<Uuid, Server>,
}

impl ServerRegistry {
    pub fn new() -> Self {
        Self { servers: DashMap::new() }
    }

    /// Register a tunnel node
    pub fn create(&self, config: ServerConfig) -> CoreResult<Server> {
        if config.max_connections == 0 {
            return Err(CoreError::InvalidInput("max_connections must be positive".into()));
        }
        let allowed_prefixes = if config.allowed_prefixes.is_empty() {
            vec!["0.0.0.0/0".parse::<IpNetwork>().expect("default route parses")]
        } else {
            config.allowed_prefixes
        };
        let server = Server {
            id: Uuid::new_v4(),
            hostname: config.hostname,
            location: config.location,
            endpoint_host: config.endpoint_host,
            endpoint_port: config.endpoint_port,
            public_key: config.public_key,
            tunnel_network: config.tunnel_network,
            allowed_prefixes,
            tier: config.tier,
            status: ServerStatus::Active,
            current_load: 0.0,
            ping_ms: config.ping_ms,
            max_connections: config.max_connections,
            active_sessions: 0,
            created_at: Utc::now(),
        };
        self.servers.insert(server.id, server.clone());
        tracing::info!(server = %server.hostname, location = %server.location, "server registered");
        Ok(server)
    }

    pub fn get(&self, id: Uuid) -> CoreResult<Server> {
        self.servers
            .get(&id)
            .map(|s| s.clone())
            .ok_or_else(|| CoreError::NotFound(format!("server {id}")))
    }

    /// List servers matching the filter, ordered by load, ping, id
    pub fn list(&self, filter: &ServerFilter) -> Vec<Server> {
        let mut servers: Vec<Server> = self
            .servers
            .iter()
            .filter(|s| {
                filter.location.as_deref().map_or(true, |loc| s.location == loc)
                    && filter.tier.map_or(true, |t| s.tier == t)
                    && filter.status.map_or(true, |st| s.status == st)
            })
            .map(|s| s.clone())
            .collect();
        sort_for_selection(&mut servers);
        servers
    }

    /// Apply a partial update
    pub fn update(&self, id: Uuid, update: ServerUpdate) -> CoreResult<Server> {
        let mut server = self
            .servers
            .get_mut(&id)
            .ok_or_else(|| CoreError::NotFound(format!("server {id}")))?;
        if let Some(hostname) = update.hostname {
            server.hostname = hostname;
        }
        if let Some(location) = update.location {
            server.location = location;
        }
        if let Some(status) = update.status {
            server.status = status;
        }
        if let Some(tier) = update.tier {
            server.tier = tier;
        }
        if let Some(ping) = update.ping_ms {
            server.ping_ms = ping;
        }
        if let Some(max) = update.max_connections {
            if max == 0 {
                return Err(CoreError::InvalidInput("max_connections must be positive".into()));
            }
            server.max_connections = max;
        }
        Ok(server.clone())
    }

    /// Remove a node, or take it offline if sessions still reference it
    ///
    /// Returns true when the record was actually removed.
    pub fn delete(&self, id: Uuid) -> CoreResult<bool> {
        {
            let mut server = self
                .servers
                .get_mut(&id)
                .ok_or_else(|| CoreError::NotFound(format!("server {id}")))?;
            if server.active_sessions > 0 {
                server.status = ServerStatus::Offline;
                tracing::warn!(server = %server.hostname, "delete deferred, sessions still open");
                return Ok(false);
            }
        }
        self.servers.remove(&id);
        Ok(true)
    }

    /// Nudge a node's load, clamped to [0.0, 1.0]
    ///
    /// The row lock held for the read-modify-write makes concurrent
    /// adjustments atomic.
    pub fn adjust_load(&self, id: Uuid, delta: f64) -> CoreResult<f64> {
        let mut server = self
            .servers
            .get_mut(&id)
            .ok_or_else(|| CoreError::NotFound(format!("server {id}")))?;
        server.current_load = (server.current_load + delta).clamp(0.0, 1.0);
        Ok(server.current_load)
    }

    /// Pick the server for a new session
    ///
    /// Candidates are active nodes within the caller's tier ceiling. An
    /// unmatched location falls back to the unfiltered candidate set
    /// rather than failing. Full nodes are skipped. Ordering is load
    /// ascending, then ping, then id, so ties break deterministically.
    pub fn select(&self, tier_ceiling: Tier, location: Option<&str>) -> CoreResult<Server> {
        let candidates: Vec<Server> = self
            .servers
            .iter()
            .filter(|s| s.status == ServerStatus::Active && tier_ceiling.allows(s.tier))
            .map(|s| s.clone())
            .collect();

        let mut pool: Vec<Server> = match location {
            Some(loc) => {
                let located: Vec<Server> = candidates
                    .iter()
                    .filter(|s| s.location == loc)
                    .cloned()
                    .collect();
                if located.is_empty() {
                    candidates
                } else {
                    located
                }
            }
            None => candidates,
        };

        pool.retain(Server::has_capacity);
        sort_for_selection(&mut pool);
        pool.into_iter().next().ok_or(CoreError::NoCapacity)
    }

    /// Claim a session slot on a node
    ///
    /// Re-checks capacity under the row lock so concurrent admissions
    /// cannot overshoot `max_connections`. Returns the updated record.
    pub fn acquire_slot(&self, id: Uuid) -> CoreResult<Server> {
        let mut server = self
            .servers
            .get_mut(&id)
            .ok_or_else(|| CoreError::NotFound(format!("server {id}")))?;
        if !server.has_capacity() {
            return Err(CoreError::NoCapacity);
        }
        server.active_sessions += 1;
        let step = server.load_step();
        server.current_load = (server.current_load + step).clamp(0.0, 1.0);
        Ok(server.clone())
    }

    /// Release a session slot
    pub fn release_slot(&self, id: Uuid) -> CoreResult<()> {
        let mut server = self
            .servers
            .get_mut(&id)
            .ok_or_else(|| CoreError::NotFound(format!("server {id}")))?;
        server.active_sessions = server.active_sessions.saturating_sub(1);
        let step = server.load_step();
        server.current_load = (server.current_load - step).clamp(0.0, 1.0);
        Ok(())
    }

    /// Recompute load from an authoritative open-session census
    ///
    /// Run periodically to correct drift between load adjustments and
    /// the session table; servers absent from the census count zero.
    pub fn reconcile_loads(&self, census: &HashMap<Uuid, u32>) {
        for mut server in self.servers.iter_mut() {
            let count = census.get(&server.id).copied().unwrap_or(0);
            server.active_sessions = count;
            server.current_load =
                (count as f64 * server.load_step()).clamp(0.0, 1.0);
        }
    }

    /// Nodes currently admitting sessions
    pub fn active_count(&self) -> usize {
        self.servers
            .iter()
            .filter(|s| s.status == ServerStatus::Active)
            .count()
    }
}

impl Default for ServerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn sort_for_selection(servers: &mut [Server]) {
    servers.sort_by(|a, b| {
        a.current_load
            .total_cmp(&b.current_load)
            .then(a.ping_ms.cmp(&b.ping_ms))
            .then(a.id.cmp(&b.id))
    });
}
