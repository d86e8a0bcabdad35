//! DDoS layer
//!
//! Counts every request per source IP and bans the IP when it crosses
//! the flood threshold. A separate counter tracks failed-auth events
//! and hands out shorter bans. Ban records live in the TTL kv store.

use crate::kv::TtlKv;
use crate::window::WindowStore;
use ipnetwork::IpNetwork;
use std::net::IpAddr;
use std::sync::Arc;
use tunnel_common::{sanitize_log, CoreError, CoreResult, Settings};

/// Window the flood counter accumulates over
const DDOS_WINDOW_SECONDS: u64 = 60;

/// Flood and abuse protection keyed by source IP
pub struct DdosShield {
    kv: Arc<TtlKv>,
    windows: Arc<WindowStore>,
    whitelist: Vec<IpNetwork>,
    ddos_threshold: u32,
    ddos_ban_seconds: u64,
    suspicious_threshold: u32,
    suspicious_window_seconds: u64,
    suspicious_ban_seconds: u64,
}

impl DdosShield {
    pub fn new(settings: &Settings, kv: Arc<TtlKv>, windows: Arc<WindowStore>) -> Self {
        let whitelist = settings
            .ddos_whitelist
            .iter()
            .filter_map(|raw| match raw.parse::<IpNetwork>() {
                Ok(net) => Some(net),
                Err(_) => {
                    tracing::warn!(entry = %sanitize_log(raw), "invalid whitelist entry ignored");
                    None
                }
            })
            .collect();
        Self {
            kv,
            windows,
            whitelist,
            ddos_threshold: settings.ddos_threshold,
            ddos_ban_seconds: settings.ddos_ban_duration_seconds,
            suspicious_threshold: settings.suspicious_threshold,
            suspicious_window_seconds: settings.suspicious_window_seconds,
            suspicious_ban_seconds: settings.suspicious_ban_duration_seconds,
        }
    }

    /// Whether the IP bypasses protection entirely
    pub fn is_whitelisted(&self, ip: IpAddr) -> bool {
        self.whitelist.iter().any(|net| net.contains(ip))
    }

    /// Reject if the IP carries an unexpired ban
    pub fn check_ban(&self, ip: IpAddr) -> CoreResult<()> {
        match self.kv.remaining_ttl(&ban_key(ip)) {
            Some(retry_after) => Err(CoreError::Banned { retry_after }),
            None => Ok(()),
        }
    }

    /// Count the request and ban the IP once it crosses the threshold
    pub fn track_request(&self, ip: IpAddr) -> CoreResult<()> {
        let count = self.windows.record(&format!("ddos:{ip}"), DDOS_WINDOW_SECONDS);
        if count > self.ddos_threshold {
            self.ban(ip, "ddos", self.ddos_ban_seconds);
            return Err(CoreError::Banned {
                retry_after: self.ddos_ban_seconds,
            });
        }
        Ok(())
    }

    /// Record a failed-auth event; enough of them ban the IP
    pub fn record_auth_failure(&self, ip: IpAddr) {
        let count = self
            .windows
            .record(&format!("suspicious:{ip}"), self.suspicious_window_seconds);
        if count > self.suspicious_threshold {
            self.ban(ip, "suspicious_activity", self.suspicious_ban_seconds);
        }
    }

    /// Write a ban record with the given TTL
    pub fn ban(&self, ip: IpAddr, reason: &str, duration_seconds: u64) {
        self.kv.set_ex(&ban_key(ip), reason, duration_seconds);
        tracing::warn!(
            ip = %sanitize_log(&ip.to_string()),
            reason,
            duration_seconds,
            "ip banned"
        );
    }

    /// Lift a ban, returning whether one existed
    pub fn unban(&self, ip: IpAddr) -> bool {
        let lifted = self.kv.delete(&ban_key(ip));
        if lifted {
            tracing::info!(ip = %sanitize_log(&ip.to_string()), "ip unbanned");
        }
        lifted
    }

    /// Active ban count, for the operator stats surface
    pub fn active_bans(&self) -> usize {
        self.kv.len()
    }
}

fn ban_key(ip: IpAddr) -> String {
    format!("ban:{ip}")
}
