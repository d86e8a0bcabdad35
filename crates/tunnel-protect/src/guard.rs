//! Protection layer composition
//!
//! One entry point for every inbound operation. Policy precedence on a
//! single request: ban check, DDoS count, endpoint rate limit, global
//! per-IP cap, process-wide cap. The first failing check short-circuits.

use crate::ddos::DdosShield;
use crate::kv::TtlKv;
use crate::policy::{EndpointClass, RatePolicy};
use crate::window::WindowStore;
use serde::Serialize;
use std::net::IpAddr;
use std::sync::Arc;
use tunnel_common::{sanitize_log, CoreError, CoreResult, Settings};
use uuid::Uuid;

/// Limiter observability attached to admitted requests
#[derive(Debug, Clone, Copy, Serialize)]
pub struct RateLimitStatus {
    pub limit: u32,
    pub remaining: u32,
    /// Seconds until the window frees a slot
    pub reset_seconds: u64,
    /// True when the caller bypassed the limiter entirely
    pub exempt: bool,
}

impl RateLimitStatus {
    fn exempt() -> Self {
        Self {
            limit: 0,
            remaining: 0,
            reset_seconds: 0,
            exempt: true,
        }
    }
}

/// Process-wide counters for the operator surface
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ProtectionStats {
    pub tracked_keys: usize,
    pub active_bans: usize,
}

/// The multi-tier request protection layer
pub struct ProtectionLayer {
    windows: Arc<WindowStore>,
    ddos: DdosShield,
    rate_limit_enabled: bool,
    ddos_enabled: bool,
    ip_cap: RatePolicy,
    process_cap: RatePolicy,
}

impl ProtectionLayer {
    pub fn new(settings: &Settings) -> Self {
        let kv = Arc::new(TtlKv::new());
        let windows = Arc::new(WindowStore::new());
        Self {
            ddos: DdosShield::new(settings, kv, windows.clone()),
            windows,
            rate_limit_enabled: settings.rate_limit_enabled,
            ddos_enabled: settings.ddos_protection_enabled,
            ip_cap: RatePolicy::new(settings.ip_rate_limit, 60, 0),
            process_cap: RatePolicy::new(settings.global_rate_limit, 60, 0),
        }
    }

    /// Admit or reject one request
    ///
    /// `bypass` marks super-user callers; whitelisted IPs bypass too.
    /// Authenticated endpoints pass the subscriber so the endpoint
    /// window is enforced per identity as well as per IP.
    pub fn check(
        &self,
        ip: IpAddr,
        endpoint: EndpointClass,
        subscriber: Option<Uuid>,
        bypass: bool,
    ) -> CoreResult<RateLimitStatus> {
        if bypass || self.ddos.is_whitelisted(ip) {
            return Ok(RateLimitStatus::exempt());
        }

        if self.ddos_enabled {
            self.ddos.check_ban(ip).map_err(|err| self.log_reject(ip, endpoint, &err))?;
            self.ddos
                .track_request(ip)
                .map_err(|err| self.log_reject(ip, endpoint, &err))?;
        }

        if !self.rate_limit_enabled {
            return Ok(RateLimitStatus::exempt());
        }

        let policy = endpoint.policy();
        let status = self.check_window(
            &format!("rl:{}:{ip}", endpoint.as_str()),
            policy,
            ip,
            endpoint,
        )?;
        if let Some(subscriber) = subscriber {
            self.check_window(
                &format!("rl:{}:uid:{subscriber}", endpoint.as_str()),
                policy,
                ip,
                endpoint,
            )?;
        }

        self.check_window(&format!("rl:ip:{ip}"), self.ip_cap, ip, endpoint)?;
        self.check_window("rl:global", self.process_cap, ip, endpoint)?;

        Ok(status)
    }

    /// Read-only limiter status for a key, for the operator surface
    pub fn status(&self, ip: IpAddr, endpoint: EndpointClass) -> RateLimitStatus {
        let policy = endpoint.policy();
        let key = format!("rl:{}:{ip}", endpoint.as_str());
        let count = self.windows.count(&key, policy.window_seconds);
        RateLimitStatus {
            limit: policy.cap(),
            remaining: policy.cap().saturating_sub(count),
            reset_seconds: self.windows.reset_in(&key, policy.window_seconds),
            exempt: false,
        }
    }

    /// Clear limiter state for one (endpoint, IP) pair
    pub fn reset(&self, ip: IpAddr, endpoint: EndpointClass) -> bool {
        self.windows.reset(&format!("rl:{}:{ip}", endpoint.as_str()))
    }

    /// Feed a failed-auth event into the suspicious-activity counter
    pub fn record_auth_failure(&self, ip: IpAddr) {
        if self.ddos_enabled {
            self.ddos.record_auth_failure(ip);
        }
    }

    /// Lift a ban
    pub fn unban(&self, ip: IpAddr) -> bool {
        self.ddos.unban(ip)
    }

    /// Process-wide protection counters
    pub fn stats(&self) -> ProtectionStats {
        ProtectionStats {
            tracked_keys: self.windows.tracked_keys(),
            active_bans: self.ddos.active_bans(),
        }
    }

    fn check_window(
        &self,
        key: &str,
        policy: RatePolicy,
        ip: IpAddr,
        endpoint: EndpointClass,
    ) -> CoreResult<RateLimitStatus> {
        let decision = self
            .windows
            .check_and_record(key, policy.window_seconds, policy.cap());
        if decision.allowed {
            Ok(RateLimitStatus {
                limit: policy.cap(),
                remaining: policy.cap().saturating_sub(decision.count),
                reset_seconds: self.windows.reset_in(key, policy.window_seconds),
                exempt: false,
            })
        } else {
            let err = CoreError::RateLimited {
                retry_after: decision.retry_after,
            };
            Err(self.log_reject(ip, endpoint, &err))
        }
    }

    fn log_reject(&self, ip: IpAddr, endpoint: EndpointClass, err: &CoreError) -> CoreError {
        tracing::warn!(
            ip = %sanitize_log(&ip.to_string()),
            endpoint = %endpoint,
            code = err.code(),
            "request rejected"
        );
        err.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layer(settings: Settings) -> ProtectionLayer {
        ProtectionLayer::new(&settings)
    }

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_endpoint_cap_is_limit_plus_burst() {
        let protect = layer(Settings::for_tests());
        let caller = ip("203.0.113.1");
        // auth_login: 5 + 2 burst.
        for _ in 0..7 {
            protect.check(caller, EndpointClass::AuthLogin, None, false).unwrap();
        }
        let err = protect
            .check(caller, EndpointClass::AuthLogin, None, false)
            .unwrap_err();
        match err {
            CoreError::RateLimited { retry_after } => assert!(retry_after <= 300),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_ban_precedes_rate_limit() {
        let settings = Settings {
            ddos_threshold: 2,
            ..Settings::for_tests()
        };
        let protect = layer(settings);
        let attacker = ip("203.0.113.2");
        // Trip the flood threshold on a permissive endpoint.
        let mut banned = false;
        for _ in 0..10 {
            if protect.check(attacker, EndpointClass::General, None, false).is_err() {
                banned = true;
                break;
            }
        }
        assert!(banned);
        // Now even the first auth_login attempt reports the ban, not a
        // fresh rate limit.
        assert!(matches!(
            protect.check(attacker, EndpointClass::AuthLogin, None, false),
            Err(CoreError::Banned { .. })
        ));
    }

    #[test]
    fn test_per_identity_window_limits_across_ips() {
        let protect = layer(Settings::for_tests());
        let subscriber = Some(Uuid::new_v4());
        // Same subscriber hammering from many IPs still hits the
        // identity-keyed login window.
        let mut rejected = false;
        for i in 0..20 {
            let caller = ip(&format!("203.0.113.{}", 10 + i));
            if protect
                .check(caller, EndpointClass::AuthLogin, subscriber, false)
                .is_err()
            {
                rejected = true;
                break;
            }
        }
        assert!(rejected);
    }

    #[test]
    fn test_global_ip_cap_spans_endpoints() {
        let settings = Settings {
            ip_rate_limit: 5,
            ..Settings::for_tests()
        };
        let protect = layer(settings);
        let caller = ip("203.0.113.3");
        for _ in 0..5 {
            protect.check(caller, EndpointClass::General, None, false).unwrap();
        }
        assert!(matches!(
            protect.check(caller, EndpointClass::VpnStatus, None, false),
            Err(CoreError::RateLimited { .. })
        ));
    }

    #[test]
    fn test_process_cap_spans_ips() {
        let settings = Settings {
            global_rate_limit: 3,
            ..Settings::for_tests()
        };
        let protect = layer(settings);
        for i in 0..3 {
            protect
                .check(ip(&format!("203.0.113.{}", 20 + i)), EndpointClass::General, None, false)
                .unwrap();
        }
        assert!(matches!(
            protect.check(ip("203.0.113.99"), EndpointClass::General, None, false),
            Err(CoreError::RateLimited { .. })
        ));
    }

    #[test]
    fn test_superuser_and_whitelist_bypass() {
        let settings = Settings {
            global_rate_limit: 1,
            ddos_whitelist: vec!["198.51.100.1".into()],
            ..Settings::for_tests()
        };
        let protect = layer(settings);
        // Exhaust the process cap.
        protect.check(ip("203.0.113.4"), EndpointClass::General, None, false).unwrap();

        for _ in 0..10 {
            assert!(protect.check(ip("203.0.113.4"), EndpointClass::General, None, true).unwrap().exempt);
            assert!(protect
                .check(ip("198.51.100.1"), EndpointClass::General, None, false)
                .unwrap()
                .exempt);
        }
    }

    #[test]
    fn test_disabled_limiter_admits_everything() {
        let settings = Settings {
            rate_limit_enabled: false,
            ddos_protection_enabled: false,
            ..Settings::for_tests()
        };
        let protect = layer(settings);
        let caller = ip("203.0.113.5");
        for _ in 0..500 {
            assert!(protect.check(caller, EndpointClass::AuthLogin, None, false).is_ok());
        }
    }

    #[test]
    fn test_status_and_reset_surface() {
        let protect = layer(Settings::for_tests());
        let caller = ip("203.0.113.6");
        protect.check(caller, EndpointClass::Payments, None, false).unwrap();

        let status = protect.status(caller, EndpointClass::Payments);
        // payments: 10 + 3 burst.
        assert_eq!(status.limit, 13);
        assert_eq!(status.remaining, 12);
        assert!(status.reset_seconds <= 300);

        assert!(protect.reset(caller, EndpointClass::Payments));
        assert_eq!(protect.status(caller, EndpointClass::Payments).remaining, 13);
    }

    #[test]
    fn test_suspicious_failures_ban_via_guard() {
        let settings = Settings {
            suspicious_threshold: 3,
            ..Settings::for_tests()
        };
        let protect = layer(settings);
        let bruteforcer = ip("203.0.113.7");
        for _ in 0..4 {
            protect.record_auth_failure(bruteforcer);
        }
        assert!(matches!(
            protect.check(bruteforcer, EndpointClass::AuthLogin, None, false),
            Err(CoreError::Banned { .. })
        ));
        assert_eq!(protect.stats().active_bans, 1);
    }
}
