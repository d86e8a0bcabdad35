//! Runtime settings
//!
//! Environment-derived configuration with the documented defaults.

use crate::error::{CoreError, CoreResult};
use serde::Deserialize;
use std::env;

/// Control plane settings
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Token signing secret, mandatory
    pub jwt_secret: String,
    /// Token signing algorithm
    pub jwt_algorithm: String,
    /// Access token lifetime in minutes
    pub access_token_ttl_minutes: u32,
    /// Relational store connection string
    pub database_url: String,
    /// Ephemeral kv store connection string
    pub kv_url: String,
    /// CORS origins the binding layer accepts
    pub allowed_origins: Vec<String>,
    /// Host header allowlist
    pub allowed_hosts: Vec<String>,
    /// Master switch for the endpoint rate limiter
    pub rate_limit_enabled: bool,
    /// Master switch for the DDoS layer
    pub ddos_protection_enabled: bool,
    /// Process-wide request cap per minute
    pub global_rate_limit: u32,
    /// Per-IP request cap per minute
    pub ip_rate_limit: u32,
    /// Requests per minute per IP before a DDoS ban
    pub ddos_threshold: u32,
    /// DDoS ban duration in seconds
    pub ddos_ban_duration_seconds: u64,
    /// IPs and CIDRs exempt from protection
    pub ddos_whitelist: Vec<String>,
    /// Failed-auth events per window before a ban
    pub suspicious_threshold: u32,
    /// Failed-auth accounting window in seconds
    pub suspicious_window_seconds: u64,
    /// Suspicious-activity ban duration in seconds
    pub suspicious_ban_duration_seconds: u64,
    /// Verification code lifetime in minutes
    pub otp_ttl_minutes: u32,
    /// Metrics push cadence in seconds
    pub metrics_push_interval_seconds: u64,
    /// Connected sessions older than this without a heartbeat are reaped
    pub session_stale_threshold_seconds: u64,
    /// Payment provider API secret
    pub payment_provider_secret: String,
    /// Payment webhook verification secret
    pub payment_webhook_secret: String,
    /// SMTP relay host
    pub smtp_host: String,
    /// SMTP relay port
    pub smtp_port: u16,
    /// SMTP username
    pub smtp_user: String,
    /// SMTP password
    pub smtp_password: String,
    /// From address on outbound mail
    pub email_from: String,
    /// DNS servers placed in rendered tunnel configurations
    pub dns_servers: Vec<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            jwt_secret: String::new(),
            jwt_algorithm: "HS256".into(),
            access_token_ttl_minutes: 30,
            database_url: "postgres://localhost/opentunnel".into(),
            kv_url: "redis://localhost:6379".into(),
            allowed_origins: vec!["http://localhost:3000".into()],
            allowed_hosts: vec!["localhost".into()],
            rate_limit_enabled: true,
            ddos_protection_enabled: true,
            global_rate_limit: 1000,
            ip_rate_limit: 100,
            ddos_threshold: 500,
            ddos_ban_duration_seconds: 3600,
            ddos_whitelist: Vec::new(),
            suspicious_threshold: 50,
            suspicious_window_seconds: 300,
            suspicious_ban_duration_seconds: 1800,
            otp_ttl_minutes: 10,
            metrics_push_interval_seconds: 1,
            session_stale_threshold_seconds: 600,
            payment_provider_secret: String::new(),
            payment_webhook_secret: String::new(),
            smtp_host: "localhost".into(),
            smtp_port: 587,
            smtp_user: String::new(),
            smtp_password: String::new(),
            email_from: "no-reply@opentunnel.io".into(),
            dns_servers: vec!["1.1.1.1".into(), "1.0.0.1".into()],
        }
    }
}

impl Settings {
    /// Load settings from the environment, falling back to defaults
    ///
    /// `JWT_SECRET` is the one variable without a default.
    pub fn from_env() -> CoreResult<Self> {
        let defaults = Settings::default();
        let jwt_secret = env::var("JWT_SECRET")
            .map_err(|_| CoreError::Internal("JWT_SECRET must be set".into()))?;

        Ok(Self {
            jwt_secret,
            jwt_algorithm: var_or("JWT_ALGORITHM", defaults.jwt_algorithm),
            access_token_ttl_minutes: parsed_or("ACCESS_TOKEN_TTL_MINUTES", defaults.access_token_ttl_minutes),
            database_url: var_or("DATABASE_URL", defaults.database_url),
            kv_url: var_or("KV_URL", defaults.kv_url),
            allowed_origins: list_or("ALLOWED_ORIGINS", defaults.allowed_origins),
            allowed_hosts: list_or("ALLOWED_HOSTS", defaults.allowed_hosts),
            rate_limit_enabled: parsed_or("RATE_LIMIT_ENABLED", defaults.rate_limit_enabled),
            ddos_protection_enabled: parsed_or("DDOS_PROTECTION_ENABLED", defaults.ddos_protection_enabled),
            global_rate_limit: parsed_or("GLOBAL_RATE_LIMIT", defaults.global_rate_limit),
            ip_rate_limit: parsed_or("IP_RATE_LIMIT", defaults.ip_rate_limit),
            ddos_threshold: parsed_or("DDOS_THRESHOLD", defaults.ddos_threshold),
            ddos_ban_duration_seconds: parsed_or("DDOS_BAN_DURATION_SECONDS", defaults.ddos_ban_duration_seconds),
            ddos_whitelist: list_or("DDOS_WHITELIST", defaults.ddos_whitelist),
            suspicious_threshold: parsed_or("SUSPICIOUS_THRESHOLD", defaults.suspicious_threshold),
            suspicious_window_seconds: parsed_or("SUSPICIOUS_WINDOW_SECONDS", defaults.suspicious_window_seconds),
            suspicious_ban_duration_seconds: parsed_or(
                "SUSPICIOUS_BAN_DURATION_SECONDS",
                defaults.suspicious_ban_duration_seconds,
            ),
            otp_ttl_minutes: parsed_or("OTP_TTL_MINUTES", defaults.otp_ttl_minutes),
            metrics_push_interval_seconds: parsed_or(
                "METRICS_PUSH_INTERVAL_SECONDS",
                defaults.metrics_push_interval_seconds,
            ),
            session_stale_threshold_seconds: parsed_or(
                "SESSION_STALE_THRESHOLD_SECONDS",
                defaults.session_stale_threshold_seconds,
            ),
            payment_provider_secret: var_or("PAYMENT_PROVIDER_SECRET", defaults.payment_provider_secret),
            payment_webhook_secret: var_or("PAYMENT_WEBHOOK_SECRET", defaults.payment_webhook_secret),
            smtp_host: var_or("SMTP_HOST", defaults.smtp_host),
            smtp_port: parsed_or("SMTP_PORT", defaults.smtp_port),
            smtp_user: var_or("SMTP_USER", defaults.smtp_user),
            smtp_password: var_or("SMTP_PASSWORD", defaults.smtp_password),
            email_from: var_or("EMAIL_FROM", defaults.email_from),
            dns_servers: list_or("DNS_SERVERS", defaults.dns_servers),
        })
    }

    /// Settings for tests: fixed secret, everything else default
    pub fn for_tests() -> Self {
        Self {
            jwt_secret: "test-secret-do-not-deploy".into(),
            ..Self::default()
        }
    }
}

fn var_or(name: &str, default: String) -> String {
    env::var(name).unwrap_or(default)
}

fn parsed_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn list_or(name: &str, default: Vec<String>) -> Vec<String> {
    match env::var(name) {
        Ok(raw) => raw
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_values() {
        let s = Settings::default();
        assert_eq!(s.jwt_algorithm, "HS256");
        assert_eq!(s.access_token_ttl_minutes, 30);
        assert_eq!(s.global_rate_limit, 1000);
        assert_eq!(s.ip_rate_limit, 100);
        assert_eq!(s.ddos_threshold, 500);
        assert_eq!(s.ddos_ban_duration_seconds, 3600);
        assert_eq!(s.suspicious_threshold, 50);
        assert_eq!(s.suspicious_window_seconds, 300);
        assert_eq!(s.suspicious_ban_duration_seconds, 1800);
        assert_eq!(s.otp_ttl_minutes, 10);
        assert_eq!(s.metrics_push_interval_seconds, 1);
        assert_eq!(s.session_stale_threshold_seconds, 600);
    }

    #[test]
    fn test_list_parsing() {
        env::set_var("OPENTUNNEL_TEST_LIST", "10.0.0.0/8, 192.168.1.1 ,");
        let parsed = list_or("OPENTUNNEL_TEST_LIST", Vec::new());
        assert_eq!(parsed, vec!["10.0.0.0/8".to_string(), "192.168.1.1".to_string()]);
        env::remove_var("OPENTUNNEL_TEST_LIST");
    }
}
