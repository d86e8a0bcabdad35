//! Endpoint-class rate policies

use serde::{Deserialize, Serialize};

/// Coarse-grained operation label the limiter keys policies on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndpointClass {
    AuthRegister,
    AuthVerifyEmail,
    AuthLogin,
    AuthPasswordReset,
    UsersProfile,
    Subscriptions,
    VpnServersList,
    VpnConnect,
    VpnDisconnect,
    VpnStatus,
    Payments,
    WebsocketSession,
    WebsocketAdmin,
    General,
}

impl EndpointClass {
    /// Stable name used in counter keys and logs
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AuthRegister => "auth_register",
            Self::AuthVerifyEmail => "auth_verify_email",
            Self::AuthLogin => "auth_login",
            Self::AuthPasswordReset => "auth_password_reset",
            Self::UsersProfile => "users_profile",
            Self::Subscriptions => "subscriptions",
            Self::VpnServersList => "vpn_servers_list",
            Self::VpnConnect => "vpn_connect",
            Self::VpnDisconnect => "vpn_disconnect",
            Self::VpnStatus => "vpn_status",
            Self::Payments => "payments",
            Self::WebsocketSession => "websocket_session",
            Self::WebsocketAdmin => "websocket_admin",
            Self::General => "general",
        }
    }

    /// Default policy for this class
    pub fn policy(self) -> RatePolicy {
        match self {
            Self::AuthLogin => RatePolicy::new(5, 300, 2),
            Self::AuthRegister => RatePolicy::new(3, 3600, 1),
            Self::AuthPasswordReset => RatePolicy::new(3, 3600, 1),
            Self::VpnConnect => RatePolicy::new(20, 60, 5),
            Self::VpnDisconnect => RatePolicy::new(30, 60, 10),
            Self::Payments => RatePolicy::new(10, 300, 3),
            Self::WebsocketSession | Self::WebsocketAdmin => RatePolicy::new(5, 60, 2),
            _ => RatePolicy::new(60, 60, 20),
        }
    }
}

impl std::fmt::Display for EndpointClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sliding-window policy: `limit` requests per `window_seconds`, with a
/// `burst_allowance` on top
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RatePolicy {
    pub limit: u32,
    pub window_seconds: u64,
    pub burst_allowance: u32,
}

impl RatePolicy {
    pub const fn new(limit: u32, window_seconds: u64, burst_allowance: u32) -> Self {
        Self {
            limit,
            window_seconds,
            burst_allowance,
        }
    }

    /// Hard admission cap for the window
    pub fn cap(&self) -> u32 {
        self.limit + self.burst_allowance
    }
}
