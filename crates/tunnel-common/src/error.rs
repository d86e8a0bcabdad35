//! Error types for the OpenTunnel control plane

use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

/// Control plane error type
///
/// Every business failure the plane can surface, with a stable symbolic
/// code and an HTTP status mapping for the binding layer.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CoreError {
    /// Malformed or semantically invalid input
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Missing, expired or unverifiable credentials
    #[error("authentication failed")]
    Unauthenticated,

    /// Authenticated but not allowed
    #[error("not authorized: {0}")]
    Unauthorized(String),

    /// Email address not yet verified
    #[error("email verification required")]
    Unverified,

    /// Account deactivated
    #[error("account is disabled")]
    Disabled,

    /// Entity does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// Unique constraint collision
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Subscriber already has a connected session
    #[error("already connected (session {session_id})")]
    AlreadyConnected {
        /// Existing connected session, so the client can reconcile
        session_id: Uuid,
    },

    /// Session is not in the connected state
    #[error("session is not connected")]
    NotConnected,

    /// No server satisfies the selection constraints
    #[error("no server capacity available")]
    NoCapacity,

    /// Server's in-tunnel address pool is drained
    #[error("tunnel address pool exhausted")]
    AddressExhausted,

    /// Premium entitlement required for the requested server
    #[error("premium subscription required")]
    PremiumRequired {
        /// Plan the caller could upgrade to
        upgrade_plan: Option<Uuid>,
    },

    /// Payment was rejected by the provider
    #[error("payment failed: {0}")]
    PaymentFailed(String),

    /// Request rejected by the rate limiter
    #[error("rate limited, retry after {retry_after}s")]
    RateLimited {
        /// Seconds until the window frees up
        retry_after: u64,
    },

    /// Source IP carries an unexpired ban
    #[error("banned, retry after {retry_after}s")]
    Banned {
        /// Seconds left on the ban
        retry_after: u64,
    },

    /// External call exceeded its deadline
    #[error("timeout: {0}")]
    Timeout(String),

    /// Backing dependency unavailable
    #[error("dependency unavailable: {0}")]
    DependencyDown(String),

    /// Unexpected internal failure, detail never leaves the process
    #[error("internal error")]
    Internal(String),
}

/// Result alias used across the control plane
pub type CoreResult<T> = Result<T, CoreError>;

impl CoreError {
    /// Stable symbolic code for the error envelope
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "INVALID_INPUT",
            Self::Unauthenticated => "UNAUTHENTICATED",
            Self::Unauthorized(_) => "UNAUTHORIZED",
            Self::Unverified => "UNVERIFIED",
            Self::Disabled => "DISABLED",
            Self::NotFound(_) => "NOT_FOUND",
            Self::AlreadyExists(_) => "ALREADY_EXISTS",
            Self::AlreadyConnected { .. } => "ALREADY_CONNECTED",
            Self::NotConnected => "NOT_CONNECTED",
            Self::NoCapacity => "NO_CAPACITY",
            Self::AddressExhausted => "ADDRESS_EXHAUSTED",
            Self::PremiumRequired { .. } => "PREMIUM_REQUIRED",
            Self::PaymentFailed(_) => "PAYMENT_FAILED",
            Self::RateLimited { .. } => "RATE_LIMITED",
            Self::Banned { .. } => "BANNED",
            Self::Timeout(_) => "TIMEOUT",
            Self::DependencyDown(_) => "DEPENDENCY_DOWN",
            Self::Internal(_) => "INTERNAL",
        }
    }

    /// HTTP status the binding layer should answer with
    pub fn http_status(&self) -> u16 {
        match self {
            Self::InvalidInput(_) => 400,
            Self::Unauthenticated => 401,
            Self::Unauthorized(_) | Self::Unverified | Self::Disabled => 403,
            Self::PremiumRequired { .. } => 403,
            Self::NotFound(_) => 404,
            Self::AlreadyExists(_) | Self::AlreadyConnected { .. } => 409,
            Self::NotConnected | Self::NoCapacity | Self::AddressExhausted => 409,
            Self::PaymentFailed(_) => 422,
            Self::RateLimited { .. } | Self::Banned { .. } => 429,
            Self::Timeout(_) => 504,
            Self::DependencyDown(_) => 503,
            Self::Internal(_) => 500,
        }
    }

    /// `Retry-After` seconds for 429 responses
    pub fn retry_after(&self) -> Option<u64> {
        match self {
            Self::RateLimited { retry_after } | Self::Banned { retry_after } => Some(*retry_after),
            _ => None,
        }
    }
}

/// Wire-shaped error envelope
#[derive(Debug, Clone, Serialize)]
pub struct ErrorEnvelope {
    /// Error body
    pub error: ErrorBody,
}

/// Body of the error envelope
#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    /// Symbolic code
    pub code: String,
    /// Human-readable message
    pub message: String,
    /// Structured detail, empty for most failures
    pub details: Vec<String>,
}

impl From<&CoreError> for ErrorEnvelope {
    fn from(err: &CoreError) -> Self {
        // Internal detail stays in the logs.
        let message = match err {
            CoreError::Internal(_) => "internal error".to_string(),
            other => other.to_string(),
        };
        let details = match err {
            CoreError::AlreadyConnected { session_id } => vec![session_id.to_string()],
            CoreError::PremiumRequired {
                upgrade_plan: Some(plan),
            } => vec![plan.to_string()],
            _ => Vec::new(),
        };
        Self {
            error: ErrorBody {
                code: err.code().to_string(),
                message,
                details,
            },
        }
    }
}
