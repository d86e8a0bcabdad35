//! OpenTunnel shared foundation
//!
//! Error model, runtime settings and base types used by every crate in
//! the control plane.

pub mod config;
pub mod error;
pub mod sanitize;
pub mod tier;

pub use config::Settings;
pub use error::{CoreError, CoreResult, ErrorEnvelope};
pub use sanitize::{sanitize_log, validate_ip};
pub use tier::Tier;
