//! Server registry
//!
//! The set of tunnel nodes the plane can place sessions on: status,
//! tier, observed load and latency, capacity, and the deterministic
//! selection the session manager admits against.

pub mod model;
pub mod registry;

pub use model::{Server, ServerConfig, ServerStatus, ServerUpdate};
pub use registry::{ServerFilter, ServerRegistry};
