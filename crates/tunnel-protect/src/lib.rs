//! Protection layer
//!
//! Fronts every control plane operation: ban check first, then DDoS
//! accounting, then the endpoint-class rate limit, then the global
//! per-IP and process caps. The first failing check short-circuits.
//! State lives in a TTL kv store so the semantics survive a move to an
//! external store unchanged.

pub mod ddos;
pub mod guard;
pub mod kv;
pub mod policy;
pub mod window;

pub use ddos::DdosShield;
pub use guard::{ProtectionLayer, ProtectionStats, RateLimitStatus};
pub use kv::TtlKv;
pub use policy::{EndpointClass, RatePolicy};
pub use window::WindowStore;
