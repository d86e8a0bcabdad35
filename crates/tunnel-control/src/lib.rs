//! Control plane facade
//!
//! The composition root the HTTP binding attaches to. Every operation
//! takes the caller's source IP, traverses the protection layer with
//! its endpoint class, authenticates the bearer token where required,
//! and then delegates to the owning engine.

pub mod plane;

pub use plane::{ControlPlane, UPKEEP_INTERVAL};
