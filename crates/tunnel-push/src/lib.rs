//! Metrics push
//!
//! Per-subscriber fan-out of live session snapshots at a configured
//! cadence, plus the operator channel carrying plane-wide aggregates.
//! Buffers are bounded; slow consumers lose the oldest snapshots, never
//! block producers.

pub mod hub;
pub mod operator;
pub mod snapshot;

pub use hub::{run_session_publisher, PushHub};
pub use operator::{aggregate, run_operator_publisher, OperatorHub};
pub use snapshot::{OperatorSnapshot, SessionSnapshot};
