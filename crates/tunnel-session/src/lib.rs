//! Session manager
//!
//! The connection state machine: admit a subscriber, pick a server,
//! lease an in-tunnel address, render the client tunnel configuration,
//! and account for the session on disconnect. One connected session per
//! subscriber, enforced at the store.

pub mod address;
pub mod manager;
pub mod model;
pub mod usage;
pub mod wg;

pub use manager::SessionManager;
pub use model::{
    ConnectGrant, DisconnectSummary, EndReason, Session, SessionStatus, SessionStatusView,
};
pub use usage::{UsageLog, UsageRecord};
