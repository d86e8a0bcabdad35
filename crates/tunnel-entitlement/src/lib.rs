//! Entitlement engine
//!
//! Resolves what a subscriber is currently entitled to: the effective
//! plan, its tier and its expiry. Side effects (assignment, payment
//! confirmation, cancellation) live on the subscription manager; the
//! cached premium flag on the subscriber record is reconciled lazily
//! whenever resolution runs.

pub mod engine;
pub mod plan;
pub mod subscription;

pub use engine::{Entitlement, EntitlementEngine};
pub use plan::{Plan, PlanCatalog, PlanStatus};
pub use subscription::{
    Payment, PaymentMethod, PaymentStatus, Subscription, SubscriptionManager, SubscriptionStatus,
};
