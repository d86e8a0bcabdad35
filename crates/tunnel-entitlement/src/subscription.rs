//! Subscription and payment lifecycle
//!
//! A subscription is created pending together with a pending payment;
//! the payment callback activates it. Status transitions are monotone:
//! pending -> active -> canceled | expired, terminal states never
//! transition back.

use crate::plan::PlanCatalog;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tunnel_common::{CoreError, CoreResult};
use uuid::Uuid;

/// Subscription lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionStatus {
    /// Awaiting a successful payment
    Pending,
    Active,
    Canceled,
    Expired,
}

/// How a payment was made
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentMethod {
    Card,
    Wallet,
    InApp,
    Crypto,
}

/// Provider-facing payment state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Success,
    Failed,
}

/// A subscription of one subscriber to one plan
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    pub id: Uuid,
    pub subscriber_id: Uuid,
    pub plan_id: Uuid,
    /// Set on activation
    pub start_time: Option<DateTime<Utc>>,
    /// Set on activation; access runs until this instant
    pub end_time: Option<DateTime<Utc>>,
    pub status: SubscriptionStatus,
    pub auto_renew: bool,
    /// Cancellation request marker; access continues until end_time
    pub canceled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// A payment referencing a subscription
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payment {
    pub id: Uuid,
    pub subscriber_id: Uuid,
    pub subscription_id: Uuid,
    pub amount: Decimal,
    pub method: PaymentMethod,
    pub status: PaymentStatus,
    /// Provider-side reference, set by the callback
    pub external_ref: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Subscription and payment manager
pub struct SubscriptionManager {
    catalog: Arc<PlanCatalog>,
    pub(crate) subscriptions: DashMap<Uuid, Subscription>,
    payments: DashMap<Uuid, Payment>,
    by_subscriber: DashMap<Uuid, Vec<Uuid>>,
}

impl SubscriptionManager {
    pub fn new(catalog: Arc<PlanCatalog>) -> Self {
        Self {
            catalog,
            subscriptions: DashMap::new(),
            payments: DashMap::new(),
            by_subscriber: DashMap::new(),
        }
    }

    /// Catalog this manager assigns from
    pub fn catalog(&self) -> &PlanCatalog {
        &self.catalog
    }

    /// Create a pending subscription and its pending payment
    ///
    /// A zero-priced plan synthesizes the payment callback immediately
    /// and comes back already active.
    pub fn assign(
        &self,
        subscriber_id: Uuid,
        plan_id: Uuid,
        auto_renew: bool,
        method: PaymentMethod,
    ) -> CoreResult<(Subscription, Payment)> {
        let plan = self.catalog.assignable(plan_id)?;
        let now = Utc::now();

        let subscription = Subscription {
            id: Uuid::new_v4(),
            subscriber_id,
            plan_id,
            start_time: None,
            end_time: None,
            status: SubscriptionStatus::Pending,
            auto_renew,
            canceled_at: None,
            created_at: now,
        };
        let payment = Payment {
            id: Uuid::new_v4(),
            subscriber_id,
            subscription_id: subscription.id,
            amount: plan.price,
            method,
            status: PaymentStatus::Pending,
            external_ref: None,
            created_at: now,
        };

        self.subscriptions.insert(subscription.id, subscription.clone());
        self.payments.insert(payment.id, payment.clone());
        self.by_subscriber
            .entry(subscriber_id)
            .or_default()
            .push(subscription.id);

        if plan.price.is_zero() {
            let subscription = self.confirm_payment(payment.id, "success")?;
            let payment = self.payment(payment.id)?;
            return Ok((subscription, payment));
        }

        Ok((subscription, payment))
    }

    /// Apply the provider callback for a payment
    ///
    /// On success the referenced subscription activates with
    /// start_time=now and end_time=now+duration. Anything but a success
    /// status surfaces `PaymentFailed` and leaves the subscription
    /// pending.
    pub fn confirm_payment(&self, payment_id: Uuid, external_status: &str) -> CoreResult<Subscription> {
        let (subscription_id, plan_id) = {
            let payment = self
                .payments
                .get(&payment_id)
                .ok_or_else(|| CoreError::NotFound(format!("payment {payment_id}")))?;
            let sub = self
                .subscriptions
                .get(&payment.subscription_id)
                .ok_or_else(|| CoreError::NotFound(format!("subscription {}", payment.subscription_id)))?;
            (sub.id, sub.plan_id)
        };

        if !external_status.eq_ignore_ascii_case("success") {
            if let Some(mut payment) = self.payments.get_mut(&payment_id) {
                payment.status = PaymentStatus::Failed;
            }
            return Err(CoreError::PaymentFailed(format!(
                "provider reported {external_status}"
            )));
        }

        let plan = self.catalog.get(plan_id)?;
        let subscriber_id = {
            let mut payment = self
                .payments
                .get_mut(&payment_id)
                .ok_or_else(|| CoreError::NotFound(format!("payment {payment_id}")))?;
            payment.status = PaymentStatus::Success;
            payment.subscriber_id
        };

        // One active subscription per subscriber: activating a new one
        // supersedes whatever was active before.
        if let Some(current) = self.current_active(subscriber_id) {
            if current.id != subscription_id {
                if let Some(mut old) = self.subscriptions.get_mut(&current.id) {
                    old.status = SubscriptionStatus::Canceled;
                    old.canceled_at = Some(Utc::now());
                }
            }
        }

        let now = Utc::now();
        let mut sub = self
            .subscriptions
            .get_mut(&subscription_id)
            .ok_or_else(|| CoreError::NotFound(format!("subscription {subscription_id}")))?;
        sub.status = SubscriptionStatus::Active;
        sub.start_time = Some(now);
        sub.end_time = Some(now + Duration::days(plan.duration_days as i64));
        tracing::info!(subscription = %sub.id, plan = %plan.name, "subscription activated");
        Ok(sub.clone())
    }

    /// Request cancellation: auto-renew off, access kept until end_time
    pub fn cancel(&self, subscriber_id: Uuid) -> CoreResult<Subscription> {
        let current = self
            .current_active(subscriber_id)
            .ok_or_else(|| CoreError::NotFound("no active subscription".into()))?;
        let mut sub = self
            .subscriptions
            .get_mut(&current.id)
            .ok_or_else(|| CoreError::NotFound(format!("subscription {}", current.id)))?;
        sub.auto_renew = false;
        sub.canceled_at = Some(Utc::now());
        Ok(sub.clone())
    }

    /// Most recent subscription of a subscriber, any status
    pub fn current(&self, subscriber_id: Uuid) -> Option<Subscription> {
        let ids = self.by_subscriber.get(&subscriber_id)?;
        ids.iter()
            .filter_map(|id| self.subscriptions.get(id).map(|s| s.clone()))
            .max_by_key(|s| s.created_at)
    }

    /// The subscriber's subscription in state active, if any
    pub fn current_active(&self, subscriber_id: Uuid) -> Option<Subscription> {
        let ids = self.by_subscriber.get(&subscriber_id)?;
        ids.iter()
            .filter_map(|id| self.subscriptions.get(id).map(|s| s.clone()))
            .find(|s| s.status == SubscriptionStatus::Active)
    }

    pub fn payment(&self, id: Uuid) -> CoreResult<Payment> {
        self.payments
            .get(&id)
            .map(|p| p.clone())
            .ok_or_else(|| CoreError::NotFound(format!("payment {id}")))
    }

    /// Flip past-due active subscriptions to their terminal state
    ///
    /// Returns how many were closed. Canceled-in-advance subscriptions
    /// end as canceled, the rest as expired.
    pub fn expire_due(&self) -> usize {
        let now = Utc::now();
        let due: Vec<Uuid> = self
            .subscriptions
            .iter()
            .filter(|s| {
                s.status == SubscriptionStatus::Active
                    && s.end_time.map(|end| end <= now).unwrap_or(false)
            })
            .map(|s| s.id)
            .collect();

        let mut closed = 0;
        for id in due {
            if let Some(mut sub) = self.subscriptions.get_mut(&id) {
                if sub.status != SubscriptionStatus::Active {
                    continue;
                }
                sub.status = if sub.canceled_at.is_some() {
                    SubscriptionStatus::Canceled
                } else {
                    SubscriptionStatus::Expired
                };
                closed += 1;
            }
        }
        closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use tunnel_common::Tier;

    fn manager() -> SubscriptionManager {
        SubscriptionManager::new(Arc::new(PlanCatalog::with_defaults()))
    }

    fn premium_plan(m: &SubscriptionManager) -> Uuid {
        m.catalog().list(true).into_iter().find(|p| p.tier == Tier::Premium).unwrap().id
    }

    fn free_plan(m: &SubscriptionManager) -> Uuid {
        m.catalog().list(true).into_iter().find(|p| p.price == dec!(0)).unwrap().id
    }

    #[test]
    fn test_assign_creates_pending_pair() {
        let m = manager();
        let subscriber = Uuid::new_v4();
        let (sub, pay) = m.assign(subscriber, premium_plan(&m), true, PaymentMethod::Card).unwrap();
        assert_eq!(sub.status, SubscriptionStatus::Pending);
        assert_eq!(pay.status, PaymentStatus::Pending);
        assert_eq!(pay.subscription_id, sub.id);
        assert!(m.current_active(subscriber).is_none());
    }

    #[test]
    fn test_payment_success_activates() {
        let m = manager();
        let subscriber = Uuid::new_v4();
        let (_, pay) = m.assign(subscriber, premium_plan(&m), true, PaymentMethod::Card).unwrap();
        let sub = m.confirm_payment(pay.id, "success").unwrap();
        assert_eq!(sub.status, SubscriptionStatus::Active);
        let end = sub.end_time.unwrap();
        assert!(end > sub.start_time.unwrap());
        assert_eq!(m.current_active(subscriber).unwrap().id, sub.id);
    }

    #[test]
    fn test_payment_failure_keeps_subscription_pending() {
        let m = manager();
        let subscriber = Uuid::new_v4();
        let (sub, pay) = m.assign(subscriber, premium_plan(&m), true, PaymentMethod::Wallet).unwrap();
        let err = m.confirm_payment(pay.id, "declined").unwrap_err();
        assert!(matches!(err, CoreError::PaymentFailed(_)));
        assert_eq!(m.current(subscriber).unwrap().id, sub.id);
        assert!(m.current_active(subscriber).is_none());
        assert_eq!(m.payment(pay.id).unwrap().status, PaymentStatus::Failed);
    }

    #[test]
    fn test_zero_priced_plan_activates_immediately() {
        let m = manager();
        let subscriber = Uuid::new_v4();
        let (sub, pay) = m.assign(subscriber, free_plan(&m), false, PaymentMethod::InApp).unwrap();
        assert_eq!(sub.status, SubscriptionStatus::Active);
        assert_eq!(pay.status, PaymentStatus::Success);
    }

    #[test]
    fn test_at_most_one_active_subscription() {
        let m = manager();
        let subscriber = Uuid::new_v4();
        let (_, pay1) = m.assign(subscriber, premium_plan(&m), true, PaymentMethod::Card).unwrap();
        m.confirm_payment(pay1.id, "success").unwrap();
        let (_, pay2) = m.assign(subscriber, premium_plan(&m), true, PaymentMethod::Card).unwrap();
        m.confirm_payment(pay2.id, "success").unwrap();

        let ids = m.by_subscriber.get(&subscriber).unwrap().clone();
        let active: Vec<_> = ids
            .iter()
            .filter(|id| m.subscriptions.get(id).unwrap().status == SubscriptionStatus::Active)
            .collect();
        assert_eq!(active.len(), 1);
    }

    #[test]
    fn test_cancel_preserves_access_until_expiry() {
        let m = manager();
        let subscriber = Uuid::new_v4();
        let (_, pay) = m.assign(subscriber, premium_plan(&m), true, PaymentMethod::Card).unwrap();
        m.confirm_payment(pay.id, "success").unwrap();

        let canceled = m.cancel(subscriber).unwrap();
        assert_eq!(canceled.status, SubscriptionStatus::Active);
        assert!(!canceled.auto_renew);
        assert!(canceled.canceled_at.is_some());

        // Still the current active subscription until the sweep runs
        // past end_time.
        assert!(m.current_active(subscriber).is_some());
    }

    #[test]
    fn test_expire_due_applies_terminal_states() {
        let m = manager();
        let subscriber = Uuid::new_v4();
        let (_, pay) = m.assign(subscriber, premium_plan(&m), true, PaymentMethod::Card).unwrap();
        let sub = m.confirm_payment(pay.id, "success").unwrap();
        m.cancel(subscriber).unwrap();

        // Force the subscription past its end.
        m.subscriptions.get_mut(&sub.id).unwrap().end_time = Some(Utc::now() - Duration::seconds(1));
        assert_eq!(m.expire_due(), 1);
        assert_eq!(
            m.current(subscriber).unwrap().status,
            SubscriptionStatus::Canceled
        );
    }
}
