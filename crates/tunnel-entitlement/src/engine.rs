//! Entitlement resolution
//!
//! The one question the rest of the plane asks: what tier is this
//! subscriber on right now, and until when.

use crate::subscription::{SubscriptionManager, SubscriptionStatus};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tunnel_common::{CoreResult, Tier};
use tunnel_identity::{IdentityStore, Subscriber};
use uuid::Uuid;

/// The effective entitlement decision
#[derive(Debug, Clone, Serialize)]
pub struct Entitlement {
    pub tier: Tier,
    /// When the paid entitlement lapses; none on the free tier
    pub expiry: Option<DateTime<Utc>>,
    /// Plan backing the decision, none on the implicit free tier
    pub plan_id: Option<Uuid>,
    /// Whether a live subscription backs the decision
    pub active: bool,
}

impl Entitlement {
    fn free() -> Self {
        Self {
            tier: Tier::Free,
            expiry: None,
            plan_id: None,
            active: false,
        }
    }
}

/// Entitlement engine
pub struct EntitlementEngine {
    identity: Arc<IdentityStore>,
    subscriptions: Arc<SubscriptionManager>,
}

impl EntitlementEngine {
    pub fn new(identity: Arc<IdentityStore>, subscriptions: Arc<SubscriptionManager>) -> Self {
        Self {
            identity,
            subscriptions,
        }
    }

    /// Subscription manager backing this engine
    pub fn subscriptions(&self) -> &SubscriptionManager {
        &self.subscriptions
    }

    /// Resolve the subscriber's effective entitlement
    ///
    /// The most recent subscription decides: active and unexpired means
    /// its plan's tier, anything else means free. The subscriber's
    /// cached premium flag is a hint; when it disagrees with the
    /// computed decision it is written back in the same pass.
    pub fn resolve(&self, subscriber: &Subscriber) -> CoreResult<Entitlement> {
        let entitlement = match self.subscriptions.current(subscriber.id) {
            Some(sub) if sub.status == SubscriptionStatus::Active => {
                let unexpired = sub.end_time.map(|end| end > Utc::now()).unwrap_or(false);
                if unexpired {
                    let plan = self.subscriptions.catalog().get(sub.plan_id)?;
                    Entitlement {
                        tier: plan.tier,
                        expiry: sub.end_time,
                        plan_id: Some(plan.id),
                        active: true,
                    }
                } else {
                    Entitlement::free()
                }
            }
            _ => Entitlement::free(),
        };

        let computed_premium = entitlement.tier == Tier::Premium;
        if subscriber.premium != computed_premium {
            tracing::debug!(
                handle = subscriber.handle,
                premium = computed_premium,
                "reconciling cached premium flag"
            );
            self.identity
                .update_status(subscriber.id, None, Some(computed_premium), None)?;
        }

        Ok(entitlement)
    }

    /// Plan to suggest on premium-required rejections
    pub fn upgrade_hint(&self) -> Option<Uuid> {
        self.subscriptions.catalog().upgrade_hint()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::PlanCatalog;
    use crate::subscription::PaymentMethod;
    use chrono::Duration;

    fn engine() -> (Arc<IdentityStore>, EntitlementEngine) {
        let identity = Arc::new(IdentityStore::new());
        let subs = Arc::new(SubscriptionManager::new(Arc::new(PlanCatalog::with_defaults())));
        (identity.clone(), EntitlementEngine::new(identity, subs))
    }

    fn subscriber(identity: &IdentityStore) -> Subscriber {
        let sub = identity
            .register("Alice", "a@x.test", "pw12345678", None, None)
            .unwrap();
        identity.mark_verified("a@x.test").unwrap();
        sub
    }

    fn premium_plan(engine: &EntitlementEngine) -> Uuid {
        engine
            .subscriptions()
            .catalog()
            .list(true)
            .into_iter()
            .find(|p| p.tier == Tier::Premium)
            .unwrap()
            .id
    }

    #[test]
    fn test_no_subscription_resolves_free() {
        let (identity, engine) = engine();
        let sub = subscriber(&identity);
        let ent = engine.resolve(&sub).unwrap();
        assert_eq!(ent.tier, Tier::Free);
        assert!(ent.expiry.is_none());
        assert!(!ent.active);
    }

    #[test]
    fn test_active_premium_resolves_premium_and_reconciles_cache() {
        let (identity, engine) = engine();
        let sub = subscriber(&identity);
        let (_, pay) = engine
            .subscriptions()
            .assign(sub.id, premium_plan(&engine), true, PaymentMethod::Card)
            .unwrap();
        engine.subscriptions().confirm_payment(pay.id, "success").unwrap();

        assert!(!sub.premium);
        let ent = engine.resolve(&sub).unwrap();
        assert_eq!(ent.tier, Tier::Premium);
        assert!(ent.active);
        assert!(ent.expiry.is_some());
        // Cache reconciled through the identity store.
        assert!(identity.get_by_id(sub.id).unwrap().premium);
    }

    #[test]
    fn test_expired_subscription_resolves_free_and_downgrades_cache() {
        let (identity, engine) = engine();
        let sub = subscriber(&identity);
        let (created, pay) = engine
            .subscriptions()
            .assign(sub.id, premium_plan(&engine), true, PaymentMethod::Card)
            .unwrap();
        engine.subscriptions().confirm_payment(pay.id, "success").unwrap();
        let refreshed = identity.get_by_id(sub.id).unwrap();
        engine.resolve(&refreshed).unwrap();

        // Entitlement lapses the instant end_time passes, even before
        // the expiry sweep runs.
        engine
            .subscriptions()
            .subscriptions
            .get_mut(&created.id)
            .unwrap()
            .end_time = Some(Utc::now() - Duration::seconds(1));

        let cached = identity.get_by_id(sub.id).unwrap();
        assert!(cached.premium);
        let ent = engine.resolve(&cached).unwrap();
        assert_eq!(ent.tier, Tier::Free);
        assert!(!identity.get_by_id(sub.id).unwrap().premium);
    }
}
