//! Plan catalog

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use tunnel_common::{CoreError, CoreResult, Tier};
use uuid::Uuid;

/// Catalog lifecycle state of a plan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanStatus {
    /// Assignable
    Active,
    /// Referenceable by historical subscriptions only
    Retired,
}

/// A subscription plan
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub id: Uuid,
    pub name: String,
    pub tier: Tier,
    /// Monthly-equivalent price, zero for the free plan
    pub price: Decimal,
    pub duration_days: u32,
    /// Marketing feature bag, opaque to the engine
    pub features: Vec<String>,
    pub status: PlanStatus,
    pub created_at: DateTime<Utc>,
}

/// Plan registry
pub struct PlanCatalog {
    plans: DashMap<Uuid, Plan>,
}

impl PlanCatalog {
    pub fn new() -> Self {
        Self { plans: DashMap::new() }
    }

    /// Catalog seeded with the stock plans
    pub fn with_defaults() -> Self {
        let catalog = Self::new();
        catalog.create("Free", Tier::Free, dec!(0), 30, vec!["standard servers".into()]);
        catalog.create(
            "Premium Monthly",
            Tier::Premium,
            dec!(9.99),
            30,
            vec!["premium servers".into(), "priority support".into()],
        );
        catalog.create(
            "Premium Annual",
            Tier::Premium,
            dec!(99.99),
            365,
            vec!["premium servers".into(), "priority support".into(), "two months free".into()],
        );
        catalog
    }

    /// Add a plan to the catalog
    pub fn create(
        &self,
        name: &str,
        tier: Tier,
        price: Decimal,
        duration_days: u32,
        features: Vec<String>,
    ) -> Plan {
        let plan = Plan {
            id: Uuid::new_v4(),
            name: name.to_string(),
            tier,
            price,
            duration_days,
            features,
            status: PlanStatus::Active,
            created_at: Utc::now(),
        };
        self.plans.insert(plan.id, plan.clone());
        plan
    }

    pub fn get(&self, id: Uuid) -> CoreResult<Plan> {
        self.plans
            .get(&id)
            .map(|p| p.clone())
            .ok_or_else(|| CoreError::NotFound(format!("plan {id}")))
    }

    /// Fetch a plan that may still be newly assigned
    pub fn assignable(&self, id: Uuid) -> CoreResult<Plan> {
        let plan = self.get(id)?;
        if plan.status == PlanStatus::Retired {
            return Err(CoreError::InvalidInput(format!("plan {} is retired", plan.name)));
        }
        Ok(plan)
    }

    /// List plans, optionally only assignable ones
    pub fn list(&self, active_only: bool) -> Vec<Plan> {
        let mut plans: Vec<Plan> = self
            .plans
            .iter()
            .filter(|p| !active_only || p.status == PlanStatus::Active)
            .map(|p| p.clone())
            .collect();
        plans.sort_by(|a, b| a.price.cmp(&b.price).then(a.id.cmp(&b.id)));
        plans
    }

    /// Retire a plan; existing subscriptions keep referencing it
    pub fn retire(&self, id: Uuid) -> CoreResult<Plan> {
        let mut plan = self
            .plans
            .get_mut(&id)
            .ok_or_else(|| CoreError::NotFound(format!("plan {id}")))?;
        plan.status = PlanStatus::Retired;
        Ok(plan.clone())
    }

    /// Cheapest assignable premium plan, used as the upgrade hint on
    /// `PremiumRequired` rejections
    pub fn upgrade_hint(&self) -> Option<Uuid> {
        self.list(true)
            .into_iter()
            .find(|p| p.tier == Tier::Premium)
            .map(|p| p.id)
    }
}

impl Default for PlanCatalog {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_catalog() {
        let catalog = PlanCatalog::with_defaults();
        let plans = catalog.list(true);
        assert_eq!(plans.len(), 3);
        assert_eq!(plans[0].price, dec!(0));
        assert_eq!(plans[0].tier, Tier::Free);
    }

    #[test]
    fn test_retired_plan_not_assignable_but_still_readable() {
        let catalog = PlanCatalog::with_defaults();
        let premium = catalog.list(true).into_iter().find(|p| p.tier == Tier::Premium).unwrap();
        catalog.retire(premium.id).unwrap();

        assert!(catalog.assignable(premium.id).is_err());
        assert_eq!(catalog.get(premium.id).unwrap().status, PlanStatus::Retired);
        assert_eq!(catalog.list(true).len(), 2);
    }

    #[test]
    fn test_upgrade_hint_is_cheapest_premium() {
        let catalog = PlanCatalog::with_defaults();
        let hint = catalog.upgrade_hint().unwrap();
        assert_eq!(catalog.get(hint).unwrap().name, "Premium Monthly");
    }
}
