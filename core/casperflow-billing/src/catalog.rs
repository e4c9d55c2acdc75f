//! Plan catalog.

use crate::error::{BillingError, BillingResult};
use casperflow_types::{BillingPeriod, Identity, Motes, NewPlan, Plan, PlanId};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::RwLock;
use tracing::info;

/// Plans known to this deployment, keyed by id.
#[derive(Debug, Default)]
pub struct PlanCatalog {
    plans: RwLock<BTreeMap<PlanId, Plan>>,
}

impl PlanCatalog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A catalog seeded with the three demo plans.
    pub fn with_demo_plans(merchant: Identity, created_at: DateTime<Utc>) -> BillingResult<Self> {
        let catalog = Self::new();
        for plan in demo_plans(merchant, created_at)? {
            catalog.insert(plan)?;
        }
        Ok(catalog)
    }

    /// Adds a plan; ids are unique.
    pub fn insert(&self, plan: Plan) -> BillingResult<()> {
        let mut plans = self.write()?;
        if plans.contains_key(&plan.id) {
            return Err(BillingError::Conflict(format!("plan {} already exists", plan.id)));
        }
        info!(plan = %plan.id, name = %plan.name, "plan added to catalog");
        plans.insert(plan.id.clone(), plan);
        Ok(())
    }

    pub fn get(&self, id: &PlanId) -> BillingResult<Option<Plan>> {
        Ok(self.read()?.get(id).cloned())
    }

    /// Looks up by id first, then by exact name.
    pub fn find(&self, id_or_name: &str) -> BillingResult<Option<Plan>> {
        let plans = self.read()?;
        if let Ok(id) = PlanId::parse(id_or_name) {
            if let Some(plan) = plans.get(&id) {
                return Ok(Some(plan.clone()));
            }
        }
        Ok(plans.values().find(|p| p.name == id_or_name).cloned())
    }

    /// Every plan, including deprecated ones, ordered by id.
    pub fn list(&self) -> BillingResult<Vec<Plan>> {
        Ok(self.read()?.values().cloned().collect())
    }

    /// The plan, if it exists and still takes new subscriptions.
    pub fn require_open(&self, id: &PlanId) -> BillingResult<Plan> {
        let plan = self
            .get(id)?
            .ok_or_else(|| BillingError::PlanNotFound(id.to_string()))?;
        if !plan.accepts_subscriptions() {
            return Err(BillingError::PlanDeprecated(id.to_string()));
        }
        Ok(plan)
    }

    /// Marks a plan deprecated. Existing subscriptions are unaffected.
    pub fn deprecate(&self, id: &PlanId) -> BillingResult<Plan> {
        let mut plans = self.write()?;
        let plan = plans
            .get_mut(id)
            .ok_or_else(|| BillingError::PlanNotFound(id.to_string()))?;
        plan.deprecated = true;
        info!(plan = %id, "plan deprecated");
        Ok(plan.clone())
    }

    fn read(&self) -> BillingResult<std::sync::RwLockReadGuard<'_, BTreeMap<PlanId, Plan>>> {
        self.plans
            .read()
            .map_err(|_| BillingError::Storage("plan catalog lock poisoned".to_string()))
    }

    fn write(&self) -> BillingResult<std::sync::RwLockWriteGuard<'_, BTreeMap<PlanId, Plan>>> {
        self.plans
            .write()
            .map_err(|_| BillingError::Storage("plan catalog lock poisoned".to_string()))
    }
}

/// Starter, Pro and Enterprise, all monthly.
pub fn demo_plans(merchant: Identity, created_at: DateTime<Utc>) -> BillingResult<Vec<Plan>> {
    let specs = [
        (
            "plan_demo_starter",
            "Starter API",
            "Perfect for small projects and testing. Includes basic API access with rate limiting.",
            10,
            7,
        ),
        (
            "plan_demo_pro",
            "Pro API",
            "For growing businesses. Higher limits, priority support, and advanced features.",
            50,
            14,
        ),
        (
            "plan_demo_enterprise",
            "Enterprise",
            "Unlimited access for large-scale applications with dedicated support.",
            200,
            0,
        ),
    ];

    specs
        .into_iter()
        .map(|(id, name, description, price_cspr, trial_days)| {
            let base_price = Motes::from_cspr(price_cspr)
                .ok_or_else(|| BillingError::InvalidInput("demo price overflow".to_string()))?;
            let plan = Plan::create(
                PlanId::parse(id)?,
                merchant.clone(),
                NewPlan {
                    name: name.to_string(),
                    description: Some(description.to_string()),
                    base_price,
                    usage_price: Motes::ZERO,
                    billing_period: BillingPeriod::Monthly,
                    trial_days,
                },
                created_at,
            )?;
            Ok(plan)
        })
        .collect()
}
