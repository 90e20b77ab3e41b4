//! Rate plan lifecycle, schedule loading and charge quotes.

use super::BillingService;
use crate::engine::{calculate_charges, resolve_active_plan, ChargeBreakdown};
use crate::error::{BillingError, Result};
use crate::models::{CustomerClass, RatePlan, RatePlanStatus, RateSchedule};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use tracing::{info, instrument};
use uuid::Uuid;

impl BillingService {
    /// Load and validate a plan's active components.
    pub async fn load_schedule(&self, plan: RatePlan) -> Result<RateSchedule> {
        let records = self.store.rate_components(plan.plan_id).await?;
        RateSchedule::new(plan, records)
    }

    /// Price `usage` for a customer class on `date` without persisting anything.
    #[instrument(skip(self), fields(customer_class = customer_class.as_str()))]
    pub async fn quote(
        &self,
        customer_class: CustomerClass,
        usage: Decimal,
        date: NaiveDate,
    ) -> Result<ChargeBreakdown> {
        let plans = self.store.list_rate_plans().await?;
        let plan = resolve_active_plan(&plans, customer_class, date)?;
        let schedule = self.load_schedule(plan).await?;
        calculate_charges(usage, &schedule, date)
    }

    /// Promote a DRAFT plan to ACTIVE.
    ///
    /// The plan's components must parse, and no other ACTIVE plan with the
    /// same scope may overlap its effective range.
    #[instrument(skip(self), fields(plan_id = %plan_id))]
    pub async fn activate_plan(&self, plan_id: Uuid) -> Result<RatePlan> {
        let plan = self.require_plan(plan_id).await?;
        if plan.status != RatePlanStatus::Draft {
            return Err(BillingError::Conflict(format!(
                "Rate plan {} is {}, only DRAFT plans can be activated",
                plan_id,
                plan.status.as_str()
            )));
        }

        self.load_schedule(plan.clone()).await?;

        let plans = self.store.list_rate_plans().await?;
        if let Some(clash) = plans.iter().find(|other| {
            other.plan_id != plan.plan_id
                && other.status == RatePlanStatus::Active
                && other.customer_scope == plan.customer_scope
                && other.overlaps(&plan)
        }) {
            return Err(BillingError::Conflict(format!(
                "Rate plan '{}' overlaps active plan '{}' for {} customers",
                plan.name,
                clash.name,
                plan.customer_scope.as_str()
            )));
        }

        let plan = self
            .store
            .transition_plan(plan_id, &[RatePlanStatus::Draft], RatePlanStatus::Active)
            .await?
            .ok_or_else(|| {
                BillingError::Conflict(format!(
                    "Rate plan {} changed status during activation",
                    plan_id
                ))
            })?;
        info!(name = %plan.name, "Rate plan activated");
        Ok(plan)
    }

    /// Retire an ACTIVE plan. Retired plans stay referenced by their bills.
    #[instrument(skip(self), fields(plan_id = %plan_id))]
    pub async fn retire_plan(&self, plan_id: Uuid) -> Result<RatePlan> {
        let plan = self.require_plan(plan_id).await?;
        if plan.status != RatePlanStatus::Active {
            return Err(BillingError::Conflict(format!(
                "Rate plan {} is {}, only ACTIVE plans can be retired",
                plan_id,
                plan.status.as_str()
            )));
        }

        let plan = self
            .store
            .transition_plan(plan_id, &[RatePlanStatus::Active], RatePlanStatus::Retired)
            .await?
            .ok_or_else(|| {
                BillingError::Conflict(format!(
                    "Rate plan {} changed status while retiring",
                    plan_id
                ))
            })?;
        info!(name = %plan.name, "Rate plan retired");
        Ok(plan)
    }

    async fn require_plan(&self, plan_id: Uuid) -> Result<RatePlan> {
        self.store
            .get_rate_plan(plan_id)
            .await?
            .ok_or_else(|| BillingError::NotFound(format!("Rate plan {} not found", plan_id)))
    }
}
