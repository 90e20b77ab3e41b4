//! In-memory [`BillingStore`] used by tests and local development.

use super::store::BillingStore;
use crate::models::{
    Bill, BillLineItem, BillStatus, BillWithLines, BillingPeriod, BillingPeriodStatus,
    CreateBillingPeriod, Customer, InsertOutcome, Meter, RateComponentRecord, RatePlan,
    RatePlanStatus,
};
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use service_core::error::AppError;
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Clone)]
struct Reading {
    meter_id: Uuid,
    reading_date: NaiveDate,
    quantity: Decimal,
}

#[derive(Default)]
struct Inner {
    customers: HashMap<Uuid, Customer>,
    meters: HashMap<Uuid, Meter>,
    readings: Vec<Reading>,
    plans: HashMap<Uuid, RatePlan>,
    components: Vec<RateComponentRecord>,
    periods: HashMap<Uuid, BillingPeriod>,
    bills: HashMap<Uuid, Bill>,
    line_items: HashMap<Uuid, Vec<BillLineItem>>,
    failing_meters: HashSet<Uuid>,
    fail_period_transitions: bool,
}

/// All state lives behind one lock so multi-row writes are atomic.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_customer(&self, customer: Customer) {
        self.inner
            .write()
            .await
            .customers
            .insert(customer.customer_id, customer);
    }

    pub async fn add_meter(&self, meter: Meter) {
        self.inner.write().await.meters.insert(meter.meter_id, meter);
    }

    pub async fn add_reading(&self, meter_id: Uuid, reading_date: NaiveDate, quantity: Decimal) {
        self.inner.write().await.readings.push(Reading {
            meter_id,
            reading_date,
            quantity,
        });
    }

    pub async fn add_rate_plan(&self, plan: RatePlan) {
        self.inner.write().await.plans.insert(plan.plan_id, plan);
    }

    pub async fn add_component(&self, component: RateComponentRecord) {
        self.inner.write().await.components.push(component);
    }

    /// Insert a period as-is, bypassing validation.
    pub async fn add_period(&self, period: BillingPeriod) {
        self.inner.write().await.periods.insert(period.period_id, period);
    }

    /// Make `sum_usage` fail for this meter.
    pub async fn fail_usage_for(&self, meter_id: Uuid) {
        self.inner.write().await.failing_meters.insert(meter_id);
    }

    /// Make every period status transition fail.
    pub async fn fail_period_transitions(&self, fail: bool) {
        self.inner.write().await.fail_period_transitions = fail;
    }

    pub async fn bill_count(&self) -> usize {
        self.inner.read().await.bills.len()
    }

    pub async fn line_item_count(&self) -> usize {
        self.inner
            .read()
            .await
            .line_items
            .values()
            .map(Vec::len)
            .sum()
    }
}

#[async_trait]
impl BillingStore for MemoryStore {
    async fn create_period(&self, input: &CreateBillingPeriod) -> Result<BillingPeriod, AppError> {
        let mut inner = self.inner.write().await;
        let duplicate = inner.periods.values().any(|p| {
            p.cycle_number == input.cycle_number && p.period_start == input.period_start
        });
        if duplicate {
            return Err(AppError::Conflict(anyhow::anyhow!(
                "Billing period for cycle {} starting {} already exists",
                input.cycle_number,
                input.period_start
            )));
        }

        let period = BillingPeriod {
            period_id: Uuid::new_v4(),
            cycle_number: input.cycle_number,
            period_start: input.period_start,
            period_end: input.period_end,
            status: BillingPeriodStatus::Open,
            created_utc: Utc::now(),
        };
        inner.periods.insert(period.period_id, period.clone());
        Ok(period)
    }

    async fn get_period(&self, period_id: Uuid) -> Result<Option<BillingPeriod>, AppError> {
        Ok(self.inner.read().await.periods.get(&period_id).cloned())
    }

    async fn list_periods_for_cycle(
        &self,
        cycle_number: i32,
    ) -> Result<Vec<BillingPeriod>, AppError> {
        let inner = self.inner.read().await;
        let mut periods: Vec<BillingPeriod> = inner
            .periods
            .values()
            .filter(|p| p.cycle_number == cycle_number)
            .cloned()
            .collect();
        periods.sort_by_key(|p| p.period_start);
        Ok(periods)
    }

    async fn list_periods_due(&self, before: NaiveDate) -> Result<Vec<BillingPeriod>, AppError> {
        let inner = self.inner.read().await;
        let mut periods: Vec<BillingPeriod> = inner
            .periods
            .values()
            .filter(|p| p.status != BillingPeriodStatus::Billed && p.period_end < before)
            .cloned()
            .collect();
        periods.sort_by_key(|p| (p.period_end, p.cycle_number));
        Ok(periods)
    }

    async fn transition_period(
        &self,
        period_id: Uuid,
        from: &[BillingPeriodStatus],
        to: BillingPeriodStatus,
    ) -> Result<Option<BillingPeriod>, AppError> {
        let mut inner = self.inner.write().await;
        if inner.fail_period_transitions {
            return Err(AppError::DatabaseError(anyhow::anyhow!(
                "Failed to update billing period: store unavailable"
            )));
        }
        Ok(inner.periods.get_mut(&period_id).and_then(|period| {
            if from.contains(&period.status) {
                period.status = to;
                Some(period.clone())
            } else {
                None
            }
        }))
    }

    async fn get_customer(&self, customer_id: Uuid) -> Result<Option<Customer>, AppError> {
        Ok(self.inner.read().await.customers.get(&customer_id).cloned())
    }

    async fn customers_in_cycle(&self, cycle_number: i32) -> Result<Vec<Customer>, AppError> {
        let inner = self.inner.read().await;
        let mut customers: Vec<Customer> = inner
            .customers
            .values()
            .filter(|c| c.billing_cycle_number == cycle_number)
            .cloned()
            .collect();
        customers.sort_by(|a, b| a.name.cmp(&b.name).then(a.customer_id.cmp(&b.customer_id)));
        Ok(customers)
    }

    async fn active_meters_of(&self, customer_id: Uuid) -> Result<Vec<Meter>, AppError> {
        let inner = self.inner.read().await;
        let mut meters: Vec<Meter> = inner
            .meters
            .values()
            .filter(|m| m.customer_id == customer_id && m.is_active())
            .cloned()
            .collect();
        meters.sort_by(|a, b| a.external_location_id.cmp(&b.external_location_id));
        Ok(meters)
    }

    async fn sum_usage(
        &self,
        meter_id: Uuid,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Option<Decimal>, AppError> {
        let inner = self.inner.read().await;
        if inner.failing_meters.contains(&meter_id) {
            return Err(AppError::DatabaseError(anyhow::anyhow!(
                "Failed to sum usage for meter {}",
                meter_id
            )));
        }
        let mut readings = inner
            .readings
            .iter()
            .filter(|r| r.meter_id == meter_id && r.reading_date >= start && r.reading_date <= end)
            .peekable();
        if readings.peek().is_none() {
            return Ok(None);
        }
        Ok(Some(readings.map(|r| r.quantity).sum()))
    }

    async fn list_rate_plans(&self) -> Result<Vec<RatePlan>, AppError> {
        let inner = self.inner.read().await;
        let mut plans: Vec<RatePlan> = inner.plans.values().cloned().collect();
        plans.sort_by_key(|p| (p.effective_start, p.plan_id));
        Ok(plans)
    }

    async fn get_rate_plan(&self, plan_id: Uuid) -> Result<Option<RatePlan>, AppError> {
        Ok(self.inner.read().await.plans.get(&plan_id).cloned())
    }

    async fn transition_plan(
        &self,
        plan_id: Uuid,
        from: &[RatePlanStatus],
        to: RatePlanStatus,
    ) -> Result<Option<RatePlan>, AppError> {
        let mut inner = self.inner.write().await;
        Ok(inner.plans.get_mut(&plan_id).and_then(|plan| {
            if from.contains(&plan.status) {
                plan.status = to;
                plan.updated_utc = Utc::now();
                Some(plan.clone())
            } else {
                None
            }
        }))
    }

    async fn rate_components(&self, plan_id: Uuid) -> Result<Vec<RateComponentRecord>, AppError> {
        let inner = self.inner.read().await;
        let mut components: Vec<RateComponentRecord> = inner
            .components
            .iter()
            .filter(|c| c.rate_plan_id == plan_id)
            .cloned()
            .collect();
        components.sort_by_key(|c| c.sort_order);
        Ok(components)
    }

    async fn find_bill(
        &self,
        customer_id: Uuid,
        period_id: Uuid,
    ) -> Result<Option<Bill>, AppError> {
        let inner = self.inner.read().await;
        Ok(find_live_bill(&inner, customer_id, period_id).cloned())
    }

    async fn insert_bill(
        &self,
        bill: &Bill,
        line_items: &[BillLineItem],
    ) -> Result<InsertOutcome, AppError> {
        let mut inner = self.inner.write().await;
        if let Some(existing) = find_live_bill(&inner, bill.customer_id, bill.billing_period_id) {
            return Ok(InsertOutcome::AlreadyBilled(existing.clone()));
        }
        inner.bills.insert(bill.bill_id, bill.clone());
        inner.line_items.insert(bill.bill_id, line_items.to_vec());
        Ok(InsertOutcome::Inserted(BillWithLines {
            bill: bill.clone(),
            line_items: line_items.to_vec(),
        }))
    }

    async fn get_bill(&self, bill_id: Uuid) -> Result<Option<Bill>, AppError> {
        Ok(self.inner.read().await.bills.get(&bill_id).cloned())
    }

    async fn list_bills_for_period(
        &self,
        period_id: Uuid,
        status: Option<BillStatus>,
    ) -> Result<Vec<Bill>, AppError> {
        let inner = self.inner.read().await;
        let mut bills: Vec<Bill> = inner
            .bills
            .values()
            .filter(|b| b.billing_period_id == period_id && status.map_or(true, |s| b.status == s))
            .cloned()
            .collect();
        bills.sort_by_key(|b| (b.created_utc, b.bill_id));
        Ok(bills)
    }

    async fn bill_line_items(&self, bill_id: Uuid) -> Result<Vec<BillLineItem>, AppError> {
        Ok(self
            .inner
            .read()
            .await
            .line_items
            .get(&bill_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn transition_bill(
        &self,
        bill_id: Uuid,
        from: &[BillStatus],
        to: BillStatus,
    ) -> Result<Option<Bill>, AppError> {
        let mut inner = self.inner.write().await;
        Ok(inner.bills.get_mut(&bill_id).and_then(|bill| {
            if from.contains(&bill.status) {
                bill.status = to;
                bill.updated_utc = Utc::now();
                Some(bill.clone())
            } else {
                None
            }
        }))
    }
}

fn find_live_bill(inner: &Inner, customer_id: Uuid, period_id: Uuid) -> Option<&Bill> {
    inner.bills.values().find(|b| {
        b.customer_id == customer_id
            && b.billing_period_id == period_id
            && b.status != BillStatus::Void
    })
}
