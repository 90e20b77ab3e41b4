//! Persistence seam for the billing core.
//!
//! [`Database`](super::Database) implements this against PostgreSQL;
//! [`MemoryStore`](super::MemoryStore) backs tests and local runs.

use crate::models::{
    Bill, BillLineItem, BillStatus, BillingPeriod, BillingPeriodStatus, CreateBillingPeriod,
    Customer, InsertOutcome, Meter, RateComponentRecord, RatePlan, RatePlanStatus,
};
use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use service_core::error::AppError;
use uuid::Uuid;

#[async_trait]
pub trait BillingStore: Send + Sync {
    /// Liveness of the backing store.
    async fn health_check(&self) -> Result<(), AppError> {
        Ok(())
    }

    // Billing periods

    /// Insert a new OPEN period. A duplicate (cycle, start) pair is a `Conflict`.
    async fn create_period(&self, input: &CreateBillingPeriod) -> Result<BillingPeriod, AppError>;

    async fn get_period(&self, period_id: Uuid) -> Result<Option<BillingPeriod>, AppError>;

    async fn list_periods_for_cycle(
        &self,
        cycle_number: i32,
    ) -> Result<Vec<BillingPeriod>, AppError>;

    /// OPEN or CLOSED periods whose end date is strictly before `before`.
    async fn list_periods_due(&self, before: NaiveDate) -> Result<Vec<BillingPeriod>, AppError>;

    /// Move a period to `to` only if its current status is one of `from`.
    /// Returns `None` when the period is missing or in another status.
    async fn transition_period(
        &self,
        period_id: Uuid,
        from: &[BillingPeriodStatus],
        to: BillingPeriodStatus,
    ) -> Result<Option<BillingPeriod>, AppError>;

    // Customers, meters and usage

    async fn get_customer(&self, customer_id: Uuid) -> Result<Option<Customer>, AppError>;

    async fn customers_in_cycle(&self, cycle_number: i32) -> Result<Vec<Customer>, AppError>;

    async fn active_meters_of(&self, customer_id: Uuid) -> Result<Vec<Meter>, AppError>;

    /// Total usage read on `meter_id` between the dates, inclusive; `None` if no readings.
    async fn sum_usage(
        &self,
        meter_id: Uuid,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Option<Decimal>, AppError>;

    // Rate plans

    async fn list_rate_plans(&self) -> Result<Vec<RatePlan>, AppError>;

    async fn get_rate_plan(&self, plan_id: Uuid) -> Result<Option<RatePlan>, AppError>;

    /// Move a plan to `to` only if its status is one of `from`.
    /// `None` when the plan is missing or in another status.
    async fn transition_plan(
        &self,
        plan_id: Uuid,
        from: &[RatePlanStatus],
        to: RatePlanStatus,
    ) -> Result<Option<RatePlan>, AppError>;

    /// All components of a plan, active or not, ordered by sort order.
    async fn rate_components(&self, plan_id: Uuid) -> Result<Vec<RateComponentRecord>, AppError>;

    // Bills

    /// The non-void bill for (customer, period), if any.
    async fn find_bill(&self, customer_id: Uuid, period_id: Uuid) -> Result<Option<Bill>, AppError>;

    /// Write a bill header and its line items as one unit. A non-void bill
    /// already present for the same (customer, period) wins and is returned
    /// as [`InsertOutcome::AlreadyBilled`]; nothing is written in that case.
    async fn insert_bill(
        &self,
        bill: &Bill,
        line_items: &[BillLineItem],
    ) -> Result<InsertOutcome, AppError>;

    async fn get_bill(&self, bill_id: Uuid) -> Result<Option<Bill>, AppError>;

    async fn list_bills_for_period(
        &self,
        period_id: Uuid,
        status: Option<BillStatus>,
    ) -> Result<Vec<Bill>, AppError>;

    async fn bill_line_items(&self, bill_id: Uuid) -> Result<Vec<BillLineItem>, AppError>;

    /// Move a bill to `to` only if its current status is one of `from`.
    async fn transition_bill(
        &self,
        bill_id: Uuid,
        from: &[BillStatus],
        to: BillStatus,
    ) -> Result<Option<Bill>, AppError>;
}
