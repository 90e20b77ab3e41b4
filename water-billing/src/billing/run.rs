//! Billing run over one period.

use super::BillingService;
use crate::engine::{calculate_charges, resolve_active_plan, ChargeBreakdown};
use crate::error::{BillingError, Result};
use crate::models::{
    Bill, BillLineItem, BillStatus, BillingPeriod, BillingPeriodStatus, BillingRunResult,
    Customer, CustomerOutcome, InsertOutcome, Meter, RatePlan, RateSchedule,
};
use crate::services::{
    record_billed_amount, record_billing_run, record_customer_processed, record_error,
};
use chrono::{Duration, NaiveDate, Utc};
use futures::stream::{self, StreamExt};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

/// State shared by every customer in one run.
struct RunContext {
    period: BillingPeriod,
    plans: Vec<RatePlan>,
    issue_date: NaiveDate,
    due_date: NaiveDate,
    schedules: Mutex<HashMap<Uuid, Arc<RateSchedule>>>,
}

impl BillingService {
    /// Bill every customer in the period's cycle, then mark the period BILLED.
    ///
    /// Fails only if the period is missing or already BILLED, or the customer
    /// list cannot be loaded. Per-customer failures are recorded in the result.
    #[instrument(skip(self), fields(period_id = %period_id))]
    pub async fn run_billing_for_period(&self, period_id: Uuid) -> Result<BillingRunResult> {
        let started = Instant::now();
        let mut result = BillingRunResult::new(period_id, Utc::now());

        let period = self
            .store
            .get_period(period_id)
            .await?
            .ok_or_else(|| {
                BillingError::NotFound(format!("Billing period {} not found", period_id))
            })?;

        if period.status == BillingPeriodStatus::Billed {
            record_error("already_billed", "run_billing");
            return Err(BillingError::AlreadyBilled { period_id });
        }

        let customers = self.store.customers_in_cycle(period.cycle_number).await?;
        let plans = self.store.list_rate_plans().await?;

        info!(
            cycle_number = period.cycle_number,
            period_start = %period.period_start,
            period_end = %period.period_end,
            customers = customers.len(),
            concurrency = self.settings.concurrency,
            "Starting billing run"
        );

        let due_date = period
            .period_end
            .checked_add_signed(Duration::days(self.settings.due_days))
            .ok_or_else(|| {
                BillingError::Validation(format!(
                    "Due date overflows for period end {} plus {} days",
                    period.period_end, self.settings.due_days
                ))
            })?;

        let ctx = RunContext {
            period,
            plans,
            issue_date: Utc::now().date_naive(),
            due_date,
            schedules: Mutex::new(HashMap::new()),
        };

        let ctx = &ctx;
        let outcomes: Vec<(Uuid, Result<CustomerOutcome>)> = stream::iter(customers)
            .map(move |customer: Customer| async move {
                let outcome = self.bill_customer(ctx, &customer).await;
                (customer.customer_id, outcome)
            })
            .buffered(self.settings.concurrency.max(1))
            .collect()
            .await;

        for (customer_id, outcome) in outcomes {
            match &outcome {
                Ok(CustomerOutcome::Billed(_)) => record_customer_processed("billed"),
                Ok(CustomerOutcome::AlreadyBilled(_)) => {
                    record_customer_processed("already_billed")
                }
                Ok(CustomerOutcome::Skipped(reason)) => {
                    warn!(customer_id = %customer_id, reason = %reason, "Customer skipped");
                    record_customer_processed("skipped");
                }
                Err(e) => {
                    warn!(customer_id = %customer_id, error = %e, "Customer billing failed");
                    record_customer_processed("failed");
                    record_error(e.kind(), "bill_customer");
                }
            }
            result.record(customer_id, outcome);
        }

        result.period_marked_billed = match self
            .store
            .transition_period(
                period_id,
                &[BillingPeriodStatus::Open, BillingPeriodStatus::Closed],
                BillingPeriodStatus::Billed,
            )
            .await
        {
            Ok(Some(_)) => true,
            Ok(None) => {
                warn!("Billing period was no longer OPEN or CLOSED when the run finished");
                false
            }
            Err(e) => {
                error!(error = %e, "Failed to mark billing period BILLED");
                record_error(e.kind(), "mark_period_billed");
                false
            }
        };

        result.completed_utc = Utc::now();
        record_billing_run(result.outcome(), started.elapsed().as_secs_f64());

        info!(
            total_customers = result.total_customers,
            success_count = result.success_count,
            already_billed = result.already_billed_count,
            skipped = result.skipped.len(),
            failed_count = result.failed_count,
            total_billed = %result.total_billed,
            "Billing run complete"
        );

        Ok(result)
    }

    #[instrument(skip(self, ctx, customer), fields(customer_id = %customer.customer_id))]
    async fn bill_customer(
        &self,
        ctx: &RunContext,
        customer: &Customer,
    ) -> Result<CustomerOutcome> {
        let period = &ctx.period;

        if let Some(existing) = self
            .store
            .find_bill(customer.customer_id, period.period_id)
            .await?
        {
            return Ok(CustomerOutcome::AlreadyBilled(existing));
        }

        let meters = self.store.active_meters_of(customer.customer_id).await?;
        let Some(primary) = meters.first() else {
            return Ok(CustomerOutcome::Skipped("no active meter".to_string()));
        };

        let usage = self.period_usage(&meters, period).await?;
        let plan = resolve_active_plan(&ctx.plans, customer.customer_class, period.period_end)?;
        let schedule = self.cached_schedule(ctx, plan).await?;
        let breakdown = calculate_charges(usage, &schedule, period.period_end)?;

        let (bill, line_items) = self.build_bill(ctx, customer, primary, &breakdown);

        match self.store.insert_bill(&bill, &line_items).await? {
            InsertOutcome::Inserted(written) => {
                record_billed_amount(
                    customer.customer_class.as_str(),
                    written.bill.total_amount.to_f64().unwrap_or_default(),
                );
                info!(
                    bill_id = %written.bill.bill_id,
                    total_amount = %written.bill.total_amount,
                    "Bill created"
                );
                Ok(CustomerOutcome::Billed(written.bill))
            }
            InsertOutcome::AlreadyBilled(existing) => Ok(CustomerOutcome::AlreadyBilled(existing)),
        }
    }

    async fn period_usage(&self, meters: &[Meter], period: &BillingPeriod) -> Result<Decimal> {
        let mut total = Decimal::ZERO;
        for meter in meters {
            let usage = self
                .store
                .sum_usage(meter.meter_id, period.period_start, period.period_end)
                .await?;
            total += usage.unwrap_or(Decimal::ZERO);
        }
        Ok(total)
    }

    async fn cached_schedule(&self, ctx: &RunContext, plan: RatePlan) -> Result<Arc<RateSchedule>> {
        if let Some(schedule) = ctx.schedules.lock().await.get(&plan.plan_id) {
            return Ok(Arc::clone(schedule));
        }
        let plan_id = plan.plan_id;
        let schedule = Arc::new(self.load_schedule(plan).await?);
        ctx.schedules
            .lock()
            .await
            .insert(plan_id, Arc::clone(&schedule));
        Ok(schedule)
    }

    fn build_bill(
        &self,
        ctx: &RunContext,
        customer: &Customer,
        meter: &Meter,
        breakdown: &ChargeBreakdown,
    ) -> (Bill, Vec<BillLineItem>) {
        let now = Utc::now();
        let bill_id = Uuid::new_v4();

        let bill = Bill {
            bill_id,
            customer_id: customer.customer_id,
            meter_id: meter.meter_id,
            billing_period_id: ctx.period.period_id,
            rate_plan_id: breakdown.rate_plan_id,
            issue_date: ctx.issue_date,
            due_date: ctx.due_date,
            status: BillStatus::Draft,
            usage_quantity: breakdown.usage_quantity,
            subtotal: breakdown.subtotal,
            total_fees: breakdown.base_fee,
            total_surcharges: breakdown.total_surcharges,
            total_amount: breakdown.total_amount,
            delivery_method: self.settings.delivery_method,
            created_utc: now,
            updated_utc: now,
        };

        let line_items = breakdown
            .line_items
            .iter()
            .zip(1..)
            .map(|(item, line_number)| BillLineItem {
                line_item_id: Uuid::new_v4(),
                bill_id,
                line_number,
                line_type: item.category.line_type(),
                description: item.description.clone(),
                amount: item.amount,
                rate_component_id: item.component_id,
                created_utc: now,
            })
            .collect();

        (bill, line_items)
    }

    /// Run every OPEN or CLOSED period that ended before `today`.
    #[instrument(skip(self))]
    pub async fn run_due_periods(&self, today: NaiveDate) -> Result<Vec<BillingRunResult>> {
        let due = self.store.list_periods_due(today).await?;
        let mut results = Vec::with_capacity(due.len());

        for period in due {
            match self.run_billing_for_period(period.period_id).await {
                Ok(result) => results.push(result),
                Err(BillingError::AlreadyBilled { period_id }) => {
                    info!(period_id = %period_id, "Period billed concurrently; skipping");
                }
                Err(e) => {
                    error!(
                        period_id = %period.period_id,
                        error = %e,
                        "Scheduled billing run failed"
                    );
                    record_error(e.kind(), "scheduled_run");
                }
            }
        }

        Ok(results)
    }
}
