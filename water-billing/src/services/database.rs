//! Database service for water-billing.

use super::store::BillingStore;
use crate::models::{
    Bill, BillLineItem, BillStatus, BillWithLines, BillingPeriod, BillingPeriodStatus,
    CreateBillingPeriod, Customer, InsertOutcome, Meter, RateComponentRecord, RatePlan,
    RatePlanStatus,
};
use crate::services::metrics::DB_QUERY_DURATION;
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use service_core::error::AppError;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::{info, instrument};
use uuid::Uuid;

const PERIOD_COLUMNS: &str =
    "period_id, cycle_number, period_start, period_end, status, created_utc";

const PLAN_COLUMNS: &str =
    "plan_id, name, customer_scope, effective_start, effective_end, status, \
     created_utc, updated_utc";

const BILL_COLUMNS: &str = "bill_id, customer_id, meter_id, billing_period_id, rate_plan_id, \
     issue_date, due_date, status, usage_quantity, subtotal, total_fees, total_surcharges, \
     total_amount, delivery_method, created_utc, updated_utc";

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database connection pool.
    #[instrument(skip(database_url), fields(service = "water-billing"))]
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self, AppError> {
        info!(
            max_connections = max_connections,
            min_connections = min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to connect: {}", e)))?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run database migrations.
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Migration failed: {}", e)))?;
        info!("Database migrations completed");
        Ok(())
    }

    async fn live_bill(
        &self,
        customer_id: Uuid,
        period_id: Uuid,
    ) -> Result<Option<Bill>, AppError> {
        sqlx::query_as::<_, Bill>(&format!(
            "SELECT {BILL_COLUMNS} FROM bills \
             WHERE customer_id = $1 AND billing_period_id = $2 AND status <> 'VOID'"
        ))
        .bind(customer_id)
        .bind(period_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to find bill: {}", e)))
    }
}

fn status_labels<T, F: Fn(&T) -> &'static str>(statuses: &[T], label: F) -> Vec<String> {
    statuses.iter().map(|s| label(s).to_string()).collect()
}

#[async_trait]
impl BillingStore for Database {
    /// Check database health.
    #[instrument(skip(self))]
    async fn health_check(&self) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["health_check"])
            .start_timer();

        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Health check failed: {}", e)))?;

        timer.observe_duration();
        Ok(())
    }

    // =========================================================================
    // Billing Period Operations
    // =========================================================================

    #[instrument(skip(self, input), fields(cycle_number = input.cycle_number))]
    async fn create_period(&self, input: &CreateBillingPeriod) -> Result<BillingPeriod, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_period"])
            .start_timer();

        let period = sqlx::query_as::<_, BillingPeriod>(&format!(
            r#"
            INSERT INTO billing_periods (period_id, cycle_number, period_start, period_end, status)
            VALUES ($1, $2, $3, $4, 'OPEN')
            RETURNING {PERIOD_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(input.cycle_number)
        .bind(input.period_start)
        .bind(input.period_end)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                AppError::Conflict(anyhow::anyhow!(
                    "Billing period for cycle {} starting {} already exists",
                    input.cycle_number,
                    input.period_start
                ))
            }
            _ => AppError::DatabaseError(anyhow::anyhow!("Failed to create billing period: {}", e)),
        })?;

        timer.observe_duration();
        info!(period_id = %period.period_id, "Billing period created");

        Ok(period)
    }

    #[instrument(skip(self), fields(period_id = %period_id))]
    async fn get_period(&self, period_id: Uuid) -> Result<Option<BillingPeriod>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_period"])
            .start_timer();

        let period = sqlx::query_as::<_, BillingPeriod>(&format!(
            "SELECT {PERIOD_COLUMNS} FROM billing_periods WHERE period_id = $1"
        ))
        .bind(period_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to get billing period: {}", e))
        })?;

        timer.observe_duration();

        Ok(period)
    }

    #[instrument(skip(self))]
    async fn list_periods_for_cycle(
        &self,
        cycle_number: i32,
    ) -> Result<Vec<BillingPeriod>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_periods_for_cycle"])
            .start_timer();

        let periods = sqlx::query_as::<_, BillingPeriod>(&format!(
            "SELECT {PERIOD_COLUMNS} FROM billing_periods \
             WHERE cycle_number = $1 ORDER BY period_start"
        ))
        .bind(cycle_number)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to list billing periods: {}", e))
        })?;

        timer.observe_duration();

        Ok(periods)
    }

    #[instrument(skip(self))]
    async fn list_periods_due(&self, before: NaiveDate) -> Result<Vec<BillingPeriod>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_periods_due"])
            .start_timer();

        let periods = sqlx::query_as::<_, BillingPeriod>(&format!(
            r#"
            SELECT {PERIOD_COLUMNS} FROM billing_periods
            WHERE status IN ('OPEN', 'CLOSED') AND period_end < $1
            ORDER BY period_end, cycle_number
            "#
        ))
        .bind(before)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to list due periods: {}", e))
        })?;

        timer.observe_duration();

        Ok(periods)
    }

    #[instrument(skip(self, from), fields(period_id = %period_id, to = to.as_str()))]
    async fn transition_period(
        &self,
        period_id: Uuid,
        from: &[BillingPeriodStatus],
        to: BillingPeriodStatus,
    ) -> Result<Option<BillingPeriod>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["transition_period"])
            .start_timer();

        let period = sqlx::query_as::<_, BillingPeriod>(&format!(
            r#"
            UPDATE billing_periods SET status = $3
            WHERE period_id = $1 AND status = ANY($2)
            RETURNING {PERIOD_COLUMNS}
            "#
        ))
        .bind(period_id)
        .bind(status_labels(from, BillingPeriodStatus::as_str))
        .bind(to.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to update billing period: {}", e))
        })?;

        timer.observe_duration();

        Ok(period)
    }

    // =========================================================================
    // Customer / Meter / Usage Operations
    // =========================================================================

    #[instrument(skip(self), fields(customer_id = %customer_id))]
    async fn get_customer(&self, customer_id: Uuid) -> Result<Option<Customer>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_customer"])
            .start_timer();

        let customer = sqlx::query_as::<_, Customer>(
            r#"
            SELECT customer_id, name, customer_class, email, billing_cycle_number
            FROM customers WHERE customer_id = $1
            "#,
        )
        .bind(customer_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get customer: {}", e)))?;

        timer.observe_duration();

        Ok(customer)
    }

    #[instrument(skip(self))]
    async fn customers_in_cycle(&self, cycle_number: i32) -> Result<Vec<Customer>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["customers_in_cycle"])
            .start_timer();

        let customers = sqlx::query_as::<_, Customer>(
            r#"
            SELECT customer_id, name, customer_class, email, billing_cycle_number
            FROM customers WHERE billing_cycle_number = $1
            ORDER BY name, customer_id
            "#,
        )
        .bind(cycle_number)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to list customers: {}", e)))?;

        timer.observe_duration();

        Ok(customers)
    }

    #[instrument(skip(self), fields(customer_id = %customer_id))]
    async fn active_meters_of(&self, customer_id: Uuid) -> Result<Vec<Meter>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["active_meters_of"])
            .start_timer();

        let meters = sqlx::query_as::<_, Meter>(
            r#"
            SELECT meter_id, customer_id, external_location_id, status
            FROM meters WHERE customer_id = $1 AND status = 'ACTIVE'
            ORDER BY external_location_id
            "#,
        )
        .bind(customer_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to list meters: {}", e)))?;

        timer.observe_duration();

        Ok(meters)
    }

    #[instrument(skip(self), fields(meter_id = %meter_id))]
    async fn sum_usage(
        &self,
        meter_id: Uuid,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Option<Decimal>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["sum_usage"])
            .start_timer();

        let total = sqlx::query_scalar::<_, Option<Decimal>>(
            r#"
            SELECT SUM(usage_quantity) FROM meter_readings
            WHERE meter_id = $1 AND reading_date BETWEEN $2 AND $3
            "#,
        )
        .bind(meter_id)
        .bind(start)
        .bind(end)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to sum usage: {}", e)))?;

        timer.observe_duration();

        Ok(total)
    }

    // =========================================================================
    // Rate Plan Operations
    // =========================================================================

    #[instrument(skip(self))]
    async fn list_rate_plans(&self) -> Result<Vec<RatePlan>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_rate_plans"])
            .start_timer();

        let plans = sqlx::query_as::<_, RatePlan>(&format!(
            "SELECT {PLAN_COLUMNS} FROM rate_plans ORDER BY effective_start, plan_id"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to list rate plans: {}", e)))?;

        timer.observe_duration();

        Ok(plans)
    }

    #[instrument(skip(self), fields(plan_id = %plan_id))]
    async fn get_rate_plan(&self, plan_id: Uuid) -> Result<Option<RatePlan>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_rate_plan"])
            .start_timer();

        let plan = sqlx::query_as::<_, RatePlan>(&format!(
            "SELECT {PLAN_COLUMNS} FROM rate_plans WHERE plan_id = $1"
        ))
        .bind(plan_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get rate plan: {}", e)))?;

        timer.observe_duration();

        Ok(plan)
    }

    #[instrument(skip(self, from), fields(plan_id = %plan_id, to = to.as_str()))]
    async fn transition_plan(
        &self,
        plan_id: Uuid,
        from: &[RatePlanStatus],
        to: RatePlanStatus,
    ) -> Result<Option<RatePlan>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["transition_plan"])
            .start_timer();

        let plan = sqlx::query_as::<_, RatePlan>(&format!(
            r#"
            UPDATE rate_plans SET status = $3, updated_utc = $4
            WHERE plan_id = $1 AND status = ANY($2)
            RETURNING {PLAN_COLUMNS}
            "#
        ))
        .bind(plan_id)
        .bind(status_labels(from, RatePlanStatus::as_str))
        .bind(to.as_str())
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to update rate plan: {}", e))
        })?;

        timer.observe_duration();
        if let Some(plan) = &plan {
            info!(
                plan_id = %plan.plan_id,
                status = plan.status.as_str(),
                "Rate plan status updated"
            );
        }

        Ok(plan)
    }

    #[instrument(skip(self), fields(plan_id = %plan_id))]
    async fn rate_components(&self, plan_id: Uuid) -> Result<Vec<RateComponentRecord>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["rate_components"])
            .start_timer();

        let components = sqlx::query_as::<_, RateComponentRecord>(
            r#"
            SELECT component_id, rate_plan_id, component_type, name, config_json, sort_order,
                   is_active
            FROM rate_components WHERE rate_plan_id = $1
            ORDER BY sort_order
            "#,
        )
        .bind(plan_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to get rate components: {}", e))
        })?;

        timer.observe_duration();

        Ok(components)
    }

    // =========================================================================
    // Bill Operations
    // =========================================================================

    #[instrument(skip(self), fields(customer_id = %customer_id, period_id = %period_id))]
    async fn find_bill(
        &self,
        customer_id: Uuid,
        period_id: Uuid,
    ) -> Result<Option<Bill>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["find_bill"])
            .start_timer();

        let bill = self.live_bill(customer_id, period_id).await?;

        timer.observe_duration();

        Ok(bill)
    }

    #[instrument(
        skip(self, bill, line_items),
        fields(bill_id = %bill.bill_id, customer_id = %bill.customer_id)
    )]
    async fn insert_bill(
        &self,
        bill: &Bill,
        line_items: &[BillLineItem],
    ) -> Result<InsertOutcome, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["insert_bill"])
            .start_timer();

        let mut tx = self.pool.begin().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to begin transaction: {}", e))
        })?;

        // The partial unique index on live bills decides the race; a losing
        // insert returns no row.
        let inserted = sqlx::query_as::<_, Bill>(&format!(
            r#"
            INSERT INTO bills ({BILL_COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            ON CONFLICT (customer_id, billing_period_id) WHERE status <> 'VOID' DO NOTHING
            RETURNING {BILL_COLUMNS}
            "#
        ))
        .bind(bill.bill_id)
        .bind(bill.customer_id)
        .bind(bill.meter_id)
        .bind(bill.billing_period_id)
        .bind(bill.rate_plan_id)
        .bind(bill.issue_date)
        .bind(bill.due_date)
        .bind(bill.status.as_str())
        .bind(bill.usage_quantity)
        .bind(bill.subtotal)
        .bind(bill.total_fees)
        .bind(bill.total_surcharges)
        .bind(bill.total_amount)
        .bind(bill.delivery_method.as_str())
        .bind(bill.created_utc)
        .bind(bill.updated_utc)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to insert bill: {}", e)))?;

        let Some(inserted) = inserted else {
            tx.rollback().await.ok();
            let existing = self.live_bill(bill.customer_id, bill.billing_period_id).await?;
            timer.observe_duration();
            return existing.map(InsertOutcome::AlreadyBilled).ok_or_else(|| {
                AppError::Conflict(anyhow::anyhow!(
                    "Bill for customer {} in period {} conflicted but could not be read back",
                    bill.customer_id,
                    bill.billing_period_id
                ))
            });
        };

        let mut inserted_items = Vec::with_capacity(line_items.len());
        for item in line_items {
            let row = sqlx::query_as::<_, BillLineItem>(
                r#"
                INSERT INTO bill_line_items (line_item_id, bill_id, line_number, line_type,
                                             description, amount, rate_component_id, created_utc)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                RETURNING line_item_id, bill_id, line_number, line_type, description, amount,
                          rate_component_id, created_utc
                "#,
            )
            .bind(item.line_item_id)
            .bind(item.bill_id)
            .bind(item.line_number)
            .bind(item.line_type.as_str())
            .bind(&item.description)
            .bind(item.amount)
            .bind(item.rate_component_id)
            .bind(item.created_utc)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to insert bill line item: {}", e))
            })?;
            inserted_items.push(row);
        }

        tx.commit().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to commit transaction: {}", e))
        })?;

        timer.observe_duration();
        info!(
            bill_id = %inserted.bill_id,
            line_items = inserted_items.len(),
            total_amount = %inserted.total_amount,
            "Bill created"
        );

        Ok(InsertOutcome::Inserted(BillWithLines {
            bill: inserted,
            line_items: inserted_items,
        }))
    }

    #[instrument(skip(self), fields(bill_id = %bill_id))]
    async fn get_bill(&self, bill_id: Uuid) -> Result<Option<Bill>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_bill"])
            .start_timer();

        let sql = format!("SELECT {BILL_COLUMNS} FROM bills WHERE bill_id = $1");
        let bill = sqlx::query_as::<_, Bill>(&sql)
            .bind(bill_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get bill: {}", e)))?;

        timer.observe_duration();

        Ok(bill)
    }

    #[instrument(skip(self), fields(period_id = %period_id))]
    async fn list_bills_for_period(
        &self,
        period_id: Uuid,
        status: Option<BillStatus>,
    ) -> Result<Vec<Bill>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_bills_for_period"])
            .start_timer();

        let bills = sqlx::query_as::<_, Bill>(&format!(
            r#"
            SELECT {BILL_COLUMNS} FROM bills
            WHERE billing_period_id = $1 AND ($2::TEXT IS NULL OR status = $2)
            ORDER BY created_utc, bill_id
            "#
        ))
        .bind(period_id)
        .bind(status.map(|s| s.as_str()))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to list bills: {}", e)))?;

        timer.observe_duration();

        Ok(bills)
    }

    #[instrument(skip(self), fields(bill_id = %bill_id))]
    async fn bill_line_items(&self, bill_id: Uuid) -> Result<Vec<BillLineItem>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["bill_line_items"])
            .start_timer();

        let items = sqlx::query_as::<_, BillLineItem>(
            r#"
            SELECT line_item_id, bill_id, line_number, line_type, description, amount,
                   rate_component_id, created_utc
            FROM bill_line_items WHERE bill_id = $1
            ORDER BY line_number
            "#,
        )
        .bind(bill_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get line items: {}", e)))?;

        timer.observe_duration();

        Ok(items)
    }

    #[instrument(skip(self, from), fields(bill_id = %bill_id, to = to.as_str()))]
    async fn transition_bill(
        &self,
        bill_id: Uuid,
        from: &[BillStatus],
        to: BillStatus,
    ) -> Result<Option<Bill>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["transition_bill"])
            .start_timer();

        let bill = sqlx::query_as::<_, Bill>(&format!(
            r#"
            UPDATE bills SET status = $3, updated_utc = $4
            WHERE bill_id = $1 AND status = ANY($2)
            RETURNING {BILL_COLUMNS}
            "#
        ))
        .bind(bill_id)
        .bind(status_labels(from, BillStatus::as_str))
        .bind(to.as_str())
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to update bill: {}", e)))?;

        timer.observe_duration();

        Ok(bill)
    }
}
