//! Billing period management.

use super::BillingService;
use crate::error::{BillingError, Result};
use crate::models::{BillingPeriod, BillingPeriodStatus, CreateBillingPeriod};
use chrono::NaiveDate;
use service_core::error::AppError;
use tracing::{info, instrument};
use uuid::Uuid;

impl BillingService {
    /// Open a new period for a billing cycle.
    #[instrument(skip(self))]
    pub async fn create_period(
        &self,
        cycle_number: i32,
        period_start: NaiveDate,
        period_end: NaiveDate,
    ) -> Result<BillingPeriod> {
        if period_start > period_end {
            return Err(BillingError::Validation(format!(
                "Period start {} is after period end {}",
                period_start, period_end
            )));
        }

        let existing = self.store.list_periods_for_cycle(cycle_number).await?;
        if existing.iter().any(|p| p.period_start == period_start) {
            return Err(BillingError::Validation(format!(
                "Billing period for cycle {} starting {} already exists",
                cycle_number, period_start
            )));
        }
        if let Some(overlap) = existing.iter().find(|p| p.overlaps(period_start, period_end)) {
            return Err(BillingError::Validation(format!(
                "Billing period {} to {} overlaps existing period {} to {} in cycle {}",
                period_start, period_end, overlap.period_start, overlap.period_end, cycle_number
            )));
        }

        let input = CreateBillingPeriod {
            cycle_number,
            period_start,
            period_end,
        };
        let period = match self.store.create_period(&input).await {
            Ok(period) => period,
            // Lost a race against a concurrent create of the same pair.
            Err(AppError::Conflict(e)) => return Err(BillingError::Validation(e.to_string())),
            Err(e) => return Err(e.into()),
        };

        info!(period_id = %period.period_id, "Billing period opened");
        Ok(period)
    }

    /// Close usage intake for an OPEN period. A CLOSED period can still be run.
    #[instrument(skip(self), fields(period_id = %period_id))]
    pub async fn close_period(&self, period_id: Uuid) -> Result<BillingPeriod> {
        if let Some(period) = self
            .store
            .transition_period(period_id, &[BillingPeriodStatus::Open], BillingPeriodStatus::Closed)
            .await?
        {
            info!("Billing period closed");
            return Ok(period);
        }

        match self.store.get_period(period_id).await? {
            Some(period) => Err(BillingError::Conflict(format!(
                "Billing period {} is {}, only OPEN periods can be closed",
                period_id,
                period.status.as_str()
            ))),
            None => Err(BillingError::NotFound(format!(
                "Billing period {} not found",
                period_id
            ))),
        }
    }
}
