//! Billing period model.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Billing period status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "text", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BillingPeriodStatus {
    Open,
    Closed,
    Billed,
}

impl BillingPeriodStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BillingPeriodStatus::Open => "OPEN",
            BillingPeriodStatus::Closed => "CLOSED",
            BillingPeriodStatus::Billed => "BILLED",
        }
    }
}

/// Date-bounded billing cycle for one cycle number.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct BillingPeriod {
    pub period_id: Uuid,
    pub cycle_number: i32,
    pub period_start: NaiveDate,
    /// Inclusive.
    pub period_end: NaiveDate,
    pub status: BillingPeriodStatus,
    pub created_utc: DateTime<Utc>,
}

impl BillingPeriod {
    /// True when both periods share at least one day.
    pub fn overlaps(&self, start: NaiveDate, end: NaiveDate) -> bool {
        self.period_start <= end && start <= self.period_end
    }
}

/// Input for creating a billing period.
#[derive(Debug, Clone)]
pub struct CreateBillingPeriod {
    pub cycle_number: i32,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
}
