//! Billing run outcome models.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::Bill;

/// What happened to one customer during a run.
#[derive(Debug, Clone)]
pub enum CustomerOutcome {
    /// A new bill was written.
    Billed(Bill),
    /// A non-void bill already existed for the period.
    AlreadyBilled(Bill),
    /// Nothing to bill; not counted as a failure.
    Skipped(String),
}

/// Customer-level failure recorded without aborting the run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomerError {
    pub customer_id: Uuid,
    pub kind: String,
    pub message: String,
}

/// Customer that was deliberately not billed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkippedCustomer {
    pub customer_id: Uuid,
    pub reason: String,
}

/// Summary of one billing run over a period.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BillingRunResult {
    pub period_id: Uuid,
    pub total_customers: usize,
    /// Newly billed plus already billed customers.
    pub success_count: usize,
    pub already_billed_count: usize,
    pub failed_count: usize,
    pub total_billed: Decimal,
    pub skipped: Vec<SkippedCustomer>,
    pub errors: Vec<CustomerError>,
    /// False when the final period transition to BILLED could not be written.
    pub period_marked_billed: bool,
    pub started_utc: DateTime<Utc>,
    pub completed_utc: DateTime<Utc>,
}

impl BillingRunResult {
    pub fn new(period_id: Uuid, started_utc: DateTime<Utc>) -> Self {
        Self {
            period_id,
            total_customers: 0,
            success_count: 0,
            already_billed_count: 0,
            failed_count: 0,
            total_billed: Decimal::ZERO,
            skipped: Vec::new(),
            errors: Vec::new(),
            period_marked_billed: false,
            started_utc,
            completed_utc: started_utc,
        }
    }

    /// Fold one customer's result into the summary.
    pub fn record(
        &mut self,
        customer_id: Uuid,
        result: Result<CustomerOutcome, crate::BillingError>,
    ) {
        self.total_customers += 1;
        match result {
            Ok(CustomerOutcome::Billed(bill)) => {
                self.success_count += 1;
                self.total_billed += bill.total_amount;
            }
            Ok(CustomerOutcome::AlreadyBilled(bill)) => {
                self.success_count += 1;
                self.already_billed_count += 1;
                self.total_billed += bill.total_amount;
            }
            Ok(CustomerOutcome::Skipped(reason)) => {
                self.skipped.push(SkippedCustomer {
                    customer_id,
                    reason,
                });
            }
            Err(e) => {
                self.failed_count += 1;
                self.errors.push(CustomerError {
                    customer_id,
                    kind: e.kind().to_string(),
                    message: e.to_string(),
                });
            }
        }
    }

    /// Label for metrics: `completed`, `partial` or `failed`.
    pub fn outcome(&self) -> &'static str {
        if self.failed_count == 0 {
            "completed"
        } else if self.success_count == 0 {
            "failed"
        } else {
            "partial"
        }
    }
}

/// Per-bill failure during issue or send.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BillError {
    pub bill_id: Uuid,
    pub message: String,
}

/// Summary of a batch bill status transition (issue or send).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BillBatchResult {
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub errors: Vec<BillError>,
}

impl BillBatchResult {
    pub fn record(&mut self, bill_id: Uuid, result: Result<(), String>) {
        self.processed += 1;
        match result {
            Ok(()) => self.succeeded += 1,
            Err(message) => {
                self.failed += 1;
                self.errors.push(BillError { bill_id, message });
            }
        }
    }
}
