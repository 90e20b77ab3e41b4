//! Bill lifecycle after a run: issue, send, payment and void.

use super::BillingService;
use crate::error::{BillingError, Result};
use crate::models::{Bill, BillBatchResult, BillStatus, BillingPeriod, DeliveryMethod};
use crate::services::{record_bill_transition, record_notification, BillNotice, NotifierError};
use rust_decimal::Decimal;
use tracing::{info, instrument, warn};
use uuid::Uuid;

impl BillingService {
    /// Move every DRAFT bill of the period to ISSUED.
    #[instrument(skip(self), fields(period_id = %period_id))]
    pub async fn issue_bills(&self, period_id: Uuid) -> Result<BillBatchResult> {
        self.require_period(period_id).await?;
        let drafts = self
            .store
            .list_bills_for_period(period_id, Some(BillStatus::Draft))
            .await?;

        let mut result = BillBatchResult::default();
        for bill in drafts {
            let outcome = match self
                .store
                .transition_bill(bill.bill_id, &[BillStatus::Draft], BillStatus::Issued)
                .await
            {
                Ok(Some(_)) => {
                    record_bill_transition(BillStatus::Issued.as_str());
                    Ok(())
                }
                Ok(None) => Err("bill is no longer DRAFT".to_string()),
                Err(e) => Err(e.to_string()),
            };
            result.record(bill.bill_id, outcome);
        }

        info!(issued = result.succeeded, failed = result.failed, "Bills issued");
        Ok(result)
    }

    /// Deliver every ISSUED bill of the period and mark it SENT.
    ///
    /// A failed delivery leaves that bill ISSUED and is recorded; the batch continues.
    #[instrument(skip(self), fields(period_id = %period_id))]
    pub async fn send_bills(&self, period_id: Uuid) -> Result<BillBatchResult> {
        let period = self.require_period(period_id).await?;
        let issued = self
            .store
            .list_bills_for_period(period_id, Some(BillStatus::Issued))
            .await?;

        let mut result = BillBatchResult::default();
        for bill in issued {
            let outcome = self.send_bill(&period, &bill).await;
            if let Err(e) = &outcome {
                warn!(bill_id = %bill.bill_id, error = %e, "Bill delivery failed");
            }
            result.record(bill.bill_id, outcome.map_err(|e| e.to_string()));
        }

        info!(sent = result.succeeded, failed = result.failed, "Bills sent");
        Ok(result)
    }

    async fn send_bill(&self, period: &BillingPeriod, bill: &Bill) -> Result<()> {
        if bill.delivery_method.includes_email() {
            let customer = self
                .store
                .get_customer(bill.customer_id)
                .await?
                .ok_or_else(|| {
                    BillingError::NotFound(format!("Customer {} not found", bill.customer_id))
                })?;

            match customer.email.as_deref() {
                Some(recipient) => {
                    let line_items = self.store.bill_line_items(bill.bill_id).await?;
                    let notice = BillNotice {
                        recipient,
                        customer: &customer,
                        period,
                        bill,
                        line_items: &line_items,
                    };
                    match self.notifier.send_bill_notification(&notice).await {
                        Ok(()) => record_notification("sent"),
                        Err(NotifierError::NotEnabled(reason))
                            if bill.delivery_method == DeliveryMethod::Both =>
                        {
                            record_notification("disabled");
                            warn!(
                                bill_id = %bill.bill_id,
                                reason = %reason,
                                "Email delivery disabled; bill available on portal only"
                            );
                        }
                        Err(e) => {
                            record_notification("failed");
                            return Err(BillingError::Notification(e.to_string()));
                        }
                    }
                }
                None if bill.delivery_method == DeliveryMethod::Email => {
                    record_notification("no_address");
                    return Err(BillingError::Notification(format!(
                        "Customer {} has no email address on file",
                        customer.customer_id
                    )));
                }
                None => {
                    record_notification("no_address");
                    warn!(
                        bill_id = %bill.bill_id,
                        customer_id = %customer.customer_id,
                        "No email address on file; bill available on portal only"
                    );
                }
            }
        }

        self.store
            .transition_bill(bill.bill_id, &[BillStatus::Issued], BillStatus::Sent)
            .await?
            .ok_or_else(|| {
                BillingError::Conflict(format!("Bill {} is no longer ISSUED", bill.bill_id))
            })?;
        record_bill_transition(BillStatus::Sent.as_str());
        Ok(())
    }

    /// Settle an ISSUED or SENT bill in full.
    #[instrument(skip(self), fields(bill_id = %bill_id, amount = %amount))]
    pub async fn record_payment(&self, bill_id: Uuid, amount: Decimal) -> Result<Bill> {
        let bill = self.require_bill(bill_id).await?;

        match bill.status {
            BillStatus::Paid => {
                return Err(BillingError::Conflict(format!("Bill {} is already paid", bill_id)));
            }
            BillStatus::Void => {
                return Err(BillingError::Conflict(format!("Bill {} is void", bill_id)));
            }
            BillStatus::Draft => {
                return Err(BillingError::Validation(format!(
                    "Bill {} has not been issued",
                    bill_id
                )));
            }
            BillStatus::Issued | BillStatus::Sent => {}
        }

        if amount < bill.total_amount {
            return Err(BillingError::Validation(format!(
                "Payment amount {} is less than bill total {}",
                amount, bill.total_amount
            )));
        }

        let paid = self
            .store
            .transition_bill(bill_id, &[BillStatus::Issued, BillStatus::Sent], BillStatus::Paid)
            .await?
            .ok_or_else(|| {
                BillingError::Conflict(format!("Bill {} changed status during payment", bill_id))
            })?;

        record_bill_transition(BillStatus::Paid.as_str());
        info!("Payment recorded");
        Ok(paid)
    }

    /// Void any unpaid bill. The (customer, period) slot becomes free for re-billing.
    #[instrument(skip(self), fields(bill_id = %bill_id))]
    pub async fn void_bill(&self, bill_id: Uuid) -> Result<Bill> {
        let bill = self.require_bill(bill_id).await?;
        if matches!(bill.status, BillStatus::Paid | BillStatus::Void) {
            return Err(BillingError::Conflict(format!(
                "Bill {} is {} and cannot be voided",
                bill_id,
                bill.status.as_str()
            )));
        }

        let voided = self
            .store
            .transition_bill(
                bill_id,
                &[BillStatus::Draft, BillStatus::Issued, BillStatus::Sent],
                BillStatus::Void,
            )
            .await?
            .ok_or_else(|| {
                BillingError::Conflict(format!("Bill {} changed status while voiding", bill_id))
            })?;

        record_bill_transition(BillStatus::Void.as_str());
        info!("Bill voided");
        Ok(voided)
    }

    async fn require_period(&self, period_id: Uuid) -> Result<BillingPeriod> {
        self.store
            .get_period(period_id)
            .await?
            .ok_or_else(|| {
                BillingError::NotFound(format!("Billing period {} not found", period_id))
            })
    }

    async fn require_bill(&self, bill_id: Uuid) -> Result<Bill> {
        self.store
            .get_bill(bill_id)
            .await?
            .ok_or_else(|| BillingError::NotFound(format!("Bill {} not found", bill_id)))
    }
}
