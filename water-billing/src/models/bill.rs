//! Bill and bill line item models.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::str::FromStr;
use uuid::Uuid;

/// Bill lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "text", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BillStatus {
    Draft,
    Issued,
    Sent,
    Paid,
    Void,
}

impl BillStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BillStatus::Draft => "DRAFT",
            BillStatus::Issued => "ISSUED",
            BillStatus::Sent => "SENT",
            BillStatus::Paid => "PAID",
            BillStatus::Void => "VOID",
        }
    }
}

/// How a bill reaches the customer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "text", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeliveryMethod {
    Portal,
    Email,
    Both,
}

impl DeliveryMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryMethod::Portal => "PORTAL",
            DeliveryMethod::Email => "EMAIL",
            DeliveryMethod::Both => "BOTH",
        }
    }

    pub fn includes_email(&self) -> bool {
        matches!(self, DeliveryMethod::Email | DeliveryMethod::Both)
    }
}

impl FromStr for DeliveryMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "PORTAL" => Ok(DeliveryMethod::Portal),
            "EMAIL" => Ok(DeliveryMethod::Email),
            "BOTH" => Ok(DeliveryMethod::Both),
            other => Err(format!("Unknown delivery method: {}", other)),
        }
    }
}

/// Persisted bill header.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Bill {
    pub bill_id: Uuid,
    pub customer_id: Uuid,
    /// Representative meter; the first active meter at billing time.
    pub meter_id: Uuid,
    pub billing_period_id: Uuid,
    pub rate_plan_id: Uuid,
    pub issue_date: NaiveDate,
    pub due_date: NaiveDate,
    pub status: BillStatus,
    pub usage_quantity: Decimal,
    /// Usage charge plus fixed fees.
    pub subtotal: Decimal,
    pub total_fees: Decimal,
    pub total_surcharges: Decimal,
    pub total_amount: Decimal,
    pub delivery_method: DeliveryMethod,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

/// Line item category on a persisted bill.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "text", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LineType {
    UsageCharge,
    Fee,
    Surcharge,
    Adjustment,
}

impl LineType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LineType::UsageCharge => "USAGE_CHARGE",
            LineType::Fee => "FEE",
            LineType::Surcharge => "SURCHARGE",
            LineType::Adjustment => "ADJUSTMENT",
        }
    }
}

/// Itemized line owned by a bill.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct BillLineItem {
    pub line_item_id: Uuid,
    pub bill_id: Uuid,
    /// 1-based position in engine output order.
    pub line_number: i32,
    pub line_type: LineType,
    pub description: String,
    pub amount: Decimal,
    pub rate_component_id: Option<Uuid>,
    pub created_utc: DateTime<Utc>,
}

/// A bill together with its line items.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BillWithLines {
    pub bill: Bill,
    pub line_items: Vec<BillLineItem>,
}

/// Result of an atomic bill insert.
#[derive(Debug, Clone)]
pub enum InsertOutcome {
    Inserted(BillWithLines),
    /// A non-void bill already exists for the same customer and period.
    AlreadyBilled(Bill),
}
