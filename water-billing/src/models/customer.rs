//! Customer and meter models.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Customer class used to scope rate plans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "text", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CustomerClass {
    Residential,
    Commercial,
}

impl CustomerClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            CustomerClass::Residential => "RESIDENTIAL",
            CustomerClass::Commercial => "COMMERCIAL",
        }
    }
}

/// Billable customer.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Customer {
    pub customer_id: Uuid,
    pub name: String,
    pub customer_class: CustomerClass,
    pub email: Option<String>,
    pub billing_cycle_number: i32,
}

/// Meter status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "text", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MeterStatus {
    Active,
    Inactive,
}

/// Service meter owned by a customer.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Meter {
    pub meter_id: Uuid,
    pub customer_id: Uuid,
    pub external_location_id: String,
    pub status: MeterStatus,
}

impl Meter {
    pub fn is_active(&self) -> bool {
        self.status == MeterStatus::Active
    }
}
