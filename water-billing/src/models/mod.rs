//! Domain models for water-billing.

mod bill;
mod billing_run;
mod customer;
mod period;
mod rate_plan;

pub use bill::{
    Bill, BillLineItem, BillStatus, BillWithLines, DeliveryMethod, InsertOutcome, LineType,
};
pub use billing_run::{
    BillBatchResult, BillError, BillingRunResult, CustomerError, CustomerOutcome, SkippedCustomer,
};
pub use customer::{Customer, CustomerClass, Meter, MeterStatus};
pub use period::{BillingPeriod, BillingPeriodStatus, CreateBillingPeriod};
pub use rate_plan::{
    ComponentRule, PlanScope, RateComponent, RateComponentRecord, RatePlan, RatePlanStatus,
    RateSchedule, Tier,
};
