//! Services module for water-billing.

pub mod database;
pub mod email;
pub mod memory;
pub mod metrics;
pub mod store;

pub use database::Database;
pub use email::{BillNotice, BillNotifier, MockNotifier, NotifierError, SmtpNotifier};
pub use memory::MemoryStore;
pub use metrics::{
    get_metrics, init_metrics, record_bill_transition, record_billed_amount, record_billing_run,
    record_customer_processed, record_error, record_notification,
};
pub use store::BillingStore;
