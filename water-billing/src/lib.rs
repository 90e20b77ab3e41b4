//! Water billing: rate engine, billing runs and the bill lifecycle.

pub mod billing;
pub mod config;
pub mod engine;
pub mod error;
pub mod models;
pub mod services;
pub mod startup;

pub use billing::BillingService;
pub use error::{BillingError, Result};
