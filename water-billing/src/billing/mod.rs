//! Billing orchestration: runs, periods, rate plans and the bill lifecycle.

mod lifecycle;
mod periods;
mod plans;
mod run;

use crate::config::BillingRunConfig;
use crate::services::{BillNotifier, BillingStore};
use std::sync::Arc;

/// Entry point for every billing operation. Cheap to clone.
#[derive(Clone)]
pub struct BillingService {
    store: Arc<dyn BillingStore>,
    notifier: Arc<dyn BillNotifier>,
    settings: BillingRunConfig,
}

impl BillingService {
    pub fn new(
        store: Arc<dyn BillingStore>,
        notifier: Arc<dyn BillNotifier>,
        settings: BillingRunConfig,
    ) -> Self {
        Self {
            store,
            notifier,
            settings,
        }
    }

    pub fn store(&self) -> &Arc<dyn BillingStore> {
        &self.store
    }

    pub fn settings(&self) -> &BillingRunConfig {
        &self.settings
    }
}
