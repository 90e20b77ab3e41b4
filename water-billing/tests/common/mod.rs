//! Test helper module for water-billing integration tests.
//!
//! Everything runs against the in-memory store and the recording notifier.

#![allow(dead_code)]

use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use serde_json::{json, Value};
use std::sync::Arc;
use uuid::Uuid;
use water_billing::config::{BillingConfig, BillingRunConfig, DatabaseConfig, SmtpConfig};
use water_billing::models::{
    BillingPeriod, Customer, CustomerClass, Meter, MeterStatus, PlanScope, RateComponentRecord,
    RatePlan, RatePlanStatus,
};
use service_core::config::Config as CoreConfig;
use water_billing::services::{MemoryStore, MockNotifier};
use water_billing::startup::Application;
use water_billing::BillingService;

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).expect("valid test date")
}

pub fn plan_record(
    name: &str,
    scope: PlanScope,
    start: NaiveDate,
    status: RatePlanStatus,
) -> RatePlan {
    RatePlan {
        plan_id: Uuid::new_v4(),
        name: name.to_string(),
        customer_scope: scope,
        effective_start: start,
        effective_end: None,
        status,
        created_utc: Utc::now(),
        updated_utc: Utc::now(),
    }
}

pub fn component_record(
    plan_id: Uuid,
    component_type: &str,
    name: &str,
    config: Value,
    sort_order: i32,
) -> RateComponentRecord {
    RateComponentRecord {
        component_id: Uuid::new_v4(),
        rate_plan_id: plan_id,
        component_type: component_type.to_string(),
        name: name.to_string(),
        config_json: config,
        sort_order,
        is_active: true,
    }
}

/// `[{up_to: 10, rate: 2}, {up_to: null, rate: 3}]`
pub fn two_tier_config() -> Value {
    json!({
        "tiers": [
            { "up_to": 10, "rate_per_unit": 2 },
            { "up_to": null, "rate_per_unit": 3 }
        ]
    })
}

/// A billing service wired to an in-memory store and mock notifier.
pub struct TestBilling {
    pub store: Arc<MemoryStore>,
    pub notifier: Arc<MockNotifier>,
    pub service: BillingService,
}

impl TestBilling {
    pub fn new() -> Self {
        Self::with_settings(BillingRunConfig::default())
    }

    pub fn with_settings(settings: BillingRunConfig) -> Self {
        let store = Arc::new(MemoryStore::new());
        let notifier = Arc::new(MockNotifier::new());
        let service = BillingService::new(store.clone(), notifier.clone(), settings);
        Self {
            store,
            notifier,
            service,
        }
    }

    pub async fn customer(
        &self,
        name: &str,
        class: CustomerClass,
        email: Option<&str>,
        cycle: i32,
    ) -> Customer {
        let customer = Customer {
            customer_id: Uuid::new_v4(),
            name: name.to_string(),
            customer_class: class,
            email: email.map(str::to_string),
            billing_cycle_number: cycle,
        };
        self.store.add_customer(customer.clone()).await;
        customer
    }

    pub async fn meter(&self, customer_id: Uuid, status: MeterStatus) -> Meter {
        let meter = Meter {
            meter_id: Uuid::new_v4(),
            customer_id,
            external_location_id: format!("LOC-{}", &Uuid::new_v4().simple().to_string()[..8]),
            status,
        };
        self.store.add_meter(meter.clone()).await;
        meter
    }

    pub async fn reading(&self, meter_id: Uuid, on: NaiveDate, quantity: Decimal) {
        self.store.add_reading(meter_id, on, quantity).await;
    }

    /// Customer with one active meter and `usage` read mid-June 2024.
    pub async fn metered_customer(
        &self,
        name: &str,
        class: CustomerClass,
        email: Option<&str>,
        usage: Decimal,
    ) -> (Customer, Meter) {
        let customer = self.customer(name, class, email, 1).await;
        let meter = self.meter(customer.customer_id, MeterStatus::Active).await;
        self.reading(meter.meter_id, date(2024, 6, 15), usage).await;
        (customer, meter)
    }

    pub async fn plan(&self, name: &str, scope: PlanScope, status: RatePlanStatus) -> RatePlan {
        let plan = plan_record(name, scope, date(2024, 1, 1), status);
        self.store.add_rate_plan(plan.clone()).await;
        plan
    }

    pub async fn component(
        &self,
        plan_id: Uuid,
        component_type: &str,
        name: &str,
        config: Value,
        sort_order: i32,
    ) -> RateComponentRecord {
        let record = component_record(plan_id, component_type, name, config, sort_order);
        self.store.add_component(record.clone()).await;
        record
    }

    /// ACTIVE plan for RESIDENTIAL customers: two tiers plus a 5.00 service fee.
    pub async fn residential_plan(&self) -> RatePlan {
        let plan = self
            .plan("Residential 2024", PlanScope::Residential, RatePlanStatus::Active)
            .await;
        self.component(plan.plan_id, "TIERED_USAGE", "Water Usage", two_tier_config(), 1)
            .await;
        self.component(
            plan.plan_id,
            "FIXED_FEE",
            "Service Fee",
            json!({ "amount": "5.00" }),
            2,
        )
        .await;
        plan
    }

    /// OPEN period for cycle 1 covering June 2024.
    pub async fn june_period(&self) -> BillingPeriod {
        self.service
            .create_period(1, date(2024, 6, 1), date(2024, 6, 30))
            .await
            .expect("June period should be created")
    }
}

/// Running HTTP surface over the in-memory store.
pub struct TestApp {
    pub http_address: String,
    pub store: Arc<MemoryStore>,
}

impl TestApp {
    pub async fn spawn() -> Self {
        let config = BillingConfig {
            common: CoreConfig { port: 0 },
            service_name: "water-billing".to_string(),
            service_version: "test".to_string(),
            log_level: "debug".to_string(),
            otlp_endpoint: None,
            database: DatabaseConfig {
                url: "postgres://unused".to_string(),
                max_connections: 1,
                min_connections: 1,
            },
            smtp: SmtpConfig {
                host: "localhost".to_string(),
                port: 587,
                user: String::new(),
                password: String::new(),
                from_email: "billing@example.com".to_string(),
                from_name: "Water Billing".to_string(),
                enabled: false,
            },
            billing: BillingRunConfig::default(),
        };

        let store = Arc::new(MemoryStore::new());
        let notifier = Arc::new(MockNotifier::new());
        let app = Application::build_with_store(config, store.clone(), notifier)
            .await
            .expect("Failed to build application");
        let http_address = format!("http://127.0.0.1:{}", app.http_port());

        tokio::spawn(async move {
            let _ = app.run_until_stopped().await;
        });

        Self { http_address, store }
    }
}
