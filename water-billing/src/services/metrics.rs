//! Metrics module for water-billing.
//! Provides Prometheus metrics for billing runs and bill lifecycle operations.

use once_cell::sync::Lazy;
use prometheus::{
    histogram_opts, opts, register_counter_vec, register_histogram_vec, register_int_counter_vec,
    CounterVec, Encoder, HistogramVec, IntCounterVec, TextEncoder,
};
use std::sync::OnceLock;

/// Database query duration histogram
pub static DB_QUERY_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        histogram_opts!(
            "water_billing_db_query_duration_seconds",
            "Database query duration"
        ),
        &["operation"]
    )
    .expect("Failed to register DB_QUERY_DURATION")
});

/// Billing runs by outcome
pub static BILLING_RUNS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Billing run duration histogram
pub static BILLING_RUN_DURATION: OnceLock<HistogramVec> = OnceLock::new();

/// Customers processed by outcome
pub static CUSTOMERS_PROCESSED_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Amount billed by customer class
pub static BILLED_AMOUNT_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Bill status transitions
pub static BILL_TRANSITIONS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Bill notification results
pub static NOTIFICATIONS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Error counter for alerting
pub static ERRORS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Initialize all metrics. Call once at startup.
pub fn init_metrics() {
    BILLING_RUNS_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!("water_billing_runs_total", "Total billing runs by outcome"),
            &["outcome"]
        )
        .expect("Failed to register BILLING_RUNS_TOTAL")
    });

    BILLING_RUN_DURATION.get_or_init(|| {
        register_histogram_vec!(
            histogram_opts!(
                "water_billing_run_duration_seconds",
                "Billing run duration",
                vec![0.1, 0.5, 1.0, 5.0, 15.0, 30.0, 60.0, 300.0, 900.0]
            ),
            &["outcome"]
        )
        .expect("Failed to register BILLING_RUN_DURATION")
    });

    CUSTOMERS_PROCESSED_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!(
                "water_billing_customers_processed_total",
                "Customers processed in billing runs by outcome"
            ),
            &["outcome"]
        )
        .expect("Failed to register CUSTOMERS_PROCESSED_TOTAL")
    });

    BILLED_AMOUNT_TOTAL.get_or_init(|| {
        register_counter_vec!(
            opts!(
                "water_billing_billed_amount_total",
                "Total amount billed by customer class"
            ),
            &["customer_class"]
        )
        .expect("Failed to register BILLED_AMOUNT_TOTAL")
    });

    BILL_TRANSITIONS_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!(
                "water_billing_bill_transitions_total",
                "Bill status transitions by target status"
            ),
            &["status"]
        )
        .expect("Failed to register BILL_TRANSITIONS_TOTAL")
    });

    NOTIFICATIONS_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!(
                "water_billing_notifications_total",
                "Bill notifications by result"
            ),
            &["result"]
        )
        .expect("Failed to register NOTIFICATIONS_TOTAL")
    });

    ERRORS_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!("water_billing_errors_total", "Total errors by type for alerting"),
            &["error_type", "operation"]
        )
        .expect("Failed to register ERRORS_TOTAL")
    });

    // Force initialization of lazy statics
    let _ = &*DB_QUERY_DURATION;
}

/// Get metrics in Prometheus text format.
pub fn get_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(error = %e, "Failed to encode metrics");
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

/// Record a completed billing run.
pub fn record_billing_run(outcome: &str, duration_secs: f64) {
    if let Some(counter) = BILLING_RUNS_TOTAL.get() {
        counter.with_label_values(&[outcome]).inc();
    }
    if let Some(histogram) = BILLING_RUN_DURATION.get() {
        histogram.with_label_values(&[outcome]).observe(duration_secs);
    }
}

/// Record one customer's outcome within a run.
pub fn record_customer_processed(outcome: &str) {
    if let Some(counter) = CUSTOMERS_PROCESSED_TOTAL.get() {
        counter.with_label_values(&[outcome]).inc();
    }
}

/// Record a newly billed amount.
pub fn record_billed_amount(customer_class: &str, amount: f64) {
    if let Some(counter) = BILLED_AMOUNT_TOTAL.get() {
        counter
            .with_label_values(&[customer_class])
            .inc_by(amount.abs());
    }
}

/// Record a bill moving to `status`.
pub fn record_bill_transition(status: &str) {
    if let Some(counter) = BILL_TRANSITIONS_TOTAL.get() {
        counter.with_label_values(&[status]).inc();
    }
}

/// Record a notification attempt result.
pub fn record_notification(result: &str) {
    if let Some(counter) = NOTIFICATIONS_TOTAL.get() {
        counter.with_label_values(&[result]).inc();
    }
}

/// Record an error for alerting.
pub fn record_error(error_type: &str, operation: &str) {
    if let Some(counter) = ERRORS_TOTAL.get() {
        counter.with_label_values(&[error_type, operation]).inc();
    }
}
