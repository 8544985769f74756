//! Metrics module for invoicing-service.
//! Provides Prometheus metrics for invoice generation and usage ingestion.

use once_cell::sync::Lazy;
use prometheus::{
    histogram_opts, opts, register_histogram_vec, register_int_counter_vec, Encoder, HistogramVec,
    IntCounterVec, TextEncoder,
};
use std::sync::OnceLock;

/// Database query duration histogram
pub static DB_QUERY_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        histogram_opts!(
            "invoicing_db_query_duration_seconds",
            "Database query duration"
        ),
        &["operation"]
    )
    .expect("Failed to register DB_QUERY_DURATION")
});

/// Invoices created counter (per-tenant metering)
pub static INVOICES_CREATED_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Fees created counter (per-tenant metering)
pub static FEES_CREATED_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Usage events counter (per-tenant metering)
pub static USAGE_EVENTS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Billing runs counter
pub static BILLING_RUNS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Invoiced amount counter by currency (monetary tracking)
pub static INVOICE_AMOUNT_TOTAL: OnceLock<prometheus::CounterVec> = OnceLock::new();

/// Error counter for alerting
pub static ERRORS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Initialize all metrics. Call once at startup.
pub fn init_metrics() {
    INVOICES_CREATED_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!(
                "invoicing_invoices_created_total",
                "Total invoices created by tenant"
            ),
            &["tenant_id"]
        )
        .expect("Failed to register INVOICES_CREATED_TOTAL")
    });

    FEES_CREATED_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!(
                "invoicing_fees_created_total",
                "Total fees created by tenant and fee type"
            ),
            &["tenant_id", "fee_type"]
        )
        .expect("Failed to register FEES_CREATED_TOTAL")
    });

    USAGE_EVENTS_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!(
                "invoicing_usage_events_total",
                "Total usage events ingested by tenant and metric code"
            ),
            &["tenant_id", "code"]
        )
        .expect("Failed to register USAGE_EVENTS_TOTAL")
    });

    BILLING_RUNS_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!("invoicing_billing_runs_total", "Total billing runs by status"),
            &["status"]
        )
        .expect("Failed to register BILLING_RUNS_TOTAL")
    });

    INVOICE_AMOUNT_TOTAL.get_or_init(|| {
        prometheus::register_counter_vec!(
            prometheus::opts!(
                "invoicing_invoice_amount_total",
                "Total invoiced amount in cents by currency"
            ),
            &["currency"]
        )
        .expect("Failed to register INVOICE_AMOUNT_TOTAL")
    });

    ERRORS_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!("invoicing_errors_total", "Total errors by type for alerting"),
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
    encoder
        .encode(&metric_families, &mut buffer)
        .expect("Failed to encode metrics");
    String::from_utf8(buffer).expect("Failed to convert metrics to string")
}

/// Record an invoice created.
pub fn record_invoice_created(tenant_id: &str) {
    if let Some(counter) = INVOICES_CREATED_TOTAL.get() {
        counter.with_label_values(&[tenant_id]).inc();
    }
}

/// Record a fee created.
pub fn record_fee_created(tenant_id: &str, fee_type: &str) {
    if let Some(counter) = FEES_CREATED_TOTAL.get() {
        counter.with_label_values(&[tenant_id, fee_type]).inc();
    }
}

/// Record a usage event ingested.
pub fn record_usage_event(tenant_id: &str, code: &str) {
    if let Some(counter) = USAGE_EVENTS_TOTAL.get() {
        counter.with_label_values(&[tenant_id, code]).inc();
    }
}

/// Record a billing run outcome.
pub fn record_billing_run(status: &str) {
    if let Some(counter) = BILLING_RUNS_TOTAL.get() {
        counter.with_label_values(&[status]).inc();
    }
}

/// Record an invoiced amount for financial tracking.
pub fn record_invoice_amount(currency: &str, amount_cents: i64) {
    if let Some(counter) = INVOICE_AMOUNT_TOTAL.get() {
        counter
            .with_label_values(&[currency])
            .inc_by(amount_cents.unsigned_abs() as f64);
    }
}

/// Record an error for alerting.
pub fn record_error(error_type: &str, operation: &str) {
    if let Some(counter) = ERRORS_TOTAL.get() {
        counter.with_label_values(&[error_type, operation]).inc();
    }
}
