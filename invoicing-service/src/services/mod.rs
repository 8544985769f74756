//! Services module for invoicing-service.

pub mod database;
pub mod metrics;

pub use database::Database;
pub use metrics::{
    get_metrics, init_metrics, record_billing_run, record_error, record_fee_created,
    record_invoice_amount, record_invoice_created, record_usage_event,
};
