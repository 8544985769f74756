//! Billing core: period resolution, charge pricing, fee creation, and
//! invoice generation.

pub mod aggregation;
pub mod charge_models;
pub mod fees;
pub mod invoices;
pub mod period;
pub mod runner;

pub use aggregation::UsageAggregator;
pub use invoices::InvoiceService;
pub use period::{resolve_billing_period, BillingPeriod};
pub use runner::BillingRunner;
