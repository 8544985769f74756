//! invoicing-service: recurring subscription invoice engine.
//!
//! Derives billing period boundaries, prices metered usage through tiered
//! charge models, and aggregates the resulting fees into idempotent,
//! transactionally consistent invoices.

pub mod billing;
pub mod config;
pub mod models;
pub mod services;
pub mod startup;
