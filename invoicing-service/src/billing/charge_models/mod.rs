//! Pricing strategies for usage-based charges.
//!
//! Each strategy conforms to `(charge configuration, aggregation result) →
//! amount`. The set is closed; a charge carrying an unknown model tag is a
//! configuration error.

pub mod graduated_percentage;

use crate::models::{AggregationResult, Charge, ChargeModel};
use rust_decimal::Decimal;
use service_core::error::AppError;

/// Price a charge's usage for a period through its pricing model.
pub fn compute_charge_amount(
    charge: &Charge,
    aggregation: &AggregationResult,
) -> Result<Decimal, AppError> {
    match ChargeModel::from_string(&charge.charge_model) {
        Some(ChargeModel::GraduatedPercentage) => {
            let ranges = graduated_percentage::parse_ranges(&charge.properties)?;
            graduated_percentage::compute(&ranges, aggregation)
        }
        None => Err(AppError::ValidationError(anyhow::anyhow!(
            "Unsupported charge model '{}' on charge {}",
            charge.charge_model,
            charge.charge_id
        ))),
    }
}
