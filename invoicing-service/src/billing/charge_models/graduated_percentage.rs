//! Graduated-percentage pricing.
//!
//! Usage is priced across ordered tiers. Every tier the usage touches adds
//! its flat fee and a percentage of the units billable within it; the tier
//! the usage terminates in additionally charges a fixed fee per billable
//! event.

use crate::models::AggregationResult;
use rust_decimal::Decimal;
use serde::Deserialize;
use service_core::error::AppError;

/// One pricing tier. Bounds are inclusive; `to_value: None` marks the final,
/// unbounded tier. `rate` is in percentage points.
#[derive(Debug, Clone, Deserialize)]
pub struct GraduatedPercentageRange {
    pub from_value: u64,
    #[serde(default)]
    pub to_value: Option<u64>,
    pub flat_amount: Decimal,
    pub fixed_amount: Decimal,
    pub rate: Decimal,
}

#[derive(Debug, Deserialize)]
struct GraduatedPercentageProperties {
    graduated_percentage_ranges: Vec<GraduatedPercentageRange>,
}

/// Deserialize and validate the tier table from a charge's `properties` blob.
pub fn parse_ranges(
    properties: &serde_json::Value,
) -> Result<Vec<GraduatedPercentageRange>, AppError> {
    let props: GraduatedPercentageProperties = serde_json::from_value(properties.clone())
        .map_err(|e| {
            AppError::ValidationError(anyhow::anyhow!(
                "Malformed graduated_percentage_ranges: {}",
                e
            ))
        })?;

    validate_ranges(&props.graduated_percentage_ranges)?;

    Ok(props.graduated_percentage_ranges)
}

/// Ranges must be contiguous, ascending, and closed by exactly one unbounded
/// final tier.
fn validate_ranges(ranges: &[GraduatedPercentageRange]) -> Result<(), AppError> {
    let last_index = ranges.len().checked_sub(1).ok_or_else(|| {
        AppError::ValidationError(anyhow::anyhow!("graduated_percentage_ranges is empty"))
    })?;

    if ranges[0].from_value != 0 {
        return Err(AppError::ValidationError(anyhow::anyhow!(
            "First pricing range must start at 0, got {}",
            ranges[0].from_value
        )));
    }

    for (i, range) in ranges.iter().enumerate() {
        match range.to_value {
            None if i != last_index => {
                return Err(AppError::ValidationError(anyhow::anyhow!(
                    "Only the last pricing range may be unbounded"
                )));
            }
            Some(_) if i == last_index => {
                return Err(AppError::ValidationError(anyhow::anyhow!(
                    "Last pricing range must be unbounded"
                )));
            }
            Some(to) if to < range.from_value => {
                return Err(AppError::ValidationError(anyhow::anyhow!(
                    "Pricing range {}..{} is inverted",
                    range.from_value,
                    to
                )));
            }
            _ => {}
        }

        if i > 0 {
            // Contiguity: each tier starts where the previous one ends.
            let previous_to = ranges[i - 1].to_value.unwrap_or_default();
            if range.from_value != previous_to {
                return Err(AppError::ValidationError(anyhow::anyhow!(
                    "Pricing ranges are not contiguous at from_value {}",
                    range.from_value
                )));
            }
        }
    }

    Ok(())
}

/// Units billable within one tier, given the period's total usage.
///
/// A tier fully covered by usage bills its whole width (the first tier is
/// counted from unit 1); the tier the usage stops in bills from its start
/// through the usage point, inclusive.
fn range_units(from_value: u64, to_value: Option<u64>, units: Decimal) -> Decimal {
    if let Some(to) = to_value {
        if units >= Decimal::from(to) {
            let lower = if from_value == 0 { 1 } else { from_value };
            return Decimal::from(to - lower + 1);
        }
    }

    if from_value == 0 {
        return units;
    }

    units - Decimal::from(from_value) + Decimal::ONE
}

/// Accumulate the period amount across tiers, stopping at the tier the usage
/// terminates in.
pub fn compute(
    ranges: &[GraduatedPercentageRange],
    aggregation: &AggregationResult,
) -> Result<Decimal, AppError> {
    let units = aggregation.units;
    let mut amount = Decimal::ZERO;

    for range in ranges {
        // Flat fee for every tier reached, independent of usage within it.
        if !units.is_zero() {
            amount += range.flat_amount;
        }

        amount += range_units(range.from_value, range.to_value, units) * range.rate
            / Decimal::ONE_HUNDRED;

        // Usage falls within this tier's bounds: charge the per-event fixed
        // fee once and skip the remaining tiers.
        let terminating = match range.to_value {
            None => true,
            Some(to) => Decimal::from(to) >= units,
        };
        if terminating {
            amount += Decimal::from(aggregation.count) * range.fixed_amount;
            return Ok(amount);
        }
    }

    Err(AppError::ValidationError(anyhow::anyhow!(
        "Usage of {} units exceeds every bounded pricing range",
        units
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn range(
        from_value: u64,
        to_value: Option<u64>,
        flat: &str,
        fixed: &str,
        rate: &str,
    ) -> GraduatedPercentageRange {
        GraduatedPercentageRange {
            from_value,
            to_value,
            flat_amount: flat.parse().unwrap(),
            fixed_amount: fixed.parse().unwrap(),
            rate: rate.parse().unwrap(),
        }
    }

    fn aggregation(units: &str, count: i64) -> AggregationResult {
        AggregationResult {
            units: units.parse().unwrap(),
            count,
        }
    }

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    #[test]
    fn usage_spanning_two_tiers() {
        // Tier 1 bills its full width (10 units at 5%), tier 2 bills from its
        // start through the usage point inclusive (15 - 10 + 1 = 6 units at 3%).
        let ranges = vec![
            range(0, Some(10), "0", "0", "5"),
            range(10, None, "0", "0", "3"),
        ];

        let amount = compute(&ranges, &aggregation("15", 1)).unwrap();
        assert_eq!(amount, dec("0.68"));
    }

    #[test]
    fn usage_inside_first_tier() {
        let ranges = vec![
            range(0, Some(10), "0", "0", "5"),
            range(10, None, "0", "0", "3"),
        ];

        // All 4 used units billed at the first tier's rate.
        let amount = compute(&ranges, &aggregation("4", 2)).unwrap();
        assert_eq!(amount, dec("0.2"));
    }

    #[test]
    fn usage_exactly_on_tier_bound() {
        let ranges = vec![
            range(0, Some(10), "0", "0", "5"),
            range(10, None, "0", "0", "3"),
        ];

        // Usage equal to the bound terminates in the first tier, which bills
        // its full width; the second tier is never evaluated.
        let amount = compute(&ranges, &aggregation("10", 1)).unwrap();
        assert_eq!(amount, dec("0.5"));
    }

    #[test]
    fn bound_unit_counts_in_both_tiers_when_usage_passes_it() {
        let ranges = vec![
            range(0, Some(10), "0", "0", "5"),
            range(10, None, "0", "0", "3"),
        ];

        // One unit past the bound: the first tier bills units 1..=10, the
        // second bills 11 - 10 + 1 = 2 units, so unit 10 is rated twice.
        let amount = compute(&ranges, &aggregation("11", 0)).unwrap();
        assert_eq!(amount, dec("0.56"));
    }

    #[test]
    fn flat_fees_accumulate_per_tier_reached() {
        let ranges = vec![
            range(0, Some(10), "2", "0", "0"),
            range(10, Some(20), "3", "0", "0"),
            range(20, None, "4", "0", "0"),
        ];

        let amount = compute(&ranges, &aggregation("25", 1)).unwrap();
        assert_eq!(amount, dec("9"));
    }

    #[test]
    fn fixed_fee_uses_terminating_tier_and_event_count() {
        let ranges = vec![
            range(0, Some(10), "0", "1", "0"),
            range(10, None, "0", "2", "0"),
        ];

        // Usage terminates in the second tier; its fixed fee applies per event.
        let amount = compute(&ranges, &aggregation("15", 3)).unwrap();
        assert_eq!(amount, dec("6"));
    }

    #[test]
    fn zero_usage_charges_no_flat_fee() {
        let ranges = vec![
            range(0, Some(10), "2", "0.5", "5"),
            range(10, None, "3", "1", "3"),
        ];

        // No flat fees and no rated units; only the terminating (first) tier's
        // fixed fee per event remains.
        let amount = compute(&ranges, &aggregation("0", 4)).unwrap();
        assert_eq!(amount, dec("2"));
    }

    #[test]
    fn zero_usage_and_zero_events_is_free() {
        let ranges = vec![
            range(0, Some(10), "2", "0.5", "5"),
            range(10, None, "3", "1", "3"),
        ];

        let amount = compute(&ranges, &aggregation("0", 0)).unwrap();
        assert_eq!(amount, Decimal::ZERO);
    }

    #[test]
    fn usage_beyond_every_bounded_range_is_an_error() {
        // Only reachable when ranges bypassed validation; never a panic.
        let ranges = vec![range(0, Some(10), "0", "0", "5")];
        assert!(matches!(
            compute(&ranges, &aggregation("15", 1)),
            Err(AppError::ValidationError(_))
        ));
    }

    #[test]
    fn parse_accepts_string_and_numeric_amounts() {
        let ranges = parse_ranges(&json!({
            "graduated_percentage_ranges": [
                {"from_value": 0, "to_value": 10, "flat_amount": "1.5", "fixed_amount": 0, "rate": 5},
                {"from_value": 10, "to_value": null, "flat_amount": "0", "fixed_amount": "0.25", "rate": "3"}
            ]
        }))
        .unwrap();

        assert_eq!(ranges.len(), 2);
        assert_eq!(ranges[0].flat_amount, dec("1.5"));
        assert_eq!(ranges[1].fixed_amount, dec("0.25"));
    }

    #[test]
    fn parse_rejects_missing_ranges_key() {
        assert!(matches!(
            parse_ranges(&json!({})),
            Err(AppError::ValidationError(_))
        ));
    }

    #[test]
    fn validate_rejects_empty_ranges() {
        assert!(validate_ranges(&[]).is_err());
    }

    #[test]
    fn validate_rejects_first_range_not_starting_at_zero() {
        let ranges = vec![range(1, None, "0", "0", "5")];
        assert!(validate_ranges(&ranges).is_err());
    }

    #[test]
    fn validate_rejects_bounded_last_range() {
        let ranges = vec![
            range(0, Some(10), "0", "0", "5"),
            range(10, Some(20), "0", "0", "3"),
        ];
        assert!(validate_ranges(&ranges).is_err());
    }

    #[test]
    fn validate_rejects_unbounded_middle_range() {
        let ranges = vec![
            range(0, None, "0", "0", "5"),
            range(10, None, "0", "0", "3"),
        ];
        assert!(validate_ranges(&ranges).is_err());
    }

    #[test]
    fn validate_rejects_gap_between_ranges() {
        let ranges = vec![
            range(0, Some(10), "0", "0", "5"),
            range(12, None, "0", "0", "3"),
        ];
        assert!(validate_ranges(&ranges).is_err());
    }
}
