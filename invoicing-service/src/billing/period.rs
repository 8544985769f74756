//! Billing period resolution.

use crate::models::{Plan, PlanInterval, Subscription};
use chrono::{DateTime, Duration, Months, NaiveDate, Utc};
use service_core::error::AppError;

/// Resolved boundaries for one billing period.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BillingPeriod {
    pub from_date: NaiveDate,
    pub to_date: NaiveDate,
    pub issuing_date: NaiveDate,
}

/// Derive the period covered by an invoice generated at `reference`.
///
/// `to_date` is the day before `reference`; `from_date` is one plan interval
/// before `reference`. Both are clamped to the subscription start date, so a
/// subscription created mid-period is billed from its creation day and a
/// pay-in-advance subscription's first invoice covers a single day, the
/// subscription day. Pay-in-advance plans are issued on the reference day,
/// pay-in-arrear plans on `to_date`.
pub fn resolve_billing_period(
    plan: &Plan,
    subscription: &Subscription,
    reference: DateTime<Utc>,
) -> Result<BillingPeriod, AppError> {
    let interval = PlanInterval::from_string(&plan.billing_interval).ok_or_else(|| {
        AppError::ValidationError(anyhow::anyhow!(
            "Unsupported billing interval '{}' on plan {}",
            plan.billing_interval,
            plan.plan_id
        ))
    })?;

    let started_on = subscription.started_at.date_naive();

    let mut from_date = match interval {
        PlanInterval::Monthly => (reference - Months::new(1)).date_naive(),
        PlanInterval::Yearly => (reference - Months::new(12)).date_naive(),
    };
    // The subscription may have started after the generic period boundary.
    if from_date < started_on {
        from_date = started_on;
    }

    let mut to_date = (reference - Duration::days(1)).date_naive();
    if to_date < started_on {
        to_date = started_on;
    }

    let issuing_date = if plan.pay_in_advance {
        reference.date_naive()
    } else {
        to_date
    };

    Ok(BillingPeriod {
        from_date,
        to_date,
        issuing_date,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal::Decimal;
    use uuid::Uuid;

    fn plan(interval: &str, pay_in_advance: bool) -> Plan {
        let now = Utc::now();
        Plan {
            plan_id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            name: "Test plan".to_string(),
            code: "test-plan".to_string(),
            billing_interval: interval.to_string(),
            pay_in_advance,
            amount_cents: 10_000,
            vat_rate: Decimal::ZERO,
            currency: "EUR".to_string(),
            created_utc: now,
            updated_utc: now,
        }
    }

    fn subscription(started_at: DateTime<Utc>) -> Subscription {
        let now = Utc::now();
        Subscription {
            subscription_id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            customer_id: Uuid::new_v4(),
            plan_id: Uuid::new_v4(),
            status: "active".to_string(),
            started_at,
            terminated_at: None,
            created_utc: now,
            updated_utc: now,
        }
    }

    fn utc(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 12, 0, 0).unwrap()
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn monthly_full_period() {
        let period = resolve_billing_period(
            &plan("monthly", false),
            &subscription(utc(2022, 1, 15)),
            utc(2022, 6, 15),
        )
        .unwrap();

        assert_eq!(period.from_date, date(2022, 5, 15));
        assert_eq!(period.to_date, date(2022, 6, 14));
        assert_eq!(period.issuing_date, date(2022, 6, 14));
    }

    #[test]
    fn yearly_full_period() {
        let period = resolve_billing_period(
            &plan("yearly", false),
            &subscription(utc(2019, 3, 1)),
            utc(2022, 3, 1),
        )
        .unwrap();

        assert_eq!(period.from_date, date(2021, 3, 1));
        assert_eq!(period.to_date, date(2022, 2, 28));
    }

    #[test]
    fn first_period_clamps_from_date_to_subscription_start() {
        // Subscribed on the 20th, billed on the 1st: the first invoice starts
        // at the subscription date, not at the generic period boundary.
        let period = resolve_billing_period(
            &plan("monthly", false),
            &subscription(utc(2022, 5, 20)),
            utc(2022, 6, 1),
        )
        .unwrap();

        assert_eq!(period.from_date, date(2022, 5, 20));
        assert_eq!(period.to_date, date(2022, 5, 31));
        assert_eq!(period.issuing_date, date(2022, 5, 31));
    }

    #[test]
    fn pay_in_advance_first_invoice_covers_a_single_day() {
        let period = resolve_billing_period(
            &plan("monthly", true),
            &subscription(utc(2022, 6, 15)),
            utc(2022, 6, 15),
        )
        .unwrap();

        assert_eq!(period.from_date, date(2022, 6, 15));
        assert_eq!(period.to_date, date(2022, 6, 15));
        assert_eq!(period.issuing_date, date(2022, 6, 15));
    }

    #[test]
    fn pay_in_advance_issues_on_reference_date() {
        let period = resolve_billing_period(
            &plan("monthly", true),
            &subscription(utc(2022, 1, 15)),
            utc(2022, 6, 15),
        )
        .unwrap();

        assert_eq!(period.from_date, date(2022, 5, 15));
        assert_eq!(period.to_date, date(2022, 6, 14));
        assert_eq!(period.issuing_date, date(2022, 6, 15));
    }

    #[test]
    fn month_end_is_clamped_by_calendar_arithmetic() {
        // One month before March 31st lands on the last day of February.
        let period = resolve_billing_period(
            &plan("monthly", false),
            &subscription(utc(2021, 1, 31)),
            utc(2022, 3, 31),
        )
        .unwrap();

        assert_eq!(period.from_date, date(2022, 2, 28));
        assert_eq!(period.to_date, date(2022, 3, 30));
    }

    #[test]
    fn unsupported_interval_is_a_validation_error() {
        let result = resolve_billing_period(
            &plan("weekly", false),
            &subscription(utc(2022, 1, 15)),
            utc(2022, 6, 15),
        );

        assert!(matches!(result, Err(AppError::ValidationError(_))));
    }
}
