//! Fee creation for invoices.
//!
//! Fees are inserted on the caller's open transaction; a failure here aborts
//! the whole invoice.

use crate::billing::charge_models::compute_charge_amount;
use crate::models::{
    AggregationResult, Charge, CreateFee, Fee, FeeType, Invoice, Plan, PlanInterval, Subscription,
};
use crate::services::metrics::record_fee_created;
use chrono::Months;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use service_core::error::AppError;
use sqlx::{Postgres, Transaction};

/// Create the subscription fee for an invoice period.
///
/// The plan amount is prorated by the share of the billing interval the
/// period actually covers, so a first partial period is billed for its days
/// only.
pub async fn create_subscription_fee(
    tx: &mut Transaction<'_, Postgres>,
    invoice: &Invoice,
    subscription: &Subscription,
    plan: &Plan,
) -> Result<Fee, AppError> {
    let factor = proration_factor(invoice, plan)?;
    let amount_cents = round_cents(Decimal::from(plan.amount_cents) * factor)?;
    let vat_amount_cents = vat_cents(amount_cents, plan.vat_rate)?;

    let fee = insert_fee(
        tx,
        CreateFee {
            invoice_id: invoice.invoice_id,
            subscription_id: subscription.subscription_id,
            charge_id: None,
            fee_type: FeeType::Subscription,
            amount_cents,
            vat_amount_cents,
            currency: plan.currency.clone(),
            units: Decimal::ONE,
            events_count: 0,
        },
    )
    .await?;

    record_fee_created(&invoice.tenant_id.to_string(), FeeType::Subscription.as_str());

    Ok(fee)
}

/// Create the fee for one usage-based charge, priced through its charge model.
pub async fn create_charge_fee(
    tx: &mut Transaction<'_, Postgres>,
    invoice: &Invoice,
    charge: &Charge,
    plan: &Plan,
    aggregation: &AggregationResult,
) -> Result<Fee, AppError> {
    let amount = compute_charge_amount(charge, aggregation)?;
    let amount_cents = round_cents(amount * Decimal::ONE_HUNDRED)?;
    let vat_amount_cents = vat_cents(amount_cents, plan.vat_rate)?;

    let fee = insert_fee(
        tx,
        CreateFee {
            invoice_id: invoice.invoice_id,
            subscription_id: invoice.subscription_id,
            charge_id: Some(charge.charge_id),
            fee_type: FeeType::Charge,
            amount_cents,
            vat_amount_cents,
            currency: plan.currency.clone(),
            units: aggregation.units,
            events_count: aggregation.count,
        },
    )
    .await?;

    record_fee_created(&invoice.tenant_id.to_string(), FeeType::Charge.as_str());

    Ok(fee)
}

/// Share of the plan's billing interval covered by the invoice period, in
/// `(0, 1]`.
fn proration_factor(invoice: &Invoice, plan: &Plan) -> Result<Decimal, AppError> {
    let interval = PlanInterval::from_string(&plan.billing_interval).ok_or_else(|| {
        AppError::ValidationError(anyhow::anyhow!(
            "Unsupported billing interval '{}' on plan {}",
            plan.billing_interval,
            plan.plan_id
        ))
    })?;

    let period_days = (invoice.to_date - invoice.from_date).num_days() + 1;
    let interval_end = match interval {
        PlanInterval::Monthly => invoice.from_date + Months::new(1),
        PlanInterval::Yearly => invoice.from_date + Months::new(12),
    };
    let interval_days = (interval_end - invoice.from_date).num_days();

    let factor = Decimal::from(period_days) / Decimal::from(interval_days);
    Ok(factor.min(Decimal::ONE))
}

/// Round a decimal amount to whole cents, half away from zero.
fn round_cents(amount: Decimal) -> Result<i64, AppError> {
    amount
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_i64()
        .ok_or_else(|| {
            AppError::ValidationError(anyhow::anyhow!("Amount {} out of cents range", amount))
        })
}

fn vat_cents(amount_cents: i64, vat_rate: Decimal) -> Result<i64, AppError> {
    round_cents(Decimal::from(amount_cents) * vat_rate / Decimal::ONE_HUNDRED)
}

async fn insert_fee(
    tx: &mut Transaction<'_, Postgres>,
    input: CreateFee,
) -> Result<Fee, AppError> {
    let fee_id = uuid::Uuid::new_v4();
    let fee = sqlx::query_as::<_, Fee>(
        r#"
        INSERT INTO fees (fee_id, invoice_id, subscription_id, charge_id, fee_type, amount_cents, vat_amount_cents, currency, units, events_count)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        RETURNING fee_id, invoice_id, subscription_id, charge_id, fee_type, amount_cents, vat_amount_cents, currency, units, events_count, created_utc
        "#,
    )
    .bind(fee_id)
    .bind(input.invoice_id)
    .bind(input.subscription_id)
    .bind(input.charge_id)
    .bind(input.fee_type.as_str())
    .bind(input.amount_cents)
    .bind(input.vat_amount_cents)
    .bind(&input.currency)
    .bind(input.units)
    .bind(input.events_count)
    .fetch_one(&mut **tx)
    .await
    .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to create fee: {}", e)))?;

    Ok(fee)
}
