//! Invoice generation.
//!
//! One call resolves the billing period, creates the invoice row under its
//! period key, prices and attaches every fee, and recomputes the totals —
//! all inside a single transaction. The unique index on the period key makes
//! the whole operation idempotent: concurrent or repeated calls for the same
//! subscription and reference timestamp converge on one invoice.

use crate::billing::aggregation::UsageAggregator;
use crate::billing::fees;
use crate::billing::period::{resolve_billing_period, BillingPeriod};
use crate::models::{Invoice, Plan, Subscription};
use crate::services::metrics::{record_invoice_amount, record_invoice_created};
use crate::services::Database;
use chrono::{DateTime, Utc};
use service_core::error::AppError;
use sqlx::{Postgres, Transaction};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

/// Generates invoices for subscription billing periods.
#[derive(Clone)]
pub struct InvoiceService {
    db: Database,
    aggregator: Arc<dyn UsageAggregator>,
}

impl InvoiceService {
    pub fn new(db: Database) -> Self {
        let aggregator: Arc<dyn UsageAggregator> = Arc::new(db.clone());
        Self { db, aggregator }
    }

    /// Replace the usage aggregation source, for tests or alternative stores.
    pub fn with_aggregator(db: Database, aggregator: Arc<dyn UsageAggregator>) -> Self {
        Self { db, aggregator }
    }

    /// Generate the invoice covering the period ending at `reference` for a
    /// subscription, or return the existing one for that period.
    #[instrument(skip(self), fields(tenant_id = %tenant_id, subscription_id = %subscription_id))]
    pub async fn create_invoice(
        &self,
        tenant_id: Uuid,
        subscription_id: Uuid,
        reference: DateTime<Utc>,
    ) -> Result<Invoice, AppError> {
        let subscription = self
            .db
            .get_subscription(tenant_id, subscription_id)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Subscription not found")))?;

        let plan = self
            .db
            .get_plan(tenant_id, subscription.plan_id)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Plan not found")))?;

        let charges = self.db.list_plan_charges(plan.plan_id).await?;

        let period = resolve_billing_period(&plan, &subscription, reference)?;

        let mut tx = self.db.pool().begin().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to begin transaction: {}", e))
        })?;

        let Some(invoice) = insert_invoice(&mut tx, &subscription, &plan, &period).await? else {
            // The period key already exists: a previous or concurrent call
            // generated this invoice, and its fees and totals stand.
            tx.rollback().await.ok();
            return self
                .db
                .get_invoice_by_period(
                    subscription_id,
                    period.from_date,
                    period.to_date,
                    period.issuing_date,
                )
                .await?
                .ok_or_else(|| {
                    AppError::DatabaseError(anyhow::anyhow!(
                        "Invoice missing after period key conflict"
                    ))
                });
        };

        if subscription_fee_due(&subscription, &plan) {
            fees::create_subscription_fee(&mut tx, &invoice, &subscription, &plan).await?;
        }

        for charge in &charges {
            let aggregation = self
                .aggregator
                .aggregate(charge, &subscription, period.from_date, period.to_date)
                .await?;
            fees::create_charge_fee(&mut tx, &invoice, charge, &plan, &aggregation).await?;
        }

        let invoice = compute_totals(&mut tx, invoice.invoice_id).await?;

        tx.commit().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to commit invoice: {}", e))
        })?;

        record_invoice_created(&tenant_id.to_string());
        record_invoice_amount(&invoice.currency, invoice.total_amount_cents);
        info!(
            invoice_id = %invoice.invoice_id,
            from_date = %invoice.from_date,
            to_date = %invoice.to_date,
            total_amount_cents = invoice.total_amount_cents,
            "Invoice created"
        );

        Ok(invoice)
    }
}

/// The subscription fee is due for active subscriptions, and for terminated
/// ones on pay-in-arrear plans — an arrears plan defers the charge to period
/// end, and termination must not skip it.
fn subscription_fee_due(subscription: &Subscription, plan: &Plan) -> bool {
    subscription.is_active() || (subscription.is_terminated() && plan.pay_in_arrear())
}

/// Insert the invoice row for a resolved period. Returns `None` when an
/// invoice with the same period key already exists.
async fn insert_invoice(
    tx: &mut Transaction<'_, Postgres>,
    subscription: &Subscription,
    plan: &Plan,
    period: &BillingPeriod,
) -> Result<Option<Invoice>, AppError> {
    let invoice_id = Uuid::new_v4();
    let invoice = sqlx::query_as::<_, Invoice>(
        r#"
        INSERT INTO invoices (invoice_id, tenant_id, subscription_id, from_date, to_date, issuing_date, currency)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        ON CONFLICT (subscription_id, from_date, to_date, issuing_date) DO NOTHING
        RETURNING invoice_id, tenant_id, subscription_id, from_date, to_date, issuing_date, amount_cents, vat_amount_cents, total_amount_cents, currency, created_utc, updated_utc
        "#,
    )
    .bind(invoice_id)
    .bind(subscription.tenant_id)
    .bind(subscription.subscription_id)
    .bind(period.from_date)
    .bind(period.to_date)
    .bind(period.issuing_date)
    .bind(&plan.currency)
    .fetch_optional(&mut **tx)
    .await
    .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to insert invoice: {}", e)))?;

    Ok(invoice)
}

/// Recompute the invoice totals from its fee rows.
async fn compute_totals(
    tx: &mut Transaction<'_, Postgres>,
    invoice_id: Uuid,
) -> Result<Invoice, AppError> {
    let invoice = sqlx::query_as::<_, Invoice>(
        r#"
        UPDATE invoices
        SET amount_cents = totals.amount,
            vat_amount_cents = totals.vat,
            total_amount_cents = totals.amount + totals.vat,
            updated_utc = NOW()
        FROM (
            SELECT COALESCE(SUM(amount_cents), 0)::bigint AS amount,
                   COALESCE(SUM(vat_amount_cents), 0)::bigint AS vat
            FROM fees
            WHERE invoice_id = $1
        ) AS totals
        WHERE invoice_id = $1
        RETURNING invoice_id, tenant_id, subscription_id, from_date, to_date, issuing_date, amount_cents, vat_amount_cents, total_amount_cents, currency, created_utc, updated_utc
        "#,
    )
    .bind(invoice_id)
    .fetch_one(&mut **tx)
    .await
    .map_err(|e| {
        AppError::DatabaseError(anyhow::anyhow!("Failed to compute invoice totals: {}", e))
    })?;

    Ok(invoice)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal::Decimal;

    fn plan(pay_in_advance: bool) -> Plan {
        let now = Utc::now();
        Plan {
            plan_id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            name: "Test plan".to_string(),
            code: "test-plan".to_string(),
            billing_interval: "monthly".to_string(),
            pay_in_advance,
            amount_cents: 10_000,
            vat_rate: Decimal::ZERO,
            currency: "EUR".to_string(),
            created_utc: now,
            updated_utc: now,
        }
    }

    fn subscription(status: &str) -> Subscription {
        let now = Utc::now();
        Subscription {
            subscription_id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            customer_id: Uuid::new_v4(),
            plan_id: Uuid::new_v4(),
            status: status.to_string(),
            started_at: now,
            terminated_at: None,
            created_utc: now,
            updated_utc: now,
        }
    }

    #[test]
    fn subscription_fee_due_for_active() {
        assert!(subscription_fee_due(&subscription("active"), &plan(true)));
        assert!(subscription_fee_due(&subscription("active"), &plan(false)));
    }

    #[test]
    fn subscription_fee_due_for_terminated_pay_in_arrear_only() {
        assert!(subscription_fee_due(&subscription("terminated"), &plan(false)));
        assert!(!subscription_fee_due(&subscription("terminated"), &plan(true)));
    }

    #[test]
    fn subscription_fee_not_due_for_pending() {
        assert!(!subscription_fee_due(&subscription("pending"), &plan(false)));
        assert!(!subscription_fee_due(&subscription("pending"), &plan(true)));
    }
}
