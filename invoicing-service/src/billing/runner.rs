//! Periodic billing over active subscriptions.
//!
//! Subscriptions are billed on the anniversary day of their start date,
//! clamped to the last day of shorter months. Each run records its outcome
//! as a `billing_runs` row; one subscription's failure never aborts the run.

use crate::billing::invoices::InvoiceService;
use crate::models::{BillingRun, BillingRunStatus, PlanInterval, Subscription};
use crate::services::metrics::record_billing_run;
use crate::services::Database;
use chrono::{DateTime, Datelike, NaiveDate, Utc};
use service_core::error::AppError;
use tracing::{info, instrument, warn};

/// Drives invoice generation for every subscription due at a reference time.
pub struct BillingRunner {
    db: Database,
    invoices: InvoiceService,
}

impl BillingRunner {
    pub fn new(db: Database) -> Self {
        let invoices = InvoiceService::new(db.clone());
        Self { db, invoices }
    }

    /// Bill every subscription due at `reference`.
    #[instrument(skip(self), fields(reference = %reference))]
    pub async fn run(&self, reference: DateTime<Utc>) -> Result<BillingRun, AppError> {
        let run = self.db.create_billing_run().await?;
        let today = reference.date_naive();

        let subscriptions = self.db.list_active_subscriptions().await?;

        let mut processed = 0;
        let mut succeeded = 0;
        let mut failed = 0;
        let mut first_error: Option<String> = None;

        for subscription in subscriptions {
            let interval = match self.plan_interval(&subscription).await {
                Ok(interval) => interval,
                Err(e) => {
                    warn!(
                        subscription_id = %subscription.subscription_id,
                        error = %e,
                        "Skipping subscription with unusable plan"
                    );
                    processed += 1;
                    failed += 1;
                    first_error.get_or_insert_with(|| e.to_string());
                    continue;
                }
            };

            if !due_on(&subscription, interval, today) {
                continue;
            }

            processed += 1;
            match self
                .invoices
                .create_invoice(
                    subscription.tenant_id,
                    subscription.subscription_id,
                    reference,
                )
                .await
            {
                Ok(invoice) => {
                    succeeded += 1;
                    info!(
                        subscription_id = %subscription.subscription_id,
                        invoice_id = %invoice.invoice_id,
                        "Subscription billed"
                    );
                }
                Err(e) => {
                    failed += 1;
                    warn!(
                        subscription_id = %subscription.subscription_id,
                        error = %e,
                        "Failed to bill subscription"
                    );
                    first_error.get_or_insert_with(|| e.to_string());
                }
            }
        }

        let status = if failed == 0 {
            BillingRunStatus::Completed
        } else {
            BillingRunStatus::Failed
        };

        let run = self
            .db
            .finalize_billing_run(run.run_id, status, processed, succeeded, failed, first_error)
            .await?
            .ok_or_else(|| {
                AppError::DatabaseError(anyhow::anyhow!("Billing run disappeared mid-run"))
            })?;

        record_billing_run(status.as_str());
        info!(
            run_id = %run.run_id,
            processed = processed,
            succeeded = succeeded,
            failed = failed,
            "Billing run finished"
        );

        Ok(run)
    }

    async fn plan_interval(&self, subscription: &Subscription) -> Result<PlanInterval, AppError> {
        let plan = self
            .db
            .get_plan(subscription.tenant_id, subscription.plan_id)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Plan not found")))?;

        PlanInterval::from_string(&plan.billing_interval).ok_or_else(|| {
            AppError::ValidationError(anyhow::anyhow!(
                "Unsupported billing interval '{}' on plan {}",
                plan.billing_interval,
                plan.plan_id
            ))
        })
    }
}

/// Whether a subscription's billing anniversary falls on `on`.
fn due_on(subscription: &Subscription, interval: PlanInterval, on: NaiveDate) -> bool {
    let started = subscription.started_at.date_naive();
    if on <= started {
        // The start day itself is billed at creation, not by the runner.
        return false;
    }

    let billing_day = started.day().min(days_in_month(on.year(), on.month()));

    match interval {
        PlanInterval::Monthly => on.day() == billing_day,
        PlanInterval::Yearly => on.day() == billing_day && on.month() == started.month(),
    }
}

fn days_in_month(year: i32, month: u32) -> u32 {
    let (next_year, next_month) = if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };

    NaiveDate::from_ymd_opt(next_year, next_month, 1)
        .and_then(|d| d.pred_opt())
        .map(|d| d.day())
        .unwrap_or(28)
}
