//! Database service for invoicing-service.

use crate::models::{
    AggregationResult, BillingRun, BillingRunStatus, Charge, CreateCharge, CreatePlan,
    CreateSubscription, Fee, Invoice, Plan, RecordUsageEvent, Subscription, SubscriptionStatus,
    UsageEvent,
};
use crate::services::metrics::DB_QUERY_DURATION;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use service_core::error::AppError;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::{info, instrument};
use uuid::Uuid;

const PLAN_COLUMNS: &str = "plan_id, tenant_id, name, code, billing_interval, pay_in_advance, amount_cents, vat_rate, currency, created_utc, updated_utc";
const SUBSCRIPTION_COLUMNS: &str = "subscription_id, tenant_id, customer_id, plan_id, status, started_at, terminated_at, created_utc, updated_utc";
const INVOICE_COLUMNS: &str = "invoice_id, tenant_id, subscription_id, from_date, to_date, issuing_date, amount_cents, vat_amount_cents, total_amount_cents, currency, created_utc, updated_utc";
const FEE_COLUMNS: &str = "fee_id, invoice_id, subscription_id, charge_id, fee_type, amount_cents, vat_amount_cents, currency, units, events_count, created_utc";

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database connection pool.
    #[instrument(skip(database_url), fields(service = "invoicing-service"))]
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self, AppError> {
        info!(
            max_connections = max_connections,
            min_connections = min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to connect: {}", e)))?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Check database health.
    #[instrument(skip(self))]
    pub async fn health_check(&self) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["health_check"])
            .start_timer();

        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Health check failed: {}", e)))?;

        timer.observe_duration();
        Ok(())
    }

    /// Run database migrations.
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Migration failed: {}", e)))?;
        info!("Database migrations completed");
        Ok(())
    }

    // =========================================================================
    // Plan Operations
    // =========================================================================

    /// Create a new billing plan.
    #[instrument(skip(self, input), fields(tenant_id = %input.tenant_id))]
    pub async fn create_plan(&self, input: &CreatePlan) -> Result<Plan, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_plan"])
            .start_timer();

        let plan_id = Uuid::new_v4();
        let plan = sqlx::query_as::<_, Plan>(&format!(
            r#"
            INSERT INTO plans (plan_id, tenant_id, name, code, billing_interval, pay_in_advance, amount_cents, vat_rate, currency)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING {PLAN_COLUMNS}
            "#,
        ))
        .bind(plan_id)
        .bind(input.tenant_id)
        .bind(&input.name)
        .bind(&input.code)
        .bind(input.billing_interval.as_str())
        .bind(input.pay_in_advance)
        .bind(input.amount_cents)
        .bind(input.vat_rate)
        .bind(&input.currency)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                AppError::Conflict(anyhow::anyhow!("Plan code '{}' already exists", input.code))
            }
            _ => AppError::DatabaseError(anyhow::anyhow!("Failed to create plan: {}", e)),
        })?;

        timer.observe_duration();
        info!(plan_id = %plan.plan_id, code = %plan.code, "Plan created");

        Ok(plan)
    }

    /// Get a plan by ID.
    #[instrument(skip(self), fields(tenant_id = %tenant_id, plan_id = %plan_id))]
    pub async fn get_plan(&self, tenant_id: Uuid, plan_id: Uuid) -> Result<Option<Plan>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_plan"])
            .start_timer();

        let plan = sqlx::query_as::<_, Plan>(&format!(
            r#"
            SELECT {PLAN_COLUMNS}
            FROM plans
            WHERE tenant_id = $1 AND plan_id = $2
            "#,
        ))
        .bind(tenant_id)
        .bind(plan_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get plan: {}", e)))?;

        timer.observe_duration();

        Ok(plan)
    }

    /// Attach a charge to a plan.
    #[instrument(skip(self, input), fields(plan_id = %input.plan_id))]
    pub async fn create_charge(&self, input: &CreateCharge) -> Result<Charge, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_charge"])
            .start_timer();

        let charge_id = Uuid::new_v4();
        let charge = sqlx::query_as::<_, Charge>(
            r#"
            INSERT INTO charges (charge_id, plan_id, metric_code, charge_model, properties)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING charge_id, plan_id, metric_code, charge_model, properties, created_utc
            "#,
        )
        .bind(charge_id)
        .bind(input.plan_id)
        .bind(&input.metric_code)
        .bind(input.charge_model.as_str())
        .bind(&input.properties)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to create charge: {}", e)))?;

        timer.observe_duration();

        Ok(charge)
    }

    /// List a plan's charges in attachment order.
    ///
    /// Fee creation iterates this order, which keeps per-invoice fee sets
    /// deterministic.
    #[instrument(skip(self), fields(plan_id = %plan_id))]
    pub async fn list_plan_charges(&self, plan_id: Uuid) -> Result<Vec<Charge>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_plan_charges"])
            .start_timer();

        let charges = sqlx::query_as::<_, Charge>(
            r#"
            SELECT charge_id, plan_id, metric_code, charge_model, properties, created_utc
            FROM charges
            WHERE plan_id = $1
            ORDER BY created_utc, charge_id
            "#,
        )
        .bind(plan_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to list charges: {}", e)))?;

        timer.observe_duration();

        Ok(charges)
    }

    // =========================================================================
    // Subscription Operations
    // =========================================================================

    /// Create a new subscription on a plan.
    #[instrument(skip(self, input), fields(tenant_id = %input.tenant_id))]
    pub async fn create_subscription(
        &self,
        input: &CreateSubscription,
    ) -> Result<Subscription, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_subscription"])
            .start_timer();

        self.get_plan(input.tenant_id, input.plan_id)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Plan not found")))?;

        let subscription_id = Uuid::new_v4();
        let subscription = sqlx::query_as::<_, Subscription>(&format!(
            r#"
            INSERT INTO subscriptions (subscription_id, tenant_id, customer_id, plan_id, status, started_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {SUBSCRIPTION_COLUMNS}
            "#,
        ))
        .bind(subscription_id)
        .bind(input.tenant_id)
        .bind(input.customer_id)
        .bind(input.plan_id)
        .bind(SubscriptionStatus::Active.as_str())
        .bind(input.started_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to create subscription: {}", e))
        })?;

        timer.observe_duration();
        info!(subscription_id = %subscription.subscription_id, "Subscription created");

        Ok(subscription)
    }

    /// Get a subscription by ID.
    #[instrument(skip(self), fields(tenant_id = %tenant_id, subscription_id = %subscription_id))]
    pub async fn get_subscription(
        &self,
        tenant_id: Uuid,
        subscription_id: Uuid,
    ) -> Result<Option<Subscription>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_subscription"])
            .start_timer();

        let subscription = sqlx::query_as::<_, Subscription>(&format!(
            r#"
            SELECT {SUBSCRIPTION_COLUMNS}
            FROM subscriptions
            WHERE tenant_id = $1 AND subscription_id = $2
            "#,
        ))
        .bind(tenant_id)
        .bind(subscription_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to get subscription: {}", e))
        })?;

        timer.observe_duration();

        Ok(subscription)
    }

    /// Terminate an active subscription.
    #[instrument(skip(self), fields(tenant_id = %tenant_id, subscription_id = %subscription_id))]
    pub async fn terminate_subscription(
        &self,
        tenant_id: Uuid,
        subscription_id: Uuid,
        terminated_at: DateTime<Utc>,
    ) -> Result<Option<Subscription>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["terminate_subscription"])
            .start_timer();

        let subscription = sqlx::query_as::<_, Subscription>(&format!(
            r#"
            UPDATE subscriptions
            SET status = $3, terminated_at = $4, updated_utc = NOW()
            WHERE tenant_id = $1 AND subscription_id = $2 AND status = 'active'
            RETURNING {SUBSCRIPTION_COLUMNS}
            "#,
        ))
        .bind(tenant_id)
        .bind(subscription_id)
        .bind(SubscriptionStatus::Terminated.as_str())
        .bind(terminated_at)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to terminate subscription: {}", e))
        })?;

        timer.observe_duration();

        if let Some(ref s) = subscription {
            info!(subscription_id = %s.subscription_id, "Subscription terminated");
        }

        Ok(subscription)
    }

    /// List every active subscription, for the periodic biller.
    #[instrument(skip(self))]
    pub async fn list_active_subscriptions(&self) -> Result<Vec<Subscription>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_active_subscriptions"])
            .start_timer();

        let subscriptions = sqlx::query_as::<_, Subscription>(&format!(
            r#"
            SELECT {SUBSCRIPTION_COLUMNS}
            FROM subscriptions
            WHERE status = 'active'
            ORDER BY created_utc
            "#,
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to list active subscriptions: {}", e))
        })?;

        timer.observe_duration();

        Ok(subscriptions)
    }

    // =========================================================================
    // Usage Operations
    // =========================================================================

    /// Record a usage event with idempotency on `transaction_id`.
    ///
    /// Replays and concurrent duplicates converge on the first inserted row.
    #[instrument(skip(self, input), fields(subscription_id = %input.subscription_id))]
    pub async fn record_usage_event(
        &self,
        input: &RecordUsageEvent,
    ) -> Result<UsageEvent, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["record_usage_event"])
            .start_timer();

        let existing = self.get_usage_event_by_transaction(&input.transaction_id).await?;
        if let Some(event) = existing {
            timer.observe_duration();
            return Ok(event);
        }

        let event_id = Uuid::new_v4();
        let result = sqlx::query_as::<_, UsageEvent>(
            r#"
            INSERT INTO usage_events (event_id, tenant_id, subscription_id, code, transaction_id, units, timestamp, properties)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING event_id, tenant_id, subscription_id, code, transaction_id, units, timestamp, properties, created_utc
            "#,
        )
        .bind(event_id)
        .bind(input.tenant_id)
        .bind(input.subscription_id)
        .bind(&input.code)
        .bind(&input.transaction_id)
        .bind(input.units)
        .bind(input.timestamp)
        .bind(&input.properties)
        .fetch_one(&self.pool)
        .await;

        let event = match result {
            Ok(event) => event,
            Err(sqlx::Error::Database(ref db_err)) if db_err.is_unique_violation() => {
                // Another request won the insert race; return its row.
                self.get_usage_event_by_transaction(&input.transaction_id)
                    .await?
                    .ok_or_else(|| {
                        AppError::DatabaseError(anyhow::anyhow!(
                            "Usage event vanished after duplicate transaction_id"
                        ))
                    })?
            }
            Err(e) => {
                return Err(AppError::DatabaseError(anyhow::anyhow!(
                    "Failed to record usage event: {}",
                    e
                )))
            }
        };

        timer.observe_duration();

        Ok(event)
    }

    async fn get_usage_event_by_transaction(
        &self,
        transaction_id: &str,
    ) -> Result<Option<UsageEvent>, AppError> {
        let event = sqlx::query_as::<_, UsageEvent>(
            r#"
            SELECT event_id, tenant_id, subscription_id, code, transaction_id, units, timestamp, properties, created_utc
            FROM usage_events
            WHERE transaction_id = $1
            "#,
        )
        .bind(transaction_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to check idempotency: {}", e)))?;

        Ok(event)
    }

    /// Sum usage for a metric code over a billing period window (dates inclusive).
    #[instrument(skip(self), fields(subscription_id = %subscription_id, code = %code))]
    pub async fn aggregate_usage(
        &self,
        subscription_id: Uuid,
        code: &str,
        from_date: NaiveDate,
        to_date: NaiveDate,
    ) -> Result<AggregationResult, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["aggregate_usage"])
            .start_timer();

        let (units, count): (Decimal, i64) = sqlx::query_as(
            r#"
            SELECT COALESCE(SUM(units), 0), COUNT(*)
            FROM usage_events
            WHERE subscription_id = $1
              AND code = $2
              AND (timestamp AT TIME ZONE 'UTC')::date >= $3
              AND (timestamp AT TIME ZONE 'UTC')::date <= $4
            "#,
        )
        .bind(subscription_id)
        .bind(code)
        .bind(from_date)
        .bind(to_date)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to aggregate usage: {}", e)))?;

        timer.observe_duration();

        Ok(AggregationResult { units, count })
    }

    // =========================================================================
    // Invoice Operations
    // =========================================================================

    /// Get an invoice by ID.
    #[instrument(skip(self), fields(tenant_id = %tenant_id, invoice_id = %invoice_id))]
    pub async fn get_invoice(
        &self,
        tenant_id: Uuid,
        invoice_id: Uuid,
    ) -> Result<Option<Invoice>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_invoice"])
            .start_timer();

        let invoice = sqlx::query_as::<_, Invoice>(&format!(
            r#"
            SELECT {INVOICE_COLUMNS}
            FROM invoices
            WHERE tenant_id = $1 AND invoice_id = $2
            "#,
        ))
        .bind(tenant_id)
        .bind(invoice_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get invoice: {}", e)))?;

        timer.observe_duration();

        Ok(invoice)
    }

    /// Get the invoice for one resolved billing period, if it exists.
    #[instrument(skip(self), fields(subscription_id = %subscription_id))]
    pub async fn get_invoice_by_period(
        &self,
        subscription_id: Uuid,
        from_date: NaiveDate,
        to_date: NaiveDate,
        issuing_date: NaiveDate,
    ) -> Result<Option<Invoice>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_invoice_by_period"])
            .start_timer();

        let invoice = sqlx::query_as::<_, Invoice>(&format!(
            r#"
            SELECT {INVOICE_COLUMNS}
            FROM invoices
            WHERE subscription_id = $1 AND from_date = $2 AND to_date = $3 AND issuing_date = $4
            "#,
        ))
        .bind(subscription_id)
        .bind(from_date)
        .bind(to_date)
        .bind(issuing_date)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to get invoice by period: {}", e))
        })?;

        timer.observe_duration();

        Ok(invoice)
    }

    /// List an invoice's fees in creation order.
    #[instrument(skip(self), fields(invoice_id = %invoice_id))]
    pub async fn list_fees(&self, invoice_id: Uuid) -> Result<Vec<Fee>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_fees"])
            .start_timer();

        let fees = sqlx::query_as::<_, Fee>(&format!(
            r#"
            SELECT {FEE_COLUMNS}
            FROM fees
            WHERE invoice_id = $1
            ORDER BY created_utc, fee_id
            "#,
        ))
        .bind(invoice_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to list fees: {}", e)))?;

        timer.observe_duration();

        Ok(fees)
    }

    // =========================================================================
    // Billing Run Operations
    // =========================================================================

    /// Create a billing run in `running` state.
    #[instrument(skip(self))]
    pub async fn create_billing_run(&self) -> Result<BillingRun, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_billing_run"])
            .start_timer();

        let run_id = Uuid::new_v4();
        let run = sqlx::query_as::<_, BillingRun>(
            r#"
            INSERT INTO billing_runs (run_id)
            VALUES ($1)
            RETURNING run_id, status, started_utc, completed_utc, subscriptions_processed, subscriptions_succeeded, subscriptions_failed, error_message
            "#,
        )
        .bind(run_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to create billing run: {}", e)))?;

        timer.observe_duration();

        Ok(run)
    }

    /// Finalize a billing run with its outcome and counts.
    #[instrument(skip(self), fields(run_id = %run_id))]
    pub async fn finalize_billing_run(
        &self,
        run_id: Uuid,
        status: BillingRunStatus,
        processed: i32,
        succeeded: i32,
        failed: i32,
        error_message: Option<String>,
    ) -> Result<Option<BillingRun>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["finalize_billing_run"])
            .start_timer();

        let run = sqlx::query_as::<_, BillingRun>(
            r#"
            UPDATE billing_runs
            SET status = $2, completed_utc = NOW(), subscriptions_processed = $3, subscriptions_succeeded = $4, subscriptions_failed = $5, error_message = $6
            WHERE run_id = $1
            RETURNING run_id, status, started_utc, completed_utc, subscriptions_processed, subscriptions_succeeded, subscriptions_failed, error_message
            "#,
        )
        .bind(run_id)
        .bind(status.as_str())
        .bind(processed)
        .bind(succeeded)
        .bind(failed)
        .bind(error_message)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to finalize billing run: {}", e)))?;

        timer.observe_duration();

        Ok(run)
    }
}
