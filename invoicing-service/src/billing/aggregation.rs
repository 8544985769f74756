//! Usage aggregation boundary.

use crate::models::{AggregationResult, Charge, Subscription};
use crate::services::Database;
use async_trait::async_trait;
use chrono::NaiveDate;
use service_core::error::AppError;

/// Supplies the summed usage (`units`) and billable event count (`count`)
/// for a charge over a billing period. The result is assumed deterministic
/// and free of double-counted or out-of-window events.
#[async_trait]
pub trait UsageAggregator: Send + Sync {
    async fn aggregate(
        &self,
        charge: &Charge,
        subscription: &Subscription,
        from_date: NaiveDate,
        to_date: NaiveDate,
    ) -> Result<AggregationResult, AppError>;
}

#[async_trait]
impl UsageAggregator for Database {
    async fn aggregate(
        &self,
        charge: &Charge,
        subscription: &Subscription,
        from_date: NaiveDate,
        to_date: NaiveDate,
    ) -> Result<AggregationResult, AppError> {
        self.aggregate_usage(
            subscription.subscription_id,
            &charge.metric_code,
            from_date,
            to_date,
        )
        .await
    }
}
