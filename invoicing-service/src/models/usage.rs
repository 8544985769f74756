//! Metered usage models.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Raw metered event, as ingested.
///
/// `transaction_id` is the caller-supplied idempotency key; re-sending the
/// same transaction returns the original row.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct UsageEvent {
    pub event_id: Uuid,
    pub tenant_id: Uuid,
    pub subscription_id: Uuid,
    pub code: String,
    pub transaction_id: String,
    pub units: Decimal,
    pub timestamp: DateTime<Utc>,
    pub properties: Option<serde_json::Value>,
    pub created_utc: DateTime<Utc>,
}

/// Input for recording a usage event.
#[derive(Debug, Clone)]
pub struct RecordUsageEvent {
    pub tenant_id: Uuid,
    pub subscription_id: Uuid,
    pub code: String,
    pub transaction_id: String,
    pub units: Decimal,
    pub timestamp: DateTime<Utc>,
    pub properties: Option<serde_json::Value>,
}

/// Summed usage for one charge over one billing period: total metered
/// quantity and the number of discrete billable events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AggregationResult {
    pub units: Decimal,
    pub count: i64,
}
