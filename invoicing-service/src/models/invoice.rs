//! Invoice and fee models.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Invoice for one subscription billing period.
///
/// `(subscription_id, from_date, to_date, issuing_date)` is unique — it is
/// the idempotency key for invoice generation. Totals always satisfy
/// `total_amount_cents = amount_cents + vat_amount_cents`, each side being
/// the sum over the invoice's fees.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Invoice {
    pub invoice_id: Uuid,
    pub tenant_id: Uuid,
    pub subscription_id: Uuid,
    pub from_date: NaiveDate,
    pub to_date: NaiveDate,
    pub issuing_date: NaiveDate,
    pub amount_cents: i64,
    pub vat_amount_cents: i64,
    pub total_amount_cents: i64,
    pub currency: String,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

/// Kind of fee on an invoice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeeType {
    Subscription,
    Charge,
}

impl FeeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeeType::Subscription => "subscription",
            FeeType::Charge => "charge",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "charge" => FeeType::Charge,
            _ => FeeType::Subscription,
        }
    }
}

/// Fee belonging to exactly one invoice. Created inside the invoice's
/// transaction, never mutated afterward.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Fee {
    pub fee_id: Uuid,
    pub invoice_id: Uuid,
    pub subscription_id: Uuid,
    pub charge_id: Option<Uuid>,
    pub fee_type: String,
    pub amount_cents: i64,
    pub vat_amount_cents: i64,
    pub currency: String,
    pub units: Decimal,
    pub events_count: i64,
    pub created_utc: DateTime<Utc>,
}

/// Input for inserting a fee.
#[derive(Debug, Clone)]
pub struct CreateFee {
    pub invoice_id: Uuid,
    pub subscription_id: Uuid,
    pub charge_id: Option<Uuid>,
    pub fee_type: FeeType,
    pub amount_cents: i64,
    pub vat_amount_cents: i64,
    pub currency: String,
    pub units: Decimal,
    pub events_count: i64,
}
