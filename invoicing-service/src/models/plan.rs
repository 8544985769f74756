//! Billing plan and charge models.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Billing interval for plans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanInterval {
    Monthly,
    Yearly,
}

impl PlanInterval {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanInterval::Monthly => "monthly",
            PlanInterval::Yearly => "yearly",
        }
    }

    /// Returns `None` for interval values this engine does not support;
    /// callers surface that as a configuration error.
    pub fn from_string(s: &str) -> Option<Self> {
        match s {
            "monthly" => Some(PlanInterval::Monthly),
            "yearly" => Some(PlanInterval::Yearly),
            _ => None,
        }
    }
}

/// Pricing strategy tag for a charge. Closed set; fee pricing dispatches on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChargeModel {
    GraduatedPercentage,
}

impl ChargeModel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChargeModel::GraduatedPercentage => "graduated_percentage",
        }
    }

    pub fn from_string(s: &str) -> Option<Self> {
        match s {
            "graduated_percentage" => Some(ChargeModel::GraduatedPercentage),
            _ => None,
        }
    }
}

/// Billing plan.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Plan {
    pub plan_id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
    pub code: String,
    pub billing_interval: String,
    pub pay_in_advance: bool,
    pub amount_cents: i64,
    pub vat_rate: Decimal,
    pub currency: String,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl Plan {
    /// The subscription fee is deferred to the end of the period when the
    /// plan is not billed in advance.
    pub fn pay_in_arrear(&self) -> bool {
        !self.pay_in_advance
    }
}

/// Usage-based charge attached to a plan.
///
/// `properties` holds the pricing model's configuration blob; its shape is
/// owned by the charge model selected by `charge_model`.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Charge {
    pub charge_id: Uuid,
    pub plan_id: Uuid,
    pub metric_code: String,
    pub charge_model: String,
    pub properties: serde_json::Value,
    pub created_utc: DateTime<Utc>,
}

/// Input for creating a plan.
#[derive(Debug, Clone)]
pub struct CreatePlan {
    pub tenant_id: Uuid,
    pub name: String,
    pub code: String,
    pub billing_interval: PlanInterval,
    pub pay_in_advance: bool,
    pub amount_cents: i64,
    pub vat_rate: Decimal,
    pub currency: String,
}

/// Input for attaching a charge to a plan.
#[derive(Debug, Clone)]
pub struct CreateCharge {
    pub plan_id: Uuid,
    pub metric_code: String,
    pub charge_model: ChargeModel,
    pub properties: serde_json::Value,
}
