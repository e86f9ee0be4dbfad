//! Subscription plan model.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use service_core::error::AppError;
use sqlx::FromRow;
use uuid::Uuid;

/// Subscription plan.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SubscriptionPlan {
    pub plan_id: Uuid,
    pub plan_code: String,
    pub name: String,
    pub monthly_price: Decimal,
    pub annual_price: Option<Decimal>,
    pub processing_limit: i32,
    pub overage_rate: Option<Decimal>,
    pub trial_days: i32,
    pub is_active: bool,
    pub created_utc: DateTime<Utc>,
}

/// Input for creating a plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatePlan {
    pub plan_code: String,
    pub name: String,
    pub monthly_price: Decimal,
    pub annual_price: Option<Decimal>,
    pub processing_limit: i32,
    pub overage_rate: Option<Decimal>,
    pub trial_days: i32,
}

impl CreatePlan {
    /// Pricing sanity rules: positive prices and limit, non-negative overage rate.
    pub fn validate(&self) -> Result<(), AppError> {
        if self.monthly_price <= Decimal::ZERO {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "Monthly price must be greater than 0"
            )));
        }
        if let Some(annual) = self.annual_price {
            if annual <= Decimal::ZERO {
                return Err(AppError::BadRequest(anyhow::anyhow!(
                    "Annual price must be greater than 0"
                )));
            }
        }
        if self.processing_limit <= 0 {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "Processing limit must be greater than 0"
            )));
        }
        if let Some(rate) = self.overage_rate {
            if rate < Decimal::ZERO {
                return Err(AppError::BadRequest(anyhow::anyhow!(
                    "Overage rate cannot be negative"
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_plan() -> CreatePlan {
        CreatePlan {
            plan_code: "starter".to_string(),
            name: "Starter".to_string(),
            monthly_price: Decimal::new(4900, 2),
            annual_price: None,
            processing_limit: 100,
            overage_rate: Some(Decimal::new(50, 2)),
            trial_days: 14,
        }
    }

    #[test]
    fn accepts_valid_pricing() {
        assert!(base_plan().validate().is_ok());
    }

    #[test]
    fn rejects_zero_monthly_price() {
        let mut plan = base_plan();
        plan.monthly_price = Decimal::ZERO;
        assert!(plan.validate().is_err());
    }

    #[test]
    fn rejects_non_positive_limit() {
        let mut plan = base_plan();
        plan.processing_limit = 0;
        assert!(plan.validate().is_err());
    }

    #[test]
    fn rejects_negative_overage_rate() {
        let mut plan = base_plan();
        plan.overage_rate = Some(Decimal::new(-10, 2));
        assert!(plan.validate().is_err());
    }
}
