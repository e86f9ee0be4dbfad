//! Customer account model.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Subscription status for a customer account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    Trial,
    Suspended,
    Cancelled,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::Trial => "trial",
            SubscriptionStatus::Suspended => "suspended",
            SubscriptionStatus::Cancelled => "cancelled",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "trial" => SubscriptionStatus::Trial,
            "suspended" => SubscriptionStatus::Suspended,
            "cancelled" => SubscriptionStatus::Cancelled,
            _ => SubscriptionStatus::Active,
        }
    }

    /// Only active and trial customers may submit work.
    pub fn can_process(&self) -> bool {
        matches!(self, SubscriptionStatus::Active | SubscriptionStatus::Trial)
    }
}

/// Customer account with live quota state.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Customer {
    pub customer_id: Uuid,
    pub customer_name: String,
    pub email: String,
    pub phone: Option<String>,
    pub company: Option<String>,
    #[serde(skip_serializing)]
    pub api_key: String,
    #[serde(skip_serializing)]
    pub webhook_secret: String,
    pub plan_id: Uuid,
    pub subscription_status: String,
    pub subscription_start_date: NaiveDate,
    pub subscription_end_date: Option<NaiveDate>,
    pub trial_end_date: Option<NaiveDate>,
    pub current_usage: i32,
    pub usage_limit: i32,
    pub overage_allowed: bool,
    pub total_processed: i64,
    pub last_reset_period: Option<NaiveDate>,
    pub drive_folder_id: Option<String>,
    pub last_activity: Option<DateTime<Utc>>,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl Customer {
    pub fn status(&self) -> SubscriptionStatus {
        SubscriptionStatus::from_string(&self.subscription_status)
    }

    /// Usage percentage against the plan limit, 0 when no limit is set.
    pub fn usage_percentage(&self) -> f64 {
        if self.usage_limit <= 0 {
            return 0.0;
        }
        (self.current_usage as f64 / self.usage_limit as f64) * 100.0
    }

    pub fn remaining_quota(&self) -> i32 {
        (self.usage_limit - self.current_usage).max(0)
    }
}

/// Input for creating a customer account.
#[derive(Debug, Clone)]
pub struct CreateCustomer {
    pub customer_name: String,
    pub email: String,
    pub phone: Option<String>,
    pub company: Option<String>,
    pub plan_id: Uuid,
    pub subscription_status: SubscriptionStatus,
    pub drive_folder_id: Option<String>,
}

/// Profile fields a customer may change about themselves.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateCustomerProfile {
    pub customer_name: Option<String>,
    pub phone: Option<String>,
    pub company: Option<String>,
}
