//! Monthly usage period model.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Usage alert thresholds, in percent of the plan limit.
pub const ALERT_THRESHOLDS: [i32; 3] = [80, 90, 100];

/// Per-customer, per-calendar-month usage counters.
///
/// Exactly one row exists per (customer, month); counters freeze once
/// `invoice_generated` is set.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct UsagePeriod {
    pub period_id: Uuid,
    pub customer_id: Uuid,
    /// First day of the calendar month this row covers.
    pub month: NaiveDate,
    pub processed_count: i32,
    pub successful_count: i32,
    pub failed_count: i32,
    pub overage_count: i32,
    pub overage_charges: Decimal,
    pub total_charges: Decimal,
    /// Plan limit snapshot taken at period creation.
    pub plan_limit: i32,
    /// Thresholds (80/90/100) that have already fired this period.
    pub alerts_sent: Vec<i32>,
    pub invoice_generated: bool,
    pub invoice_id: Option<String>,
    pub invoice_date: Option<NaiveDate>,
    pub due_date: Option<NaiveDate>,
    pub billing_status: String,
    pub last_updated: DateTime<Utc>,
    pub created_utc: DateTime<Utc>,
}

impl UsagePeriod {
    /// Success rate percentage over processed jobs, 0 when nothing processed.
    pub fn success_rate(&self) -> f64 {
        if self.processed_count == 0 {
            return 0.0;
        }
        (self.successful_count as f64 / self.processed_count as f64) * 100.0
    }

    /// Processed count vs plan limit, capped at 100. 0 when no limit is set.
    pub fn usage_percentage(&self) -> f64 {
        if self.plan_limit <= 0 {
            return 0.0;
        }
        ((self.processed_count as f64 / self.plan_limit as f64) * 100.0).min(100.0)
    }

    pub fn is_over_limit(&self) -> bool {
        self.processed_count > self.plan_limit
    }
}

/// First day of the month containing `date`.
pub fn month_of(date: NaiveDate) -> NaiveDate {
    use chrono::Datelike;
    NaiveDate::from_ymd_opt(date.year(), date.month(), 1).expect("first of month is always valid")
}

/// First day of the current calendar month.
pub fn current_month() -> NaiveDate {
    month_of(Utc::now().date_naive())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn period(processed: i32, successful: i32, failed: i32, limit: i32) -> UsagePeriod {
        UsagePeriod {
            period_id: Uuid::new_v4(),
            customer_id: Uuid::new_v4(),
            month: NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
            processed_count: processed,
            successful_count: successful,
            failed_count: failed,
            overage_count: 0,
            overage_charges: Decimal::ZERO,
            total_charges: Decimal::ZERO,
            plan_limit: limit,
            alerts_sent: vec![],
            invoice_generated: false,
            invoice_id: None,
            invoice_date: None,
            due_date: None,
            billing_status: "pending".to_string(),
            last_updated: Utc::now(),
            created_utc: Utc::now(),
        }
    }

    #[test]
    fn success_rate_handles_empty_period() {
        assert_eq!(period(0, 0, 0, 100).success_rate(), 0.0);
        assert_eq!(period(4, 3, 1, 100).success_rate(), 75.0);
    }

    #[test]
    fn usage_percentage_caps_at_100() {
        assert_eq!(period(150, 150, 0, 100).usage_percentage(), 100.0);
        assert_eq!(period(50, 50, 0, 100).usage_percentage(), 50.0);
        assert_eq!(period(50, 50, 0, 0).usage_percentage(), 0.0);
    }

    #[test]
    fn over_limit_is_strict() {
        assert!(!period(100, 100, 0, 100).is_over_limit());
        assert!(period(101, 101, 0, 100).is_over_limit());
    }

    #[test]
    fn month_of_truncates_to_first_day() {
        let date = NaiveDate::from_ymd_opt(2025, 3, 17).unwrap();
        assert_eq!(month_of(date), NaiveDate::from_ymd_opt(2025, 3, 1).unwrap());
    }
}
