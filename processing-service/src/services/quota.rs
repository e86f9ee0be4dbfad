//! Quota ledger. Tracks per-customer usage against plan limits, fires
//! one-shot threshold alerts, and computes overage charges.
//!
//! Counter writes are single atomic statements in the database layer;
//! this service sequences them and layers best-effort notifications on
//! top. An email failure never rolls back a ledger write.

use crate::models::{Customer, UsagePeriod, ALERT_THRESHOLDS};
use crate::services::database::Database;
use crate::services::metrics;
use crate::services::notify::Notifier;
use chrono::{Duration, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use service_core::error::AppError;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Outcome of a quota check for a prospective job.
#[derive(Debug, Clone, Serialize)]
pub struct QuotaDecision {
    pub allowed: bool,
    pub in_overage: bool,
    pub current_usage: i32,
    pub usage_limit: i32,
    pub remaining: i32,
}

/// Thresholds crossed at the given usage level. A limit of zero or less
/// means the plan is unmetered and no alerts apply.
fn thresholds_crossed(current_usage: i32, usage_limit: i32) -> Vec<i32> {
    if usage_limit <= 0 {
        return Vec::new();
    }
    ALERT_THRESHOLDS
        .iter()
        .copied()
        .filter(|t| (current_usage as i64) * 100 >= (*t as i64) * (usage_limit as i64))
        .collect()
}

#[derive(Clone)]
pub struct QuotaLedger {
    db: Database,
    notifier: Notifier,
}

impl QuotaLedger {
    pub fn new(db: Database, notifier: Notifier) -> Self {
        Self { db, notifier }
    }

    /// Decide whether a customer may submit another document. Never
    /// mutates the ledger; the usage counter only moves on completion.
    #[instrument(skip(self, customer), fields(customer_id = %customer.customer_id))]
    pub fn check_quota(&self, customer: &Customer) -> Result<QuotaDecision, AppError> {
        if !customer.status().can_process() {
            metrics::record_quota_denial("subscription_inactive");
            return Err(AppError::Forbidden(anyhow::anyhow!(
                "Subscription is {} and cannot process documents",
                customer.subscription_status
            )));
        }

        let unmetered = customer.usage_limit <= 0;
        let under_limit = unmetered || customer.current_usage < customer.usage_limit;

        if !under_limit && !customer.overage_allowed {
            metrics::record_quota_denial("quota_exceeded");
            return Err(AppError::QuotaExceeded(anyhow::anyhow!(
                "Monthly quota of {} documents reached",
                customer.usage_limit
            )));
        }

        Ok(QuotaDecision {
            allowed: true,
            in_overage: !under_limit,
            current_usage: customer.current_usage,
            usage_limit: customer.usage_limit,
            remaining: customer.remaining_quota(),
        })
    }

    /// Record a successful document against the ledger. Bumps the customer
    /// counters and the monthly period inside the caller's transaction, so
    /// the ledger writes commit together with whatever state change earned
    /// them. Alerts and overage run afterwards via
    /// [`QuotaLedger::settle_completion`].
    #[instrument(skip(self, tx), fields(customer_id = %customer_id))]
    pub async fn record_completion(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        customer_id: Uuid,
    ) -> Result<(Customer, UsagePeriod), AppError> {
        let customer = self
            .db
            .increment_customer_usage(&mut **tx, customer_id)
            .await?
            .ok_or_else(|| {
                AppError::NotFound(anyhow::anyhow!("Customer {} not found", customer_id))
            })?;

        let month = crate::models::current_month();
        let period = self
            .db
            .get_or_create_period(&mut **tx, customer_id, month, customer.usage_limit)
            .await?;

        if self
            .db
            .record_period_success(&mut **tx, period.period_id)
            .await?
            .is_none()
        {
            warn!(period_id = %period.period_id, "Period already invoiced, usage not added to period");
        }

        Ok((customer, period))
    }

    /// Post-commit half of a completion: fire any newly crossed threshold
    /// alerts and recompute overage when the customer is past the limit.
    #[instrument(skip(self, customer), fields(customer_id = %customer.customer_id))]
    pub async fn settle_completion(
        &self,
        customer: &Customer,
        period_id: Uuid,
    ) -> Result<(), AppError> {
        self.fire_threshold_alerts(customer, period_id).await?;

        if customer.usage_limit > 0
            && customer.current_usage > customer.usage_limit
            && customer.overage_allowed
        {
            self.recompute_overage(customer, period_id).await?;
        }

        Ok(())
    }

    /// Record a failed document. Failures count against the period's
    /// failure tally but never against the customer's quota.
    #[instrument(skip(self), fields(customer_id = %customer_id))]
    pub async fn record_failure(&self, customer_id: Uuid) -> Result<(), AppError> {
        let customer = self.db.get_customer(customer_id).await?.ok_or_else(|| {
            AppError::NotFound(anyhow::anyhow!("Customer {} not found", customer_id))
        })?;

        let month = crate::models::current_month();
        let period = self
            .db
            .get_or_create_period(self.db.pool(), customer_id, month, customer.usage_limit)
            .await?;

        if self.db.record_period_failure(period.period_id).await?.is_none() {
            warn!(period_id = %period.period_id, "Period already invoiced, failure not recorded");
        }

        Ok(())
    }

    /// Evaluate every threshold independently and claim each newly crossed
    /// one. The array claim in the database guarantees a single winner per
    /// threshold per period, so a usage jump from 79% to 100% fires 80, 90
    /// and 100 exactly once each.
    async fn fire_threshold_alerts(
        &self,
        customer: &Customer,
        period_id: Uuid,
    ) -> Result<(), AppError> {
        for threshold in thresholds_crossed(customer.current_usage, customer.usage_limit) {
            if self.db.claim_alert_threshold(period_id, threshold).await? {
                metrics::record_usage_alert(threshold);
                info!(
                    customer_id = %customer.customer_id,
                    threshold = threshold,
                    "Usage threshold crossed"
                );
                match self.notifier.send_usage_alert(customer, threshold).await {
                    Ok(()) => metrics::record_notification("usage_alert", "sent"),
                    Err(e) => {
                        metrics::record_notification("usage_alert", "failed");
                        warn!(error = %e, threshold = threshold, "Usage alert email failed");
                    }
                }
            }
        }
        Ok(())
    }

    async fn recompute_overage(
        &self,
        customer: &Customer,
        period_id: Uuid,
    ) -> Result<Option<UsagePeriod>, AppError> {
        let rate = match self.db.get_plan(customer.plan_id).await? {
            Some(plan) => plan.overage_rate.unwrap_or(Decimal::ZERO),
            None => Decimal::ZERO,
        };
        self.db.apply_overage(period_id, rate).await
    }

    /// Recompute overage counters for a customer's month on demand.
    #[instrument(skip(self), fields(customer_id = %customer_id, month = %month))]
    pub async fn compute_overage(
        &self,
        customer_id: Uuid,
        month: NaiveDate,
    ) -> Result<UsagePeriod, AppError> {
        let customer = self.db.get_customer(customer_id).await?.ok_or_else(|| {
            AppError::NotFound(anyhow::anyhow!("Customer {} not found", customer_id))
        })?;

        let period = self.db.get_period(customer_id, month).await?.ok_or_else(|| {
            AppError::NotFound(anyhow::anyhow!(
                "No usage period for customer {} in {}",
                customer_id,
                month
            ))
        })?;

        self.recompute_overage(&customer, period.period_id)
            .await?
            .ok_or_else(|| {
                AppError::Conflict(anyhow::anyhow!(
                    "Usage period {} is already invoiced",
                    period.period_id
                ))
            })
    }

    /// Zero one customer's usage counter for a new month. Safe to rerun.
    #[instrument(skip(self), fields(customer_id = %customer_id, month = %month))]
    pub async fn reset_period(
        &self,
        customer_id: Uuid,
        month: NaiveDate,
    ) -> Result<bool, AppError> {
        let reset = self.db.reset_customer_usage(customer_id, month).await?;
        if reset {
            info!(customer_id = %customer_id, month = %month, "Usage counter reset");
        }
        Ok(reset)
    }

    /// Monthly reset sweep across all customers. Returns how many were
    /// actually reset; customers already reset for this month are skipped.
    #[instrument(skip(self), fields(month = %month))]
    pub async fn reset_all(&self, month: NaiveDate) -> Result<u64, AppError> {
        self.db.reset_all_usage(month).await
    }

    /// Generate the usage invoice for a customer's month. Recomputes
    /// overage first, then freezes the period. Emails the invoice best
    /// effort.
    #[instrument(skip(self), fields(customer_id = %customer_id, month = %month))]
    pub async fn generate_invoice(
        &self,
        customer_id: Uuid,
        month: NaiveDate,
    ) -> Result<UsagePeriod, AppError> {
        let customer = self.db.get_customer(customer_id).await?.ok_or_else(|| {
            AppError::NotFound(anyhow::anyhow!("Customer {} not found", customer_id))
        })?;

        let period = self.db.get_period(customer_id, month).await?.ok_or_else(|| {
            AppError::NotFound(anyhow::anyhow!(
                "No usage period for customer {} in {}",
                customer_id,
                month
            ))
        })?;

        if period.invoice_generated {
            return Err(AppError::Conflict(anyhow::anyhow!(
                "Invoice already generated for {}",
                month
            )));
        }

        let period = self
            .recompute_overage(&customer, period.period_id)
            .await?
            .unwrap_or(period);

        let monthly_price = match self.db.get_plan(customer.plan_id).await? {
            Some(plan) => plan.monthly_price,
            None => Decimal::ZERO,
        };

        let invoice_date = Utc::now().date_naive();
        let due_date = invoice_date + Duration::days(30);
        let invoice_id = format!(
            "INV-{}-{}",
            &customer_id.to_string()[..8],
            month.format("%Y-%m")
        );

        let period = self
            .db
            .mark_period_invoiced(
                period.period_id,
                &invoice_id,
                invoice_date,
                due_date,
                monthly_price + period.overage_charges,
            )
            .await?
            .ok_or_else(|| {
                AppError::Conflict(anyhow::anyhow!(
                    "Invoice already generated for {}",
                    month
                ))
            })?;

        match self.notifier.send_invoice(&customer, &period).await {
            Ok(()) => metrics::record_notification("invoice", "sent"),
            Err(e) => {
                metrics::record_notification("invoice", "failed");
                warn!(error = %e, "Invoice email failed");
            }
        }

        Ok(period)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_thresholds_below_eighty_percent() {
        assert!(thresholds_crossed(79, 100).is_empty());
        assert!(thresholds_crossed(0, 100).is_empty());
    }

    #[test]
    fn thresholds_accumulate_with_usage() {
        assert_eq!(thresholds_crossed(80, 100), vec![80]);
        assert_eq!(thresholds_crossed(90, 100), vec![80, 90]);
        assert_eq!(thresholds_crossed(100, 100), vec![80, 90, 100]);
        assert_eq!(thresholds_crossed(150, 100), vec![80, 90, 100]);
    }

    #[test]
    fn jump_past_several_thresholds_reports_all() {
        // 79 -> 100 in one step still reports every threshold; the
        // database claim dedupes ones already fired.
        assert_eq!(thresholds_crossed(100, 100), vec![80, 90, 100]);
    }

    #[test]
    fn rounding_does_not_fire_early() {
        // 7/9 is 77.7%, 8/9 is 88.8%
        assert!(thresholds_crossed(7, 9).is_empty());
        assert_eq!(thresholds_crossed(8, 9), vec![80]);
    }

    #[test]
    fn unmetered_plans_never_alert() {
        assert!(thresholds_crossed(1000, 0).is_empty());
        assert!(thresholds_crossed(1000, -1).is_empty());
    }
}
