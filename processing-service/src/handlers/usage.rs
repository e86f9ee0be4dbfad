//! Usage reporting endpoints.

use axum::extract::{Json, Query, State};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::handlers::auth::ApiIdentity;
use crate::models::UsagePeriod;
use crate::AppState;
use service_core::error::AppError;

#[derive(Debug, Serialize)]
pub struct UsageStatsResponse {
    pub month: NaiveDate,
    pub processed_count: i32,
    pub successful_count: i32,
    pub failed_count: i32,
    pub overage_count: i32,
    pub overage_charges: Decimal,
    pub plan_limit: i32,
    pub current_usage: i32,
    pub usage_percentage: f64,
    pub remaining_quota: i32,
}

/// Current period numbers. A customer with no activity this month gets
/// zeros rather than a 404.
///
/// GET /api/usage/stats
pub async fn usage_stats(
    State(state): State<AppState>,
    identity: ApiIdentity,
) -> Result<Json<UsageStatsResponse>, AppError> {
    let month = crate::models::current_month();
    let period = state
        .db
        .get_period(identity.customer.customer_id, month)
        .await?;

    let customer = &identity.customer;
    let response = match period {
        Some(p) => UsageStatsResponse {
            month: p.month,
            processed_count: p.processed_count,
            successful_count: p.successful_count,
            failed_count: p.failed_count,
            overage_count: p.overage_count,
            overage_charges: p.overage_charges,
            plan_limit: p.plan_limit,
            current_usage: customer.current_usage,
            usage_percentage: customer.usage_percentage(),
            remaining_quota: customer.remaining_quota(),
        },
        None => UsageStatsResponse {
            month,
            processed_count: 0,
            successful_count: 0,
            failed_count: 0,
            overage_count: 0,
            overage_charges: Decimal::ZERO,
            plan_limit: customer.usage_limit,
            current_usage: customer.current_usage,
            usage_percentage: customer.usage_percentage(),
            remaining_quota: customer.remaining_quota(),
        },
    };

    Ok(Json(response))
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub months: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct PeriodSummary {
    #[serde(flatten)]
    pub period: UsagePeriod,
    pub success_rate: f64,
    pub usage_percentage: f64,
    pub over_limit: bool,
}

/// GET /api/usage/history
pub async fn usage_history(
    State(state): State<AppState>,
    identity: ApiIdentity,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<PeriodSummary>>, AppError> {
    let periods = state
        .db
        .list_periods(identity.customer.customer_id, query.months.unwrap_or(6))
        .await?;

    let summaries = periods
        .into_iter()
        .map(|p| PeriodSummary {
            success_rate: p.success_rate(),
            usage_percentage: p.usage_percentage(),
            over_limit: p.is_over_limit(),
            period: p,
        })
        .collect();

    Ok(Json(summaries))
}
