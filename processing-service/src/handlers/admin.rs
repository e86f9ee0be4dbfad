//! Operations endpoints, gated by the static admin token.

use axum::extract::{Json, Path, Query, State};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::handlers::auth::AdminAuth;
use crate::models::{CreatePlan, SubscriptionPlan, UsagePeriod};
use crate::AppState;
use service_core::error::AppError;

#[derive(Debug, Serialize)]
pub struct ResetResponse {
    pub month: NaiveDate,
    pub reset_count: u64,
}

/// Monthly rollover, invoked by the scheduler on the first of the month.
/// Reruns are no-ops thanks to the per-customer reset guard.
///
/// POST /admin/periods/reset
pub async fn reset_periods(
    State(state): State<AppState>,
    _auth: AdminAuth,
) -> Result<Json<ResetResponse>, AppError> {
    let month = crate::models::current_month();
    let reset_count = state.quota.reset_all(month).await?;

    Ok(Json(ResetResponse { month, reset_count }))
}

#[derive(Debug, Serialize)]
pub struct CustomerResetResponse {
    pub month: NaiveDate,
    pub reset: bool,
}

/// Reset a single customer's usage counter for the current month.
///
/// POST /admin/periods/{customer_id}/reset
pub async fn reset_customer_period(
    State(state): State<AppState>,
    _auth: AdminAuth,
    Path(customer_id): Path<Uuid>,
) -> Result<Json<CustomerResetResponse>, AppError> {
    let month = crate::models::current_month();
    let reset = state.quota.reset_period(customer_id, month).await?;

    Ok(Json(CustomerResetResponse { month, reset }))
}

/// Recompute a period's overage counters and charges from its processed
/// count, for example after a plan's overage rate changes.
///
/// POST /admin/periods/{customer_id}/recompute
pub async fn recompute_overage(
    State(state): State<AppState>,
    _auth: AdminAuth,
    Path(customer_id): Path<Uuid>,
    Query(query): Query<InvoiceQuery>,
) -> Result<Json<UsagePeriod>, AppError> {
    let month = query
        .month
        .map(crate::models::month_of)
        .unwrap_or_else(crate::models::current_month);
    let period = state.quota.compute_overage(customer_id, month).await?;

    Ok(Json(period))
}

#[derive(Debug, Deserialize)]
pub struct InvoiceQuery {
    pub month: Option<NaiveDate>,
}

/// Generate the usage invoice for a customer's month (defaults to the
/// previous month, the one the rollover just closed).
///
/// POST /admin/periods/{customer_id}/invoice
pub async fn generate_invoice(
    State(state): State<AppState>,
    _auth: AdminAuth,
    Path(customer_id): Path<Uuid>,
    Query(query): Query<InvoiceQuery>,
) -> Result<Json<UsagePeriod>, AppError> {
    let month = query
        .month
        .map(crate::models::month_of)
        .unwrap_or_else(|| {
            let current = crate::models::current_month();
            crate::models::month_of(current - chrono::Duration::days(1))
        });

    let period = state.quota.generate_invoice(customer_id, month).await?;

    Ok(Json(period))
}

#[derive(Debug, Deserialize)]
pub struct StatusChangeRequest {
    pub status: String,
}

/// Suspend, cancel or reactivate a customer's subscription.
///
/// POST /admin/customers/{customer_id}/status
pub async fn set_customer_status(
    State(state): State<AppState>,
    _auth: AdminAuth,
    Path(customer_id): Path<Uuid>,
    Json(req): Json<StatusChangeRequest>,
) -> Result<Json<crate::models::Customer>, AppError> {
    let status = match req.status.as_str() {
        "active" | "trial" | "suspended" | "cancelled" => {
            crate::models::SubscriptionStatus::from_string(&req.status)
        }
        other => {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "Unknown subscription status '{}'",
                other
            )))
        }
    };
    let customer = state
        .db
        .update_customer_status(customer_id, status)
        .await?
        .ok_or_else(|| {
            AppError::NotFound(anyhow::anyhow!("Customer {} not found", customer_id))
        })?;

    Ok(Json(customer))
}

/// POST /admin/plans
pub async fn create_plan(
    State(state): State<AppState>,
    _auth: AdminAuth,
    Json(req): Json<CreatePlan>,
) -> Result<(axum::http::StatusCode, Json<SubscriptionPlan>), AppError> {
    req.validate()?;
    let plan = state.db.create_plan(&req).await?;
    Ok((axum::http::StatusCode::CREATED, Json(plan)))
}

/// GET /admin/plans
pub async fn list_plans(
    State(state): State<AppState>,
    _auth: AdminAuth,
) -> Result<Json<Vec<SubscriptionPlan>>, AppError> {
    Ok(Json(state.db.list_plans().await?))
}
