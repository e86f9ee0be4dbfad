//! Customer signup and self-service endpoints.

use axum::{
    extract::{Json, State},
    http::StatusCode,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::handlers::auth::ApiIdentity;
use crate::models::{
    CreateCustomer, Customer, ProcessingJob, SubscriptionStatus, UpdateCustomerProfile,
};
use crate::services::metrics;
use crate::AppState;
use service_core::error::AppError;

#[derive(Debug, Deserialize, Validate)]
pub struct SignupRequest {
    #[validate(length(min = 1, max = 255))]
    pub customer_name: String,
    #[validate(email)]
    pub email: String,
    pub phone: Option<String>,
    pub company: Option<String>,
    pub plan_id: Uuid,
    pub drive_folder_id: Option<String>,
}

/// Signup response. The API key and webhook secret are returned exactly
/// once, here.
#[derive(Debug, Serialize)]
pub struct SignupResponse {
    pub customer_id: Uuid,
    pub customer_name: String,
    pub email: String,
    pub api_key: String,
    pub webhook_secret: String,
    pub subscription_status: String,
    pub trial_end_date: Option<chrono::NaiveDate>,
    pub usage_limit: i32,
}

/// Create a customer account on the given plan, starting in trial.
///
/// POST /api/customers
pub async fn signup(
    State(state): State<AppState>,
    Json(req): Json<SignupRequest>,
) -> Result<(StatusCode, Json<SignupResponse>), AppError> {
    req.validate()?;

    let input = CreateCustomer {
        customer_name: req.customer_name,
        email: req.email,
        phone: req.phone,
        company: req.company,
        plan_id: req.plan_id,
        subscription_status: SubscriptionStatus::Trial,
        drive_folder_id: req.drive_folder_id,
    };

    let customer = state.db.create_customer(&input).await?;

    match state.notifier.send_welcome(&customer).await {
        Ok(()) => metrics::record_notification("welcome", "sent"),
        Err(e) => {
            metrics::record_notification("welcome", "failed");
            tracing::warn!(error = %e, customer_id = %customer.customer_id, "Welcome email failed");
        }
    }

    Ok((
        StatusCode::CREATED,
        Json(SignupResponse {
            customer_id: customer.customer_id,
            customer_name: customer.customer_name,
            email: customer.email,
            api_key: customer.api_key,
            webhook_secret: customer.webhook_secret,
            subscription_status: customer.subscription_status,
            trial_end_date: customer.trial_end_date,
            usage_limit: customer.usage_limit,
        }),
    ))
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub current_usage: i32,
    pub usage_limit: i32,
    pub usage_percentage: f64,
    pub remaining_quota: i32,
    pub total_processed: i64,
    pub subscription_status: String,
}

fn stats_of(customer: &Customer) -> StatsResponse {
    StatsResponse {
        current_usage: customer.current_usage,
        usage_limit: customer.usage_limit,
        usage_percentage: customer.usage_percentage(),
        remaining_quota: customer.remaining_quota(),
        total_processed: customer.total_processed,
        subscription_status: customer.subscription_status.clone(),
    }
}

/// GET /api/customers/me/stats
pub async fn get_stats(identity: ApiIdentity) -> Json<StatsResponse> {
    Json(stats_of(&identity.customer))
}

#[derive(Debug, Serialize)]
pub struct DashboardResponse {
    pub customer: Customer,
    pub stats: StatsResponse,
    pub recent_jobs: Vec<ProcessingJob>,
    pub current_period: Option<crate::models::UsagePeriod>,
}

/// Customer landing view: profile, usage numbers, recent jobs and the
/// current month's period.
///
/// GET /api/customers/me/dashboard
pub async fn get_dashboard(
    State(state): State<AppState>,
    identity: ApiIdentity,
) -> Result<Json<DashboardResponse>, AppError> {
    let customer_id = identity.customer.customer_id;
    let recent_jobs = state.db.list_jobs(customer_id, None, 10).await?;
    let current_period = state
        .db
        .get_period(customer_id, crate::models::current_month())
        .await?;

    Ok(Json(DashboardResponse {
        stats: stats_of(&identity.customer),
        customer: identity.customer,
        recent_jobs,
        current_period,
    }))
}

/// PATCH /api/customers/me/profile
pub async fn update_profile(
    State(state): State<AppState>,
    identity: ApiIdentity,
    Json(req): Json<UpdateCustomerProfile>,
) -> Result<Json<Customer>, AppError> {
    let customer = state
        .db
        .update_customer_profile(identity.customer.customer_id, &req)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Customer not found")))?;

    Ok(Json(customer))
}
