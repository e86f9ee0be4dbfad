//! Workflow-engine webhook endpoints. Every route here sits behind the
//! request signature middleware; an unsigned caller never reaches these
//! handlers.

use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{CreateJob, ExtractedInvoice, JobStatus, ProcessingJob};
use crate::services::quota::QuotaDecision;
use crate::AppState;
use service_core::error::AppError;

#[derive(Debug, Deserialize)]
pub struct FolderRequest {
    pub folder_id: String,
}

#[derive(Debug, Serialize)]
pub struct FolderLookupResponse {
    pub found: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subscription_status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_usage: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage_limit: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub overage_allowed: Option<bool>,
}

/// Resolve an intake folder to its customer. Unknown folders and inactive
/// subscriptions both come back as not found, so the engine drops the file
/// without learning why.
///
/// POST /webhooks/lookup-folder
pub async fn lookup_folder(
    State(state): State<AppState>,
    Json(req): Json<FolderRequest>,
) -> Result<Json<FolderLookupResponse>, AppError> {
    let not_found = FolderLookupResponse {
        found: false,
        customer_id: None,
        customer_name: None,
        subscription_status: None,
        current_usage: None,
        usage_limit: None,
        overage_allowed: None,
    };

    let Some(customer) = state.db.get_customer_by_folder(&req.folder_id).await? else {
        return Ok(Json(not_found));
    };

    if !customer.status().can_process() {
        tracing::info!(
            customer_id = %customer.customer_id,
            status = %customer.subscription_status,
            "Folder lookup for inactive subscription"
        );
        return Ok(Json(not_found));
    }

    Ok(Json(FolderLookupResponse {
        found: true,
        customer_id: Some(customer.customer_id),
        customer_name: Some(customer.customer_name),
        subscription_status: Some(customer.subscription_status),
        current_usage: Some(customer.current_usage),
        usage_limit: Some(customer.usage_limit),
        overage_allowed: Some(customer.overage_allowed),
    }))
}

#[derive(Debug, Serialize)]
pub struct QuotaCheckResponse {
    pub allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decision: Option<QuotaDecision>,
}

/// Pre-flight quota check. Denials are part of the response body rather
/// than HTTP errors so the engine can branch without error handling.
///
/// POST /webhooks/check-quota
pub async fn check_quota(
    State(state): State<AppState>,
    Json(req): Json<FolderRequest>,
) -> Result<Json<QuotaCheckResponse>, AppError> {
    let customer = state
        .db
        .get_customer_by_folder(&req.folder_id)
        .await?
        .ok_or_else(|| {
            AppError::NotFound(anyhow::anyhow!("No customer for folder '{}'", req.folder_id))
        })?;

    let response = match state.quota.check_quota(&customer) {
        Ok(decision) => QuotaCheckResponse {
            allowed: true,
            reason: None,
            decision: Some(decision),
        },
        Err(AppError::QuotaExceeded(e)) | Err(AppError::Forbidden(e)) => QuotaCheckResponse {
            allowed: false,
            reason: Some(e.to_string()),
            decision: None,
        },
        Err(e) => return Err(e),
    };

    Ok(Json(response))
}

#[derive(Debug, Deserialize)]
pub struct CreateJobRequest {
    pub customer_id: Uuid,
    pub file_name: String,
    pub file_id: Option<String>,
    pub file_url: Option<String>,
    #[serde(default)]
    pub file_size: i64,
    pub file_type: Option<String>,
}

/// Admit a document as a Queued job. The quota gate runs before any state
/// is written; a denied customer gets a 429 and no job row.
///
/// POST /webhooks/jobs
pub async fn create_job(
    State(state): State<AppState>,
    Json(req): Json<CreateJobRequest>,
) -> Result<(StatusCode, Json<ProcessingJob>), AppError> {
    let customer = state
        .db
        .get_customer(req.customer_id)
        .await?
        .ok_or_else(|| {
            AppError::NotFound(anyhow::anyhow!("Customer {} not found", req.customer_id))
        })?;

    let input = CreateJob {
        customer_id: req.customer_id,
        file_name: req.file_name,
        file_id: req.file_id,
        file_url: req.file_url,
        file_size: req.file_size,
        file_type: req.file_type.unwrap_or_else(|| "unknown".to_string()),
    };

    let job = state.lifecycle.submit(&customer, &input, "webhook").await?;

    Ok((StatusCode::CREATED, Json(job)))
}

#[derive(Debug, Deserialize)]
pub struct StatusUpdateRequest {
    pub status: String,
    pub error_message: Option<String>,
}

/// Move a job through Processing or Failed as the engine reports progress.
/// Completion goes through the result endpoint so the payload and the
/// transition commit together.
///
/// POST /webhooks/jobs/{job_id}/status
pub async fn update_job_status(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
    Json(req): Json<StatusUpdateRequest>,
) -> Result<Json<ProcessingJob>, AppError> {
    let status = JobStatus::from_string(&req.status).ok_or_else(|| {
        AppError::BadRequest(anyhow::anyhow!("Unknown job status '{}'", req.status))
    })?;

    let job = match status {
        JobStatus::Processing => state.lifecycle.start(job_id).await?,
        JobStatus::Failed => {
            let message = req
                .error_message
                .as_deref()
                .unwrap_or("Processing failed with no error detail");
            state.lifecycle.fail(job_id, message).await?
        }
        JobStatus::Completed => {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "Completion must go through the result endpoint"
            )))
        }
        JobStatus::Queued | JobStatus::Retry => {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "Requeueing goes through the retry endpoint"
            )))
        }
    };

    Ok(Json(job))
}

/// Store the extracted invoice payload and complete the job.
///
/// POST /webhooks/jobs/{job_id}/result
pub async fn store_job_result(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
    Json(raw): Json<serde_json::Value>,
) -> Result<Json<ProcessingJob>, AppError> {
    let payload: ExtractedInvoice = serde_json::from_value(raw.clone())
        .map_err(|e| AppError::BadRequest(anyhow::anyhow!("Malformed extraction payload: {}", e)))?;

    let confidence = raw.get("confidence_score").and_then(|v| v.as_f64());

    let job = state
        .lifecycle
        .complete(job_id, &payload, &raw, confidence)
        .await?;

    Ok(Json(job))
}
