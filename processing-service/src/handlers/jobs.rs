//! Customer-facing job endpoints.

use axum::extract::{Json, Path, Query, State};
use serde::Deserialize;
use uuid::Uuid;

use crate::handlers::auth::ApiIdentity;
use crate::models::{JobStatus, ProcessingJob};
use crate::AppState;
use service_core::error::AppError;

#[derive(Debug, Deserialize)]
pub struct ListJobsQuery {
    pub limit: Option<i64>,
    pub status: Option<String>,
}

/// GET /api/jobs
pub async fn list_jobs(
    State(state): State<AppState>,
    identity: ApiIdentity,
    Query(query): Query<ListJobsQuery>,
) -> Result<Json<Vec<ProcessingJob>>, AppError> {
    let status = match query.status.as_deref() {
        Some(s) => Some(JobStatus::from_string(s).ok_or_else(|| {
            AppError::BadRequest(anyhow::anyhow!("Unknown job status '{}'", s))
        })?),
        None => None,
    };

    let jobs = state
        .db
        .list_jobs(
            identity.customer.customer_id,
            status,
            query.limit.unwrap_or(20),
        )
        .await?;

    Ok(Json(jobs))
}

/// GET /api/jobs/{job_id}
pub async fn get_job(
    State(state): State<AppState>,
    identity: ApiIdentity,
    Path(job_id): Path<Uuid>,
) -> Result<Json<ProcessingJob>, AppError> {
    let job = state
        .db
        .get_job(job_id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Job {} not found", job_id)))?;

    identity.owns(job.customer_id)?;

    Ok(Json(job))
}

/// POST /api/jobs/{job_id}/retry
pub async fn retry_job(
    State(state): State<AppState>,
    identity: ApiIdentity,
    Path(job_id): Path<Uuid>,
) -> Result<Json<ProcessingJob>, AppError> {
    let job = state
        .db
        .get_job(job_id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Job {} not found", job_id)))?;

    identity.owns(job.customer_id)?;

    let job = state.lifecycle.retry(job_id).await?;

    Ok(Json(job))
}
