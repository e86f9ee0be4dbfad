//! Client for the external workflow engine that performs document
//! extraction. The engine reports results back through the /webhooks
//! endpoints; this client only pushes work toward it.

use crate::config::WorkflowConfig;
use crate::models::ProcessingJob;
use reqwest::Client;
use serde::Serialize;
use service_core::error::AppError;
use std::time::Duration;
use tracing::{info, instrument, warn};

#[derive(Debug, Serialize)]
struct ReprocessRequest<'a> {
    job_id: String,
    customer_id: String,
    file_id: Option<&'a str>,
    file_url: Option<&'a str>,
    file_name: &'a str,
    retry_count: i32,
}

#[derive(Clone)]
pub struct WorkflowClient {
    client: Client,
    base_url: String,
}

impl WorkflowClient {
    pub fn new(config: &WorkflowConfig) -> Result<Self, AppError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AppError::InternalError(anyhow::anyhow!(e.to_string())))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Ask the workflow engine to pick up a requeued job. Best effort: a
    /// failure here leaves the job Queued for the engine's next poll.
    #[instrument(skip(self, job), fields(job_id = %job.job_id))]
    pub async fn trigger_reprocess(&self, job: &ProcessingJob) -> Result<(), AppError> {
        let url = format!("{}/webhook/retry-job", self.base_url);
        let request = ReprocessRequest {
            job_id: job.job_id.to_string(),
            customer_id: job.customer_id.to_string(),
            file_id: job.file_id.as_deref(),
            file_url: job.file_url.as_deref(),
            file_name: &job.file_name,
            retry_count: job.retry_count,
        };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                AppError::InternalError(anyhow::anyhow!("Workflow trigger failed: {}", e))
            })?;

        if response.status().is_success() {
            info!(job_id = %job.job_id, "Reprocess triggered");
            Ok(())
        } else {
            warn!(job_id = %job.job_id, status = %response.status(), "Workflow engine rejected reprocess trigger");
            Err(AppError::InternalError(anyhow::anyhow!(
                "Workflow engine returned {}",
                response.status()
            )))
        }
    }
}
