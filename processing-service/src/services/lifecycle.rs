//! Job lifecycle tracker. Owns the Queued -> Processing -> Completed or
//! Failed -> Queued state machine and the side effects around it.
//!
//! Every transition is a compare-and-set in the database keyed on the
//! expected previous status. A lost race surfaces as InvalidTransition,
//! never as a silently overwritten state.

use crate::models::{CreateJob, Customer, ExtractedInvoice, JobStatus, ProcessingJob, MAX_RETRIES};
use crate::services::database::Database;
use crate::services::metrics;
use crate::services::notify::Notifier;
use crate::services::quota::QuotaLedger;
use crate::services::workflow::WorkflowClient;
use service_core::error::AppError;
use tracing::{info, instrument, warn};
use uuid::Uuid;

#[derive(Clone)]
pub struct JobLifecycle {
    db: Database,
    quota: QuotaLedger,
    notifier: Notifier,
    workflow: WorkflowClient,
}

impl JobLifecycle {
    pub fn new(
        db: Database,
        quota: QuotaLedger,
        notifier: Notifier,
        workflow: WorkflowClient,
    ) -> Self {
        Self {
            db,
            quota,
            notifier,
            workflow,
        }
    }

    /// Admit a new document. The quota gate runs first; a denied customer
    /// never gets a job row.
    #[instrument(skip(self, customer, input), fields(customer_id = %customer.customer_id))]
    pub async fn submit(
        &self,
        customer: &Customer,
        input: &CreateJob,
        source: &str,
    ) -> Result<ProcessingJob, AppError> {
        self.quota.check_quota(customer)?;

        let job = self.db.create_job(input).await?;
        metrics::record_job_created(source);
        self.db.touch_last_activity(customer.customer_id).await?;

        Ok(job)
    }

    /// Move a queued job into Processing.
    #[instrument(skip(self), fields(job_id = %job_id))]
    pub async fn start(&self, job_id: Uuid) -> Result<ProcessingJob, AppError> {
        match self.db.start_job(job_id).await? {
            Some(job) => {
                metrics::record_job_transition(JobStatus::Queued.as_str(), job.status.as_str());
                Ok(job)
            }
            None => Err(self.transition_error(job_id, JobStatus::Processing).await?),
        }
    }

    /// Complete a processing job with its extracted payload. The status
    /// transition and the ledger counters commit in one transaction, so a
    /// job can never land in Completed without being counted. The
    /// completion email stays outside the commit.
    #[instrument(skip(self, payload, raw), fields(job_id = %job_id))]
    pub async fn complete(
        &self,
        job_id: Uuid,
        payload: &ExtractedInvoice,
        raw: &serde_json::Value,
        confidence: Option<f64>,
    ) -> Result<ProcessingJob, AppError> {
        let mut tx = self.db.begin().await?;

        let job = match self
            .db
            .complete_job(&mut *tx, job_id, payload, raw, confidence)
            .await?
        {
            Some(job) => job,
            None => {
                tx.rollback().await.ok();
                return Err(self.transition_error(job_id, JobStatus::Completed).await?);
            }
        };

        let (customer, period) = self.quota.record_completion(&mut tx, job.customer_id).await?;

        tx.commit().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to commit completion: {}", e))
        })?;

        metrics::record_job_transition(JobStatus::Processing.as_str(), job.status.as_str());
        info!(
            job_id = %job.job_id,
            processing_time = job.processing_time.unwrap_or(0),
            "Job completed"
        );

        self.quota.settle_completion(&customer, period.period_id).await?;

        match self.notifier.send_completion(&customer, &job).await {
            Ok(()) => metrics::record_notification("completion", "sent"),
            Err(e) => {
                metrics::record_notification("completion", "failed");
                warn!(error = %e, job_id = %job.job_id, "Completion email failed");
            }
        }

        Ok(job)
    }

    /// Fail a processing job. Counts toward the period's failure tally but
    /// never toward the customer's quota.
    #[instrument(skip(self, error_message), fields(job_id = %job_id))]
    pub async fn fail(&self, job_id: Uuid, error_message: &str) -> Result<ProcessingJob, AppError> {
        let job = match self.db.fail_job(job_id, error_message).await? {
            Some(job) => job,
            None => return Err(self.transition_error(job_id, JobStatus::Failed).await?),
        };

        metrics::record_job_transition(JobStatus::Processing.as_str(), job.status.as_str());
        warn!(job_id = %job.job_id, error = %error_message, "Job failed");

        self.quota.record_failure(job.customer_id).await?;

        if let Some(customer) = self.db.get_customer(job.customer_id).await? {
            match self.notifier.send_failure(&customer, &job).await {
                Ok(()) => metrics::record_notification("failure", "sent"),
                Err(e) => {
                    metrics::record_notification("failure", "failed");
                    warn!(error = %e, job_id = %job.job_id, "Failure email failed");
                }
            }
        }

        Ok(job)
    }

    /// Requeue a failed job. Bounded at the retry limit; the fourth attempt
    /// is refused before any state moves.
    #[instrument(skip(self), fields(job_id = %job_id))]
    pub async fn retry(&self, job_id: Uuid) -> Result<ProcessingJob, AppError> {
        let current = self
            .db
            .get_job(job_id)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Job {} not found", job_id)))?;

        if current.status() != JobStatus::Failed {
            return Err(AppError::InvalidTransition(anyhow::anyhow!(
                "Cannot retry a {} job",
                current.status
            )));
        }
        if current.retry_count >= MAX_RETRIES {
            return Err(AppError::RetryLimitExceeded(anyhow::anyhow!(
                "Job {} has exhausted its {} retries",
                job_id,
                MAX_RETRIES
            )));
        }

        let job = match self.db.retry_job(job_id).await? {
            Some(job) => job,
            // Lost a race between the read and the update
            None => return Err(self.transition_error(job_id, JobStatus::Queued).await?),
        };

        metrics::record_job_transition(JobStatus::Failed.as_str(), job.status.as_str());
        info!(job_id = %job.job_id, retry_count = job.retry_count, "Job requeued for retry");

        if let Err(e) = self.workflow.trigger_reprocess(&job).await {
            warn!(error = %e, job_id = %job.job_id, "Reprocess trigger failed, job stays queued");
        }

        Ok(job)
    }

    /// Explain why a compare-and-set transition matched no row.
    async fn transition_error(
        &self,
        job_id: Uuid,
        attempted: JobStatus,
    ) -> Result<AppError, AppError> {
        match self.db.get_job(job_id).await? {
            None => Ok(AppError::NotFound(anyhow::anyhow!(
                "Job {} not found",
                job_id
            ))),
            Some(job) if job.status() == JobStatus::Failed && attempted == JobStatus::Queued => {
                Ok(AppError::RetryLimitExceeded(anyhow::anyhow!(
                    "Job {} has exhausted its {} retries",
                    job_id,
                    MAX_RETRIES
                )))
            }
            Some(job) => Ok(AppError::InvalidTransition(anyhow::anyhow!(
                "Job {} is {} and cannot move to {}",
                job_id,
                job.status,
                attempted.as_str()
            ))),
        }
    }
}
