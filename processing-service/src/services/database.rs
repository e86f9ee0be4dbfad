//! Database service for processing-service.

use crate::models::{
    CreateCustomer, CreateJob, CreatePlan, Customer, ExtractedInvoice, JobStatus, ProcessingJob,
    SubscriptionPlan, SubscriptionStatus, UpdateCustomerProfile, UsagePeriod, MAX_RETRIES,
};
use crate::services::metrics::DB_QUERY_DURATION;
use chrono::{NaiveDate, Utc};
use rand::RngCore;
use rust_decimal::Decimal;
use service_core::error::AppError;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::{info, instrument, warn};
use uuid::Uuid;

const CUSTOMER_COLUMNS: &str = "customer_id, customer_name, email, phone, company, api_key, webhook_secret, plan_id, subscription_status, subscription_start_date, subscription_end_date, trial_end_date, current_usage, usage_limit, overage_allowed, total_processed, last_reset_period, drive_folder_id, last_activity, created_utc, updated_utc";

const JOB_COLUMNS: &str = "job_id, customer_id, file_name, file_id, file_url, file_size, file_type, status, retry_count, error_message, started_at, completed_at, processing_time, vendor_name, vendor_address, vendor_tax_id, invoice_number, invoice_date, due_date, total_amount, tax_amount, subtotal_amount, currency_code, payment_terms, po_number, line_items, line_items_count, confidence_score, extracted_data, created_utc, updated_utc";

const PERIOD_COLUMNS: &str = "period_id, customer_id, month, processed_count, successful_count, failed_count, overage_count, overage_charges, total_charges, plan_limit, alerts_sent, invoice_generated, invoice_id, invoice_date, due_date, billing_status, last_updated, created_utc";

const PLAN_COLUMNS: &str =
    "plan_id, plan_code, name, monthly_price, annual_price, processing_limit, overage_rate, trial_days, is_active, created_utc";

/// Generate an opaque hex credential of the given length in characters.
fn generate_secret(chars: usize) -> String {
    let mut bytes = vec![0u8; chars / 2];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database connection pool.
    #[instrument(skip(database_url), fields(service = "processing-service"))]
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self, AppError> {
        info!(
            max_connections = max_connections,
            min_connections = min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to connect: {}", e)))?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Open a transaction for writes that must commit together.
    pub async fn begin(&self) -> Result<sqlx::Transaction<'static, sqlx::Postgres>, AppError> {
        self.pool.begin().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to begin transaction: {}", e))
        })
    }

    /// Check database health.
    #[instrument(skip(self))]
    pub async fn health_check(&self) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["health_check"])
            .start_timer();

        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Health check failed: {}", e)))?;

        timer.observe_duration();
        Ok(())
    }

    /// Run database migrations.
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Migration failed: {}", e)))?;
        info!("Database migrations completed");
        Ok(())
    }

    // =========================================================================
    // Plan Operations
    // =========================================================================

    /// Create a subscription plan.
    #[instrument(skip(self, input), fields(plan_code = %input.plan_code))]
    pub async fn create_plan(&self, input: &CreatePlan) -> Result<SubscriptionPlan, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_plan"])
            .start_timer();

        let plan_id = Uuid::new_v4();
        let plan = sqlx::query_as::<_, SubscriptionPlan>(&format!(
            r#"
            INSERT INTO plans (plan_id, plan_code, name, monthly_price, annual_price, processing_limit, overage_rate, trial_days)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING {PLAN_COLUMNS}
            "#,
        ))
        .bind(plan_id)
        .bind(&input.plan_code)
        .bind(&input.name)
        .bind(input.monthly_price)
        .bind(input.annual_price)
        .bind(input.processing_limit)
        .bind(input.overage_rate)
        .bind(input.trial_days)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                AppError::Conflict(anyhow::anyhow!(
                    "Plan with code '{}' already exists",
                    input.plan_code
                ))
            }
            _ => AppError::DatabaseError(anyhow::anyhow!("Failed to create plan: {}", e)),
        })?;

        timer.observe_duration();
        info!(plan_id = %plan.plan_id, plan_code = %plan.plan_code, "Plan created");

        Ok(plan)
    }

    /// Get a plan by ID.
    #[instrument(skip(self), fields(plan_id = %plan_id))]
    pub async fn get_plan(&self, plan_id: Uuid) -> Result<Option<SubscriptionPlan>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_plan"])
            .start_timer();

        let plan = sqlx::query_as::<_, SubscriptionPlan>(&format!(
            "SELECT {PLAN_COLUMNS} FROM plans WHERE plan_id = $1",
        ))
        .bind(plan_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get plan: {}", e)))?;

        timer.observe_duration();

        Ok(plan)
    }

    /// List active plans.
    #[instrument(skip(self))]
    pub async fn list_plans(&self) -> Result<Vec<SubscriptionPlan>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_plans"])
            .start_timer();

        let plans = sqlx::query_as::<_, SubscriptionPlan>(&format!(
            "SELECT {PLAN_COLUMNS} FROM plans WHERE is_active = TRUE ORDER BY monthly_price",
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to list plans: {}", e)))?;

        timer.observe_duration();

        Ok(plans)
    }

    // =========================================================================
    // Customer Operations
    // =========================================================================

    /// Create a customer. Snapshots the plan's processing limit and computes
    /// the trial end date from the plan's trial window.
    #[instrument(skip(self, input), fields(email = %input.email))]
    pub async fn create_customer(&self, input: &CreateCustomer) -> Result<Customer, AppError> {
        let plan = self
            .get_plan(input.plan_id)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Plan {} not found", input.plan_id)))?;

        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_customer"])
            .start_timer();

        let customer_id = Uuid::new_v4();
        let today = Utc::now().date_naive();
        let trial_end = match input.subscription_status {
            SubscriptionStatus::Trial => {
                Some(today + chrono::Duration::days(plan.trial_days as i64))
            }
            _ => None,
        };

        let customer = sqlx::query_as::<_, Customer>(&format!(
            r#"
            INSERT INTO customers (customer_id, customer_name, email, phone, company, api_key, webhook_secret, plan_id, subscription_status, subscription_start_date, trial_end_date, usage_limit, drive_folder_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            RETURNING {CUSTOMER_COLUMNS}
            "#,
        ))
        .bind(customer_id)
        .bind(&input.customer_name)
        .bind(&input.email)
        .bind(&input.phone)
        .bind(&input.company)
        .bind(generate_secret(32))
        .bind(generate_secret(16))
        .bind(input.plan_id)
        .bind(input.subscription_status.as_str())
        .bind(today)
        .bind(trial_end)
        .bind(plan.processing_limit)
        .bind(&input.drive_folder_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                AppError::Conflict(anyhow::anyhow!(
                    "Customer with email '{}' already exists",
                    input.email
                ))
            }
            _ => AppError::DatabaseError(anyhow::anyhow!("Failed to create customer: {}", e)),
        })?;

        timer.observe_duration();
        info!(customer_id = %customer.customer_id, plan_id = %plan.plan_id, "Customer created");

        Ok(customer)
    }

    /// Get a customer by ID.
    #[instrument(skip(self), fields(customer_id = %customer_id))]
    pub async fn get_customer(&self, customer_id: Uuid) -> Result<Option<Customer>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_customer"])
            .start_timer();

        let customer = sqlx::query_as::<_, Customer>(&format!(
            "SELECT {CUSTOMER_COLUMNS} FROM customers WHERE customer_id = $1",
        ))
        .bind(customer_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get customer: {}", e)))?;

        timer.observe_duration();

        Ok(customer)
    }

    /// Get a customer by API key.
    #[instrument(skip(self, api_key))]
    pub async fn get_customer_by_api_key(
        &self,
        api_key: &str,
    ) -> Result<Option<Customer>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_customer_by_api_key"])
            .start_timer();

        let customer = sqlx::query_as::<_, Customer>(&format!(
            "SELECT {CUSTOMER_COLUMNS} FROM customers WHERE api_key = $1",
        ))
        .bind(api_key)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to get customer by api key: {}", e))
        })?;

        timer.observe_duration();

        Ok(customer)
    }

    /// Get a customer by intake folder ID.
    #[instrument(skip(self), fields(folder_id = %folder_id))]
    pub async fn get_customer_by_folder(
        &self,
        folder_id: &str,
    ) -> Result<Option<Customer>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_customer_by_folder"])
            .start_timer();

        let customer = sqlx::query_as::<_, Customer>(&format!(
            "SELECT {CUSTOMER_COLUMNS} FROM customers WHERE drive_folder_id = $1",
        ))
        .bind(folder_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to get customer by folder: {}", e))
        })?;

        timer.observe_duration();

        Ok(customer)
    }

    /// Update a customer's profile fields. Unset fields are left unchanged.
    #[instrument(skip(self, input), fields(customer_id = %customer_id))]
    pub async fn update_customer_profile(
        &self,
        customer_id: Uuid,
        input: &UpdateCustomerProfile,
    ) -> Result<Option<Customer>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["update_customer_profile"])
            .start_timer();

        let customer = sqlx::query_as::<_, Customer>(&format!(
            r#"
            UPDATE customers
            SET customer_name = COALESCE($2, customer_name),
                phone = COALESCE($3, phone),
                company = COALESCE($4, company),
                updated_utc = now()
            WHERE customer_id = $1
            RETURNING {CUSTOMER_COLUMNS}
            "#,
        ))
        .bind(customer_id)
        .bind(&input.customer_name)
        .bind(&input.phone)
        .bind(&input.company)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to update customer: {}", e)))?;

        timer.observe_duration();

        Ok(customer)
    }

    /// Change a customer's subscription status.
    #[instrument(skip(self), fields(customer_id = %customer_id, status = %status.as_str()))]
    pub async fn update_customer_status(
        &self,
        customer_id: Uuid,
        status: SubscriptionStatus,
    ) -> Result<Option<Customer>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["update_customer_status"])
            .start_timer();

        let customer = sqlx::query_as::<_, Customer>(&format!(
            r#"
            UPDATE customers
            SET subscription_status = $2, updated_utc = now()
            WHERE customer_id = $1
            RETURNING {CUSTOMER_COLUMNS}
            "#,
        ))
        .bind(customer_id)
        .bind(status.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to update customer status: {}", e))
        })?;

        timer.observe_duration();

        Ok(customer)
    }

    /// Atomically bump the customer's usage counters after a successful job.
    /// The increment happens in a single statement so concurrent completions
    /// never read-modify-write a stale count.
    #[instrument(skip(self, exec), fields(customer_id = %customer_id))]
    pub async fn increment_customer_usage<'e>(
        &self,
        exec: impl sqlx::PgExecutor<'e>,
        customer_id: Uuid,
    ) -> Result<Option<Customer>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["increment_customer_usage"])
            .start_timer();

        let customer = sqlx::query_as::<_, Customer>(&format!(
            r#"
            UPDATE customers
            SET current_usage = current_usage + 1,
                total_processed = total_processed + 1,
                last_activity = now(),
                updated_utc = now()
            WHERE customer_id = $1
            RETURNING {CUSTOMER_COLUMNS}
            "#,
        ))
        .bind(customer_id)
        .fetch_optional(exec)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to increment usage: {}", e))
        })?;

        timer.observe_duration();

        Ok(customer)
    }

    /// Record customer activity without touching usage counters.
    #[instrument(skip(self), fields(customer_id = %customer_id))]
    pub async fn touch_last_activity(&self, customer_id: Uuid) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["touch_last_activity"])
            .start_timer();

        sqlx::query("UPDATE customers SET last_activity = now() WHERE customer_id = $1")
            .bind(customer_id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to touch last activity: {}", e))
            })?;

        timer.observe_duration();
        Ok(())
    }

    /// Zero a customer's usage counter for a new billing period. The
    /// last_reset_period guard makes repeated resets for the same month
    /// no-ops, so a rerun of the reset sweep cannot wipe fresh usage.
    #[instrument(skip(self), fields(customer_id = %customer_id, month = %month))]
    pub async fn reset_customer_usage(
        &self,
        customer_id: Uuid,
        month: NaiveDate,
    ) -> Result<bool, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["reset_customer_usage"])
            .start_timer();

        let result = sqlx::query(
            r#"
            UPDATE customers
            SET current_usage = 0, last_reset_period = $2, updated_utc = now()
            WHERE customer_id = $1
              AND (last_reset_period IS NULL OR last_reset_period < $2)
            "#,
        )
        .bind(customer_id)
        .bind(month)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to reset usage: {}", e)))?;

        timer.observe_duration();

        Ok(result.rows_affected() > 0)
    }

    /// Reset usage for every customer not yet reset for the given month.
    /// Returns the number of customers reset.
    #[instrument(skip(self), fields(month = %month))]
    pub async fn reset_all_usage(&self, month: NaiveDate) -> Result<u64, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["reset_all_usage"])
            .start_timer();

        let result = sqlx::query(
            r#"
            UPDATE customers
            SET current_usage = 0, last_reset_period = $1, updated_utc = now()
            WHERE last_reset_period IS NULL OR last_reset_period < $1
            "#,
        )
        .bind(month)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to reset all usage: {}", e)))?;

        timer.observe_duration();
        info!(count = result.rows_affected(), "Usage counters reset");

        Ok(result.rows_affected())
    }

    // =========================================================================
    // Job Operations
    // =========================================================================

    /// Create a processing job in Queued state.
    #[instrument(skip(self, input), fields(customer_id = %input.customer_id, file_name = %input.file_name))]
    pub async fn create_job(&self, input: &CreateJob) -> Result<ProcessingJob, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_job"])
            .start_timer();

        let job_id = Uuid::new_v4();
        let job = sqlx::query_as::<_, ProcessingJob>(&format!(
            r#"
            INSERT INTO jobs (job_id, customer_id, file_name, file_id, file_url, file_size, file_type, status)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING {JOB_COLUMNS}
            "#,
        ))
        .bind(job_id)
        .bind(input.customer_id)
        .bind(&input.file_name)
        .bind(&input.file_id)
        .bind(&input.file_url)
        .bind(input.file_size)
        .bind(&input.file_type)
        .bind(JobStatus::Queued.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to create job: {}", e)))?;

        timer.observe_duration();
        info!(job_id = %job.job_id, "Job created");

        Ok(job)
    }

    /// Get a job by ID.
    #[instrument(skip(self), fields(job_id = %job_id))]
    pub async fn get_job(&self, job_id: Uuid) -> Result<Option<ProcessingJob>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_job"])
            .start_timer();

        let job = sqlx::query_as::<_, ProcessingJob>(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE job_id = $1",
        ))
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get job: {}", e)))?;

        timer.observe_duration();

        Ok(job)
    }

    /// List a customer's jobs, newest first, optionally filtered by status.
    #[instrument(skip(self), fields(customer_id = %customer_id))]
    pub async fn list_jobs(
        &self,
        customer_id: Uuid,
        status: Option<JobStatus>,
        limit: i64,
    ) -> Result<Vec<ProcessingJob>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_jobs"])
            .start_timer();

        let limit = limit.clamp(1, 100);

        let jobs = if let Some(status) = status {
            sqlx::query_as::<_, ProcessingJob>(&format!(
                r#"
                SELECT {JOB_COLUMNS} FROM jobs
                WHERE customer_id = $1 AND status = $2
                ORDER BY created_utc DESC
                LIMIT $3
                "#,
            ))
            .bind(customer_id)
            .bind(status.as_str())
            .bind(limit)
            .fetch_all(&self.pool)
            .await
        } else {
            sqlx::query_as::<_, ProcessingJob>(&format!(
                r#"
                SELECT {JOB_COLUMNS} FROM jobs
                WHERE customer_id = $1
                ORDER BY created_utc DESC
                LIMIT $2
                "#,
            ))
            .bind(customer_id)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
        }
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to list jobs: {}", e)))?;

        timer.observe_duration();

        Ok(jobs)
    }

    /// Move a job from Queued to Processing. Compare-and-set on the current
    /// status, so only one caller wins when two workers race for the job.
    #[instrument(skip(self), fields(job_id = %job_id))]
    pub async fn start_job(&self, job_id: Uuid) -> Result<Option<ProcessingJob>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["start_job"])
            .start_timer();

        let job = sqlx::query_as::<_, ProcessingJob>(&format!(
            r#"
            UPDATE jobs
            SET status = $2, started_at = COALESCE(started_at, now()), updated_utc = now()
            WHERE job_id = $1 AND status = $3
            RETURNING {JOB_COLUMNS}
            "#,
        ))
        .bind(job_id)
        .bind(JobStatus::Processing.as_str())
        .bind(JobStatus::Queued.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to start job: {}", e)))?;

        timer.observe_duration();

        Ok(job)
    }

    /// Complete a job, attaching the extracted invoice payload and stamping
    /// completed_at and the wall-clock processing time. Only succeeds when
    /// the job is still Processing with a start timestamp.
    #[instrument(skip(self, exec, payload, raw), fields(job_id = %job_id))]
    pub async fn complete_job<'e>(
        &self,
        exec: impl sqlx::PgExecutor<'e>,
        job_id: Uuid,
        payload: &ExtractedInvoice,
        raw: &serde_json::Value,
        confidence: Option<f64>,
    ) -> Result<Option<ProcessingJob>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["complete_job"])
            .start_timer();

        let line_items = serde_json::Value::Array(payload.line_items.clone());
        let line_items_count = payload.line_items.len() as i32;

        let job = sqlx::query_as::<_, ProcessingJob>(&format!(
            r#"
            UPDATE jobs
            SET status = $2,
                completed_at = now(),
                processing_time = EXTRACT(EPOCH FROM (now() - started_at))::BIGINT,
                vendor_name = $3,
                vendor_address = $4,
                vendor_tax_id = $5,
                invoice_number = $6,
                invoice_date = $7,
                due_date = $8,
                total_amount = $9,
                tax_amount = $10,
                subtotal_amount = $11,
                currency_code = $12,
                payment_terms = $13,
                po_number = $14,
                line_items = $15,
                line_items_count = $16,
                confidence_score = $17,
                extracted_data = $18,
                error_message = NULL,
                updated_utc = now()
            WHERE job_id = $1 AND status = $19 AND started_at IS NOT NULL
            RETURNING {JOB_COLUMNS}
            "#,
        ))
        .bind(job_id)
        .bind(JobStatus::Completed.as_str())
        .bind(&payload.vendor.name)
        .bind(&payload.vendor.address)
        .bind(&payload.vendor.tax_id)
        .bind(&payload.invoice.number)
        .bind(payload.invoice.date)
        .bind(payload.invoice.due_date)
        .bind(payload.amounts.total)
        .bind(payload.amounts.tax)
        .bind(payload.amounts.subtotal)
        .bind(&payload.amounts.currency)
        .bind(&payload.terms.payment_terms)
        .bind(&payload.terms.po_number)
        .bind(line_items)
        .bind(line_items_count)
        .bind(confidence)
        .bind(raw)
        .bind(JobStatus::Processing.as_str())
        .fetch_optional(exec)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to complete job: {}", e)))?;

        timer.observe_duration();

        Ok(job)
    }

    /// Fail a job with an error message. Same compare-and-set discipline as
    /// completion.
    #[instrument(skip(self, error_message), fields(job_id = %job_id))]
    pub async fn fail_job(
        &self,
        job_id: Uuid,
        error_message: &str,
    ) -> Result<Option<ProcessingJob>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["fail_job"])
            .start_timer();

        let job = sqlx::query_as::<_, ProcessingJob>(&format!(
            r#"
            UPDATE jobs
            SET status = $2,
                completed_at = now(),
                processing_time = EXTRACT(EPOCH FROM (now() - started_at))::BIGINT,
                error_message = $3,
                updated_utc = now()
            WHERE job_id = $1 AND status = $4 AND started_at IS NOT NULL
            RETURNING {JOB_COLUMNS}
            "#,
        ))
        .bind(job_id)
        .bind(JobStatus::Failed.as_str())
        .bind(error_message)
        .bind(JobStatus::Processing.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to fail job: {}", e)))?;

        timer.observe_duration();

        Ok(job)
    }

    /// Requeue a failed job for another attempt. Bounded by the retry limit
    /// inside the statement, so concurrent retries cannot exceed it.
    #[instrument(skip(self), fields(job_id = %job_id))]
    pub async fn retry_job(&self, job_id: Uuid) -> Result<Option<ProcessingJob>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["retry_job"])
            .start_timer();

        let job = sqlx::query_as::<_, ProcessingJob>(&format!(
            r#"
            UPDATE jobs
            SET status = $2,
                retry_count = retry_count + 1,
                error_message = NULL,
                started_at = NULL,
                completed_at = NULL,
                processing_time = NULL,
                updated_utc = now()
            WHERE job_id = $1 AND status = $3 AND retry_count < $4
            RETURNING {JOB_COLUMNS}
            "#,
        ))
        .bind(job_id)
        .bind(JobStatus::Queued.as_str())
        .bind(JobStatus::Failed.as_str())
        .bind(MAX_RETRIES)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to retry job: {}", e)))?;

        timer.observe_duration();

        Ok(job)
    }

    // =========================================================================
    // Usage Period Operations
    // =========================================================================

    /// Get or create the usage period row for a customer and month. The
    /// unique (customer_id, month) constraint makes concurrent first-writers
    /// converge on one row.
    #[instrument(skip(self, exec), fields(customer_id = %customer_id, month = %month))]
    pub async fn get_or_create_period<'e>(
        &self,
        exec: impl sqlx::PgExecutor<'e>,
        customer_id: Uuid,
        month: NaiveDate,
        plan_limit: i32,
    ) -> Result<UsagePeriod, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_or_create_period"])
            .start_timer();

        let period = sqlx::query_as::<_, UsagePeriod>(&format!(
            r#"
            INSERT INTO usage_periods (period_id, customer_id, month, plan_limit)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (customer_id, month) DO UPDATE SET last_updated = now()
            RETURNING {PERIOD_COLUMNS}
            "#,
        ))
        .bind(Uuid::new_v4())
        .bind(customer_id)
        .bind(month)
        .bind(plan_limit)
        .fetch_one(exec)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to get or create period: {}", e))
        })?;

        timer.observe_duration();

        Ok(period)
    }

    /// Get a usage period by customer and month.
    #[instrument(skip(self), fields(customer_id = %customer_id, month = %month))]
    pub async fn get_period(
        &self,
        customer_id: Uuid,
        month: NaiveDate,
    ) -> Result<Option<UsagePeriod>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_period"])
            .start_timer();

        let period = sqlx::query_as::<_, UsagePeriod>(&format!(
            "SELECT {PERIOD_COLUMNS} FROM usage_periods WHERE customer_id = $1 AND month = $2",
        ))
        .bind(customer_id)
        .bind(month)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get period: {}", e)))?;

        timer.observe_duration();

        Ok(period)
    }

    /// List a customer's usage periods, newest month first.
    #[instrument(skip(self), fields(customer_id = %customer_id))]
    pub async fn list_periods(
        &self,
        customer_id: Uuid,
        limit: i64,
    ) -> Result<Vec<UsagePeriod>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_periods"])
            .start_timer();

        let periods = sqlx::query_as::<_, UsagePeriod>(&format!(
            r#"
            SELECT {PERIOD_COLUMNS} FROM usage_periods
            WHERE customer_id = $1
            ORDER BY month DESC
            LIMIT $2
            "#,
        ))
        .bind(customer_id)
        .bind(limit.clamp(1, 100))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to list periods: {}", e)))?;

        timer.observe_duration();

        Ok(periods)
    }

    /// Record a successful job against a usage period. Invoiced periods are
    /// frozen: the update returns None and the caller logs and moves on.
    #[instrument(skip(self, exec), fields(period_id = %period_id))]
    pub async fn record_period_success<'e>(
        &self,
        exec: impl sqlx::PgExecutor<'e>,
        period_id: Uuid,
    ) -> Result<Option<UsagePeriod>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["record_period_success"])
            .start_timer();

        let period = sqlx::query_as::<_, UsagePeriod>(&format!(
            r#"
            UPDATE usage_periods
            SET processed_count = processed_count + 1,
                successful_count = successful_count + 1,
                last_updated = now()
            WHERE period_id = $1 AND invoice_generated = FALSE
            RETURNING {PERIOD_COLUMNS}
            "#,
        ))
        .bind(period_id)
        .fetch_optional(exec)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to record period success: {}", e))
        })?;

        timer.observe_duration();

        Ok(period)
    }

    /// Record a failed job against a usage period. Failures never count
    /// toward the processed total.
    #[instrument(skip(self), fields(period_id = %period_id))]
    pub async fn record_period_failure(
        &self,
        period_id: Uuid,
    ) -> Result<Option<UsagePeriod>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["record_period_failure"])
            .start_timer();

        let period = sqlx::query_as::<_, UsagePeriod>(&format!(
            r#"
            UPDATE usage_periods
            SET failed_count = failed_count + 1,
                last_updated = now()
            WHERE period_id = $1 AND invoice_generated = FALSE
            RETURNING {PERIOD_COLUMNS}
            "#,
        ))
        .bind(period_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to record period failure: {}", e))
        })?;

        timer.observe_duration();

        Ok(period)
    }

    /// Claim an alert threshold for a period. Returns true only for the one
    /// caller that appends the threshold to alerts_sent; every later caller
    /// sees it already present and gets false.
    #[instrument(skip(self), fields(period_id = %period_id, threshold = threshold))]
    pub async fn claim_alert_threshold(
        &self,
        period_id: Uuid,
        threshold: i32,
    ) -> Result<bool, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["claim_alert_threshold"])
            .start_timer();

        let result = sqlx::query(
            r#"
            UPDATE usage_periods
            SET alerts_sent = array_append(alerts_sent, $2), last_updated = now()
            WHERE period_id = $1 AND NOT ($2 = ANY(alerts_sent))
            "#,
        )
        .bind(period_id)
        .bind(threshold)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to claim alert threshold: {}", e))
        })?;

        timer.observe_duration();

        Ok(result.rows_affected() > 0)
    }

    /// Recompute overage counters and charges for a period from its current
    /// processed count.
    #[instrument(skip(self), fields(period_id = %period_id))]
    pub async fn apply_overage(
        &self,
        period_id: Uuid,
        overage_rate: Decimal,
    ) -> Result<Option<UsagePeriod>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["apply_overage"])
            .start_timer();

        let period = sqlx::query_as::<_, UsagePeriod>(&format!(
            r#"
            UPDATE usage_periods
            SET overage_count = GREATEST(processed_count - plan_limit, 0),
                overage_charges = GREATEST(processed_count - plan_limit, 0) * $2,
                total_charges = GREATEST(processed_count - plan_limit, 0) * $2,
                last_updated = now()
            WHERE period_id = $1 AND invoice_generated = FALSE
            RETURNING {PERIOD_COLUMNS}
            "#,
        ))
        .bind(period_id)
        .bind(overage_rate)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to apply overage: {}", e)))?;

        timer.observe_duration();

        Ok(period)
    }

    /// Mark a period invoiced, freezing its counters. Returns None when the
    /// period was already invoiced.
    #[instrument(skip(self), fields(period_id = %period_id, invoice_id = %invoice_id))]
    pub async fn mark_period_invoiced(
        &self,
        period_id: Uuid,
        invoice_id: &str,
        invoice_date: NaiveDate,
        due_date: NaiveDate,
        total_charges: Decimal,
    ) -> Result<Option<UsagePeriod>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["mark_period_invoiced"])
            .start_timer();

        let period = sqlx::query_as::<_, UsagePeriod>(&format!(
            r#"
            UPDATE usage_periods
            SET invoice_generated = TRUE,
                invoice_id = $2,
                invoice_date = $3,
                due_date = $4,
                total_charges = $5,
                billing_status = 'billed',
                last_updated = now()
            WHERE period_id = $1 AND invoice_generated = FALSE
            RETURNING {PERIOD_COLUMNS}
            "#,
        ))
        .bind(period_id)
        .bind(invoice_id)
        .bind(invoice_date)
        .bind(due_date)
        .bind(total_charges)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to mark period invoiced: {}", e))
        })?;

        timer.observe_duration();

        if period.is_none() {
            warn!(period_id = %period_id, "Period already invoiced, skipping");
        }

        Ok(period)
    }
}
