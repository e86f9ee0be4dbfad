//! Email notifications for quota alerts and job outcomes. All sends are
//! best effort: callers log failures and never roll back ledger writes.

use crate::config::SmtpConfig;
use crate::models::{Customer, ProcessingJob, UsagePeriod};
use lettre::{
    message::header::ContentType, transport::smtp::authentication::Credentials, Message,
    SmtpTransport, Transport,
};
use service_core::error::AppError;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Clone)]
pub struct Notifier {
    mailer: Option<SmtpTransport>,
    from: String,
}

impl Notifier {
    pub fn new(config: &SmtpConfig) -> Result<Self, AppError> {
        if !config.enabled {
            info!("SMTP disabled, notifications will be logged only");
            return Ok(Self {
                mailer: None,
                from: config.from_email.clone(),
            });
        }

        let creds = Credentials::new(config.user.clone(), config.password.clone());
        let mailer = SmtpTransport::relay(&config.host)
            .map_err(|e| AppError::InternalError(anyhow::anyhow!(e.to_string())))?
            .credentials(creds)
            .port(config.port)
            .timeout(Some(Duration::from_secs(10)))
            .build();

        info!(host = %config.host, "Email notifier initialized");

        Ok(Self {
            mailer: Some(mailer),
            from: format!("{} <{}>", config.from_name, config.from_email),
        })
    }

    async fn send_email(
        &self,
        to_email: &str,
        subject: &str,
        body: &str,
    ) -> Result<(), AppError> {
        let Some(mailer) = &self.mailer else {
            info!(to = %to_email, subject = %subject, "SMTP disabled, skipping email");
            return Ok(());
        };

        let email = Message::builder()
            .from(self
                .from
                .parse()
                .map_err(|e: lettre::address::AddressError| AppError::InternalError(e.into()))?)
            .to(to_email
                .parse()
                .map_err(|e: lettre::address::AddressError| AppError::InternalError(e.into()))?)
            .subject(subject)
            .header(ContentType::TEXT_PLAIN)
            .body(body.to_string())
            .map_err(|e| AppError::InternalError(e.into()))?;

        // Send in the blocking pool to keep the async runtime free
        let mailer = mailer.clone();
        let result = tokio::task::spawn_blocking(move || mailer.send(&email))
            .await
            .map_err(|e| AppError::InternalError(e.into()))?;

        match result {
            Ok(_) => {
                info!(to = %to_email, subject = %subject, "Email sent");
                Ok(())
            }
            Err(e) => {
                warn!(to = %to_email, error = %e, "Failed to send email");
                Err(AppError::EmailError(e.to_string()))
            }
        }
    }

    pub async fn send_welcome(&self, customer: &Customer) -> Result<(), AppError> {
        let body = format!(
            "Hi {},\n\nYour invoice processing account is ready. Your monthly quota is {} documents.\n\nKeep your API key safe; it identifies every request you make.",
            customer.customer_name, customer.usage_limit
        );
        self.send_email(&customer.email, "Welcome to invoice processing", &body)
            .await
    }

    pub async fn send_usage_alert(
        &self,
        customer: &Customer,
        threshold: i32,
    ) -> Result<(), AppError> {
        let subject = if threshold >= 100 {
            "Monthly processing quota reached".to_string()
        } else {
            format!("You have used {}% of your processing quota", threshold)
        };
        let body = format!(
            "Hi {},\n\nYou have processed {} of {} documents this month ({}% of your quota).{}",
            customer.customer_name,
            customer.current_usage,
            customer.usage_limit,
            threshold,
            if threshold >= 100 && !customer.overage_allowed {
                "\n\nFurther documents will be rejected until your quota resets or you enable overage billing."
            } else if threshold >= 100 {
                "\n\nFurther documents will be billed at your plan's overage rate."
            } else {
                ""
            }
        );
        self.send_email(&customer.email, &subject, &body).await
    }

    pub async fn send_completion(
        &self,
        customer: &Customer,
        job: &ProcessingJob,
    ) -> Result<(), AppError> {
        let body = format!(
            "Hi {},\n\nYour document '{}' was processed successfully.{}",
            customer.customer_name,
            job.file_name,
            job.invoice_number
                .as_deref()
                .map(|n| format!(" Extracted invoice number: {}.", n))
                .unwrap_or_default()
        );
        self.send_email(&customer.email, "Document processed", &body)
            .await
    }

    pub async fn send_failure(
        &self,
        customer: &Customer,
        job: &ProcessingJob,
    ) -> Result<(), AppError> {
        let body = format!(
            "Hi {},\n\nProcessing failed for '{}'.\nReason: {}\n\nThe document will be retried automatically where possible.",
            customer.customer_name,
            job.file_name,
            job.error_message.as_deref().unwrap_or("unknown error")
        );
        self.send_email(&customer.email, "Document processing failed", &body)
            .await
    }

    pub async fn send_invoice(
        &self,
        customer: &Customer,
        period: &UsagePeriod,
    ) -> Result<(), AppError> {
        let body = format!(
            "Hi {},\n\nYour usage invoice {} for {} is ready.\nDocuments processed: {}\nOverage: {} documents, {} due.\nPayment due by {}.",
            customer.customer_name,
            period.invoice_id.as_deref().unwrap_or("-"),
            period.month.format("%B %Y"),
            period.processed_count,
            period.overage_count,
            period.total_charges,
            period
                .due_date
                .map(|d| d.format("%Y-%m-%d").to_string())
                .unwrap_or_else(|| "-".to_string())
        );
        self.send_email(&customer.email, "Your monthly usage invoice", &body)
            .await
    }
}
