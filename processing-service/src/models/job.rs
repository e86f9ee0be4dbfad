//! Processing job model and status state machine.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Processing job status.
///
/// Valid edges: Queued→Processing, Processing→Completed, Processing→Failed,
/// Failed→Retry, Retry→Queued. Completed is terminal; Failed is terminal
/// except for the bounded retry path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Failed,
    Retry,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Retry => "retry",
        }
    }

    pub fn from_string(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(JobStatus::Queued),
            "processing" => Some(JobStatus::Processing),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            "retry" => Some(JobStatus::Retry),
            _ => None,
        }
    }

    /// Whether `self -> to` is a legal edge of the job state machine.
    pub fn can_transition(&self, to: JobStatus) -> bool {
        matches!(
            (self, to),
            (JobStatus::Queued, JobStatus::Processing)
                | (JobStatus::Processing, JobStatus::Completed)
                | (JobStatus::Processing, JobStatus::Failed)
                | (JobStatus::Failed, JobStatus::Retry)
                | (JobStatus::Retry, JobStatus::Queued)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

/// Maximum number of caller-invoked retries per job.
pub const MAX_RETRIES: i32 = 3;

/// Processing job.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ProcessingJob {
    pub job_id: Uuid,
    pub customer_id: Uuid,
    pub file_name: String,
    pub file_id: Option<String>,
    pub file_url: Option<String>,
    pub file_size: i64,
    pub file_type: String,
    pub status: String,
    pub retry_count: i32,
    pub error_message: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Seconds between started_at and completed_at.
    pub processing_time: Option<i64>,
    pub vendor_name: Option<String>,
    pub vendor_address: Option<String>,
    pub vendor_tax_id: Option<String>,
    pub invoice_number: Option<String>,
    pub invoice_date: Option<NaiveDate>,
    pub due_date: Option<NaiveDate>,
    pub total_amount: Option<Decimal>,
    pub tax_amount: Option<Decimal>,
    pub subtotal_amount: Option<Decimal>,
    pub currency_code: Option<String>,
    pub payment_terms: Option<String>,
    pub po_number: Option<String>,
    pub line_items: Option<serde_json::Value>,
    pub line_items_count: i32,
    pub confidence_score: Option<f64>,
    pub extracted_data: Option<serde_json::Value>,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl ProcessingJob {
    pub fn status(&self) -> JobStatus {
        JobStatus::from_string(&self.status).unwrap_or(JobStatus::Queued)
    }
}

/// Input for creating a job.
#[derive(Debug, Clone)]
pub struct CreateJob {
    pub customer_id: Uuid,
    pub file_name: String,
    pub file_id: Option<String>,
    pub file_url: Option<String>,
    pub file_size: i64,
    pub file_type: String,
}

/// Structured invoice payload the workflow engine delivers on completion.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractedInvoice {
    #[serde(default)]
    pub vendor: VendorInfo,
    #[serde(default)]
    pub invoice: InvoiceInfo,
    #[serde(default)]
    pub amounts: AmountsInfo,
    #[serde(default)]
    pub terms: TermsInfo,
    #[serde(default)]
    pub line_items: Vec<serde_json::Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VendorInfo {
    pub name: Option<String>,
    pub address: Option<String>,
    pub tax_id: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InvoiceInfo {
    pub number: Option<String>,
    pub date: Option<NaiveDate>,
    pub due_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AmountsInfo {
    pub total: Option<Decimal>,
    pub tax: Option<Decimal>,
    pub subtotal: Option<Decimal>,
    pub currency: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TermsInfo {
    pub payment_terms: Option<String>,
    pub po_number: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_only_valid_edges() {
        use JobStatus::*;

        let valid = [
            (Queued, Processing),
            (Processing, Completed),
            (Processing, Failed),
            (Failed, Retry),
            (Retry, Queued),
        ];
        for (from, to) in valid {
            assert!(from.can_transition(to), "{:?} -> {:?} should be valid", from, to);
        }

        let all = [Queued, Processing, Completed, Failed, Retry];
        for from in all {
            for to in all {
                let expected = valid.contains(&(from, to));
                assert_eq!(
                    from.can_transition(to),
                    expected,
                    "{:?} -> {:?}",
                    from,
                    to
                );
            }
        }
    }

    #[test]
    fn completed_is_terminal() {
        assert!(JobStatus::Completed.is_terminal());
        let all = [
            JobStatus::Queued,
            JobStatus::Processing,
            JobStatus::Completed,
            JobStatus::Failed,
            JobStatus::Retry,
        ];
        for to in all {
            assert!(!JobStatus::Completed.can_transition(to));
        }
    }

    #[test]
    fn status_string_roundtrip() {
        for status in [
            JobStatus::Queued,
            JobStatus::Processing,
            JobStatus::Completed,
            JobStatus::Failed,
            JobStatus::Retry,
        ] {
            assert_eq!(JobStatus::from_string(status.as_str()), Some(status));
        }
        assert_eq!(JobStatus::from_string("bogus"), None);
    }

    #[test]
    fn extracted_payload_tolerates_missing_sections() {
        let payload: ExtractedInvoice = serde_json::from_str(r#"{"vendor":{"name":"Acme"}}"#).unwrap();
        assert_eq!(payload.vendor.name.as_deref(), Some("Acme"));
        assert!(payload.invoice.number.is_none());
        assert!(payload.line_items.is_empty());
    }
}
