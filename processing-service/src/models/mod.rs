//! Domain models for processing-service.

mod customer;
mod job;
mod plan;
mod usage;

pub use customer::{CreateCustomer, Customer, SubscriptionStatus, UpdateCustomerProfile};
pub use job::{
    CreateJob, ExtractedInvoice, JobStatus, ProcessingJob, MAX_RETRIES,
};
pub use plan::{CreatePlan, SubscriptionPlan};
pub use usage::{current_month, month_of, UsagePeriod, ALERT_THRESHOLDS};
