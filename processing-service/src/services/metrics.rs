//! Metrics module for processing-service.
//! Provides Prometheus metrics for job lifecycle and quota-ledger operations.

use once_cell::sync::Lazy;
use prometheus::{
    histogram_opts, opts, register_histogram_vec, register_int_counter_vec, Encoder, HistogramVec,
    IntCounterVec, TextEncoder,
};
use std::sync::OnceLock;

/// Database query duration histogram
pub static DB_QUERY_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        histogram_opts!(
            "processing_db_query_duration_seconds",
            "Database query duration"
        ),
        &["operation"]
    )
    .expect("Failed to register DB_QUERY_DURATION")
});

/// Jobs created counter
pub static JOBS_CREATED_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Job status transition counter
pub static JOB_TRANSITIONS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Quota denial counter
pub static QUOTA_DENIALS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Usage alert counter by threshold
pub static USAGE_ALERTS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Notification delivery counter by kind and result
pub static NOTIFICATIONS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Error counter for alerting
pub static ERRORS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Initialize all metrics. Call once at startup.
pub fn init_metrics() {
    JOBS_CREATED_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!(
                "processing_jobs_created_total",
                "Total processing jobs created by source"
            ),
            &["source"]
        )
        .expect("Failed to register JOBS_CREATED_TOTAL")
    });

    JOB_TRANSITIONS_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!(
                "processing_job_transitions_total",
                "Job status transitions by edge"
            ),
            &["from", "to"]
        )
        .expect("Failed to register JOB_TRANSITIONS_TOTAL")
    });

    QUOTA_DENIALS_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!(
                "processing_quota_denials_total",
                "Job submissions rejected by the quota ledger"
            ),
            &["reason"]
        )
        .expect("Failed to register QUOTA_DENIALS_TOTAL")
    });

    USAGE_ALERTS_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!(
                "processing_usage_alerts_total",
                "Usage threshold alerts fired"
            ),
            &["threshold"]
        )
        .expect("Failed to register USAGE_ALERTS_TOTAL")
    });

    NOTIFICATIONS_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!(
                "processing_notifications_total",
                "Notification side effects by kind and result"
            ),
            &["kind", "result"]
        )
        .expect("Failed to register NOTIFICATIONS_TOTAL")
    });

    ERRORS_TOTAL.get_or_init(|| {
        register_int_counter_vec!(
            opts!("processing_errors_total", "Errors by operation"),
            &["operation"]
        )
        .expect("Failed to register ERRORS_TOTAL")
    });
}

pub fn record_job_created(source: &str) {
    if let Some(counter) = JOBS_CREATED_TOTAL.get() {
        counter.with_label_values(&[source]).inc();
    }
}

pub fn record_job_transition(from: &str, to: &str) {
    if let Some(counter) = JOB_TRANSITIONS_TOTAL.get() {
        counter.with_label_values(&[from, to]).inc();
    }
}

pub fn record_quota_denial(reason: &str) {
    if let Some(counter) = QUOTA_DENIALS_TOTAL.get() {
        counter.with_label_values(&[reason]).inc();
    }
}

pub fn record_usage_alert(threshold: i32) {
    if let Some(counter) = USAGE_ALERTS_TOTAL.get() {
        counter.with_label_values(&[&threshold.to_string()]).inc();
    }
}

pub fn record_notification(kind: &str, result: &str) {
    if let Some(counter) = NOTIFICATIONS_TOTAL.get() {
        counter.with_label_values(&[kind, result]).inc();
    }
}

pub fn record_error(operation: &str) {
    if let Some(counter) = ERRORS_TOTAL.get() {
        counter.with_label_values(&[operation]).inc();
    }
}

/// Encode the current metrics registry in Prometheus text format.
pub fn get_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if encoder.encode(&metric_families, &mut buffer).is_err() {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
