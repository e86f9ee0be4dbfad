//! Multi-tenant invoice-processing backend: quota ledger, job lifecycle
//! tracking, and the webhook surface for the external workflow engine.

pub mod config;
pub mod handlers;
pub mod models;
pub mod services;
pub mod startup;

use crate::config::ProcessingConfig;
use crate::services::database::Database;
use crate::services::lifecycle::JobLifecycle;
use crate::services::notify::Notifier;
use crate::services::quota::QuotaLedger;
use axum::async_trait;
use service_core::error::AppError;
use service_core::middleware::signature::SignatureStore;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: ProcessingConfig,
    pub db: Database,
    pub quota: QuotaLedger,
    pub lifecycle: JobLifecycle,
    pub notifier: Notifier,
}

#[async_trait]
impl SignatureStore for AppState {
    /// The only signing client is the configured workflow engine.
    async fn get_signing_secret(&self, client_id: &str) -> Result<Option<String>, AppError> {
        if client_id == self.config.workflow.client_id {
            Ok(Some(self.config.workflow.signing_secret.clone()))
        } else {
            Ok(None)
        }
    }
}
