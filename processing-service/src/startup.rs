//! Application startup and lifecycle management.

use crate::config::ProcessingConfig;
use crate::handlers::{admin, customers, jobs, usage, webhooks};
use crate::services::database::Database;
use crate::services::lifecycle::JobLifecycle;
use crate::services::metrics::{get_metrics, init_metrics};
use crate::services::notify::Notifier;
use crate::services::quota::QuotaLedger;
use crate::services::workflow::WorkflowClient;
use crate::AppState;
use axum::{
    extract::State,
    http::StatusCode,
    middleware,
    response::IntoResponse,
    routing::{get, patch, post},
    Json, Router,
};
use serde_json::json;
use service_core::error::AppError;
use service_core::middleware::metrics::metrics_middleware;
use service_core::middleware::signature::signature_validation_middleware;
use service_core::middleware::tracing::request_id_middleware;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

/// Health check endpoint for Docker/K8s liveness probes.
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    match state.db.health_check().await {
        Ok(_) => {
            tracing::debug!("Health check passed");
            (
                StatusCode::OK,
                Json(json!({
                    "status": "ok",
                    "service": "processing-service",
                    "version": env!("CARGO_PKG_VERSION")
                })),
            )
        }
        Err(e) => {
            tracing::warn!(error = %e, "Health check failed - database unavailable");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "status": "unhealthy",
                    "service": "processing-service",
                    "error": e.to_string()
                })),
            )
        }
    }
}

/// Readiness check endpoint for K8s readiness probes.
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    match state.db.health_check().await {
        Ok(_) => StatusCode::OK,
        Err(e) => {
            tracing::warn!(error = %e, "Readiness check failed");
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}

/// Metrics endpoint for Prometheus scraping.
async fn metrics_handler() -> impl IntoResponse {
    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        get_metrics(),
    )
}

/// Application container for managing server lifecycle.
pub struct Application {
    port: u16,
    listener: TcpListener,
    state: AppState,
}

impl Application {
    /// Build the application with the given configuration.
    pub async fn build(config: ProcessingConfig) -> Result<Self, AppError> {
        Self::build_internal(config, true).await
    }

    /// Build the application without running migrations.
    /// Use this in tests when migrations are already applied by the test harness.
    pub async fn build_without_migrations(config: ProcessingConfig) -> Result<Self, AppError> {
        Self::build_internal(config, false).await
    }

    async fn build_internal(
        config: ProcessingConfig,
        run_migrations: bool,
    ) -> Result<Self, AppError> {
        init_metrics();

        let db = Database::new(
            &config.database.url,
            config.database.max_connections,
            config.database.min_connections,
        )
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to connect to PostgreSQL");
            e
        })?;

        if run_migrations {
            db.run_migrations().await.map_err(|e| {
                tracing::error!(error = %e, "Failed to run migrations");
                e
            })?;
        }

        let notifier = Notifier::new(&config.smtp)?;
        let workflow = WorkflowClient::new(&config.workflow)?;
        let quota = QuotaLedger::new(db.clone(), notifier.clone());
        let lifecycle = JobLifecycle::new(
            db.clone(),
            quota.clone(),
            notifier.clone(),
            workflow,
        );

        let state = AppState {
            config: config.clone(),
            db,
            quota,
            lifecycle,
            notifier,
        };

        let addr = SocketAddr::from(([0, 0, 0, 0], config.common.port));
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            tracing::error!(error = %e, addr = %addr, "Failed to bind HTTP listener");
            AppError::from(e)
        })?;
        let port = listener.local_addr()?.port();

        tracing::info!(port = port, "Processing service listener bound");

        Ok(Self {
            port,
            listener,
            state,
        })
    }

    /// Get the port the server is listening on.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Get a reference to the database.
    pub fn db(&self) -> &Database {
        &self.state.db
    }

    /// Run the application until stopped.
    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        let router = build_router(self.state);
        axum::serve(self.listener, router).await
    }
}

/// Assemble the full HTTP router.
pub fn build_router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/api/customers", post(customers::signup))
        .route("/api/customers/me/dashboard", get(customers::get_dashboard))
        .route("/api/customers/me/stats", get(customers::get_stats))
        .route("/api/customers/me/profile", patch(customers::update_profile))
        .route("/api/jobs", get(jobs::list_jobs))
        .route("/api/jobs/:job_id", get(jobs::get_job))
        .route("/api/jobs/:job_id/retry", post(jobs::retry_job))
        .route("/api/usage/stats", get(usage::usage_stats))
        .route("/api/usage/history", get(usage::usage_history));

    // Signed requests only past this point
    let webhook_routes = Router::new()
        .route("/webhooks/lookup-folder", post(webhooks::lookup_folder))
        .route("/webhooks/check-quota", post(webhooks::check_quota))
        .route("/webhooks/jobs", post(webhooks::create_job))
        .route("/webhooks/jobs/:job_id/status", post(webhooks::update_job_status))
        .route("/webhooks/jobs/:job_id/result", post(webhooks::store_job_result))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            signature_validation_middleware::<AppState>,
        ));

    let admin_routes = Router::new()
        .route("/admin/periods/reset", post(admin::reset_periods))
        .route(
            "/admin/periods/:customer_id/reset",
            post(admin::reset_customer_period),
        )
        .route(
            "/admin/periods/:customer_id/recompute",
            post(admin::recompute_overage),
        )
        .route(
            "/admin/periods/:customer_id/invoice",
            post(admin::generate_invoice),
        )
        .route(
            "/admin/customers/:customer_id/status",
            post(admin::set_customer_status),
        )
        .route("/admin/plans", post(admin::create_plan).get(admin::list_plans));

    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/metrics", get(metrics_handler))
        .merge(api_routes)
        .merge(webhook_routes)
        .merge(admin_routes)
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(metrics_middleware))
        .layer(middleware::from_fn(request_id_middleware))
        .with_state(state)
}
