//! Request authentication. Customers authenticate with an opaque API key;
//! operations endpoints use a static admin token.

use crate::models::Customer;
use crate::AppState;
use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use service_core::error::AppError;
use uuid::Uuid;

pub const API_KEY_HEADER: &str = "x-api-key";
pub const ADMIN_TOKEN_HEADER: &str = "x-admin-token";

/// The customer behind an authenticated API request.
#[derive(Debug, Clone)]
pub struct ApiIdentity {
    pub customer: Customer,
}

impl ApiIdentity {
    /// Ownership predicate applied before every record read or write. A
    /// record belonging to another customer looks like a 403, never leaks
    /// its contents.
    pub fn owns(&self, customer_id: Uuid) -> Result<(), AppError> {
        if self.customer.customer_id == customer_id {
            Ok(())
        } else {
            Err(AppError::Forbidden(anyhow::anyhow!(
                "Record belongs to another customer"
            )))
        }
    }
}

#[async_trait]
impl FromRequestParts<AppState> for ApiIdentity {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let api_key = parts
            .headers
            .get(API_KEY_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| AppError::AuthError(anyhow::anyhow!("Missing X-API-Key header")))?;

        let customer = state
            .db
            .get_customer_by_api_key(api_key)
            .await?
            .ok_or_else(|| AppError::Unauthorized(anyhow::anyhow!("Invalid API key")))?;

        tracing::Span::current().record(
            "customer_id",
            tracing::field::display(customer.customer_id),
        );

        Ok(ApiIdentity { customer })
    }
}

/// Marker extractor for operations endpoints.
#[derive(Debug, Clone)]
pub struct AdminAuth;

#[async_trait]
impl FromRequestParts<AppState> for AdminAuth {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(ADMIN_TOKEN_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| AppError::AuthError(anyhow::anyhow!("Missing X-Admin-Token header")))?;

        if token != state.config.admin.admin_token {
            return Err(AppError::Unauthorized(anyhow::anyhow!("Invalid admin token")));
        }

        Ok(AdminAuth)
    }
}
