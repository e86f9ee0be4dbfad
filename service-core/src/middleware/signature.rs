use crate::error::AppError;
use crate::utils::signature::verify_signature;
use async_trait::async_trait;
use axum::{
    body::Body,
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use http_body_util::BodyExt;

pub const CLIENT_ID_HEADER: &str = "x-client-id";
pub const TIMESTAMP_HEADER: &str = "x-timestamp";
pub const SIGNATURE_HEADER: &str = "x-signature";

/// Maximum allowed clock skew between caller and service, in seconds.
const TIMESTAMP_WINDOW_SECS: i64 = 60;

/// Resolves signing secrets for inbound signed requests.
#[async_trait]
pub trait SignatureStore: Send + Sync {
    async fn get_signing_secret(&self, client_id: &str) -> Result<Option<String>, AppError>;
}

/// Require a valid HMAC-SHA256 request signature.
///
/// The caller supplies `X-Client-Id`, `X-Timestamp` (unix seconds) and
/// `X-Signature` over `method|path|timestamp|sha256(body)`. Stale timestamps
/// are rejected, so a captured request cannot be replayed outside the window.
pub async fn signature_validation_middleware<S>(
    State(state): State<S>,
    req: Request,
    next: Next,
) -> Result<Response, AppError>
where
    S: SignatureStore + Clone + Send + Sync + 'static,
{
    let (client_id, timestamp_str, signature) = extract_auth_headers(req.headers())?;

    let timestamp: i64 = timestamp_str
        .parse()
        .map_err(|_| AppError::AuthError(anyhow::anyhow!("Invalid timestamp format")))?;

    let now = chrono::Utc::now().timestamp();
    if (now - timestamp).abs() > TIMESTAMP_WINDOW_SECS {
        return Err(AppError::AuthError(anyhow::anyhow!(
            "Request timestamp expired"
        )));
    }

    let secret = state.get_signing_secret(&client_id).await?;
    let secret = secret.ok_or_else(|| AppError::AuthError(anyhow::anyhow!("Invalid client id")))?;

    let (parts, body) = req.into_parts();
    let bytes = body
        .collect()
        .await
        .map_err(|e| AppError::InternalError(anyhow::anyhow!("Failed to read body: {}", e)))?
        .to_bytes();

    let body_str = std::str::from_utf8(&bytes).unwrap_or("");
    let method = parts.method.as_str();
    let path = parts.uri.path();

    let is_valid = verify_signature(&secret, method, path, timestamp, body_str, &signature)
        .map_err(AppError::InternalError)?;

    if !is_valid {
        tracing::warn!(client_id = %client_id, path = %path, "Rejected request with bad signature");
        return Err(AppError::AuthError(anyhow::anyhow!("Invalid signature")));
    }

    let req = Request::from_parts(parts, Body::from(bytes));
    Ok(next.run(req).await)
}

fn extract_auth_headers(headers: &HeaderMap) -> Result<(String, String, String), AppError> {
    let get = |name: &str| -> Result<String, AppError> {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string())
            .ok_or_else(|| AppError::AuthError(anyhow::anyhow!("Missing {} header", name)))
    };

    Ok((
        get(CLIENT_ID_HEADER)?,
        get(TIMESTAMP_HEADER)?,
        get(SIGNATURE_HEADER)?,
    ))
}
