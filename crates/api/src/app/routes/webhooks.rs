use std::sync::Arc;

use axum::{
    Json,
    body::Bytes,
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};

use tripvault_core::VaultError;

use crate::app::errors::{json_error, vault_error_to_response};
use crate::app::services::AppServices;

pub const SIGNATURE_HEADER: &str = "x-processor-signature";

/// Processor webhook endpoint. Unauthenticated; the signature is the
/// credential.
///
/// Anything that fails after verification answers 500 so the processor
/// redelivers.
pub async fn receive(
    Extension(services): Extension<Arc<AppServices>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let Some(signature) = headers.get(SIGNATURE_HEADER).and_then(|v| v.to_str().ok()) else {
        tracing::warn!("webhook without signature header");
        return json_error(
            StatusCode::BAD_REQUEST,
            "webhook_verification_error",
            "missing signature header",
            false,
        );
    };

    match services.vault.handle_webhook(&body, signature).await {
        Ok(outcome) => (StatusCode::OK, Json(outcome)).into_response(),
        Err(err @ VaultError::WebhookVerification(_)) => vault_error_to_response(&err),
        Err(err) => json_error(StatusCode::INTERNAL_SERVER_ERROR, err.code(), err.to_string(), true),
    }
}
