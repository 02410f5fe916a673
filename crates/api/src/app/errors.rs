use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use tripvault_core::VaultError;

/// Handler error: a [`VaultError`] rendered as a JSON body.
#[derive(Debug)]
pub struct ApiError(pub VaultError);

impl From<VaultError> for ApiError {
    fn from(value: VaultError) -> Self {
        Self(value)
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

pub fn status_for(err: &VaultError) -> StatusCode {
    match err {
        VaultError::Validation(_) | VaultError::SplitMismatch(_) | VaultError::EmptyParticipantSet => {
            StatusCode::BAD_REQUEST
        }
        VaultError::Authorization(_) | VaultError::NotParticipant { .. } => StatusCode::FORBIDDEN,
        VaultError::NotFound(_) => StatusCode::NOT_FOUND,
        VaultError::AlreadySettled(_) | VaultError::SettlementInProgress { .. } | VaultError::Conflict(_) => {
            StatusCode::CONFLICT
        }
        VaultError::ExternalProcessor { .. } => StatusCode::BAD_GATEWAY,
        VaultError::WebhookVerification(_) => StatusCode::BAD_REQUEST,
        VaultError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub fn vault_error_to_response(err: &VaultError) -> Response {
    let status = status_for(err);
    if status.is_server_error() {
        tracing::error!(error = %err, code = err.code(), "request failed");
    }
    json_error(status, err.code(), err.to_string(), err.is_retryable())
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        vault_error_to_response(&self.0)
    }
}

pub fn json_error(status: StatusCode, code: &'static str, message: impl Into<String>, retryable: bool) -> Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
            "retryable": retryable,
        })),
    )
        .into_response()
}

/// Rejection for a malformed path or body id.
pub fn bad_id(what: &str, raw: &str) -> ApiError {
    ApiError(VaultError::validation(format!("invalid {what} '{raw}'")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tripvault_core::{IntentId, SplitId, TripId, UserId};

    #[test]
    fn statuses_follow_error_kind() {
        assert_eq!(status_for(&VaultError::EmptyParticipantSet), StatusCode::BAD_REQUEST);
        assert_eq!(
            status_for(&VaultError::NotParticipant {
                user_id: UserId::new(),
                trip_id: TripId::new()
            }),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            status_for(&VaultError::SettlementInProgress {
                split_id: SplitId::new(),
                intent_id: IntentId::new("pi_1")
            }),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_for(&VaultError::ExternalProcessor {
                message: "timeout".into(),
                retryable: true
            }),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(status_for(&VaultError::storage("db")), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
