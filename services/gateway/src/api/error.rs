//! HTTP error bodies.
//!
//! Every error response is `{"code", "message"}`. The pipeline's rejections
//! use fixed bodies ([`ApiError::access_denied`],
//! [`ApiError::authorization_unavailable`]) so a caller learns nothing about
//! the policy or the failure behind them; details go to the log only.
use crate::api::types::ErrorResponse;
use crate::store::StoreError;
use axum::Json;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use tollgate_authz::AuthzError;

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub body: ErrorResponse,
}

impl ApiError {
    fn new(status: StatusCode, code: &str, message: impl Into<String>) -> Self {
        Self {
            status,
            body: ErrorResponse {
                code: code.to_string(),
                message: message.into(),
                request_id: None,
            },
        }
    }

    /// 403 for a request the policy does not allow.
    pub fn access_denied() -> Self {
        Self::new(StatusCode::FORBIDDEN, "forbidden", "access denied")
    }

    /// 500 for a request the engine could not evaluate.
    pub fn authorization_unavailable() -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "internal",
            "authorization unavailable",
        )
    }

    pub fn sign_in_required() -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "unauthorized", "sign-in required")
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "not_found", message)
    }

    /// Map a user-store failure. `message` is what the caller sees for
    /// conflicts and internal failures; the store's own text is only logged.
    pub fn store(err: &StoreError, message: &str) -> Self {
        match err {
            StoreError::NotFound(_) => Self::not_found(message),
            StoreError::Conflict(reason) => {
                tracing::warn!(%reason, "user store conflict surfaced to caller");
                Self::new(StatusCode::CONFLICT, "conflict", message)
            }
            StoreError::Unexpected(_) => {
                tracing::error!(error = %err, "user store failure");
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal", message)
            }
        }
    }
}

/// Policy reload failures: rejected policy data is the operator's to fix
/// (400, reason included); an unreadable source is not (500, generic).
impl From<AuthzError> for ApiError {
    fn from(err: AuthzError) -> Self {
        if err.is_configuration() {
            return Self::new(StatusCode::BAD_REQUEST, "validation_error", err.to_string());
        }
        tracing::error!(error = %err, "policy source unavailable");
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "internal",
            "policy source unavailable",
        )
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        (self.status, Json(self.body)).into_response()
    }
}
