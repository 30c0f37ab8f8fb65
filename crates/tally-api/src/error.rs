//! API error types and response bodies.
//!
//! Every error response carries `{status: "error", message, data?}`;
//! only structured validation/auth detail is ever exposed, internal
//! errors are logged and replaced with a generic message.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use tally_core::ValidationFailure;

/// Non-standard status used for "session expired, retry login", so
/// clients can tell a retryable auth lapse from a hard rejection.
const SESSION_EXPIRED: u16 = 419;

/// API error type that converts to the structured error body.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Event payload failed structural validation.
    #[error("incorrect event format")]
    Validation(Vec<ValidationFailure>),

    /// Malformed request outside the event schema (missing params).
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Authentication failed.
    #[error("{0}")]
    Forbidden(String),

    /// Session expired beyond the grace period; re-login may succeed.
    #[error("session expired, please sign in again")]
    SessionExpired,

    /// Archive or stream failure.
    #[error("pipeline error: {0}")]
    Pipeline(#[from] tally_pipeline::Error),

    /// Anything else internal.
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

/// JSON error response body.
#[derive(Debug, Clone, Serialize)]
struct ErrorBody {
    status: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<serde_json::Value>,
}

/// JSON success response body.
#[derive(Debug, Clone, Serialize)]
pub struct OkBody {
    status: &'static str,
    message: String,
}

/// Build the standard `{status:"ok", message}` response.
pub fn ok_response(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(OkBody {
            status: "ok",
            message: message.into(),
        }),
    )
        .into_response()
}

impl ApiError {
    /// Wrap a core validation error, preserving its failure detail.
    pub fn from_validation(err: tally_core::Error) -> Self {
        match err {
            tally_core::Error::InvalidPayload(failures) => ApiError::Validation(failures),
            other => ApiError::Internal(anyhow::Error::new(other)),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message, data) = match self {
            ApiError::Validation(failures) => {
                let data = serde_json::to_value(&failures).ok();
                (
                    StatusCode::BAD_REQUEST,
                    "Incorrect event format".to_string(),
                    data,
                )
            }
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, message, None),
            ApiError::Forbidden(message) => (StatusCode::FORBIDDEN, message, None),
            ApiError::SessionExpired => (
                StatusCode::from_u16(SESSION_EXPIRED).expect("valid status code"),
                "Session expired, please sign in again".to_string(),
                None,
            ),
            ApiError::Pipeline(err) => {
                tracing::error!(error = %err, "pipeline error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "An internal error occurred".to_string(),
                    None,
                )
            }
            ApiError::Internal(err) => {
                tracing::error!(error = %err, "internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "An internal error occurred".to_string(),
                    None,
                )
            }
        };

        let body = ErrorBody {
            status: "error",
            message,
            data,
        };
        (status, Json(body)).into_response()
    }
}
