//! API error types and JSON error response formatting.
//!
//! Client mistakes map to 4xx, downstream trouble to 5xx. The body is always
//! `{"error": code, "message": text}`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::error;

use storyrank_core::error::StoryrankError;

/// JSON error response body.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Machine-readable error code (e.g., "bad_request").
    pub error: String,
    /// Human-readable error message.
    pub message: String,
}

#[derive(Debug)]
pub enum ApiError {
    /// 400 - missing or invalid parameters.
    BadRequest(String),
    /// 429 - rate limit exceeded.
    TooManyRequests(String),
    /// 500 - unexpected failure.
    Internal(String),
    /// 503 - a dependency is temporarily unable to serve.
    ServiceUnavailable(String),
    /// 504 - the request deadline passed.
    GatewayTimeout(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg),
            ApiError::TooManyRequests(msg) => {
                (StatusCode::TOO_MANY_REQUESTS, "too_many_requests", msg)
            }
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", msg),
            ApiError::ServiceUnavailable(msg) => {
                (StatusCode::SERVICE_UNAVAILABLE, "service_unavailable", msg)
            }
            ApiError::GatewayTimeout(msg) => (StatusCode::GATEWAY_TIMEOUT, "gateway_timeout", msg),
        };

        if status.is_server_error() {
            error!(status = status.as_u16(), error = %message, "Request failed");
        }

        let body = ErrorBody {
            error: error_code.to_string(),
            message,
        };
        (status, Json(body)).into_response()
    }
}

impl From<StoryrankError> for ApiError {
    fn from(err: StoryrankError) -> Self {
        match err {
            StoryrankError::InvalidArgument(msg) | StoryrankError::Config(msg) => {
                ApiError::BadRequest(msg)
            }
            StoryrankError::Transient(_)
            | StoryrankError::QuotaExceeded(_)
            | StoryrankError::UpstreamUnavailable(_) => ApiError::ServiceUnavailable(err.to_string()),
            StoryrankError::Timeout(_) => ApiError::GatewayTimeout(err.to_string()),
            other => ApiError::Internal(other.to_string()),
        }
    }
}
