//! API error types.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use pasta_storage::StorageError;
use serde::Serialize;

/// API error response.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error code for programmatic handling.
    pub code: String,
    /// Human-readable error message.
    pub message: String,
}

/// API error type.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("not found")]
    NotFound,

    #[error("forbidden: {0}")]
    Forbidden(&'static str),

    #[error("invalid identifier: {0}")]
    InvalidIdentifier(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("empty")]
    EmptyPayload,

    #[error("unsupported method")]
    UnsupportedMethod,

    #[error("payload exceeds the maximum of {limit} bytes")]
    PayloadTooLarge { limit: u64 },

    #[error("internal error: {0}")]
    Internal(String),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

impl ApiError {
    /// Get the error code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::Forbidden(_) => "forbidden",
            Self::InvalidIdentifier(_) => "invalid_identifier",
            Self::BadRequest(_) => "bad_request",
            Self::EmptyPayload => "empty",
            Self::UnsupportedMethod => "unsupported_method",
            Self::PayloadTooLarge { .. } => "payload_too_large",
            Self::Internal(_) => "internal_error",
            Self::Storage(StorageError::InvalidId(_)) => "invalid_identifier",
            Self::Storage(StorageError::HeaderTooLarge { .. }) => "bad_request",
            Self::Storage(_) => "storage_error",
        }
    }

    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::InvalidIdentifier(_) => StatusCode::BAD_REQUEST,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::EmptyPayload => StatusCode::BAD_REQUEST,
            Self::UnsupportedMethod => StatusCode::BAD_REQUEST,
            Self::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Storage(e) => match e {
                StorageError::InvalidId(_) | StorageError::HeaderTooLarge { .. } => {
                    StatusCode::BAD_REQUEST
                }
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        // Server-side failures are logged here and never shown to clients.
        let message = if status.is_server_error() {
            tracing::error!(code = self.code(), error = %self, "request failed");
            "server error".to_string()
        } else {
            self.to_string()
        };

        let body = ErrorResponse {
            code: self.code().to_string(),
            message,
        };
        (status, Json(body)).into_response()
    }
}

/// Result type for API handlers.
pub type ApiResult<T> = std::result::Result<T, ApiError>;
