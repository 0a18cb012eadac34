//! API error types.

use axum::Json;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use std::time::Duration;
use tulpar_storage::RepositoryError;

/// Message returned in place of the cause for server-side failures.
const OPAQUE_INTERNAL_MESSAGE: &str = "internal server error";

/// API error response.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error code for programmatic handling.
    pub code: String,
    /// Human-readable error message.
    pub message: String,
    /// Milliseconds until the client may retry, for rate-limit rejections.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_ms: Option<u64>,
}

/// API error type.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("{0}")]
    InvalidIdentifier(String),

    #[error("unknown command: {0}")]
    UnknownCommand(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("rate limit exceeded, retry after {} ms", .retry_after.as_millis())]
    RateLimited { retry_after: Duration },

    #[error("server is tracking too many clients, retry later")]
    AtCapacity { retry_after: Duration },

    #[error("too many concurrent downloads")]
    DownloadLimit,

    #[error("internal error: {0}")]
    Internal(String),

    #[error("repository error: {0}")]
    Repository(#[from] RepositoryError),
}

impl From<tulpar_core::Error> for ApiError {
    fn from(err: tulpar_core::Error) -> Self {
        match err {
            tulpar_core::Error::InvalidIdentifier { .. } => Self::InvalidIdentifier(err.to_string()),
            tulpar_core::Error::Config(msg) => Self::Internal(msg),
        }
    }
}

impl ApiError {
    /// Get the error code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::BadRequest(_) => "bad_request",
            Self::InvalidIdentifier(_) => "invalid_identifier",
            Self::UnknownCommand(_) => "unknown_command",
            Self::Unauthorized(_) => "unauthorized",
            Self::RateLimited { .. } => "rate_limit_exceeded",
            Self::AtCapacity { .. } => "server_at_capacity",
            Self::DownloadLimit => "download_limit_exceeded",
            Self::Internal(_) => "internal_error",
            Self::Repository(e) => match e {
                RepositoryError::NotFound(_) | RepositoryError::InvalidPath(_) => "not_found",
                _ => "internal_error",
            },
        }
    }

    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::BadRequest(_) | Self::InvalidIdentifier(_) | Self::UnknownCommand(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::RateLimited { .. } | Self::AtCapacity { .. } | Self::DownloadLimit => {
                StatusCode::TOO_MANY_REQUESTS
            }
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Repository(e) => match e {
                // A symlink escaping the root is reported as absent
                RepositoryError::NotFound(_) | RepositoryError::InvalidPath(_) => {
                    StatusCode::NOT_FOUND
                }
                RepositoryError::Io(_) | RepositoryError::Config(_) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
        }
    }

    /// Time the client should wait before retrying, when known.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } | Self::AtCapacity { retry_after } => {
                Some(*retry_after)
            }
            _ => None,
        }
    }

    fn public_message(&self) -> String {
        match self {
            Self::Repository(RepositoryError::NotFound(what)) => format!("not found: {what}"),
            Self::Repository(RepositoryError::InvalidPath(_)) => "not found".to_string(),
            _ if self.status_code().is_server_error() => OPAQUE_INTERNAL_MESSAGE.to_string(),
            _ => self.to_string(),
        }
    }
}

/// Render a duration as whole seconds for the `Retry-After` header, rounding up.
pub fn retry_after_header_secs(retry_after: Duration) -> u64 {
    let secs = retry_after.as_secs();
    if retry_after.subsec_nanos() > 0 {
        secs + 1
    } else {
        secs
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, code = self.code(), "request failed");
        } else if let Self::Repository(RepositoryError::InvalidPath(detail)) = &self {
            tracing::warn!(detail = %detail, "rejected lookup resolving outside repository root");
        }

        let retry_after = self.retry_after();
        let body = ErrorResponse {
            code: self.code().to_string(),
            message: self.public_message(),
            retry_after_ms: retry_after.map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX)),
        };

        match retry_after {
            Some(retry_after) => (
                status,
                [(
                    header::RETRY_AFTER,
                    retry_after_header_secs(retry_after).to_string(),
                )],
                Json(body),
            )
                .into_response(),
            None => (status, Json(body)).into_response(),
        }
    }
}

/// Result type for API handlers.
pub type ApiResult<T> = std::result::Result<T, ApiError>;
