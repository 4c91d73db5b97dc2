//! API error types and response formatting.

use std::time::Duration;

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use homeboard_domain::{HomeboardError, SyncError};
use homeboard_infra::SchedulerError;
use serde::Serialize;

use crate::utils::logging::error_label;

/// API error type that converts to appropriate HTTP responses.
///
/// Only operator-facing handlers return it. Display-facing handlers degrade
/// instead of failing.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Missing or invalid administrative credential.
    #[error("unauthorized")]
    Unauthorized,

    /// Resource not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Invalid request parameters.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// A sync cycle for the source is already running.
    #[error("busy: {0}")]
    Busy(String),

    /// Rate or minimum-interval limit hit.
    #[error("too many requests")]
    TooManyRequests {
        retry_after: Duration,
        message: Option<String>,
    },

    /// An upstream calendar or credential could not be used.
    #[error("upstream failure: {0}")]
    Upstream(String),

    /// A bounded wait expired.
    #[error("timed out: {0}")]
    Timeout(String),

    /// Domain or infrastructure failure.
    #[error("internal error: {0}")]
    Internal(HomeboardError),
}

/// JSON error response body.
#[derive(Debug, Clone, Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
}

impl From<HomeboardError> for ApiError {
    fn from(err: HomeboardError) -> Self {
        match err {
            HomeboardError::NotFound(msg) => Self::NotFound(msg),
            HomeboardError::InvalidInput(msg) => Self::BadRequest(msg),
            other => Self::Internal(other),
        }
    }
}

impl From<SchedulerError> for ApiError {
    fn from(err: SchedulerError) -> Self {
        HomeboardError::from(err).into()
    }
}

impl From<SyncError> for ApiError {
    fn from(err: SyncError) -> Self {
        match err {
            SyncError::NotFound(id) => Self::NotFound(format!("calendar source {id}")),
            SyncError::Busy(msg) | SyncError::Cancelled(msg) => Self::Busy(msg),
            limited @ SyncError::Limiter { retry_after, .. } => {
                Self::TooManyRequests { retry_after, message: Some(limited.to_string()) }
            }
            credential @ SyncError::Credential { .. } => Self::Upstream(credential.to_string()),
            SyncError::Fetch(msg) => Self::Upstream(msg),
            timeout @ SyncError::Timeout { .. } => Self::Timeout(timeout.to_string()),
            SyncError::Store(msg) => Self::Internal(HomeboardError::Database(msg)),
        }
    }
}

/// Whole seconds for a `Retry-After` header, never zero
pub(crate) fn retry_after_secs(retry_after: Duration) -> u64 {
    let secs = retry_after.as_secs();
    if retry_after.subsec_nanos() > 0 || secs == 0 {
        secs.saturating_add(1)
    } else {
        secs
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error, message) = match &self {
            Self::Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorized", None),
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", Some(msg.clone())),
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", Some(msg.clone())),
            Self::Busy(msg) => (StatusCode::CONFLICT, "busy", Some(msg.clone())),
            Self::TooManyRequests { message, .. } => {
                (StatusCode::TOO_MANY_REQUESTS, "rate_limited", message.clone())
            }
            Self::Upstream(msg) => (StatusCode::BAD_GATEWAY, "upstream_error", Some(msg.clone())),
            Self::Timeout(msg) => (StatusCode::GATEWAY_TIMEOUT, "timeout", Some(msg.clone())),
            Self::Internal(err) => {
                tracing::error!(error = %err, kind = error_label(err), "internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    Some("An internal error occurred".to_string()),
                )
            }
        };

        let body = ErrorResponse { error: error.to_string(), message };
        let mut response = (status, Json(body)).into_response();

        if let Self::TooManyRequests { retry_after, .. } = &self {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(retry_after_secs(*retry_after)));
        }
        response
    }
}
