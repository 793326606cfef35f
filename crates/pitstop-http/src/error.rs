//! Error types for the HTTP layer.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use pitstop_admission::AdmissionError;
use serde::Serialize;
use utoipa::ToSchema;

/// Message returned with every 429.
pub const RATE_LIMITED_DETAIL: &str = "Rate limit exceeded. Try again later.";

/// API error returned by handlers and middleware.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The request is malformed or lacks a required identity signal.
    #[error("{0}")]
    BadRequest(String),

    /// A quota tier is exhausted for the current window.
    #[error("too many requests")]
    TooManyRequests,

    /// Internal server error. The message is logged, never returned.
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<AdmissionError> for ApiError {
    fn from(e: AdmissionError) -> Self {
        match e {
            AdmissionError::MissingIdentity(_) => Self::BadRequest(e.to_string()),
            AdmissionError::QuotaExceeded(_) => Self::TooManyRequests,
            AdmissionError::Store { .. } => Self::Internal(e.to_string()),
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct ErrorBody {
    /// Error code (e.g. "bad_request", "too_many_requests", "internal_error").
    pub(crate) error: String,
    /// Human-readable error detail, if available.
    pub(crate) detail: Option<String>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error, detail) = match &self {
            ApiError::BadRequest(msg) => {
                (StatusCode::BAD_REQUEST, "bad_request", Some(msg.clone()))
            }
            ApiError::TooManyRequests => (
                StatusCode::TOO_MANY_REQUESTS,
                "too_many_requests",
                Some(RATE_LIMITED_DETAIL.to_string()),
            ),
            ApiError::Internal(msg) => {
                tracing::error!(%msg, "internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    Some("Internal server error".to_string()),
                )
            }
        };

        let body = ErrorBody {
            error: error.to_string(),
            detail,
        };

        (status, axum::Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pitstop_admission::{QuotaSnapshot, StoreError};

    #[test]
    fn admission_errors_map_to_statuses() {
        let cases = [
            (
                AdmissionError::MissingIdentity("API key"),
                StatusCode::BAD_REQUEST,
            ),
            (
                AdmissionError::QuotaExceeded(QuotaSnapshot {
                    limit: 1,
                    remaining: 0,
                    reset: 0,
                    label: "authenticated rate limit by user",
                }),
                StatusCode::TOO_MANY_REQUESTS,
            ),
            (
                AdmissionError::Store {
                    key: "rate_limit:auth:ip:203.0.113.7:2026-10-16-14".to_string(),
                    source: StoreError::Cancelled,
                },
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).into_response().status(), status);
        }
    }
}
