use axum::{
    Json,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;

use crate::services::coordinator::AttachError;

/// Seconds a client is told to wait after a pending-review outcome.
const REVIEW_RETRY_AFTER_SECS: u64 = 30;

/// A lightweight wrapper for general errors that keeps the message local.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
    pub retry_after: Option<u64>,
}

impl AppError {
    /// Create a new AppError with a specific status and message.
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
            retry_after: None,
        }
    }

    /// Shortcut for a 500 Internal Server Error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, msg)
    }

    /// Shortcut for 404 Not Found
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, msg)
    }

    /// Shortcut for 400 Bad Request
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, msg)
    }

    /// Shortcut for 401 Unauthorized
    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, msg)
    }

    pub fn with_retry_after(mut self, secs: u64) -> Self {
        self.retry_after = Some(secs);
        self
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.message,
            "status": self.status.as_u16()
        }));

        let mut response = (self.status, body).into_response();
        if let Some(secs) = self.retry_after {
            if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}

impl From<AttachError> for AppError {
    fn from(err: AttachError) -> Self {
        match err {
            AttachError::TooLarge { .. } => {
                AppError::new(StatusCode::PAYLOAD_TOO_LARGE, err.to_string())
            }
            AttachError::UnsupportedType => AppError::new(
                StatusCode::UNSUPPORTED_MEDIA_TYPE,
                "unsupported image type (JPEG and PNG only)",
            ),
            AttachError::Rejected(reason) => {
                AppError::new(StatusCode::UNPROCESSABLE_ENTITY, reason)
            }
            AttachError::PendingReview(reason) => {
                AppError::new(StatusCode::SERVICE_UNAVAILABLE, reason)
                    .with_retry_after(REVIEW_RETRY_AFTER_SECS)
            }
            AttachError::TokenInvalidOrExpired => {
                AppError::new(StatusCode::GONE, err.to_string())
            }
            AttachError::EntityNotFound(_) => AppError::not_found(err.to_string()),
            AttachError::AlreadyRegistered(_) => {
                AppError::new(StatusCode::CONFLICT, err.to_string())
            }
            AttachError::Forbidden(reason) => AppError::new(StatusCode::FORBIDDEN, reason),
            AttachError::Internal(detail) => {
                tracing::error!("internal failure: {}", detail);
                AppError::internal("internal failure")
            }
        }
    }
}
