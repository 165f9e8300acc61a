use std::time::Duration;

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;
use tradescan_core::{retry_after_secs, CoreError, SourceErrorKind, UtcDateTime};

/// Errors that stop the server from starting or serving.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid CORS origin '{origin}'")]
    InvalidCorsOrigin { origin: String },
}

/// Error returned by a handler, rendered as the JSON envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    status: StatusCode,
    message: String,
    retry_after: Option<Duration>,
}

#[derive(Debug, Serialize)]
struct ErrorEnvelope<'a> {
    error: &'a str,
    status_code: u16,
    timestamp: UtcDateTime,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    // Whole seconds, rounded up; only 429 responses carry one.
    fn retry_after_secs(&self) -> Option<u64> {
        if self.status != StatusCode::TOO_MANY_REQUESTS {
            return None;
        }
        Some(self.retry_after.map_or(1, retry_after_secs))
    }
}

impl From<CoreError> for ApiError {
    fn from(error: CoreError) -> Self {
        let message = error.to_string();
        match error {
            CoreError::Validation(_) => Self::bad_request(message),
            CoreError::NotFound { .. } | CoreError::AnalysisUnavailable { .. } => {
                Self::new(StatusCode::NOT_FOUND, message)
            }
            CoreError::Fibonacci(_) => Self::bad_request(message),
            CoreError::Source(source) => {
                let status = match source.kind() {
                    SourceErrorKind::RateLimited => StatusCode::TOO_MANY_REQUESTS,
                    SourceErrorKind::Unavailable => StatusCode::BAD_GATEWAY,
                    SourceErrorKind::InvalidRequest => StatusCode::BAD_REQUEST,
                    SourceErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
                };
                Self {
                    status,
                    message,
                    retry_after: source.retry_after(),
                }
            }
            CoreError::Serialization(_) => Self::new(StatusCode::INTERNAL_SERVER_ERROR, message),
        }
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self::bad_request(rejection.body_text())
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::bad_request(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!(status = self.status.as_u16(), error = %self.message, "request failed");
        } else {
            tracing::debug!(
                status = self.status.as_u16(),
                error = %self.message,
                "request rejected"
            );
        }

        let envelope = ErrorEnvelope {
            error: &self.message,
            status_code: self.status.as_u16(),
            timestamp: UtcDateTime::now(),
        };
        let mut response = (self.status, Json(envelope)).into_response();

        if let Some(secs) = self.retry_after_secs() {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(secs));
        }
        response
    }
}
