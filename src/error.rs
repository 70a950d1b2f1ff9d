//! Common error types for the dispatch service and worker

use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::channel::ChannelError;

/// Application-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    /// The message channel could not be reached at all
    #[error("Queue unavailable: {0}")]
    ChannelUnavailable(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Unknown mode: {0}")]
    UnknownMode(String),

    /// Non-2xx answer from the external image API
    #[error("FAL error: {message}")]
    Upstream { status: u16, message: String },

    /// Well-formed error reply produced by the worker
    #[error("{detail}")]
    Worker { code: u16, detail: String },

    /// Every dispatch attempt ended in a transport fault or timeout
    #[error("Worker unavailable after {attempts} attempts ({last_fault})")]
    GatewayTimeout { attempts: u32, last_fault: String },

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// HTTP status this error is reported with, both to API callers and
    /// inside worker error replies.
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Config(_) | AppError::Io(_) | AppError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            AppError::Json(_) | AppError::InvalidRequest(_) | AppError::UnknownMode(_) => {
                StatusCode::BAD_REQUEST
            }
            AppError::Channel(_)
            | AppError::ChannelUnavailable(_)
            | AppError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Upstream { status, .. } => status_or_internal(*status),
            AppError::Worker { code, .. } => status_or_internal(*code),
            AppError::GatewayTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        }
    }

    fn error_type(&self) -> &'static str {
        match self.status_code() {
            StatusCode::BAD_REQUEST => "invalid_request_error",
            StatusCode::PAYMENT_REQUIRED => "insufficient_credits_error",
            StatusCode::TOO_MANY_REQUESTS => "rate_limit_error",
            StatusCode::GATEWAY_TIMEOUT => "timeout_error",
            StatusCode::BAD_GATEWAY => "backend_error",
            _ => "server_error",
        }
    }

    fn error_code(&self) -> Option<&'static str> {
        match self {
            AppError::Json(_) => Some("invalid_json"),
            AppError::UnknownMode(_) => Some("unknown_mode"),
            AppError::ChannelUnavailable(_) => Some("queue_unavailable"),
            AppError::GatewayTimeout { .. } => Some("worker_timeout"),
            AppError::Upstream { .. } => Some("upstream_error"),
            _ => None,
        }
    }
}

/// Only client and server error codes pass through; anything else is a 500
fn status_or_internal(code: u16) -> StatusCode {
    match StatusCode::from_u16(code) {
        Ok(status) if status.is_client_error() || status.is_server_error() => status,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Error response format (OpenAI compatible)
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Serialize)]
pub struct ErrorDetail {
    pub message: String,
    pub r#type: String,
    pub code: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(ErrorResponse {
            error: ErrorDetail {
                message: self.to_string(),
                r#type: self.error_type().to_string(),
                code: self.error_code().map(|c| c.to_string()),
            },
        });

        (status, body).into_response()
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::InvalidRequest(rejection.body_text())
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, AppError>;
