// crates/server/src/error.rs
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use quantline_core::RegistryError;
use serde::Serialize;
use thiserror::Error;

use crate::mailer::MailError;

/// Structured JSON error response for API errors
#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct ErrorResponse {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    /// Per-field validation messages, present only on validation failures.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<String>>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            details: None,
            errors: None,
        }
    }

    pub fn with_details(error: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            details: Some(details.into()),
            errors: None,
        }
    }

    pub fn with_errors(error: impl Into<String>, errors: Vec<String>) -> Self {
        Self {
            error: error.into(),
            details: None,
            errors: Some(errors),
        }
    }
}

/// API error types that map to HTTP status codes
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Validation failed")]
    Validation(Vec<String>),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Email error: {0}")]
    Mail(#[from] MailError),

    #[error("Analysis produced no result")]
    NoResult,

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_response) = match &self {
            ApiError::Validation(errors) => {
                tracing::warn!(count = errors.len(), "Request validation failed");
                (
                    StatusCode::BAD_REQUEST,
                    ErrorResponse::with_errors("Validation failed", errors.clone()),
                )
            }
            ApiError::Registry(err) => {
                tracing::warn!(error = %err, "Registry conflict");
                (
                    StatusCode::CONFLICT,
                    ErrorResponse::with_details("Conflict", err.to_string()),
                )
            }
            ApiError::Mail(err) => {
                tracing::error!(error = %err, "Email delivery failed");
                (
                    StatusCode::BAD_GATEWAY,
                    ErrorResponse::with_details("Email delivery failed", err.to_string()),
                )
            }
            ApiError::NoResult => {
                tracing::error!("Analysis stream ended without a result");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorResponse::new("Analysis produced no result"),
                )
            }
            ApiError::BadRequest(msg) => {
                tracing::warn!(message = %msg, "Bad request");
                (
                    StatusCode::BAD_REQUEST,
                    ErrorResponse::with_details("Bad request", msg.clone()),
                )
            }
            ApiError::Internal(msg) => {
                tracing::error!(message = %msg, "Internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorResponse::new("Internal server error"),
                )
            }
        };

        (status, Json(error_response)).into_response()
    }
}

/// Result type alias for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
