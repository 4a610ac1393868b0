//! Error handling module
//!
//! Centralized error types and HTTP response conversion.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::capability::CodecError;
use crate::domain::DomainError;
use crate::store::StoreError;

/// Application-wide Result type
pub type AppResult<T> = Result<T, AppError>;

/// Application error types
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    // Client errors (4xx)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Missing required header: {0}")]
    MissingHeader(String),

    // Domain errors
    #[error(transparent)]
    Domain(#[from] DomainError),

    // Server errors (5xx)
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Capability error: {0}")]
    Codec(#[from] CodecError),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),
}

impl AppError {
    /// HTTP status and machine-readable code
    pub fn status(&self) -> (StatusCode, &'static str) {
        match self {
            AppError::InvalidRequest(_) => (StatusCode::BAD_REQUEST, "invalid_request"),
            AppError::MissingHeader(_) => (StatusCode::BAD_REQUEST, "missing_header"),
            AppError::Domain(e) => {
                let status = match e {
                    DomainError::Validation(_) | DomainError::EventNotPublished => {
                        StatusCode::BAD_REQUEST
                    }
                    DomainError::EventNotFound(_)
                    | DomainError::ReservationNotFound(_)
                    | DomainError::RecordNotFound { .. } => StatusCode::NOT_FOUND,
                    DomainError::InsufficientCapacity { .. }
                    | DomainError::SettlementInProgress => StatusCode::CONFLICT,
                    DomainError::PaymentWindowExpired => StatusCode::GONE,
                    DomainError::PaymentDeclined { .. } => StatusCode::PAYMENT_REQUIRED,
                    DomainError::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
                };
                (status, e.status_code())
            }
            AppError::Store(StoreError::SerializationConflict) => {
                (StatusCode::SERVICE_UNAVAILABLE, "service_unavailable")
            }
            AppError::Store(_) => (StatusCode::INTERNAL_SERVER_ERROR, "database_error"),
            AppError::Codec(_) | AppError::Internal(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error")
            }
            AppError::Config(_) => (StatusCode::INTERNAL_SERVER_ERROR, "config_error"),
        }
    }

    /// Message safe to return to the caller
    fn public_message(&self) -> String {
        match self {
            AppError::InvalidRequest(_) | AppError::MissingHeader(_) | AppError::Domain(_) => {
                self.to_string()
            }
            AppError::Store(StoreError::SerializationConflict) => {
                DomainError::ServiceUnavailable.to_string()
            }
            _ => "Internal server error".to_string(),
        }
    }
}

/// Error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub status: String,
    pub message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = self.status();

        match &self {
            AppError::Store(e) => tracing::error!(error = ?e, "Store error"),
            AppError::Codec(e) => tracing::error!(error = %e, "Capability error"),
            AppError::Internal(msg) => tracing::error!("Internal error: {}", msg),
            AppError::Config(e) => tracing::error!(error = ?e, "Config error"),
            _ => {}
        }

        let body = ErrorResponse {
            status: code.to_string(),
            message: self.public_message(),
        };

        (status, Json(body)).into_response()
    }
}
