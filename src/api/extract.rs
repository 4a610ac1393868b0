//! Request extractors
//!
//! Wrap axum's `Json` and `Path` so that malformed bodies and path segments
//! are answered with the same `{status, message}` body as every other error.

use axum::extract::rejection::{JsonRejection, PathRejection};
use axum::extract::{FromRequest, FromRequestParts};

use crate::error::AppError;

/// JSON body extractor rejecting with [`AppError::InvalidRequest`]
#[derive(Debug, FromRequest)]
#[from_request(via(axum::Json), rejection(AppError))]
pub struct AppJson<T>(pub T);

/// Path extractor rejecting with [`AppError::InvalidRequest`]
#[derive(Debug, FromRequestParts)]
#[from_request(via(axum::extract::Path), rejection(AppError))]
pub struct AppPath<T>(pub T);

// Deserializer detail stays in the debug log
impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        tracing::debug!(rejection = %rejection.body_text(), "Rejected request body");
        let message = match rejection {
            JsonRejection::MissingJsonContentType(_) => "expected a JSON body",
            JsonRejection::JsonSyntaxError(_) => "body is not valid JSON",
            JsonRejection::JsonDataError(_) => "body does not match the expected fields",
            _ => "unreadable request body",
        };
        AppError::InvalidRequest(message.to_string())
    }
}

impl From<PathRejection> for AppError {
    fn from(rejection: PathRejection) -> Self {
        tracing::debug!(rejection = %rejection.body_text(), "Rejected path");
        AppError::InvalidRequest("malformed path parameter".to_string())
    }
}
