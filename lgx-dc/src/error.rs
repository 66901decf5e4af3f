//! HTTP error responses for lgx-dc
//!
//! Body shape: `{"error": {"code", "message", "fields": [{field, message}]}}`;
//! `fields` is present only for validation errors.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::services::{DeliveryError, FieldError};

#[derive(Debug, Error)]
pub enum ApiError {
    /// Missing or invalid session (401)
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Invalid request shape (400)
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Conflicting operation in progress (409)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Resource not found (404)
    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Delivery(#[from] DeliveryError),

    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("Common error: {0}")]
    Common(#[from] lgx_common::Error),
}

impl ApiError {
    fn parts(&self) -> (StatusCode, &'static str, Vec<FieldError>) {
        match self {
            ApiError::Unauthorized(_) => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", Vec::new()),
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", Vec::new()),
            ApiError::Conflict(_) => (StatusCode::CONFLICT, "CONFLICT", Vec::new()),
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND", Vec::new()),
            ApiError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", Vec::new()),
            ApiError::Common(lgx_common::Error::NotFound(_)) => {
                (StatusCode::NOT_FOUND, "NOT_FOUND", Vec::new())
            }
            ApiError::Common(lgx_common::Error::InvalidInput(_)) => {
                (StatusCode::BAD_REQUEST, "BAD_REQUEST", Vec::new())
            }
            ApiError::Common(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", Vec::new()),
            ApiError::Delivery(err) => (delivery_status(err), err.code(), err.fields()),
        }
    }
}

fn delivery_status(err: &DeliveryError) -> StatusCode {
    match err {
        DeliveryError::ShipmentNotFound(_) | DeliveryError::DeliveryNotFound(_) => {
            StatusCode::NOT_FOUND
        }
        DeliveryError::Forbidden(_) => StatusCode::FORBIDDEN,
        DeliveryError::Common(_) => StatusCode::INTERNAL_SERVER_ERROR,
        _ if err.is_validation() => StatusCode::UNPROCESSABLE_ENTITY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, fields) = self.parts();
        let message = match &self {
            ApiError::Delivery(err) => err.to_string(),
            other => other.to_string(),
        };

        if status.is_server_error() {
            tracing::error!(code, "Request failed: {}", message);
        }

        let mut error = json!({
            "code": code,
            "message": message,
        });
        if !fields.is_empty() {
            error["fields"] = json!(fields);
        }

        (status, Json(json!({ "error": error }))).into_response()
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
