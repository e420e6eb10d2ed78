//! API error envelope.
//!
//! Uncaught errors never leak detail to the caller: the response carries a
//! fresh error id and a generic message, and the detail is logged against
//! that id.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::error;
use uuid::Uuid;
use vdo_core::store::StoreError;

pub enum ApiError {
    Unauthorized(String),
    Forbidden(String),
    NotFound(String),
    Validation(String),
    Internal(anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Unauthorized(message) => (StatusCode::UNAUTHORIZED, message),
            ApiError::Forbidden(message) => (StatusCode::FORBIDDEN, message),
            ApiError::NotFound(message) => (StatusCode::NOT_FOUND, message),
            ApiError::Validation(message) => (StatusCode::BAD_REQUEST, message),
            ApiError::Internal(cause) => {
                let id = Uuid::new_v4();
                error!(error_id = %id, error = %format!("{cause:#}"), "request failed");
                return (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({
                        "error": { "id": id, "message": "Internal Server Error" }
                    })),
                )
                    .into_response();
            }
        };

        (status, Json(json!({ "error": { "message": message } }))).into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(error: anyhow::Error) -> Self {
        ApiError::Internal(error)
    }
}

impl From<StoreError> for ApiError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::NotFound(what) => ApiError::NotFound(format!("{what} not found")),
            StoreError::Conflict(what) => ApiError::Validation(format!("{what} already exists")),
            StoreError::Validation(message) => ApiError::Validation(message),
            StoreError::Backend(cause) => ApiError::Internal(cause),
        }
    }
}
