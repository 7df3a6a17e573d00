//! Error handling for operator routes
//!
//! Visitor-facing paths never produce these; they always answer with bait.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::harvester::HarvestError;
use crate::store::StoreError;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug)]
pub enum AppError {
    // Auth errors
    Unauthorized,
    Forbidden(String),

    // Resource errors
    NotFound(String),
    InvalidId,

    // Store errors
    StoreUnavailable(String),

    // Generic errors
    InternalError(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match &self {
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, "Authentication required"),
            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg.as_str()),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.as_str()),
            AppError::InvalidId => (
                StatusCode::BAD_REQUEST,
                "Capture id must be 64 characters of [a-zA-Z0-9]",
            ),
            AppError::StoreUnavailable(msg) => {
                tracing::error!("Store error: {}", msg);
                (StatusCode::SERVICE_UNAVAILABLE, "Capture store unavailable")
            }
            AppError::InternalError(msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, msg.as_str())
            }
        };

        let body = Json(json!({
            "error": error_message,
            "status": status.as_u16()
        }));

        (status, body).into_response()
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(_) => AppError::NotFound("Capture not found".to_string()),
            StoreError::InvalidId => AppError::InvalidId,
            StoreError::Unavailable(e) => AppError::StoreUnavailable(e.to_string()),
            e @ (StoreError::AlreadyExists(_) | StoreError::Corrupt { .. }) => {
                AppError::InternalError(e.to_string())
            }
        }
    }
}

impl From<HarvestError> for AppError {
    fn from(err: HarvestError) -> Self {
        match err {
            HarvestError::Store(e) => e.into(),
            HarvestError::BulkDeleteDisabled => {
                AppError::Forbidden("Bulk delete is disabled".to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_errors_map_to_statuses() {
        let cases = [
            (StoreError::NotFound("x".into()), StatusCode::NOT_FOUND),
            (StoreError::InvalidId, StatusCode::BAD_REQUEST),
            (StoreError::Unavailable(sqlx::Error::PoolTimedOut), StatusCode::SERVICE_UNAVAILABLE),
            (StoreError::AlreadyExists("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(AppError::from(err).into_response().status(), status);
        }
        assert_eq!(
            AppError::from(HarvestError::BulkDeleteDisabled).into_response().status(),
            StatusCode::FORBIDDEN
        );
    }
}
