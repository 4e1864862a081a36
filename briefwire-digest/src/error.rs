//! API error type for the digest service
//!
//! The surface is small and most failures fall into a few shapes: the
//! caller did not identify themselves, a path or payload named a value
//! outside one of the closed sets (exposure state, report period, source
//! type), a row does not exist for this user, or something below the API
//! broke. Internal detail stays in the log; the response body carries a
//! stable machine code plus a human-readable detail line.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    /// Missing or unparseable `X-User-Id` header
    #[error("unidentified caller: {0}")]
    Identity(String),

    /// No such row for this user (exposure, report, stack item, ...)
    #[error("{0} not found")]
    MissingResource(String),

    /// A request field failed validation
    #[error("invalid {field}: {reason}")]
    Validation {
        field: &'static str,
        reason: String,
    },

    /// Manual override named a state outside the exposure state machine
    #[error("'{0}' is not an exposure state")]
    UnknownExposureState(String),

    /// Report path segment outside the 1d/7d/30d set
    #[error("'{0}' is not a report period")]
    UnknownPeriod(String),

    /// Pipeline, enrichment, or other service-layer failure
    #[error(transparent)]
    Internal(#[from] anyhow::Error),

    /// Persistence-layer failure
    #[error("storage error: {0}")]
    Storage(#[from] briefwire_common::Error),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Identity(_) => StatusCode::UNAUTHORIZED,
            ApiError::MissingResource(_) => StatusCode::NOT_FOUND,
            ApiError::Validation { .. } | ApiError::UnknownExposureState(_) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            ApiError::UnknownPeriod(_) => StatusCode::BAD_REQUEST,
            ApiError::Internal(_) | ApiError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            ApiError::Identity(_) => "unidentified_caller",
            ApiError::MissingResource(_) => "missing_resource",
            ApiError::Validation { .. } => "invalid_field",
            ApiError::UnknownExposureState(_) => "unknown_exposure_state",
            ApiError::UnknownPeriod(_) => "unknown_period",
            ApiError::Internal(_) => "internal",
            ApiError::Storage(_) => "storage",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let code = self.code();

        // Server-side faults are logged in full; the caller gets the code
        let detail = if status.is_server_error() {
            tracing::error!(code, error = %self, "API request failed");
            "internal failure, see service logs".to_string()
        } else {
            self.to_string()
        };

        (status, Json(json!({ "code": code, "detail": detail }))).into_response()
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
