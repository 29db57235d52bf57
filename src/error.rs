use axum::{Json, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use thiserror::Error;
use validator::ValidationErrors;

use crate::{
    dao::storage::StorageError,
    state::{grant::GrantTransitionError, session::InvariantViolation},
};

/// Failures of the relay services, independent of the HTTP surface.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// The store answered with a transport-level failure.
    #[error("storage unavailable")]
    Unavailable(#[source] StorageError),
    /// No store is installed.
    #[error("storage unavailable (degraded mode)")]
    Degraded,
    /// Malformed row, key or answer.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// Lost a uniqueness or conditional-write race, or the grant was already answered.
    #[error("invalid state: {0}")]
    InvalidState(String),
    /// No such session or grant.
    #[error("not found: {0}")]
    NotFound(String),
}

impl From<StorageError> for ServiceError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::UniqueViolation { .. } | StorageError::Conflict { .. } => {
                ServiceError::InvalidState(err.to_string())
            }
            StorageError::NotFound { .. } => ServiceError::NotFound(err.to_string()),
            StorageError::Unavailable { .. } => ServiceError::Unavailable(err),
        }
    }
}

impl From<InvariantViolation> for ServiceError {
    fn from(err: InvariantViolation) -> Self {
        ServiceError::InvalidInput(err.to_string())
    }
}

impl From<GrantTransitionError> for ServiceError {
    fn from(err: GrantTransitionError) -> Self {
        match err {
            GrantTransitionError::AlreadyAnswered { .. } => {
                ServiceError::InvalidState(err.to_string())
            }
            GrantTransitionError::NotRecipient { .. } => ServiceError::InvalidInput(err.to_string()),
        }
    }
}

impl From<ValidationErrors> for AppError {
    fn from(err: ValidationErrors) -> Self {
        AppError::BadRequest(format!("validation failed: {}", err))
    }
}

/// Error returned by the REST handlers, rendered as `{"message": ...}`.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Unavailable(source) => AppError::ServiceUnavailable(source.to_string()),
            ServiceError::Degraded => AppError::ServiceUnavailable("degraded mode".into()),
            ServiceError::InvalidInput(message) => AppError::BadRequest(message),
            ServiceError::InvalidState(message) => AppError::Conflict(message),
            ServiceError::NotFound(message) => AppError::NotFound(message),
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        };

        let payload = Json(ErrorBody {
            message: self.to_string(),
        });

        (status, payload).into_response()
    }
}
