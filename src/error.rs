use axum::{Json, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use thiserror::Error;

use crate::{
    dao::storage::StorageError,
    state::{AbortError, ApplyError, PlanError},
};

/// Faults raised by the scheduler, the gateway and the query services.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// The round store rejected or failed an operation.
    #[error("round store unavailable")]
    Unavailable(#[source] StorageError),
    /// No round store is installed, or it is marked unreachable.
    #[error("round store unavailable (degraded mode)")]
    Degraded,
    /// Malformed client input.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// The scheduler phase machine refused the operation.
    #[error("invalid state: {0}")]
    InvalidState(String),
    #[error("not found: {0}")]
    NotFound(String),
    /// Store work inside a scheduler transition exceeded its deadline.
    #[error("operation timed out")]
    Timeout,
}

impl From<StorageError> for ServiceError {
    fn from(err: StorageError) -> Self {
        ServiceError::Unavailable(err)
    }
}

impl From<PlanError> for ServiceError {
    fn from(err: PlanError) -> Self {
        ServiceError::InvalidState(err.to_string())
    }
}

impl From<ApplyError> for ServiceError {
    fn from(err: ApplyError) -> Self {
        ServiceError::InvalidState(err.to_string())
    }
}

impl From<AbortError> for ServiceError {
    fn from(err: AbortError) -> Self {
        ServiceError::InvalidState(err.to_string())
    }
}

/// Errors returned by HTTP handlers.
#[derive(Debug, Error)]
pub enum AppError {
    /// 400.
    #[error("{0}")]
    BadRequest(String),
    /// 404.
    #[error("{0}")]
    NotFound(String),
    /// 409.
    #[error("{0}")]
    Conflict(String),
    /// 503.
    #[error("{0}")]
    ServiceUnavailable(String),
}

impl AppError {
    fn status(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            AppError::BadRequest(_) => "bad_request",
            AppError::NotFound(_) => "not_found",
            AppError::Conflict(_) => "conflict",
            AppError::ServiceUnavailable(_) => "service_unavailable",
        }
    }
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::InvalidInput(message) => AppError::BadRequest(message),
            ServiceError::NotFound(message) => AppError::NotFound(message),
            ServiceError::InvalidState(message) => AppError::Conflict(message),
            unavailable @ (ServiceError::Unavailable(_)
            | ServiceError::Degraded
            | ServiceError::Timeout) => AppError::ServiceUnavailable(unavailable.to_string()),
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let body = Json(ErrorBody {
            error: self.code(),
            message: self.to_string(),
        });
        (self.status(), body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_errors_map_to_http_statuses() {
        let cases = [
            (ServiceError::Degraded, StatusCode::SERVICE_UNAVAILABLE),
            (ServiceError::Timeout, StatusCode::SERVICE_UNAVAILABLE),
            (
                ServiceError::InvalidInput("bad".into()),
                StatusCode::BAD_REQUEST,
            ),
            (
                ServiceError::NotFound("round".into()),
                StatusCode::NOT_FOUND,
            ),
            (
                ServiceError::InvalidState("busy".into()),
                StatusCode::CONFLICT,
            ),
        ];

        for (err, expected) in cases {
            let response = AppError::from(err).into_response();
            assert_eq!(response.status(), expected);
        }
    }

    #[test]
    fn plan_errors_keep_their_message() {
        let err = ServiceError::from(PlanError::AlreadyPending);
        assert_eq!(
            err.to_string(),
            "invalid state: a scheduler transition is already pending"
        );
    }
}
