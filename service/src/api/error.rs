//! HTTP error responses.
//!
//! Bridges [`EngineError`] to Axum responses. Conflicts and validation
//! rejections are expected outcomes and are not logged as failures;
//! only storage errors reach the error log.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use std::fmt;
use turnout_core::EngineError;

/// Application error type for the HTTP handlers.
#[derive(Debug)]
pub struct ApiError {
    /// HTTP status code
    status: StatusCode,
    /// Error message (user-facing)
    message: String,
    /// Error code (for client error handling)
    code: &'static str,
}

impl ApiError {
    /// Create a new API error.
    #[must_use]
    pub const fn new(status: StatusCode, message: String, code: &'static str) -> Self {
        Self {
            status,
            message,
            code,
        }
    }

    /// Create a 400 Bad Request error.
    #[must_use]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message.into(), "BAD_REQUEST")
    }

    /// Create a 401 Unauthorized error.
    #[must_use]
    pub fn unauthenticated(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, message.into(), "UNAUTHENTICATED")
    }

    /// Create a 404 Not Found error.
    #[must_use]
    pub fn not_found(resource: impl fmt::Display, id: impl fmt::Display) -> Self {
        Self::new(
            StatusCode::NOT_FOUND,
            format!("{resource} with id {id} not found"),
            "NOT_FOUND",
        )
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        let message = err.to_string();
        match err {
            EngineError::EventNotFound(_) | EngineError::RegistrationNotFound(_) => {
                Self::new(StatusCode::NOT_FOUND, message, "NOT_FOUND")
            }
            EngineError::NotRegistered { .. } => {
                Self::new(StatusCode::NOT_FOUND, message, "NOT_REGISTERED")
            }
            EngineError::AlreadyRegistered { .. } => {
                Self::new(StatusCode::CONFLICT, message, "ALREADY_REGISTERED")
            }
            EngineError::CapacityFull(_) => {
                Self::new(StatusCode::CONFLICT, message, "CAPACITY_FULL")
            }
            EngineError::Unauthorized { .. } => {
                Self::new(StatusCode::FORBIDDEN, message, "FORBIDDEN")
            }
            EngineError::NotPublished(_) => {
                Self::new(StatusCode::UNPROCESSABLE_ENTITY, message, "NOT_PUBLISHED")
            }
            EngineError::EventInPast(_) => {
                Self::new(StatusCode::UNPROCESSABLE_ENTITY, message, "EVENT_IN_PAST")
            }
            EngineError::CancellationWindowClosed(_) => Self::new(
                StatusCode::UNPROCESSABLE_ENTITY,
                message,
                "CANCELLATION_WINDOW_CLOSED",
            ),
            EngineError::Validation(_) => {
                Self::new(StatusCode::UNPROCESSABLE_ENTITY, message, "VALIDATION_ERROR")
            }
            EngineError::Busy(_) => Self::new(
                StatusCode::SERVICE_UNAVAILABLE,
                "Event is busy, retry shortly".to_string(),
                "BUSY",
            ),
            EngineError::Storage(_) => Self::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "An internal error occurred".to_string(),
                "INTERNAL_SERVER_ERROR",
            ),
        }
    }
}

/// Error response body (JSON).
#[derive(Debug, Serialize)]
struct ErrorResponse {
    /// Error code (for client error handling).
    code: &'static str,
    /// Human-readable error message.
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!(
                status = %self.status,
                code = self.code,
                message = %self.message,
                "Internal server error"
            );
        }

        let body = ErrorResponse {
            code: self.code,
            message: self.message,
        };
        (self.status, Json(body)).into_response()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use turnout_core::EventId;

    #[test]
    fn conflicts_map_to_409() {
        let err: ApiError = EngineError::CapacityFull(EventId::new()).into();
        assert_eq!(err.status, StatusCode::CONFLICT);
        assert_eq!(err.code, "CAPACITY_FULL");
    }

    #[test]
    fn busy_maps_to_503() {
        let err: ApiError = EngineError::Busy("lock timeout".to_string()).into();
        assert_eq!(err.status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn storage_details_are_not_exposed() {
        let err: ApiError = EngineError::Storage("password=hunter2".to_string()).into();
        assert_eq!(err.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!err.message.contains("hunter2"));
    }
}
