//! API error types and response handling.
//!
//! This module provides a unified error type for all API handlers
//! with automatic conversion to appropriate HTTP responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use bagwatch_core::BagwatchError;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Result type alias for API handlers.
pub type ApiResult<T> = Result<T, ApiError>;

/// Unified API error type.
///
/// Each variant maps to a specific HTTP status code and produces a
/// consistent JSON error response.
#[derive(Debug, Clone)]
pub enum ApiError {
    /// 400 Bad Request - Invalid input from client.
    BadRequest {
        /// Machine-readable error code.
        error_code: String,
        /// Human-readable error message.
        message: String,
    },

    /// 401 Unauthorized - No signed-in owner.
    Unauthorized {
        /// Machine-readable error code.
        error_code: String,
        /// Human-readable error message.
        message: String,
    },

    /// 404 Not Found - Resource does not exist.
    NotFound {
        /// Machine-readable error code.
        error_code: String,
        /// Human-readable error message.
        message: String,
    },

    /// 409 Conflict - Operation cannot be completed due to current state.
    Conflict {
        /// Machine-readable error code.
        error_code: String,
        /// Human-readable error message.
        message: String,
        /// Optional additional details.
        details: Option<serde_json::Value>,
    },

    /// 500 Internal Server Error - Unexpected server-side error.
    InternalError {
        /// Machine-readable error code.
        error_code: String,
        /// Human-readable error message.
        message: String,
        /// Optional details (not exposed to client in production).
        details: Option<String>,
    },

    /// 503 Service Unavailable - The Bluetooth radio cannot be used.
    ServiceUnavailable {
        /// Machine-readable error code.
        error_code: String,
        /// Human-readable error message.
        message: String,
        /// Optional additional details.
        details: Option<String>,
    },
}

/// Standard JSON error response body.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "error": "ALREADY_LINKED",
    "message": concat!(
        "Item '0192f3c4-5b6a-7c8d-9e0f-a1b2c3d4e5f6' is already linked to device ",
        "'AA:BB:CC:DD:EE:FF'. Unlink it first."
    ),
    "details": { "device_id": "AA:BB:CC:DD:EE:FF" }
}))]
pub struct ErrorResponse {
    /// Machine-readable error code (e.g., "NOT_FOUND").
    #[schema(example = "NOT_FOUND")]
    pub error: String,

    /// Human-readable error message.
    #[schema(example = "Tracked item not found")]
    pub message: String,

    /// Optional additional details for debugging.
    #[schema(nullable)]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    /// The HTTP status this error is returned with.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest { .. } => StatusCode::BAD_REQUEST,
            Self::Unauthorized { .. } => StatusCode::UNAUTHORIZED,
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::Conflict { .. } => StatusCode::CONFLICT,
            Self::InternalError { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let error_response = match self {
            Self::BadRequest { error_code, message }
            | Self::Unauthorized { error_code, message }
            | Self::NotFound { error_code, message } => ErrorResponse {
                error: error_code,
                message,
                details: None,
            },

            Self::Conflict {
                error_code,
                message,
                details,
            } => ErrorResponse {
                error: error_code,
                message,
                details,
            },

            Self::InternalError {
                error_code,
                message,
                details,
            } => {
                tracing::error!(
                    error_code = %error_code,
                    message = %message,
                    details = ?details,
                    "Internal server error"
                );
                ErrorResponse {
                    error: error_code,
                    message,
                    details: details.map(serde_json::Value::String),
                }
            }

            Self::ServiceUnavailable {
                error_code,
                message,
                details,
            } => ErrorResponse {
                error: error_code,
                message,
                details: details.map(serde_json::Value::String),
            },
        };

        (status, Json(error_response)).into_response()
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BadRequest { message, .. } => write!(f, "Bad Request: {message}"),
            Self::Unauthorized { message, .. } => write!(f, "Unauthorized: {message}"),
            Self::NotFound { message, .. } => write!(f, "Not Found: {message}"),
            Self::Conflict { message, .. } => write!(f, "Conflict: {message}"),
            Self::InternalError { message, .. } => write!(f, "Internal Error: {message}"),
            Self::ServiceUnavailable { message, .. } => {
                write!(f, "Service Unavailable: {message}")
            }
        }
    }
}

impl std::error::Error for ApiError {}

/// Convert from bagwatch_core errors.
impl From<BagwatchError> for ApiError {
    fn from(err: BagwatchError) -> Self {
        let error_code = err.error_code().to_string();
        let message = err.to_string();

        match err {
            BagwatchError::InvalidInput(_)
            | BagwatchError::InvalidConfig(_)
            | BagwatchError::ConfigParseError(_) => Self::BadRequest {
                error_code,
                message,
            },
            BagwatchError::AuthRequired => Self::Unauthorized {
                error_code,
                message,
            },
            BagwatchError::NotFound(_) => Self::NotFound {
                error_code,
                message,
            },
            BagwatchError::AlreadyLinked { device_id, .. } => Self::Conflict {
                error_code,
                message,
                details: Some(serde_json::json!({ "device_id": device_id })),
            },
            BagwatchError::ScanInProgress => Self::Conflict {
                error_code,
                message,
                details: None,
            },
            BagwatchError::RadioUnavailable(state) => Self::ServiceUnavailable {
                error_code,
                message,
                details: Some(state.to_string()),
            },
            BagwatchError::ScanError(cause) => Self::ServiceUnavailable {
                error_code,
                message,
                details: Some(cause),
            },
            BagwatchError::PermissionDenied(_)
            | BagwatchError::PersistenceError(_)
            | BagwatchError::IoError(_) => Self::InternalError {
                error_code,
                message,
                details: None,
            },
        }
    }
}

impl From<bagwatch_core::ConfigError> for ApiError {
    fn from(err: bagwatch_core::ConfigError) -> Self {
        Self::from(BagwatchError::from(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bagwatch_core::RadioState;

    #[test]
    fn test_bad_request_error() {
        let err = ApiError::BadRequest {
            error_code: "test_error".to_string(),
            message: "Test message".to_string(),
        };
        assert!(err.to_string().contains("Bad Request"));
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_core_errors_map_to_statuses() {
        let cases = [
            (BagwatchError::AuthRequired, StatusCode::UNAUTHORIZED),
            (BagwatchError::NotFound("x".into()), StatusCode::NOT_FOUND),
            (BagwatchError::InvalidInput("x".into()), StatusCode::BAD_REQUEST),
            (BagwatchError::ScanInProgress, StatusCode::CONFLICT),
            (
                BagwatchError::RadioUnavailable(RadioState::PoweredOff),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                BagwatchError::PersistenceError("disk full".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status(), status);
        }
    }

    #[test]
    fn test_already_linked_carries_device() {
        let err = ApiError::from(BagwatchError::AlreadyLinked {
            item_id: "item".into(),
            device_id: "AA:BB:CC".into(),
        });
        match err {
            ApiError::Conflict {
                error_code,
                details,
                ..
            } => {
                assert_eq!(error_code, "ALREADY_LINKED");
                assert_eq!(details.unwrap()["device_id"], "AA:BB:CC");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_error_response_serialization() {
        let response = ErrorResponse {
            error: "test_error".to_string(),
            message: "Test message".to_string(),
            details: None,
        };
        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("test_error"));
    }
}
