//! Error types for compliance-ai
//!
//! Every handler returns [`ApiResult`]; errors render as
//! `{"error": {"code": ..., "message": ...}}` with a matching status code.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::bridge::BridgeError;

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Resource not found (404)
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Invalid request (400)
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Missing or rejected token (401)
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Authenticated caller does not own the resource (403)
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Conflict (409) - e.g., job already outstanding
    #[error("Conflict: {0}")]
    Conflict(String),

    /// AI service refused the file size (413)
    #[error("Payload too large: {0}")]
    PayloadTooLarge(String),

    /// AI service refused the file type (415)
    #[error("Unsupported media type: {0}")]
    UnsupportedMediaType(String),

    /// AI service unreachable or erroring (503)
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    /// Internal server error (500)
    #[error("Internal server error: {0}")]
    Internal(String),

    /// compliance-common error
    #[error("Common error: {0}")]
    Common(#[from] compliance_common::Error),
}

impl From<BridgeError> for ApiError {
    fn from(err: BridgeError) -> Self {
        match err {
            BridgeError::PayloadTooLarge(msg) => ApiError::PayloadTooLarge(msg),
            BridgeError::UnsupportedMediaType(msg) => ApiError::UnsupportedMediaType(msg),
            BridgeError::Storage(msg) => ApiError::NotFound(format!("Document unavailable: {}", msg)),
            other => ApiError::ServiceUnavailable(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        use compliance_common::Error as CommonError;

        let (status, error_code, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", msg),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, "FORBIDDEN", msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg),
            ApiError::PayloadTooLarge(msg) => {
                (StatusCode::PAYLOAD_TOO_LARGE, "PAYLOAD_TOO_LARGE", msg)
            }
            ApiError::UnsupportedMediaType(msg) => (
                StatusCode::UNSUPPORTED_MEDIA_TYPE,
                "UNSUPPORTED_MEDIA_TYPE",
                msg,
            ),
            ApiError::ServiceUnavailable(msg) => {
                (StatusCode::SERVICE_UNAVAILABLE, "AI_SERVICE_UNAVAILABLE", msg)
            }
            ApiError::Internal(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                msg,
            ),
            ApiError::Common(err) => match err {
                CommonError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg),
                CommonError::InvalidInput(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg),
                CommonError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg),
                other => (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "COMMON_ERROR",
                    other.to_string(),
                ),
            },
        };

        if status.is_server_error() {
            tracing::error!(code = error_code, "{}", message);
        }

        let body = Json(json!({
            "error": {
                "code": error_code,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bridge_errors_map_to_distinct_statuses() {
        let too_large: ApiError = BridgeError::PayloadTooLarge("50MB".to_string()).into();
        assert_eq!(too_large.into_response().status(), StatusCode::PAYLOAD_TOO_LARGE);

        let unsupported: ApiError = BridgeError::UnsupportedMediaType("exe".to_string()).into();
        assert_eq!(
            unsupported.into_response().status(),
            StatusCode::UNSUPPORTED_MEDIA_TYPE
        );

        let network: ApiError = BridgeError::Network("refused".to_string()).into();
        assert_eq!(network.into_response().status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn test_common_conflict_maps_to_409() {
        let err: ApiError = compliance_common::Error::Conflict("busy".to_string()).into();
        assert_eq!(err.into_response().status(), StatusCode::CONFLICT);
    }
}
