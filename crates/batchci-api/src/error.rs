//! API error handling.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use tracing::error;

/// API error type.
#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Unauthorized(String),
    Forbidden(String),
    Conflict(String),
    BadGateway(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::BadGateway(msg) => (StatusCode::BAD_GATEWAY, msg),
            ApiError::Internal(msg) => {
                error!(error = %msg, "Request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };

        let body = Json(json!({
            "error": message
        }));

        (status, body).into_response()
    }
}

impl From<batchci_core::Error> for ApiError {
    fn from(err: batchci_core::Error) -> Self {
        use batchci_core::Error;

        let message = err.to_string();
        match err {
            Error::MissingSecret | Error::SecretMismatch | Error::Unauthorized(_) => {
                ApiError::Forbidden(message)
            }
            Error::NotFound(_) => ApiError::NotFound(message),
            Error::BuildTaskMissing { .. }
            | Error::RemoteJobMissing(_)
            | Error::PoolNotFound(_)
            | Error::BuildArtifactNotFound(_)
            | Error::InvalidInput(_) => ApiError::BadRequest(message),
            Error::Conflict(_) => ApiError::Conflict(message),
            Error::Remote(_) => ApiError::BadGateway(message),
            Error::Storage(_) | Error::Internal(_) => ApiError::Internal(message),
        }
    }
}

impl From<batchci_db::DbError> for ApiError {
    fn from(err: batchci_db::DbError) -> Self {
        batchci_core::Error::from(err).into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use batchci_core::Error;

    fn status(err: Error) -> StatusCode {
        ApiError::from(err).into_response().status()
    }

    #[test]
    fn test_core_error_status_mapping() {
        assert_eq!(status(Error::MissingSecret), StatusCode::FORBIDDEN);
        assert_eq!(status(Error::SecretMismatch), StatusCode::FORBIDDEN);
        assert_eq!(status(Error::NotFound("x".into())), StatusCode::NOT_FOUND);
        assert_eq!(
            status(Error::BuildTaskMissing {
                job: "abc".into(),
                task: "build".into()
            }),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(status(Error::RemoteJobMissing("abc".into())), StatusCode::BAD_REQUEST);
        assert_eq!(status(Error::PoolNotFound("build".into())), StatusCode::BAD_REQUEST);
        assert_eq!(status(Error::Conflict("x".into())), StatusCode::CONFLICT);
        assert_eq!(status(Error::Remote("x".into())), StatusCode::BAD_GATEWAY);
        assert_eq!(status(Error::Storage("x".into())), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_db_not_found_is_404() {
        let err = ApiError::from(batchci_db::DbError::NotFound("build abc".into()));
        assert_eq!(err.into_response().status(), StatusCode::NOT_FOUND);
    }
}
