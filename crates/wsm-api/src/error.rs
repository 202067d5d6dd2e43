use axum::http::header::RETRY_AFTER;
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Invalid request: {0}")]
    BadRequest(String),
    #[error("Unauthorized: {0}")]
    Unauthorized(String),
    #[error("Forbidden: {0}")]
    Forbidden(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Too many requests: {0}")]
    TooManyRequests(String, u64),
    #[error("Internal server error: {0}")]
    Internal(String),
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

impl AppError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::Forbidden(message.into())
    }

    pub fn too_many_requests(message: impl Into<String>, retry_after_secs: u64) -> Self {
        Self::TooManyRequests(message.into(), retry_after_secs)
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::TooManyRequests(_, _) => StatusCode::TOO_MANY_REQUESTS,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<wsm_core::Error> for AppError {
    fn from(error: wsm_core::Error) -> Self {
        match error {
            wsm_core::Error::NotFound(message) => Self::NotFound(message),
            wsm_core::Error::Forbidden(message) => Self::Forbidden(message),
            wsm_core::Error::InvalidTransition(message) => Self::Conflict(message),
            wsm_core::Error::InvalidInput(message) => Self::BadRequest(message),
            wsm_core::Error::Serialization(error) => Self::BadRequest(error.to_string()),
            other => {
                tracing::error!("Persistence failure: {}", other);
                Self::Internal("persistence failure".to_string())
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let retry_after = match &self {
            Self::TooManyRequests(_, secs) => HeaderValue::from_str(&secs.to_string()).ok(),
            _ => None,
        };
        let body = ErrorBody {
            error: self.to_string(),
        };
        let mut response = (status, Json(body)).into_response();
        if let Some(value) = retry_after {
            response.headers_mut().insert(RETRY_AFTER, value);
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn core_errors_map_to_statuses() {
        let cases = [
            (wsm_core::Error::NotFound("s".into()), StatusCode::NOT_FOUND),
            (wsm_core::Error::Forbidden("s".into()), StatusCode::FORBIDDEN),
            (
                wsm_core::Error::InvalidTransition("s".into()),
                StatusCode::CONFLICT,
            ),
            (
                wsm_core::Error::InvalidInput("s".into()),
                StatusCode::BAD_REQUEST,
            ),
            (
                wsm_core::Error::Database("disk".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (error, status) in cases {
            assert_eq!(AppError::from(error).status(), status);
        }
    }

    #[test]
    fn internal_errors_hide_details() {
        let error = AppError::from(wsm_core::Error::Database("/var/lib/wsm.db locked".into()));
        assert!(!error.to_string().contains("/var/lib"));
    }

    #[test]
    fn rate_limited_response_carries_retry_after() {
        let response = AppError::too_many_requests("slow down", 42).into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            response.headers().get(RETRY_AFTER),
            Some(&HeaderValue::from_static("42"))
        );
    }
}
