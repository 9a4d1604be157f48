use crate::services::SessionError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Application error types.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error(transparent)]
    Session(#[from] SessionError),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            AppError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            AppError::Session(SessionError::MissingCredentials(_)) => {
                (StatusCode::SERVICE_UNAVAILABLE, "SESSION_UNAVAILABLE")
            }
            AppError::Session(SessionError::Upstream(_)) => (StatusCode::BAD_GATEWAY, "SESSION_FAILED"),
        };

        let body = Json(json!({
            "error": self.to_string(),
            "code": code,
        }));

        (status, body).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(
            AppError::BadRequest("x".to_string()).into_response().status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::Session(SessionError::MissingCredentials("key".to_string()))
                .into_response()
                .status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            AppError::Session(SessionError::Upstream("503".to_string()))
                .into_response()
                .status(),
            StatusCode::BAD_GATEWAY
        );
    }
}
