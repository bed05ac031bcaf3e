use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::redact;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
    #[error("not found")]
    NotFound,
    #[error("unauthorized")]
    Unauthorized,
    #[error("forbidden")]
    Forbidden,
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("{0}")]
    RateLimited(String),
    #[error("failed to decrypt provider key")]
    Decryption,
    #[error("server misconfigured: {0}")]
    Misconfigured(&'static str),
    #[error("{0}")]
    Message(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match self {
            AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::Forbidden => StatusCode::FORBIDDEN,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            AppError::Db(_)
            | AppError::Decryption
            | AppError::Misconfigured(_)
            | AppError::Message(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        tracing::error!(?self);
        // Driver errors carry SQL fragments and connection details; clients
        // get a generic line instead.
        let message = match &self {
            AppError::Db(_) => "database error".to_string(),
            other => redact::scrub(&other.to_string()),
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_match_taxonomy() {
        let cases = [
            (AppError::NotFound, StatusCode::NOT_FOUND),
            (AppError::Unauthorized, StatusCode::UNAUTHORIZED),
            (AppError::Forbidden, StatusCode::FORBIDDEN),
            (
                AppError::BadRequest("api_key is required".into()),
                StatusCode::BAD_REQUEST,
            ),
            (
                AppError::RateLimited("limit reached".into()),
                StatusCode::TOO_MANY_REQUESTS,
            ),
            (AppError::Decryption, StatusCode::INTERNAL_SERVER_ERROR),
            (
                AppError::Misconfigured("PROVIDER_KEY_SECRET is not set"),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (error, expected) in cases {
            assert_eq!(error.into_response().status(), expected);
        }
    }
}
