//! Error types for the account service and their HTTP mapping

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use common::error::DatabaseError;
use serde_json::json;
use thiserror::Error;
use tracing::error;

use crate::models::UnknownAuthority;

/// Failures surfaced by account operations. Missing users are not errors:
/// operations that look one up return `Ok(None)` instead.
#[derive(Error, Debug)]
pub enum AccountError {
    #[error("Login name already used")]
    LoginAlreadyUsed,

    #[error("Email is already in use")]
    EmailAlreadyUsed,

    /// New password outside the accepted length
    #[error("Incorrect password")]
    InvalidPassword,

    #[error("Current password is incorrect")]
    InvalidCurrentPassword,

    #[error("Unknown authority: {0}")]
    UnknownAuthority(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Password hashing failed: {0}")]
    Hashing(String),

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

impl From<UnknownAuthority> for AccountError {
    fn from(err: UnknownAuthority) -> Self {
        AccountError::UnknownAuthority(err.0)
    }
}

/// Errors returned by the HTTP handlers
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error(transparent)]
    Account(#[from] AccountError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg),
            ApiError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "unauthorized",
                "Missing or invalid admin token".to_string(),
            ),
            ApiError::Account(err) => match err {
                AccountError::LoginAlreadyUsed => (
                    StatusCode::BAD_REQUEST,
                    "login_already_used",
                    err.to_string(),
                ),
                AccountError::EmailAlreadyUsed => (
                    StatusCode::BAD_REQUEST,
                    "email_already_used",
                    err.to_string(),
                ),
                AccountError::InvalidPassword => {
                    (StatusCode::BAD_REQUEST, "invalid_password", err.to_string())
                }
                AccountError::InvalidCurrentPassword => (
                    StatusCode::BAD_REQUEST,
                    "invalid_current_password",
                    err.to_string(),
                ),
                AccountError::UnknownAuthority(_) | AccountError::Validation(_) => {
                    (StatusCode::BAD_REQUEST, "validation_failed", err.to_string())
                }
                AccountError::Hashing(_) | AccountError::Database(_) => {
                    error!("Account operation failed: {}", err);
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "internal_error",
                        "Internal server error".to_string(),
                    )
                }
            },
        };

        let body = Json(json!({
            "error": code,
            "message": message,
        }));

        (status, body).into_response()
    }
}

impl From<DatabaseError> for ApiError {
    fn from(err: DatabaseError) -> Self {
        ApiError::Account(AccountError::Database(err))
    }
}

/// Type alias for API results
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    #[test]
    fn test_account_errors_map_to_statuses() {
        let cases = [
            (AccountError::LoginAlreadyUsed, StatusCode::BAD_REQUEST),
            (AccountError::EmailAlreadyUsed, StatusCode::BAD_REQUEST),
            (AccountError::InvalidPassword, StatusCode::BAD_REQUEST),
            (AccountError::InvalidCurrentPassword, StatusCode::BAD_REQUEST),
            (
                AccountError::UnknownAuthority("ROLE_ROOT".to_string()),
                StatusCode::BAD_REQUEST,
            ),
            (
                AccountError::Database(DatabaseError::Migration("boom".to_string())),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (err, status) in cases {
            assert_eq!(ApiError::from(err).into_response().status(), status);
        }
    }

    async fn error_code(err: ApiError) -> String {
        let body = err.into_response().into_body().collect().await.unwrap().to_bytes();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        value["error"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn test_password_errors_have_distinct_codes() {
        let wrong_current = error_code(AccountError::InvalidCurrentPassword.into()).await;
        let bad_new = error_code(AccountError::InvalidPassword.into()).await;
        assert_eq!(wrong_current, "invalid_current_password");
        assert_eq!(bad_new, "invalid_password");
    }

    #[tokio::test]
    async fn test_unauthorized() {
        let response = ApiError::Unauthorized.into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(error_code(ApiError::Unauthorized).await, "unauthorized");
    }

    #[test]
    fn test_not_found() {
        let response = ApiError::NotFound("gone".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
