use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;
use tracing::{error, warn};

use crate::auth::otp::OtpError;
use crate::auth::AuthError;
use crate::db::RepositoryError;
use crate::services::payments::PaymentError;
use crate::services::youtube::YoutubeError;
use crate::utils::response::error as error_response;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Validation error: {message}")]
    ValidationError {
        field: Option<&'static str>,
        message: String,
    },

    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Could not generate a unique {0}")]
    IdentifierExhausted(&'static str),

    #[error("Database error")]
    DatabaseError(#[from] sqlx::Error),

    #[error("External service error: {0}")]
    ExternalServiceError(String),

    #[error("Internal server error")]
    InternalServerError(String),
}

impl AppError {
    pub fn validation(message: impl Into<String>) -> Self {
        AppError::ValidationError {
            field: None,
            message: message.into(),
        }
    }

    pub fn invalid_field(field: &'static str, message: impl Into<String>) -> Self {
        AppError::ValidationError {
            field: Some(field),
            message: message.into(),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::ValidationError { .. } => StatusCode::BAD_REQUEST,
            AppError::Auth(err) => err.status_code(),
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::IdentifierExhausted(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::DatabaseError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::ExternalServiceError(_) => StatusCode::BAD_GATEWAY,
            AppError::InternalServerError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            AppError::ValidationError { .. } => "VALIDATION_ERROR",
            AppError::Auth(err) => err.code(),
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::Conflict(_) => "CONFLICT",
            AppError::IdentifierExhausted(_) => "IDENTIFIER_EXHAUSTED",
            AppError::DatabaseError(_) => "DATABASE_ERROR",
            AppError::ExternalServiceError(_) => "UPSTREAM_ERROR",
            AppError::InternalServerError(_) => "INTERNAL_SERVER_ERROR",
        }
    }

    fn log(&self) {
        match self {
            AppError::ValidationError { message, .. } => {
                warn!(code = self.code(), message = %message, "Rejected request");
            }
            AppError::Auth(err) => {
                warn!(code = self.code(), error = %err, "Authentication failed");
            }
            AppError::NotFound(msg) | AppError::Conflict(msg) => {
                warn!(code = self.code(), message = %msg, "Request failed");
            }
            AppError::ExternalServiceError(msg) | AppError::InternalServerError(msg) => {
                error!(error = ?self, message = %msg, "Application error");
            }
            AppError::IdentifierExhausted(kind) => {
                error!(kind = %kind, "Identifier retries exhausted");
            }
            AppError::DatabaseError(e) => {
                error!(error = ?e, "Database error");
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.code();

        self.log();

        let (public_message, details) = match &self {
            AppError::ValidationError { field, message } => {
                (message.clone(), field.map(|f| json!({ "field": f })))
            }
            AppError::Auth(err) => (err.to_string(), None),
            AppError::NotFound(msg)
            | AppError::Conflict(msg)
            | AppError::ExternalServiceError(msg) => (msg.clone(), None),
            AppError::IdentifierExhausted(_) => (self.to_string(), None),
            AppError::DatabaseError(_) => ("A database error occurred".to_string(), None),
            AppError::InternalServerError(_) => ("Internal server error".to_string(), None),
        };

        error_response(code, public_message, details, status)
    }
}

impl From<RepositoryError> for AppError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::Database(e) => AppError::DatabaseError(e),
            RepositoryError::NotFound(what) => AppError::NotFound(what),
            RepositoryError::Conflict(what) => AppError::Conflict(what),
            RepositoryError::IdentifierExhausted(kind) => AppError::IdentifierExhausted(kind),
            RepositoryError::InsufficientTickets { requested, available } => {
                AppError::invalid_field(
                    "ticketCount",
                    format!("Only {available} tickets available, {requested} requested"),
                )
            }
        }
    }
}

impl From<OtpError> for AppError {
    fn from(err: OtpError) -> Self {
        AppError::invalid_field("otp", err.to_string())
    }
}

impl From<PaymentError> for AppError {
    fn from(err: PaymentError) -> Self {
        match err {
            PaymentError::InvalidSignature(reason) => {
                AppError::Auth(AuthError::InvalidCredential(reason))
            }
            other => AppError::ExternalServiceError(format!("Payment provider error: {other}")),
        }
    }
}

impl From<YoutubeError> for AppError {
    fn from(err: YoutubeError) -> Self {
        AppError::ExternalServiceError(format!("Failed to check subscription: {err}"))
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    async fn error_body(err: AppError) -> (StatusCode, serde_json::Value) {
        let response = err.into_response();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[test]
    fn test_status_codes_follow_taxonomy() {
        assert_eq!(
            AppError::validation("bad").status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::Auth(AuthError::NoCredential).status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            AppError::Auth(AuthError::Forbidden).status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            AppError::NotFound("booking".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            AppError::IdentifierExhausted("booking number").status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            AppError::ExternalServiceError("down".into()).status_code(),
            StatusCode::BAD_GATEWAY
        );
    }

    #[tokio::test]
    async fn test_field_error_exposes_field_in_details() {
        let (status, body) =
            error_body(AppError::invalid_field("price", "Ticket price must be greater than 0"))
                .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
        assert_eq!(body["error"]["details"]["field"], "price");
    }

    #[tokio::test]
    async fn test_database_error_is_not_exposed() {
        let (status, body) = error_body(AppError::DatabaseError(sqlx::Error::PoolClosed)).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"]["code"], "DATABASE_ERROR");
        assert_eq!(body["error"]["message"], "A database error occurred");
    }

    #[tokio::test]
    async fn test_upstream_error_keeps_provider_text() {
        let (status, body) =
            error_body(PaymentError::Api { status: 400, message: "link_amount invalid".into() }.into())
                .await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body["error"]["code"], "UPSTREAM_ERROR");
        assert!(body["error"]["message"]
            .as_str()
            .unwrap()
            .contains("link_amount invalid"));
    }

    #[test]
    fn test_repository_errors_map_to_app_errors() {
        let err: AppError = RepositoryError::NotFound("ticket 4".into()).into();
        assert_eq!(err.code(), "NOT_FOUND");

        let err: AppError = RepositoryError::IdentifierExhausted("user code").into();
        assert_eq!(err.code(), "IDENTIFIER_EXHAUSTED");

        let err: AppError = RepositoryError::InsufficientTickets {
            requested: 5,
            available: 2,
        }
        .into();
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
    }
}
