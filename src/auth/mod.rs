//! Authentication: email OTPs, signed session tokens, Firebase identity
//! tokens, and the axum extractors that gate the routes.

use axum::http::StatusCode;
use thiserror::Error;

pub mod gate;
pub mod identity;
pub mod otp;
pub mod session;

pub use gate::{AdminUser, Authenticated, CurrentUser, Identity};
pub use identity::FirebaseVerifier;
pub use otp::{MemoryOtpStore, OtpStore};
pub use session::SessionKeys;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Missing or malformed Authorization header")]
    NoCredential,

    #[error("Invalid credential: {0}")]
    InvalidCredential(String),

    #[error("Insufficient permissions")]
    Forbidden,

    #[error("No user profile exists for this identity")]
    IdentityNotFound,
}

impl AuthError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AuthError::NoCredential | AuthError::InvalidCredential(_) => StatusCode::UNAUTHORIZED,
            AuthError::Forbidden => StatusCode::FORBIDDEN,
            AuthError::IdentityNotFound => StatusCode::NOT_FOUND,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            AuthError::NoCredential => "NO_CREDENTIAL",
            AuthError::InvalidCredential(_) => "INVALID_CREDENTIAL",
            AuthError::Forbidden => "FORBIDDEN",
            AuthError::IdentityNotFound => "IDENTITY_NOT_FOUND",
        }
    }
}
