use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use axum::http::HeaderMap;

use super::AuthError;
use crate::db::UserRepository;
use crate::models::user::User;
use crate::state::AppState;
use crate::utils::error::AppError;

/// Who the bearer token says the caller is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identity {
    /// Session token issued by this server after OTP login.
    Session { user_id: i64, email: String },
    /// Verified Firebase ID token. `email` is set only when the provider
    /// has verified it.
    External {
        subject: String,
        email: Option<String>,
    },
}

/// Any valid session or identity token. The user row may not exist yet.
#[derive(Debug, Clone)]
pub struct Authenticated(pub Identity);

/// The user row behind a valid token.
#[derive(Debug, Clone)]
pub struct CurrentUser(pub User);

/// A current user whose stored role is `admin`.
#[derive(Debug, Clone)]
pub struct AdminUser(pub User);

#[async_trait]
impl FromRequestParts<AppState> for Authenticated {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = bearer_token(&parts.headers)?;
        let identity = resolve_identity(state, token).await?;
        Ok(Authenticated(identity))
    }
}

#[async_trait]
impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let Authenticated(identity) = Authenticated::from_request_parts(parts, state).await?;
        let user = load_user(state, &identity)
            .await?
            .ok_or(AuthError::IdentityNotFound)?;
        Ok(CurrentUser(user))
    }
}

#[async_trait]
impl FromRequestParts<AppState> for AdminUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let CurrentUser(user) = CurrentUser::from_request_parts(parts, state).await?;
        if !user.is_admin() {
            tracing::warn!(user_id = user.id, "Non-admin attempted an admin operation");
            return Err(AuthError::Forbidden.into());
        }
        Ok(AdminUser(user))
    }
}

/// Extracts the token from `Authorization: Bearer <token>`.
pub fn bearer_token(headers: &HeaderMap) -> Result<&str, AuthError> {
    let value = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or(AuthError::NoCredential)?;

    let (scheme, token) = value.split_once(' ').ok_or(AuthError::NoCredential)?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return Err(AuthError::NoCredential);
    }

    let token = token.trim();
    if token.is_empty() {
        return Err(AuthError::NoCredential);
    }
    Ok(token)
}

/// Tries the session token first and falls back to the external identity
/// provider.
pub async fn resolve_identity(state: &AppState, token: &str) -> Result<Identity, AuthError> {
    let session_failure = match state.sessions().verify(token) {
        Ok(claims) => match claims.sub.parse::<i64>() {
            Ok(user_id) => {
                return Ok(Identity::Session {
                    user_id,
                    email: claims.email,
                })
            }
            Err(_) => "session subject is not a user id".to_string(),
        },
        Err(e) => e.to_string(),
    };

    let Some(verifier) = state.identity() else {
        return Err(AuthError::InvalidCredential(session_failure));
    };

    match verifier.verify(token).await {
        Ok(external) => Ok(Identity::External {
            subject: external.subject,
            email: external.email,
        }),
        Err(e) => {
            tracing::debug!(session = %session_failure, identity = %e, "Token rejected");
            Err(AuthError::InvalidCredential(
                "token is neither a valid session nor identity token".into(),
            ))
        }
    }
}

pub async fn load_user(state: &AppState, identity: &Identity) -> Result<Option<User>, AppError> {
    let users = UserRepository::new(state.pool());
    let user = match identity {
        Identity::Session { user_id, .. } => users.get_by_id(*user_id).await?,
        Identity::External { subject, .. } => users.get_by_firebase_id(subject).await?,
    };
    Ok(user)
}
