use axum::extract::State;
use axum::response::Response;

use crate::auth::{AdminUser, Authenticated, CurrentUser, Identity};
use crate::db::{RepositoryError, UserRepository};
use crate::models::user::{is_plausible_email, normalize_email, NewUser, UserProfileRequest};
use crate::state::AppState;
use crate::utils::error::{AppError, AppResult};
use crate::utils::extract::{ApiJson, ApiPath};
use crate::utils::response::{created, empty_success, success};

pub async fn get_current_user(CurrentUser(user): CurrentUser) -> AppResult<Response> {
    Ok(success(user, "User retrieved successfully"))
}

/// Creates the profile for a verified identity that has no user row yet.
/// An OTP-created row is claimed by the external identity only when the
/// token itself carries that verified email; a body email never links rows.
pub async fn create_user(
    State(state): State<AppState>,
    Authenticated(identity): Authenticated,
    ApiJson(profile): ApiJson<UserProfileRequest>,
) -> AppResult<Response> {
    let users = UserRepository::new(state.pool());

    if crate::auth::gate::load_user(&state, &identity).await?.is_some() {
        return Err(AppError::Conflict("User profile already exists".into()));
    }

    let Identity::External { subject, email } = identity else {
        // Session identities always point at an existing row.
        return Err(AppError::Conflict("User profile already exists".into()));
    };

    let ProfileEmail { email, verified } =
        profile_email(email.as_deref(), profile.email.as_deref())?;

    if let Some(mut existing) = users.get_by_email(&email).await? {
        if !verified {
            return Err(AppError::Conflict(
                "Email is already registered to another account".into(),
            ));
        }
        let linked = users
            .link_firebase_id(existing.id, &subject)
            .await
            .map_err(|e| match e {
                RepositoryError::Conflict(_) => {
                    AppError::Conflict("Email is already registered to another account".into())
                }
                other => other.into(),
            })?;
        existing = linked;
        existing.apply_profile(profile);
        let user = users.update(&existing).await?;
        tracing::info!(user_id = user.id, "Linked external identity to existing user");
        return Ok(created(user, "User created successfully"));
    }

    let user = users
        .create(&NewUser {
            firebase_id: Some(subject),
            email,
            profile,
        })
        .await?;
    tracing::info!(user_id = user.id, user_code = %user.user_code, "User created");

    Ok(created(user, "User created successfully"))
}

#[derive(Debug, PartialEq, Eq)]
struct ProfileEmail {
    email: String,
    /// Whether the identity provider vouches for `email`.
    verified: bool,
}

/// Picks the email for a new profile. The token's verified email wins and a
/// different body email is rejected; without one, the body email may only
/// ever create a fresh row.
fn profile_email(token_email: Option<&str>, body_email: Option<&str>) -> Result<ProfileEmail, AppError> {
    let token_email = token_email.map(normalize_email).filter(|e| !e.is_empty());
    let body_email = body_email.map(normalize_email).filter(|e| !e.is_empty());

    let (email, verified) = match (token_email, body_email) {
        (Some(token), Some(body)) if token != body => {
            return Err(AppError::invalid_field(
                "email",
                "Email must match the signed-in account",
            ));
        }
        (Some(token), _) => (token, true),
        (None, Some(body)) => (body, false),
        (None, None) => return Err(AppError::invalid_field("email", "Email is required")),
    };

    if !is_plausible_email(&email) {
        return Err(AppError::invalid_field("email", "Email address is invalid"));
    }
    Ok(ProfileEmail { email, verified })
}

/// Self-service update. The role is forced back to `user`.
pub async fn update_user(
    State(state): State<AppState>,
    CurrentUser(mut user): CurrentUser,
    ApiJson(profile): ApiJson<UserProfileRequest>,
) -> AppResult<Response> {
    if let Some(email) = profile.email.as_deref() {
        if normalize_email(email) != user.email {
            return Err(AppError::invalid_field("email", "Email cannot be changed"));
        }
    }

    user.apply_profile(profile);
    let user = UserRepository::new(state.pool()).update(&user).await?;

    Ok(success(user, "User updated successfully"))
}

pub async fn get_user_by_code(
    State(state): State<AppState>,
    CurrentUser(caller): CurrentUser,
    ApiPath(user_code): ApiPath<String>,
) -> AppResult<Response> {
    if caller.user_code != user_code && !caller.is_admin() {
        return Err(crate::auth::AuthError::Forbidden.into());
    }

    let user = UserRepository::new(state.pool())
        .get_by_code(&user_code)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("User {user_code} not found")))?;

    Ok(success(user, "User retrieved successfully"))
}

pub async fn list_users(
    State(state): State<AppState>,
    AdminUser(_admin): AdminUser,
) -> AppResult<Response> {
    let users = UserRepository::new(state.pool()).list().await?;
    Ok(success(users, "Users retrieved successfully"))
}

pub async fn delete_user(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    ApiPath(user_code): ApiPath<String>,
) -> AppResult<Response> {
    UserRepository::new(state.pool())
        .delete_by_code(&user_code)
        .await?;
    tracing::info!(admin_id = admin.id, user_code = %user_code, "User deleted");

    Ok(empty_success("User deleted successfully"))
}
