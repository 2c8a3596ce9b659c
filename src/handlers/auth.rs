use axum::extract::State;
use axum::response::Response;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::db::UserRepository;
use crate::models::user::{is_plausible_email, normalize_email, User};
use crate::services::Notification;
use crate::state::AppState;
use crate::utils::error::{AppError, AppResult};
use crate::utils::extract::ApiJson;
use crate::utils::response::success;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct SendOtpRequest {
    pub email: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct VerifyOtpRequest {
    pub email: String,
    pub otp: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct OtpIssued {
    email: String,
    expires_in_seconds: u64,
    /// Only outside production.
    #[serde(skip_serializing_if = "Option::is_none")]
    otp: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SessionPayload {
    token: String,
    expires_at: DateTime<Utc>,
    user: User,
}

pub async fn send_otp(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<SendOtpRequest>,
) -> AppResult<Response> {
    issue_otp(&state, &request.email).await
}

pub async fn resend_otp(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<SendOtpRequest>,
) -> AppResult<Response> {
    issue_otp(&state, &request.email).await
}

pub async fn verify_otp(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<VerifyOtpRequest>,
) -> AppResult<Response> {
    let email = valid_email(&request.email)?;
    let code = request.otp.trim();
    if code.is_empty() {
        return Err(AppError::invalid_field("otp", "OTP is required"));
    }

    state.otp().verify(&email, code).await?;

    let user = UserRepository::new(state.pool())
        .find_or_create_by_email(&email)
        .await?;
    let session = state
        .sessions()
        .issue(&user)
        .map_err(|e| AppError::InternalServerError(format!("failed to sign session token: {e}")))?;

    tracing::info!(user_id = user.id, "OTP verified, session issued");

    Ok(success(
        SessionPayload {
            token: session.token,
            expires_at: session.expires_at,
            user,
        },
        "OTP verified successfully",
    ))
}

async fn issue_otp(state: &AppState, raw_email: &str) -> AppResult<Response> {
    let email = valid_email(raw_email)?;
    let code = state.otp().issue(&email).await;

    state.notifier().notify(Notification::Otp {
        to: email.clone(),
        code: code.clone(),
    });
    tracing::info!(email = %email, "OTP issued");

    let payload = OtpIssued {
        email,
        expires_in_seconds: crate::auth::otp::OTP_TTL.as_secs(),
        otp: (!state.config().production).then_some(code),
    };
    Ok(success(payload, "OTP sent successfully"))
}

fn valid_email(raw: &str) -> Result<String, AppError> {
    let email = normalize_email(raw);
    if email.is_empty() {
        return Err(AppError::invalid_field("email", "Email is required"));
    }
    if !is_plausible_email(&email) {
        return Err(AppError::invalid_field("email", "Email address is invalid"));
    }
    Ok(email)
}
