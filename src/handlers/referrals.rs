use axum::extract::State;
use axum::response::Response;
use serde::{Deserialize, Serialize};

use crate::auth::{AdminUser, Authenticated};
use crate::db::ReferralRepository;
use crate::models::referral::{Referral, ReferralRequest};
use crate::state::AppState;
use crate::utils::error::{AppError, AppResult};
use crate::utils::extract::{ApiJson, ApiPath, ApiQuery};
use crate::utils::response::{created, empty_success, success};

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CheckReferralQuery {
    pub referral_code: String,
}

#[derive(Serialize)]
struct ReferralLookup {
    found: bool,
    referral: Referral,
}

pub async fn list_referrals(
    State(state): State<AppState>,
    _identity: Authenticated,
) -> AppResult<Response> {
    let referrals = ReferralRepository::new(state.pool()).list().await?;
    Ok(success(referrals, "Referrals retrieved successfully"))
}

pub async fn get_referral(
    State(state): State<AppState>,
    _identity: Authenticated,
    ApiPath(id): ApiPath<i64>,
) -> AppResult<Response> {
    let referral = ReferralRepository::new(state.pool())
        .get_by_id(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Referral {id} not found")))?;
    Ok(success(referral, "Referral retrieved successfully"))
}

/// Public lookup used by the booking form before login.
pub async fn check_referral(
    State(state): State<AppState>,
    ApiQuery(query): ApiQuery<CheckReferralQuery>,
) -> AppResult<Response> {
    let code = query.referral_code.trim();
    if code.is_empty() {
        return Err(AppError::invalid_field(
            "referralCode",
            "Referral code is required",
        ));
    }

    let referral = ReferralRepository::new(state.pool())
        .get_by_code(code)
        .await?
        .ok_or_else(|| AppError::NotFound("Referral code not found".into()))?;

    Ok(success(
        ReferralLookup {
            found: true,
            referral,
        },
        "Referral code is valid",
    ))
}

pub async fn create_referral(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    ApiJson(request): ApiJson<ReferralRequest>,
) -> AppResult<Response> {
    let request = request.normalized()?;
    let referral = ReferralRepository::new(state.pool()).create(&request).await?;
    tracing::info!(admin_id = admin.id, referral_id = referral.id, code = %referral.code, "Referral created");

    Ok(created(referral, "Referral created successfully"))
}

pub async fn update_referral(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    ApiPath(id): ApiPath<i64>,
    ApiJson(request): ApiJson<ReferralRequest>,
) -> AppResult<Response> {
    let request = request.normalized()?;
    let referral = ReferralRepository::new(state.pool())
        .update(id, &request)
        .await?;
    tracing::info!(admin_id = admin.id, referral_id = id, "Referral updated");

    Ok(success(referral, "Referral updated successfully"))
}

pub async fn delete_referral(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    ApiPath(id): ApiPath<i64>,
) -> AppResult<Response> {
    ReferralRepository::new(state.pool()).delete(id).await?;
    tracing::info!(admin_id = admin.id, referral_id = id, "Referral deleted");

    Ok(empty_success("Referral deleted successfully"))
}
