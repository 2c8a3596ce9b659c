use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::Response;
use serde::{Deserialize, Serialize};

use crate::auth::Authenticated;
use crate::config::cors::GOOGLE_ACCESS_TOKEN_HEADER;
use crate::state::AppState;
use crate::utils::error::{AppError, AppResult};
use crate::utils::extract::ApiQuery;
use crate::utils::response::success;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SubscriptionQuery {
    pub channel_id: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SubscriptionStatus {
    is_subscribed: bool,
}

/// Checks whether the caller's Google account subscribes to `channelId`.
/// The caller passes a Google OAuth access token with the YouTube read
/// scope in `X-Google-Access-Token`.
pub async fn check_subscription(
    State(state): State<AppState>,
    _caller: Authenticated,
    headers: HeaderMap,
    ApiQuery(query): ApiQuery<SubscriptionQuery>,
) -> AppResult<Response> {
    let channel_id = query.channel_id.trim();
    if channel_id.is_empty() {
        return Err(AppError::invalid_field("channelId", "Channel ID is required"));
    }

    let access_token = headers
        .get(GOOGLE_ACCESS_TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| {
            AppError::invalid_field(
                "X-Google-Access-Token",
                "Google access token is required. Sign in with Google and grant the \
                 YouTube read-only scope, then send the access token in the \
                 X-Google-Access-Token header",
            )
        })?;

    let is_subscribed = state
        .youtube()
        .is_subscribed(access_token, channel_id)
        .await?;
    tracing::info!(channel_id = %channel_id, is_subscribed, "Checked YouTube subscription");

    Ok(success(
        SubscriptionStatus { is_subscribed },
        "Subscription status checked successfully",
    ))
}
