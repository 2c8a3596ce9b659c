//! YouTube Data API v3 subscription lookup on behalf of a user.

use std::time::Duration;

use serde::de::IgnoredAny;
use serde::Deserialize;
use thiserror::Error;

const YOUTUBE_API_URL: &str = "https://www.googleapis.com/youtube/v3";
const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum YoutubeError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("YouTube API error ({status}): {message}")]
    Api { status: u16, message: String },
}

#[derive(Debug, Deserialize)]
struct ListResponse<T> {
    #[serde(default = "Vec::new")]
    items: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct ChannelItem {
    id: String,
}

#[derive(Debug, Deserialize)]
struct GoogleErrorBody {
    error: GoogleError,
}

#[derive(Debug, Deserialize)]
struct GoogleError {
    message: String,
}

#[derive(Clone)]
pub struct YoutubeClient {
    http: reqwest::Client,
    base_url: String,
}

impl YoutubeClient {
    pub fn new() -> Result<Self, YoutubeError> {
        Self::with_base_url(YOUTUBE_API_URL)
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Result<Self, YoutubeError> {
        Ok(Self {
            http: reqwest::Client::builder().timeout(HTTP_TIMEOUT).build()?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// Whether the owner of `access_token` subscribes to `channel_id`.
    /// A Google account without a YouTube channel subscribes to nothing.
    pub async fn is_subscribed(
        &self,
        access_token: &str,
        channel_id: &str,
    ) -> Result<bool, YoutubeError> {
        let channels: ListResponse<ChannelItem> = self
            .get(access_token, "channels", &[("part", "id"), ("mine", "true")])
            .await?;

        let Some(own_channel) = channels.items.into_iter().next() else {
            tracing::debug!(target_channel = %channel_id, "Caller has no YouTube channel");
            return Ok(false);
        };

        let subscriptions: ListResponse<IgnoredAny> = self
            .get(
                access_token,
                "subscriptions",
                &[
                    ("part", "snippet"),
                    ("channelId", own_channel.id.as_str()),
                    ("forChannelId", channel_id),
                ],
            )
            .await?;

        Ok(!subscriptions.items.is_empty())
    }

    async fn get<T: serde::de::DeserializeOwned>(
        &self,
        access_token: &str,
        resource: &str,
        query: &[(&str, &str)],
    ) -> Result<T, YoutubeError> {
        let response = self
            .http
            .get(format!("{}/{resource}", self.base_url))
            .bearer_auth(access_token)
            .query(query)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(YoutubeError::Api {
                status: status.as_u16(),
                message: api_error_message(&body),
            });
        }

        Ok(response.json::<T>().await?)
    }
}

fn api_error_message(body: &str) -> String {
    serde_json::from_str::<GoogleErrorBody>(body)
        .map(|b| b.error.message)
        .unwrap_or_else(|_| body.to_string())
}
