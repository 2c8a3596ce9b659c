use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::utils::error::AppError;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all(serialize = "camelCase"))]
pub struct Referral {
    pub id: i64,
    pub code: String,
    pub name: String,
    pub social_media: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReferralRequest {
    pub code: String,
    pub name: String,
    pub social_media: String,
}

impl ReferralRequest {
    /// Trims every field and rejects blanks.
    pub fn normalized(self) -> Result<Self, AppError> {
        let normalized = Self {
            code: self.code.trim().to_string(),
            name: self.name.trim().to_string(),
            social_media: self.social_media.trim().to_string(),
        };
        if normalized.code.is_empty() {
            return Err(AppError::invalid_field("code", "Referral code is required"));
        }
        if normalized.name.is_empty() {
            return Err(AppError::invalid_field("name", "Referral name is required"));
        }
        if normalized.social_media.is_empty() {
            return Err(AppError::invalid_field(
                "socialMedia",
                "Social media handle is required",
            ));
        }
        Ok(normalized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_referral_request_is_trimmed() {
        let request: ReferralRequest = serde_json::from_str(
            r#"{"code":" SPRING24 ","name":"Asha","socialMedia":"@asha"}"#,
        )
        .unwrap();
        let request = request.normalized().unwrap();
        assert_eq!(request.code, "SPRING24");
    }

    #[test]
    fn test_missing_social_media_is_rejected() {
        let request = ReferralRequest {
            code: "X".into(),
            name: "Y".into(),
            social_media: " ".into(),
        };
        match request.normalized() {
            Err(AppError::ValidationError { field, .. }) => assert_eq!(field, Some("socialMedia")),
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
