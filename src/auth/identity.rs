//! Firebase ID token verification against Google's published signing keys.

use std::sync::Arc;
use std::time::Duration;

use jsonwebtoken::jwk::JwkSet;
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use moka::future::Cache;
use serde::Deserialize;
use thiserror::Error;

const GOOGLE_JWKS_URL: &str =
    "https://www.googleapis.com/service_accounts/v1/jwk/securetoken@system.gserviceaccount.com";
const ISSUER_PREFIX: &str = "https://securetoken.google.com/";
const JWKS_CACHE_TTL: Duration = Duration::from_secs(60 * 60);
const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("malformed token: {0}")]
    Malformed(String),

    #[error("unknown signing key: {0}")]
    UnknownKey(String),

    #[error("failed to fetch signing keys: {0}")]
    KeyFetch(String),

    #[error("token rejected: {0}")]
    Rejected(#[from] jsonwebtoken::errors::Error),

    #[error("token has no subject")]
    MissingSubject,
}

#[derive(Debug, Deserialize)]
struct FirebaseClaims {
    sub: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    email_verified: bool,
}

impl FirebaseClaims {
    /// The email only counts when the provider has verified it.
    fn verified_email(self) -> Option<String> {
        self.email.filter(|_| self.email_verified)
    }
}

/// A verified external identity.
#[derive(Debug, Clone)]
pub struct ExternalIdentity {
    pub subject: String,
    /// Present only when the token carries `email_verified: true`.
    pub email: Option<String>,
}

pub struct FirebaseVerifier {
    project_id: String,
    http: reqwest::Client,
    jwks_url: String,
    keys: Cache<(), Arc<JwkSet>>,
}

impl FirebaseVerifier {
    pub fn new(project_id: impl Into<String>) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder().timeout(HTTP_TIMEOUT).build()?;
        Ok(Self {
            project_id: project_id.into(),
            http,
            jwks_url: GOOGLE_JWKS_URL.to_string(),
            keys: Cache::builder()
                .max_capacity(1)
                .time_to_live(JWKS_CACHE_TTL)
                .build(),
        })
    }

    pub async fn verify(&self, token: &str) -> Result<ExternalIdentity, IdentityError> {
        let header = decode_header(token).map_err(|e| IdentityError::Malformed(e.to_string()))?;
        let kid = header
            .kid
            .ok_or_else(|| IdentityError::Malformed("missing key id".into()))?;

        let key_set = self.key_set().await?;
        let jwk = key_set
            .find(&kid)
            .ok_or_else(|| IdentityError::UnknownKey(kid.clone()))?;
        let key = DecodingKey::from_jwk(jwk)?;

        let claims = decode::<FirebaseClaims>(token, &key, &self.validation())?.claims;
        if claims.sub.trim().is_empty() {
            return Err(IdentityError::MissingSubject);
        }

        let subject = claims.sub.clone();
        Ok(ExternalIdentity {
            subject,
            email: claims.verified_email(),
        })
    }

    fn validation(&self) -> Validation {
        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_audience(&[&self.project_id]);
        validation.set_issuer(&[format!("{ISSUER_PREFIX}{}", self.project_id)]);
        validation
    }

    async fn key_set(&self) -> Result<Arc<JwkSet>, IdentityError> {
        self.keys
            .try_get_with((), async {
                tracing::debug!("Fetching identity provider signing keys");
                let key_set = self
                    .http
                    .get(&self.jwks_url)
                    .send()
                    .await?
                    .error_for_status()?
                    .json::<JwkSet>()
                    .await?;
                Ok::<_, reqwest::Error>(Arc::new(key_set))
            })
            .await
            .map_err(|e| IdentityError::KeyFetch(e.to_string()))
    }
}
