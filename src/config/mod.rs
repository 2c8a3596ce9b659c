//! Server configuration loaded from environment variables.
//!
//! Required: `DATABASE_URL`, `JWT_SECRET`.
//! Everything else has a development default or switches an integration
//! off when absent (payments, Firebase identity, SendGrid).

use std::env;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use secrecy::SecretString;
use thiserror::Error;

pub mod cors;
pub mod security;

pub use cors::create_cors_layer;
pub use security::create_security_headers_layer;

const MIN_JWT_SECRET_LEN: usize = 32;
const DEFAULT_CASHFREE_API_URL: &str = "https://sandbox.cashfree.com/pg";
const DEFAULT_CASHFREE_API_VERSION: &str = "2025-01-01";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: SecretString,
    pub host: IpAddr,
    pub port: u16,
    /// `RUST_ENV=production`: enables HSTS and hides OTP codes from responses.
    pub production: bool,
    pub frontend_url: String,
    /// Comma separated list; `*` allows any origin.
    pub cors_allowed_origins: String,
    pub session: SessionConfig,
    pub firebase_project_id: Option<String>,
    pub payments: Option<PaymentConfig>,
    pub email: EmailConfig,
    pub event: EventDetails,
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub secret: SecretString,
    pub ttl: Duration,
}

/// Cashfree Payment Links credentials and redirect targets.
#[derive(Debug, Clone)]
pub struct PaymentConfig {
    pub client_id: String,
    pub client_secret: SecretString,
    pub api_url: String,
    pub api_version: String,
    pub webhook_secret: Option<SecretString>,
    pub notify_url: String,
    pub return_url: String,
    pub currency: String,
}

#[derive(Debug, Clone)]
pub struct EmailConfig {
    /// Without a key, emails are written to the log instead of sent.
    pub sendgrid_api_key: Option<SecretString>,
    pub from_email: String,
    pub from_name: String,
}

/// Event facts rendered into confirmation emails.
#[derive(Debug, Clone)]
pub struct EventDetails {
    pub name: String,
    pub date: String,
    pub location: String,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();

        let host = env_or("HOST", "0.0.0.0")
            .parse::<IpAddr>()
            .map_err(|e| ConfigError::InvalidEnvVar("HOST".into(), e.to_string()))?;
        let port = env_or("PORT", "8000")
            .parse::<u16>()
            .map_err(|e| ConfigError::InvalidEnvVar("PORT".into(), e.to_string()))?;

        Ok(Self {
            database_url: SecretString::from(required("DATABASE_URL")?),
            host,
            port,
            production: env::var("RUST_ENV")
                .map(|v| v.eq_ignore_ascii_case("production"))
                .unwrap_or(false),
            frontend_url: env_or("FRONTEND_URL", "http://localhost:3000")
                .trim_end_matches('/')
                .to_string(),
            cors_allowed_origins: env_or("CORS_ALLOWED_ORIGINS", cors::DEFAULT_ALLOWED_ORIGINS),
            session: SessionConfig::from_env()?,
            firebase_project_id: optional("FIREBASE_PROJECT_ID"),
            payments: PaymentConfig::from_env()?,
            email: EmailConfig::from_env(),
            event: EventDetails::from_env(),
        })
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

impl SessionConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let secret = required("JWT_SECRET")?;
        if secret.len() < MIN_JWT_SECRET_LEN {
            return Err(ConfigError::InvalidEnvVar(
                "JWT_SECRET".into(),
                format!("must be at least {MIN_JWT_SECRET_LEN} characters"),
            ));
        }
        let hours = env_or("SESSION_TTL_HOURS", "24")
            .parse::<u64>()
            .map_err(|e| ConfigError::InvalidEnvVar("SESSION_TTL_HOURS".into(), e.to_string()))?;

        Ok(Self {
            secret: SecretString::from(secret),
            ttl: Duration::from_secs(hours * 3600),
        })
    }
}

impl PaymentConfig {
    /// Returns `None` when the client credentials are not configured.
    fn from_env() -> Result<Option<Self>, ConfigError> {
        let (Some(client_id), Some(client_secret)) = (
            optional("CASHFREE_CLIENT_ID"),
            optional("CASHFREE_CLIENT_SECRET"),
        ) else {
            tracing::warn!("Cashfree credentials not set, payment links disabled");
            return Ok(None);
        };

        Ok(Some(Self {
            client_id,
            client_secret: SecretString::from(client_secret),
            api_url: env_or("CASHFREE_API_URL", DEFAULT_CASHFREE_API_URL)
                .trim_end_matches('/')
                .to_string(),
            api_version: env_or("CASHFREE_API_VERSION", DEFAULT_CASHFREE_API_VERSION),
            webhook_secret: optional("CASHFREE_WEBHOOK_SECRET").map(SecretString::from),
            notify_url: required("CASHFREE_NOTIFY_URL")?,
            return_url: required("CASHFREE_RETURN_URL")?,
            currency: env_or("PAYMENT_CURRENCY", "INR"),
        }))
    }
}

impl EmailConfig {
    fn from_env() -> Self {
        Self {
            sendgrid_api_key: optional("SENDGRID_API_KEY").map(SecretString::from),
            from_email: env_or("FROM_EMAIL", "noreply@princegroup.com"),
            from_name: env_or("FROM_NAME", "Prince Group Vista"),
        }
    }
}

impl EventDetails {
    fn from_env() -> Self {
        Self {
            name: env_or("EVENT_NAME", "Rhythm of Kumari"),
            date: env_or("EVENT_DATE", "To be announced"),
            location: env_or("EVENT_LOCATION", "To be announced"),
        }
    }
}

fn required(key: &str) -> Result<String, ConfigError> {
    env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))
}

fn optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_or(key: &str, default: &str) -> String {
    optional(key).unwrap_or_else(|| default.to_string())
}
