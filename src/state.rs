//! Application state shared across handlers.

use std::sync::Arc;

use sqlx::PgPool;
use thiserror::Error;

use crate::auth::{FirebaseVerifier, MemoryOtpStore, OtpStore, SessionKeys};
use crate::config::Config;
use crate::services::payments::PaymentError;
use crate::services::youtube::YoutubeError;
use crate::services::{CashfreeClient, Notifier, YoutubeClient};

#[derive(Debug, Error)]
pub enum StateError {
    #[error("payment client: {0}")]
    Payments(#[from] PaymentError),

    #[error("identity verifier: {0}")]
    Identity(#[from] reqwest::Error),

    #[error("youtube client: {0}")]
    Youtube(#[from] YoutubeError),
}

/// Cheap to clone; everything lives behind one `Arc`.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: Config,
    pool: PgPool,
    otp: Arc<dyn OtpStore>,
    sessions: SessionKeys,
    identity: Option<FirebaseVerifier>,
    payments: Option<CashfreeClient>,
    notifier: Notifier,
    youtube: YoutubeClient,
}

impl AppState {
    pub fn new(config: Config, pool: PgPool, notifier: Notifier) -> Result<Self, StateError> {
        Self::with_otp_store(config, pool, notifier, Arc::new(MemoryOtpStore::new()))
    }

    pub fn with_otp_store(
        config: Config,
        pool: PgPool,
        notifier: Notifier,
        otp: Arc<dyn OtpStore>,
    ) -> Result<Self, StateError> {
        let sessions = SessionKeys::new(&config.session);
        let identity = match &config.firebase_project_id {
            Some(project_id) => Some(FirebaseVerifier::new(project_id.clone())?),
            None => {
                tracing::warn!("FIREBASE_PROJECT_ID not set, only session tokens are accepted");
                None
            }
        };
        let payments = config
            .payments
            .clone()
            .map(CashfreeClient::new)
            .transpose()?;
        let youtube = YoutubeClient::new()?;

        Ok(Self {
            inner: Arc::new(AppStateInner {
                config,
                pool,
                otp,
                sessions,
                identity,
                payments,
                notifier,
                youtube,
            }),
        })
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn pool(&self) -> &PgPool {
        &self.inner.pool
    }

    pub fn otp(&self) -> &dyn OtpStore {
        self.inner.otp.as_ref()
    }

    pub fn sessions(&self) -> &SessionKeys {
        &self.inner.sessions
    }

    /// `None` when Firebase identity tokens are not accepted.
    pub fn identity(&self) -> Option<&FirebaseVerifier> {
        self.inner.identity.as_ref()
    }

    pub fn payments(&self) -> Result<&CashfreeClient, PaymentError> {
        self.inner
            .payments
            .as_ref()
            .ok_or(PaymentError::NotConfigured)
    }

    pub fn notifier(&self) -> &Notifier {
        &self.inner.notifier
    }

    pub fn youtube(&self) -> &YoutubeClient {
        &self.inner.youtube
    }
}
