//! One-time passcodes for email login.
//!
//! Each email has at most one pending code. Issuing replaces it. Verifying
//! is a single read-modify-write on the cache entry, so a verify never sees
//! a half-applied resend.

use std::future::ready;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use constant_time_eq::constant_time_eq;
use moka::future::Cache;
use moka::ops::compute::Op;
use rand::Rng;
use thiserror::Error;

pub const OTP_TTL: Duration = Duration::from_secs(5 * 60);
pub const MAX_OTP_ATTEMPTS: u32 = 3;

/// Extra lifetime in the cache so an expired record is still around to
/// report `Expired` rather than `NotFound`.
const EVICTION_GRACE: Duration = Duration::from_secs(10 * 60);
const MAX_PENDING_CODES: u64 = 100_000;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum OtpError {
    #[error("No OTP was requested for this email")]
    NotFound,

    #[error("OTP has expired, please request a new one")]
    Expired,

    #[error("Invalid OTP, {remaining} attempt(s) remaining")]
    InvalidCode { remaining: u32 },

    #[error("Too many invalid attempts, please request a new OTP")]
    TooManyAttempts,
}

#[async_trait]
pub trait OtpStore: Send + Sync {
    /// Issues a fresh code for `email`, replacing any pending one.
    async fn issue(&self, email: &str) -> String;

    /// Consumes the pending code on success. Wrong codes count against the
    /// attempt budget; the record is dropped once the budget is spent.
    async fn verify(&self, email: &str, code: &str) -> Result<(), OtpError>;
}

#[derive(Debug, Clone)]
struct OtpRecord {
    code: String,
    expires_at: Instant,
    attempts: u32,
}

/// Process-local store. Pending codes do not survive a restart and are not
/// shared between instances.
#[derive(Clone)]
pub struct MemoryOtpStore {
    records: Cache<String, OtpRecord>,
    ttl: Duration,
}

impl MemoryOtpStore {
    pub fn new() -> Self {
        Self::with_ttl(OTP_TTL)
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            records: Cache::builder()
                .max_capacity(MAX_PENDING_CODES)
                .time_to_live(ttl + EVICTION_GRACE)
                .build(),
            ttl,
        }
    }
}

impl Default for MemoryOtpStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl OtpStore for MemoryOtpStore {
    async fn issue(&self, email: &str) -> String {
        let code = generate_code();
        let record = OtpRecord {
            code: code.clone(),
            expires_at: Instant::now() + self.ttl,
            attempts: 0,
        };
        self.records.insert(email.to_string(), record).await;
        code
    }

    async fn verify(&self, email: &str, code: &str) -> Result<(), OtpError> {
        let now = Instant::now();
        let mut outcome = Err(OtpError::NotFound);

        self.records
            .entry(email.to_string())
            .and_compute_with(|entry| {
                let op = match entry {
                    None => Op::Nop,
                    Some(entry) => {
                        let mut record = entry.into_value();
                        if now >= record.expires_at {
                            outcome = Err(OtpError::Expired);
                            Op::Remove
                        } else if constant_time_eq(record.code.as_bytes(), code.as_bytes()) {
                            outcome = Ok(());
                            Op::Remove
                        } else {
                            record.attempts += 1;
                            if record.attempts >= MAX_OTP_ATTEMPTS {
                                outcome = Err(OtpError::TooManyAttempts);
                                Op::Remove
                            } else {
                                outcome = Err(OtpError::InvalidCode {
                                    remaining: MAX_OTP_ATTEMPTS - record.attempts,
                                });
                                Op::Put(record)
                            }
                        }
                    }
                };
                ready(op)
            })
            .await;

        outcome
    }
}

/// Six decimal digits, never starting with zero.
fn generate_code() -> String {
    rand::rng().random_range(100_000..1_000_000).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    const EMAIL: &str = "guest@example.com";

    fn wrong_code(code: &str) -> String {
        if code == "111111" {
            "222222".into()
        } else {
            "111111".into()
        }
    }

    #[test]
    fn test_generated_codes_are_six_digits() {
        for _ in 0..100 {
            let code = generate_code();
            assert_eq!(code.len(), 6);
            assert!(code.chars().all(|c| c.is_ascii_digit()));
        }
    }

    #[tokio::test]
    async fn test_correct_code_succeeds_exactly_once() {
        let store = MemoryOtpStore::new();
        let code = store.issue(EMAIL).await;

        assert_eq!(store.verify(EMAIL, &code).await, Ok(()));
        assert_eq!(store.verify(EMAIL, &code).await, Err(OtpError::NotFound));
    }

    #[tokio::test]
    async fn test_unknown_email_is_not_found() {
        let store = MemoryOtpStore::new();
        assert_eq!(
            store.verify("nobody@example.com", "123456").await,
            Err(OtpError::NotFound)
        );
    }

    #[tokio::test]
    async fn test_three_wrong_codes_lock_out() {
        let store = MemoryOtpStore::new();
        let code = store.issue(EMAIL).await;
        let wrong = wrong_code(&code);

        assert_eq!(
            store.verify(EMAIL, &wrong).await,
            Err(OtpError::InvalidCode { remaining: 2 })
        );
        assert_eq!(
            store.verify(EMAIL, &wrong).await,
            Err(OtpError::InvalidCode { remaining: 1 })
        );
        assert_eq!(
            store.verify(EMAIL, &wrong).await,
            Err(OtpError::TooManyAttempts)
        );
        // The right code no longer helps until a new one is issued.
        assert_eq!(store.verify(EMAIL, &code).await, Err(OtpError::NotFound));

        let fresh = store.issue(EMAIL).await;
        assert_eq!(store.verify(EMAIL, &fresh).await, Ok(()));
    }

    #[tokio::test]
    async fn test_expired_code_is_rejected_and_removed() {
        let store = MemoryOtpStore::with_ttl(Duration::from_millis(20));
        let code = store.issue(EMAIL).await;

        tokio::time::sleep(Duration::from_millis(40)).await;

        assert_eq!(store.verify(EMAIL, &code).await, Err(OtpError::Expired));
        assert_eq!(store.verify(EMAIL, &code).await, Err(OtpError::NotFound));
    }

    #[tokio::test]
    async fn test_reissue_replaces_pending_code_and_attempts() {
        let store = MemoryOtpStore::new();
        let first = store.issue(EMAIL).await;
        let wrong = wrong_code(&first);
        let _ = store.verify(EMAIL, &wrong).await;
        let _ = store.verify(EMAIL, &wrong).await;

        let second = store.issue(EMAIL).await;
        if first != second {
            assert_eq!(
                store.verify(EMAIL, &first).await,
                Err(OtpError::InvalidCode { remaining: 2 })
            );
        }
        assert_eq!(store.verify(EMAIL, &second).await, Ok(()));
    }

    #[tokio::test]
    async fn test_concurrent_verifies_succeed_once() {
        let store = std::sync::Arc::new(MemoryOtpStore::new());
        let code = store.issue(EMAIL).await;

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            let code = code.clone();
            handles.push(tokio::spawn(async move { store.verify(EMAIL, &code).await }));
        }

        let mut successes = 0;
        for handle in handles {
            if handle.await.unwrap().is_ok() {
                successes += 1;
            }
        }
        assert_eq!(successes, 1);
    }
}
