//! Postgres access for users, tickets, referrals and bookings.
//!
//! Migrations live in `migrations/` and are embedded with `sqlx::migrate!`
//! at start-up. Queries are built at runtime with `query_as` and `FromRow`.

use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use thiserror::Error;

pub mod bookings;
pub mod referrals;
pub mod tickets;
pub mod users;

pub use bookings::BookingRepository;
pub use referrals::ReferralRepository;
pub use tickets::TicketRepository;
pub use users::UserRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Could not generate a unique {0}")]
    IdentifierExhausted(&'static str),

    #[error("Only {available} tickets available, {requested} requested")]
    InsufficientTickets { requested: i32, available: i32 },
}

pub async fn create_pool(database_url: &SecretString) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .min_connections(1)
        .acquire_timeout(Duration::from_secs(10))
        .connect(database_url.expose_secret())
        .await
}

/// Name of the violated unique constraint, if `err` is a unique violation.
pub(crate) fn unique_violation(err: &sqlx::Error) -> Option<String> {
    match err {
        sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
            Some(db_err.constraint().unwrap_or_default().to_string())
        }
        _ => None,
    }
}

/// Maps a unique violation to `Conflict`, everything else to `Database`.
pub(crate) fn conflict_on_unique(err: sqlx::Error, what: &str) -> RepositoryError {
    if unique_violation(&err).is_some() {
        RepositoryError::Conflict(format!("{what} already exists"))
    } else {
        RepositoryError::Database(err)
    }
}
