use sqlx::PgPool;

use super::{conflict_on_unique, RepositoryError};
use crate::models::referral::{Referral, ReferralRequest};

const SELECT_REFERRAL: &str =
    "SELECT id, code, name, social_media, created_at, updated_at FROM referrals";

const RETURNING_REFERRAL: &str = "RETURNING id, code, name, social_media, created_at, updated_at";

pub struct ReferralRepository<'a> {
    pool: &'a PgPool,
}

impl<'a> ReferralRepository<'a> {
    pub const fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    pub async fn get_by_id(&self, id: i64) -> Result<Option<Referral>, RepositoryError> {
        let referral = sqlx::query_as::<_, Referral>(&format!("{SELECT_REFERRAL} WHERE id = $1"))
            .bind(id)
            .fetch_optional(self.pool)
            .await?;
        Ok(referral)
    }

    pub async fn get_by_code(&self, code: &str) -> Result<Option<Referral>, RepositoryError> {
        let referral =
            sqlx::query_as::<_, Referral>(&format!("{SELECT_REFERRAL} WHERE code = $1"))
                .bind(code)
                .fetch_optional(self.pool)
                .await?;
        Ok(referral)
    }

    pub async fn list(&self) -> Result<Vec<Referral>, RepositoryError> {
        let referrals = sqlx::query_as::<_, Referral>(&format!("{SELECT_REFERRAL} ORDER BY id"))
            .fetch_all(self.pool)
            .await?;
        Ok(referrals)
    }

    pub async fn create(&self, request: &ReferralRequest) -> Result<Referral, RepositoryError> {
        sqlx::query_as::<_, Referral>(&format!(
            "INSERT INTO referrals (code, name, social_media) VALUES ($1, $2, $3) \
             {RETURNING_REFERRAL}"
        ))
        .bind(&request.code)
        .bind(&request.name)
        .bind(&request.social_media)
        .fetch_one(self.pool)
        .await
        .map_err(|e| conflict_on_unique(e, "referral code"))
    }

    pub async fn update(
        &self,
        id: i64,
        request: &ReferralRequest,
    ) -> Result<Referral, RepositoryError> {
        sqlx::query_as::<_, Referral>(&format!(
            "UPDATE referrals SET code = $2, name = $3, social_media = $4, updated_at = NOW() \
             WHERE id = $1 {RETURNING_REFERRAL}"
        ))
        .bind(id)
        .bind(&request.code)
        .bind(&request.name)
        .bind(&request.social_media)
        .fetch_optional(self.pool)
        .await
        .map_err(|e| conflict_on_unique(e, "referral code"))?
        .ok_or_else(|| RepositoryError::NotFound(format!("referral {id}")))
    }

    /// Bookings keep their row; their referral reference is cleared.
    pub async fn delete(&self, id: i64) -> Result<(), RepositoryError> {
        let result = sqlx::query("DELETE FROM referrals WHERE id = $1")
            .bind(id)
            .execute(self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(format!("referral {id}")));
        }
        Ok(())
    }
}
