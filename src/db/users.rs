use sqlx::PgPool;

use super::{conflict_on_unique, unique_violation, RepositoryError};
use crate::models::user::{NewUser, User};
use crate::utils::ids::{generate_user_code, MAX_IDENTIFIER_ATTEMPTS};

const SELECT_USER: &str = "SELECT id, user_code, firebase_id, role, full_name, email, mobile, \
    address, city, state, zip, pincode, aadhaar, created_at, updated_at FROM users";

const RETURNING_USER: &str = "RETURNING id, user_code, firebase_id, role, full_name, email, \
    mobile, address, city, state, zip, pincode, aadhaar, created_at, updated_at";

const USER_CODE_CONSTRAINT: &str = "users_user_code_key";

pub struct UserRepository<'a> {
    pool: &'a PgPool,
}

impl<'a> UserRepository<'a> {
    pub const fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    pub async fn get_by_id(&self, id: i64) -> Result<Option<User>, RepositoryError> {
        let user = sqlx::query_as::<_, User>(&format!("{SELECT_USER} WHERE id = $1"))
            .bind(id)
            .fetch_optional(self.pool)
            .await?;
        Ok(user)
    }

    pub async fn get_by_code(&self, user_code: &str) -> Result<Option<User>, RepositoryError> {
        let user = sqlx::query_as::<_, User>(&format!("{SELECT_USER} WHERE user_code = $1"))
            .bind(user_code)
            .fetch_optional(self.pool)
            .await?;
        Ok(user)
    }

    pub async fn get_by_email(&self, email: &str) -> Result<Option<User>, RepositoryError> {
        let user = sqlx::query_as::<_, User>(&format!("{SELECT_USER} WHERE email = $1"))
            .bind(email)
            .fetch_optional(self.pool)
            .await?;
        Ok(user)
    }

    pub async fn get_by_firebase_id(
        &self,
        firebase_id: &str,
    ) -> Result<Option<User>, RepositoryError> {
        let user = sqlx::query_as::<_, User>(&format!("{SELECT_USER} WHERE firebase_id = $1"))
            .bind(firebase_id)
            .fetch_optional(self.pool)
            .await?;
        Ok(user)
    }

    pub async fn list(&self) -> Result<Vec<User>, RepositoryError> {
        let users = sqlx::query_as::<_, User>(&format!("{SELECT_USER} ORDER BY id"))
            .fetch_all(self.pool)
            .await?;
        Ok(users)
    }

    /// Inserts a user with a fresh user code. Only a collision on the code is
    /// retried; a duplicate email or external id is a conflict.
    pub async fn create(&self, new_user: &NewUser) -> Result<User, RepositoryError> {
        let profile = &new_user.profile;

        for attempt in 1..=MAX_IDENTIFIER_ATTEMPTS {
            let user_code = generate_user_code();
            let result = sqlx::query_as::<_, User>(&format!(
                "INSERT INTO users (user_code, firebase_id, email, full_name, mobile, address, \
                 city, state, zip, pincode, aadhaar) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11) {RETURNING_USER}"
            ))
            .bind(&user_code)
            .bind(new_user.firebase_id.as_deref())
            .bind(&new_user.email)
            .bind(&profile.full_name)
            .bind(&profile.mobile)
            .bind(&profile.address)
            .bind(&profile.city)
            .bind(&profile.state)
            .bind(&profile.zip)
            .bind(&profile.pincode)
            .bind(&profile.aadhaar)
            .fetch_one(self.pool)
            .await;

            match result {
                Ok(user) => return Ok(user),
                Err(e) if unique_violation(&e).as_deref() == Some(USER_CODE_CONSTRAINT) => {
                    tracing::debug!(attempt, user_code = %user_code, "User code collision, retrying");
                }
                Err(e) => return Err(conflict_on_unique(e, "user")),
            }
        }

        Err(RepositoryError::IdentifierExhausted("user code"))
    }

    /// Returns the user for `email`, creating a bare row on first sight.
    pub async fn find_or_create_by_email(&self, email: &str) -> Result<User, RepositoryError> {
        if let Some(user) = self.get_by_email(email).await? {
            return Ok(user);
        }

        let new_user = NewUser {
            firebase_id: None,
            email: email.to_string(),
            profile: Default::default(),
        };
        match self.create(&new_user).await {
            Ok(user) => {
                tracing::info!(user_id = user.id, user_code = %user.user_code, "Created user from OTP login");
                Ok(user)
            }
            // Lost a race with a concurrent verification for the same email.
            Err(RepositoryError::Conflict(_)) => self
                .get_by_email(email)
                .await?
                .ok_or_else(|| RepositoryError::NotFound(format!("user {email}"))),
            Err(e) => Err(e),
        }
    }

    /// Attaches an external identity to a row that has none yet.
    pub async fn link_firebase_id(
        &self,
        id: i64,
        firebase_id: &str,
    ) -> Result<User, RepositoryError> {
        sqlx::query_as::<_, User>(&format!(
            "UPDATE users SET firebase_id = $2, updated_at = NOW() \
             WHERE id = $1 AND firebase_id IS NULL {RETURNING_USER}"
        ))
        .bind(id)
        .bind(firebase_id)
        .fetch_optional(self.pool)
        .await
        .map_err(|e| conflict_on_unique(e, "user identity"))?
        .ok_or_else(|| RepositoryError::Conflict("user already has a linked identity".into()))
    }

    /// Full-record replace of the editable columns.
    pub async fn update(&self, user: &User) -> Result<User, RepositoryError> {
        sqlx::query_as::<_, User>(&format!(
            "UPDATE users SET role = $2, full_name = $3, mobile = $4, address = $5, city = $6, \
             state = $7, zip = $8, pincode = $9, aadhaar = $10, updated_at = NOW() \
             WHERE id = $1 {RETURNING_USER}"
        ))
        .bind(user.id)
        .bind(&user.role)
        .bind(&user.full_name)
        .bind(&user.mobile)
        .bind(&user.address)
        .bind(&user.city)
        .bind(&user.state)
        .bind(&user.zip)
        .bind(&user.pincode)
        .bind(&user.aadhaar)
        .fetch_optional(self.pool)
        .await?
        .ok_or_else(|| RepositoryError::NotFound(format!("user {}", user.id)))
    }

    pub async fn delete_by_code(&self, user_code: &str) -> Result<(), RepositoryError> {
        let result = sqlx::query("DELETE FROM users WHERE user_code = $1")
            .bind(user_code)
            .execute(self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(format!("user {user_code}")));
        }
        Ok(())
    }
}
