use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

pub const ROLE_USER: &str = "user";
pub const ROLE_ADMIN: &str = "admin";

/// Deserialize reads the snake_case shape Postgres emits for `row_to_json`.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all(serialize = "camelCase"))]
pub struct User {
    pub id: i64,
    pub user_code: String,
    pub firebase_id: Option<String>,
    pub role: String,
    pub full_name: String,
    pub email: String,
    pub mobile: String,
    pub address: String,
    pub city: String,
    pub state: String,
    pub zip: String,
    pub pincode: String,
    pub aadhaar: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn is_admin(&self) -> bool {
        self.role == ROLE_ADMIN
    }

    /// Applies a self-service profile write. The role is always reset to
    /// `user`; email and user code are not editable here.
    pub fn apply_profile(&mut self, profile: UserProfileRequest) {
        self.full_name = profile.full_name;
        self.mobile = profile.mobile;
        self.address = profile.address;
        self.city = profile.city;
        self.state = profile.state;
        self.zip = profile.zip;
        self.pincode = profile.pincode;
        self.aadhaar = profile.aadhaar;
        self.role = ROLE_USER.to_string();
    }
}

/// Body of `POST /user` and `PUT /user`. Any `role` sent by the client is ignored.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UserProfileRequest {
    pub full_name: String,
    pub email: Option<String>,
    pub mobile: String,
    pub address: String,
    pub city: String,
    pub state: String,
    pub zip: String,
    pub pincode: String,
    pub aadhaar: String,
}

/// Columns for a user row that does not exist yet.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub firebase_id: Option<String>,
    pub email: String,
    pub profile: UserProfileRequest,
}

/// Trims and lower-cases an email so OTP records and user rows share one key.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Loose shape check: one `@` with a dotted domain and no whitespace.
pub fn is_plausible_email(email: &str) -> bool {
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.contains('@')
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
        && !email.chars().any(char::is_whitespace)
}
