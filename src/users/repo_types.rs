use serde::Serialize;
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

/// User record in the database.
#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct User {
    #[serde(rename = "_id")]
    pub id: Uuid,
    pub name: String,
    pub email: String, // unique, lower-cased
    #[serde(skip_serializing)]
    pub password_hash: String, // Argon2 hash, not exposed in JSON
    pub is_admin: bool,
    #[serde(skip_serializing)]
    pub reset_token_hash: Option<String>, // SHA-256 of the outstanding reset token
    #[serde(skip_serializing)]
    pub reset_token_expires_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub name: String,
    pub email: String,
    pub password_hash: String,
    pub is_admin: bool,
}

/// Fields an administrator may overwrite.
#[derive(Debug, Clone)]
pub struct AccountUpdate {
    pub name: String,
    pub email: String,
    pub is_admin: bool,
}

/// Fields a user may overwrite on their own record.
#[derive(Debug, Clone)]
pub struct ProfileUpdate {
    pub name: String,
    pub email: String,
    pub password_hash: Option<String>,
}
