use async_trait::async_trait;
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use super::repo_types::{AccountUpdate, NewUser, ProfileUpdate, User};
use crate::error::StoreError;

pub type StoreResult<T> = Result<T, StoreError>;

/// Persistent credential store.
///
/// Every method is a single atomic operation against the backing store;
/// `consume_reset_token` in particular must match and clear in one step.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn list(&self) -> StoreResult<Vec<User>>;
    async fn find_by_id(&self, id: Uuid) -> StoreResult<Option<User>>;
    async fn find_by_email(&self, email: &str) -> StoreResult<Option<User>>;
    async fn create(&self, user: NewUser) -> StoreResult<User>;
    async fn update_account(&self, id: Uuid, update: AccountUpdate) -> StoreResult<Option<User>>;
    async fn update_profile(&self, id: Uuid, update: ProfileUpdate) -> StoreResult<Option<User>>;
    async fn delete(&self, id: Uuid) -> StoreResult<bool>;

    /// Overwrites any outstanding token. Returns `false` if the user is gone.
    async fn set_reset_token(
        &self,
        id: Uuid,
        token_hash: &str,
        expires_at: OffsetDateTime,
    ) -> StoreResult<bool>;
    /// Clears the reset state only while `token_hash` is still the outstanding one.
    async fn clear_reset_token(&self, id: Uuid, token_hash: &str) -> StoreResult<()>;

    /// Read-only lookup of a live token. Consuming still goes through
    /// `consume_reset_token`, which re-checks both predicates.
    async fn find_by_reset_token(
        &self,
        token_hash: &str,
        now: OffsetDateTime,
    ) -> StoreResult<Option<User>>;

    /// Find the user holding `token_hash` with expiry after `now`, set the
    /// new password and clear the reset state. `None` when nothing matched.
    async fn consume_reset_token(
        &self,
        token_hash: &str,
        now: OffsetDateTime,
        new_password_hash: &str,
    ) -> StoreResult<Option<User>>;
}

const USER_COLUMNS: &str = "id, name, email, password_hash, is_admin, \
     reset_token_hash, reset_token_expires_at, created_at, updated_at";

fn map_write_err(e: sqlx::Error) -> StoreError {
    match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => StoreError::DuplicateEmail,
        _ => StoreError::Database(e),
    }
}

#[derive(Clone)]
pub struct PgUserStore {
    db: PgPool,
}

impl PgUserStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn list(&self) -> StoreResult<Vec<User>> {
        let users = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users ORDER BY created_at ASC"
        ))
        .fetch_all(&self.db)
        .await?;
        Ok(users)
    }

    async fn find_by_id(&self, id: Uuid) -> StoreResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await?;
        Ok(user)
    }

    async fn find_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE email = $1"
        ))
        .bind(email)
        .fetch_optional(&self.db)
        .await?;
        Ok(user)
    }

    async fn create(&self, user: NewUser) -> StoreResult<User> {
        sqlx::query_as::<_, User>(&format!(
            r#"
            INSERT INTO users (name, email, password_hash, is_admin)
            VALUES ($1, $2, $3, $4)
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(&user.name)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(user.is_admin)
        .fetch_one(&self.db)
        .await
        .map_err(map_write_err)
    }

    async fn update_account(&self, id: Uuid, update: AccountUpdate) -> StoreResult<Option<User>> {
        sqlx::query_as::<_, User>(&format!(
            r#"
            UPDATE users
               SET name = $2, email = $3, is_admin = $4, updated_at = now()
             WHERE id = $1
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(&update.name)
        .bind(&update.email)
        .bind(update.is_admin)
        .fetch_optional(&self.db)
        .await
        .map_err(map_write_err)
    }

    async fn update_profile(&self, id: Uuid, update: ProfileUpdate) -> StoreResult<Option<User>> {
        sqlx::query_as::<_, User>(&format!(
            r#"
            UPDATE users
               SET name = $2,
                   email = $3,
                   password_hash = COALESCE($4, password_hash),
                   updated_at = now()
             WHERE id = $1
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(&update.name)
        .bind(&update.email)
        .bind(update.password_hash.as_deref())
        .fetch_optional(&self.db)
        .await
        .map_err(map_write_err)
    }

    async fn delete(&self, id: Uuid) -> StoreResult<bool> {
        let res = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id)
            .execute(&self.db)
            .await?;
        Ok(res.rows_affected() > 0)
    }

    async fn set_reset_token(
        &self,
        id: Uuid,
        token_hash: &str,
        expires_at: OffsetDateTime,
    ) -> StoreResult<bool> {
        let res = sqlx::query(
            r#"
            UPDATE users
               SET reset_token_hash = $2, reset_token_expires_at = $3, updated_at = now()
             WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(token_hash)
        .bind(expires_at)
        .execute(&self.db)
        .await?;
        Ok(res.rows_affected() > 0)
    }

    async fn clear_reset_token(&self, id: Uuid, token_hash: &str) -> StoreResult<()> {
        sqlx::query(
            r#"
            UPDATE users
               SET reset_token_hash = NULL, reset_token_expires_at = NULL, updated_at = now()
             WHERE id = $1 AND reset_token_hash = $2
            "#,
        )
        .bind(id)
        .bind(token_hash)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    async fn find_by_reset_token(
        &self,
        token_hash: &str,
        now: OffsetDateTime,
    ) -> StoreResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            r#"
            SELECT {USER_COLUMNS} FROM users
             WHERE reset_token_hash = $1
               AND reset_token_expires_at > $2
            "#
        ))
        .bind(token_hash)
        .bind(now)
        .fetch_optional(&self.db)
        .await?;
        Ok(user)
    }

    async fn consume_reset_token(
        &self,
        token_hash: &str,
        now: OffsetDateTime,
        new_password_hash: &str,
    ) -> StoreResult<Option<User>> {
        // Row lock taken by UPDATE serializes concurrent consumers; the loser
        // re-evaluates the predicate against NULL and matches nothing.
        let user = sqlx::query_as::<_, User>(&format!(
            r#"
            UPDATE users
               SET password_hash = $3,
                   reset_token_hash = NULL,
                   reset_token_expires_at = NULL,
                   updated_at = now()
             WHERE reset_token_hash = $1
               AND reset_token_expires_at > $2
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(token_hash)
        .bind(now)
        .bind(new_password_hash)
        .fetch_optional(&self.db)
        .await?;
        Ok(user)
    }
}
