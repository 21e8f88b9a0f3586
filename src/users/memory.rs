use std::sync::Mutex;

use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use super::{
    repo::{StoreResult, UserStore},
    repo_types::{AccountUpdate, NewUser, ProfileUpdate, User},
};
use crate::error::StoreError;

/// In-process store. One mutex guards every operation, so each call is
/// atomic the same way a single SQL statement is.
#[derive(Default)]
pub struct InMemoryUserStore {
    users: Mutex<Vec<User>>,
}

impl InMemoryUserStore {
    fn with<R>(&self, f: impl FnOnce(&mut Vec<User>) -> R) -> R {
        let mut users = self.users.lock().expect("user store lock");
        f(&mut users)
    }
}

fn email_taken(users: &[User], email: &str, except: Option<Uuid>) -> bool {
    users
        .iter()
        .any(|u| u.email == email && Some(u.id) != except)
}

fn holds_live_token(user: &User, token_hash: &str, now: OffsetDateTime) -> bool {
    user.reset_token_hash.as_deref() == Some(token_hash)
        && user.reset_token_expires_at.is_some_and(|exp| exp > now)
}

#[async_trait]
impl UserStore for InMemoryUserStore {
    async fn list(&self) -> StoreResult<Vec<User>> {
        Ok(self.with(|users| users.clone()))
    }

    async fn find_by_id(&self, id: Uuid) -> StoreResult<Option<User>> {
        Ok(self.with(|users| users.iter().find(|u| u.id == id).cloned()))
    }

    async fn find_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        Ok(self.with(|users| users.iter().find(|u| u.email == email).cloned()))
    }

    async fn create(&self, new: NewUser) -> StoreResult<User> {
        self.with(|users| {
            if email_taken(users, &new.email, None) {
                return Err(StoreError::DuplicateEmail);
            }
            let now = OffsetDateTime::now_utc();
            let user = User {
                id: Uuid::new_v4(),
                name: new.name,
                email: new.email,
                password_hash: new.password_hash,
                is_admin: new.is_admin,
                reset_token_hash: None,
                reset_token_expires_at: None,
                created_at: now,
                updated_at: now,
            };
            users.push(user.clone());
            Ok(user)
        })
    }

    async fn update_account(&self, id: Uuid, update: AccountUpdate) -> StoreResult<Option<User>> {
        self.with(|users| {
            if email_taken(users, &update.email, Some(id)) {
                return Err(StoreError::DuplicateEmail);
            }
            Ok(users.iter_mut().find(|u| u.id == id).map(|u| {
                u.name = update.name;
                u.email = update.email;
                u.is_admin = update.is_admin;
                u.updated_at = OffsetDateTime::now_utc();
                u.clone()
            }))
        })
    }

    async fn update_profile(&self, id: Uuid, update: ProfileUpdate) -> StoreResult<Option<User>> {
        self.with(|users| {
            if email_taken(users, &update.email, Some(id)) {
                return Err(StoreError::DuplicateEmail);
            }
            Ok(users.iter_mut().find(|u| u.id == id).map(|u| {
                u.name = update.name;
                u.email = update.email;
                if let Some(hash) = update.password_hash {
                    u.password_hash = hash;
                }
                u.updated_at = OffsetDateTime::now_utc();
                u.clone()
            }))
        })
    }

    async fn delete(&self, id: Uuid) -> StoreResult<bool> {
        Ok(self.with(|users| {
            let before = users.len();
            users.retain(|u| u.id != id);
            users.len() != before
        }))
    }

    async fn set_reset_token(
        &self,
        id: Uuid,
        token_hash: &str,
        expires_at: OffsetDateTime,
    ) -> StoreResult<bool> {
        Ok(self.with(|users| match users.iter_mut().find(|u| u.id == id) {
            Some(u) => {
                u.reset_token_hash = Some(token_hash.to_string());
                u.reset_token_expires_at = Some(expires_at);
                true
            }
            None => false,
        }))
    }

    async fn clear_reset_token(&self, id: Uuid, token_hash: &str) -> StoreResult<()> {
        self.with(|users| {
            if let Some(u) = users
                .iter_mut()
                .find(|u| u.id == id && u.reset_token_hash.as_deref() == Some(token_hash))
            {
                u.reset_token_hash = None;
                u.reset_token_expires_at = None;
            }
        });
        Ok(())
    }

    async fn find_by_reset_token(
        &self,
        token_hash: &str,
        now: OffsetDateTime,
    ) -> StoreResult<Option<User>> {
        Ok(self.with(|users| {
            users
                .iter()
                .find(|u| holds_live_token(u, token_hash, now))
                .cloned()
        }))
    }

    async fn consume_reset_token(
        &self,
        token_hash: &str,
        now: OffsetDateTime,
        new_password_hash: &str,
    ) -> StoreResult<Option<User>> {
        Ok(self.with(|users| {
            users
                .iter_mut()
                .find(|u| holds_live_token(u, token_hash, now))
                .map(|u| {
                    u.password_hash = new_password_hash.to_string();
                    u.reset_token_hash = None;
                    u.reset_token_expires_at = None;
                    u.updated_at = OffsetDateTime::now_utc();
                    u.clone()
                })
        }))
    }
}

#[cfg(test)]
mod tests {
    use time::Duration;

    use super::*;

    fn new_user(email: &str) -> NewUser {
        NewUser {
            name: "A".into(),
            email: email.into(),
            password_hash: "h".into(),
            is_admin: false,
        }
    }

    #[tokio::test]
    async fn duplicate_email_is_rejected() {
        let store = InMemoryUserStore::default();
        store.create(new_user("a@x.com")).await.expect("first");
        assert!(matches!(
            store.create(new_user("a@x.com")).await,
            Err(StoreError::DuplicateEmail)
        ));
    }

    #[tokio::test]
    async fn clearing_a_superseded_token_keeps_the_newer_one() {
        let store = InMemoryUserStore::default();
        let user = store.create(new_user("a@x.com")).await.expect("create");
        let expires = OffsetDateTime::now_utc() + Duration::minutes(10);
        store.set_reset_token(user.id, "h1", expires).await.expect("set h1");
        store.set_reset_token(user.id, "h2", expires).await.expect("set h2");

        store.clear_reset_token(user.id, "h1").await.expect("clear h1");
        let kept = store.find_by_id(user.id).await.expect("find").expect("exists");
        assert_eq!(kept.reset_token_hash.as_deref(), Some("h2"));
        assert_eq!(kept.reset_token_expires_at, Some(expires));

        store.clear_reset_token(user.id, "h2").await.expect("clear h2");
        let cleared = store.find_by_id(user.id).await.expect("find").expect("exists");
        assert!(cleared.reset_token_hash.is_none());
        assert!(cleared.reset_token_expires_at.is_none());
    }

    #[tokio::test]
    async fn find_by_reset_token_ignores_expired_tokens() {
        let store = InMemoryUserStore::default();
        let user = store.create(new_user("a@x.com")).await.expect("create");
        let now = OffsetDateTime::now_utc();
        store
            .set_reset_token(user.id, "abc", now + Duration::minutes(10))
            .await
            .expect("set");

        let found = store.find_by_reset_token("abc", now).await.expect("find");
        assert_eq!(found.map(|u| u.id), Some(user.id));
        assert!(store
            .find_by_reset_token("abc", now + Duration::minutes(10))
            .await
            .expect("find")
            .is_none());
        let untouched = store.find_by_id(user.id).await.expect("find").expect("exists");
        assert_eq!(untouched.reset_token_hash.as_deref(), Some("abc"));
    }

    #[tokio::test]
    async fn consume_requires_hash_and_live_expiry() {
        let store = InMemoryUserStore::default();
        let user = store.create(new_user("a@x.com")).await.expect("create");
        let now = OffsetDateTime::now_utc();
        store
            .set_reset_token(user.id, "abc", now + Duration::minutes(10))
            .await
            .expect("set");

        assert!(store
            .consume_reset_token("abc", now + Duration::minutes(10), "new")
            .await
            .expect("consume")
            .is_none());
        assert!(store
            .consume_reset_token("other", now, "new")
            .await
            .expect("consume")
            .is_none());

        let updated = store
            .consume_reset_token("abc", now, "new")
            .await
            .expect("consume")
            .expect("matched");
        assert_eq!(updated.password_hash, "new");
        assert!(updated.reset_token_hash.is_none());
        assert!(updated.reset_token_expires_at.is_none());
    }
}
