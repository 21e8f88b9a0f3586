//! Password reset tokens.
//!
//! A user is either idle (no reset state) or pending (`reset_token_hash` and
//! `reset_token_expires_at` both set). Issuing moves to pending and mails the
//! raw token; a failed delivery rolls back to idle. Consuming is a single
//! store call matching hash and expiry together, which also returns to idle.
//! Only the SHA-256 of a token is ever persisted.

use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};
use time::Duration;
use tracing::{error, info, warn};

use crate::{error::ApiError, mail::OutgoingEmail, state::AppState};

const RAW_TOKEN_BYTES: usize = 32;

/// One-way digest for reset tokens. Kept apart from password hashing:
/// tokens are random, short-lived and looked up by digest, so the digest
/// must be deterministic.
pub trait TokenHasher: Send + Sync {
    fn hash(&self, raw: &str) -> String;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Sha256TokenHasher;

impl TokenHasher for Sha256TokenHasher {
    fn hash(&self, raw: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(raw.as_bytes());
        hex::encode(hasher.finalize())
    }
}

/// 32 bytes from the OS RNG, hex encoded.
pub fn generate_raw_token() -> String {
    let mut bytes = [0u8; RAW_TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

pub struct ResetTokenManager<'a> {
    state: &'a AppState,
}

impl<'a> ResetTokenManager<'a> {
    pub fn new(state: &'a AppState) -> Self {
        Self { state }
    }

    fn ttl(&self) -> Duration {
        Duration::minutes(self.state.config.reset.ttl_minutes)
    }

    /// Issue a token for `email` and mail a link built on `link_base`.
    ///
    /// Unknown emails fail with 401 `User not found!`. Delivery failure or
    /// timeout clears the freshly stored token before returning `MailDelivery`.
    pub async fn issue(&self, email: &str, link_base: &str) -> Result<(), ApiError> {
        let st = self.state;
        let user = st
            .store
            .find_by_email(email)
            .await?
            .ok_or_else(|| ApiError::Unauthorized("User not found!".into()))?;

        let raw = generate_raw_token();
        let token_hash = st.tokens.hash(&raw);
        let expires_at = st.clock.now() + self.ttl();

        if !st
            .store
            .set_reset_token(user.id, &token_hash, expires_at)
            .await?
        {
            return Err(ApiError::Unauthorized("User not found!".into()));
        }

        let link = format!("{}/resetpassword/{}", link_base.trim_end_matches('/'), raw);
        let message = OutgoingEmail {
            to: user.email.clone(),
            subject: format!(
                "Your password reset token (valid for {} minutes)",
                st.config.reset.ttl_minutes
            ),
            body: format!(
                "Forgot your password? Set a new one for your account by visiting: {}\n\
                 If you did not ask for this, ignore this email.",
                link
            ),
        };

        let delivery = tokio::time::timeout(st.config.mail.timeout(), st.mailer.send(message)).await;
        let failure = match delivery {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e.to_string()),
            Err(_) => Some("mail delivery timed out".to_string()),
        };

        if let Some(reason) = failure {
            error!(user_id = %user.id, error = %reason, "reset mail failed; rolling back token");
            if let Err(e) = st.store.clear_reset_token(user.id, &token_hash).await {
                error!(user_id = %user.id, error = %e, "reset token rollback failed");
            }
            return Err(ApiError::MailDelivery);
        }

        info!(user_id = %user.id, expires_at = %expires_at, "reset token issued");
        Ok(())
    }

    /// Set `new_password` for whoever holds the live token `raw`.
    pub async fn consume(&self, raw: &str, new_password: &str) -> Result<(), ApiError> {
        let st = self.state;
        if new_password.is_empty() {
            return Err(ApiError::BadRequest("Password is required".into()));
        }

        let token_hash = st.tokens.hash(raw);

        // Dead tokens are turned away before paying for a password hash.
        if st
            .store
            .find_by_reset_token(&token_hash, st.clock.now())
            .await?
            .is_none()
        {
            warn!("reset token invalid or expired");
            return Err(ApiError::InvalidResetToken);
        }

        let password_hash = st.credentials.hash(new_password)?;

        match st
            .store
            .consume_reset_token(&token_hash, st.clock.now(), &password_hash)
            .await?
        {
            Some(user) => {
                info!(user_id = %user.id, "password reset via token");
                Ok(())
            }
            None => {
                warn!("reset token invalid or expired");
                Err(ApiError::InvalidResetToken)
            }
        }
    }
}
