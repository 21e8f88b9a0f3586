use std::sync::Arc;

use anyhow::Context;
use sqlx::{postgres::PgPoolOptions, PgPool};

use crate::{
    auth::password::{Argon2Hasher, CredentialHasher},
    clock::{Clock, SystemClock},
    config::AppConfig,
    mail::{self, Mailer},
    users::{
        repo::{PgUserStore, UserStore},
        reset::{Sha256TokenHasher, TokenHasher},
    },
};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub store: Arc<dyn UserStore>,
    pub mailer: Arc<dyn Mailer>,
    pub clock: Arc<dyn Clock>,
    pub credentials: Arc<dyn CredentialHasher>,
    pub tokens: Arc<dyn TokenHasher>,
}

impl AppState {
    /// Connects to Postgres and wires the production collaborators.
    /// The pool is returned separately so `main` can run migrations on it.
    pub async fn init() -> anyhow::Result<(Self, PgPool)> {
        let config = Arc::new(AppConfig::from_env()?);

        let db = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.database_url)
            .await
            .context("connect to database")?;

        let mailer = mail::from_config(&config.mail)?;

        let state = Self::from_parts(
            config,
            Arc::new(PgUserStore::new(db.clone())),
            mailer,
            Arc::new(SystemClock),
        );
        Ok((state, db))
    }

    pub fn from_parts(
        config: Arc<AppConfig>,
        store: Arc<dyn UserStore>,
        mailer: Arc<dyn Mailer>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            store,
            mailer,
            clock,
            credentials: Arc::new(Argon2Hasher::default()),
            tokens: Arc::new(Sha256TokenHasher),
        }
    }

    /// In-memory store, recording mailer, real clock, cheap hashing.
    #[cfg(test)]
    pub fn fake() -> Self {
        use crate::{mail::testing::RecordingMailer, users::memory::InMemoryUserStore};

        let mut state = Self::from_parts(
            Arc::new(AppConfig::for_tests()),
            Arc::new(InMemoryUserStore::default()),
            Arc::new(RecordingMailer::default()),
            Arc::new(SystemClock),
        );
        state.credentials = Arc::new(Argon2Hasher::fast());
        state
    }
}
