//! Persistence ports and their backends.
//!
//! Every component talks to storage through the three traits below. Two
//! interchangeable backends implement all of them:
//!   - `memory`: process-owned maps, used by tests and local runs.
//!   - `postgres`: sqlx pool with embedded migrations.
//!
//! The backend is picked once at startup from `GYM_STORE` (see `config`).

pub mod memory;
pub mod postgres;

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::{Config, StoreBackend};
use crate::models::assignment::ReplaceOutcome;
use crate::models::token::Token;
use crate::models::user::UserRecord;

use memory::MemoryStore;
use postgres::PgStore;

/// User accounts as seen by authentication.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn lookup(&self, username: &str) -> anyhow::Result<Option<UserRecord>>;

    /// Overwrite the stored hash. Returns false for an unknown username.
    async fn set_password_hash(&self, username: &str, password_hash: &str) -> anyhow::Result<bool>;
}

#[derive(Debug, Error)]
pub enum InsertTokenError {
    #[error("token value already exists")]
    Duplicate,

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

/// Append-only token table. There is no delete.
#[async_trait]
pub trait TokenRepository: Send + Sync {
    async fn insert(&self, token: &Token) -> Result<(), InsertTokenError>;

    async fn find(&self, value: &str) -> anyhow::Result<Option<Token>>;

    /// Revoke one token. Returns `true` only if the flag flipped.
    async fn revoke(&self, value: &str) -> anyhow::Result<bool>;

    /// Revoke every valid token of `username`. Returns how many flipped.
    async fn revoke_all_for_user(&self, username: &str) -> anyhow::Result<u64>;

    /// Revoke every valid token of the owner of `token`, then insert `token`,
    /// as one atomic step. Returns how many tokens were revoked.
    async fn supersede(&self, token: &Token) -> Result<u64, InsertTokenError>;

    async fn find_valid_for_user(&self, username: &str) -> anyhow::Result<Vec<Token>>;
}

#[async_trait]
pub trait AssignmentRepository: Send + Sync {
    /// Current trainer set of a trainee, `None` if no such trainee exists.
    async fn trainers_of(&self, trainee: &str) -> anyhow::Result<Option<BTreeSet<String>>>;

    /// Resolve `trainers` (already deduplicated) and, if every one is an
    /// active trainer, swap the trainee's edge set for exactly that set.
    /// Nothing is written unless the outcome is `Replaced`.
    async fn replace_trainers(
        &self,
        trainee: &str,
        trainers: &[String],
    ) -> anyhow::Result<ReplaceOutcome>;
}

/// The three ports, backed by one concrete store.
#[derive(Clone)]
pub struct Stores {
    pub credentials: Arc<dyn CredentialStore>,
    pub tokens: Arc<dyn TokenRepository>,
    pub assignments: Arc<dyn AssignmentRepository>,
}

impl Stores {
    pub fn memory(store: Arc<MemoryStore>) -> Self {
        Self {
            credentials: store.clone(),
            tokens: store.clone(),
            assignments: store,
        }
    }

    pub fn postgres(store: PgStore) -> Self {
        let store = Arc::new(store);
        Self {
            credentials: store.clone(),
            tokens: store.clone(),
            assignments: store,
        }
    }

    /// Build the configured backend. Postgres is migrated before use.
    pub async fn from_config(cfg: &Config) -> anyhow::Result<Self> {
        match cfg.store {
            StoreBackend::Memory => {
                tracing::warn!("using in-memory store: state is lost on shutdown");
                Ok(Self::memory(Arc::new(MemoryStore::new())))
            }
            StoreBackend::Postgres => {
                let url = cfg
                    .database_url
                    .as_deref()
                    .ok_or_else(|| anyhow::anyhow!("GYM_STORE=postgres requires DATABASE_URL"))?;
                tracing::info!("Connecting to database...");
                let db = PgStore::connect(url).await?;
                tracing::info!("Running migrations...");
                db.migrate().await?;
                Ok(Self::postgres(db))
            }
        }
    }
}
