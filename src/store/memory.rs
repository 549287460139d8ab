//! In-memory backend.
//!
//! Owned by whoever constructs it (the server state or a test); there is no
//! process-global map. Tokens sit behind one ledger-wide lock so every token
//! operation is linearizable. Trainer sets live in a DashMap keyed by
//! trainee and are published with a single insert.

use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::RwLock;

use super::{AssignmentRepository, CredentialStore, InsertTokenError, TokenRepository};
use crate::models::assignment::{unresolved, ReplaceOutcome, TrainerRef};
use crate::models::token::Token;
use crate::models::user::{UserRecord, UserRole};

#[derive(Default)]
struct TokenTable {
    by_value: HashMap<String, Token>,
    /// Owner → token values in issue order.
    by_user: HashMap<String, Vec<String>>,
}

impl TokenTable {
    fn insert(&mut self, token: &Token) -> Result<(), InsertTokenError> {
        if self.by_value.contains_key(&token.value) {
            return Err(InsertTokenError::Duplicate);
        }
        self.by_value.insert(token.value.clone(), token.clone());
        self.by_user
            .entry(token.username.clone())
            .or_default()
            .push(token.value.clone());
        Ok(())
    }

    fn revoke_all(&mut self, username: &str) -> u64 {
        let Some(values) = self.by_user.get(username) else {
            return 0;
        };
        let now = Utc::now();
        let mut flipped = 0;
        for value in values {
            if let Some(token) = self.by_value.get_mut(value) {
                if token.revoke(now) {
                    flipped += 1;
                }
            }
        }
        flipped
    }
}

#[derive(Default)]
pub struct MemoryStore {
    users: RwLock<HashMap<String, UserRecord>>,
    tokens: RwLock<TokenTable>,
    assignments: DashMap<String, BTreeSet<String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a user. Fails if the username is taken.
    pub async fn add_user(&self, record: UserRecord) -> anyhow::Result<()> {
        let mut users = self.users.write().await;
        if users.contains_key(&record.username) {
            anyhow::bail!("user '{}' already exists", record.username);
        }
        users.insert(record.username.clone(), record);
        Ok(())
    }

    /// Toggle the active flag. Tokens are left alone.
    pub async fn set_active(&self, username: &str, active: bool) -> bool {
        match self.users.write().await.get_mut(username) {
            Some(user) => {
                user.active = active;
                true
            }
            None => false,
        }
    }

    /// Total number of token records, revoked ones included.
    pub async fn token_count(&self) -> usize {
        self.tokens.read().await.by_value.len()
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn lookup(&self, username: &str) -> anyhow::Result<Option<UserRecord>> {
        Ok(self.users.read().await.get(username).cloned())
    }

    async fn set_password_hash(&self, username: &str, password_hash: &str) -> anyhow::Result<bool> {
        match self.users.write().await.get_mut(username) {
            Some(user) => {
                user.password_hash = password_hash.to_string();
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[async_trait]
impl TokenRepository for MemoryStore {
    async fn insert(&self, token: &Token) -> Result<(), InsertTokenError> {
        self.tokens.write().await.insert(token)
    }

    async fn find(&self, value: &str) -> anyhow::Result<Option<Token>> {
        Ok(self.tokens.read().await.by_value.get(value).cloned())
    }

    async fn revoke(&self, value: &str) -> anyhow::Result<bool> {
        let mut table = self.tokens.write().await;
        Ok(table
            .by_value
            .get_mut(value)
            .map(|t| t.revoke(Utc::now()))
            .unwrap_or(false))
    }

    async fn revoke_all_for_user(&self, username: &str) -> anyhow::Result<u64> {
        Ok(self.tokens.write().await.revoke_all(username))
    }

    async fn supersede(&self, token: &Token) -> Result<u64, InsertTokenError> {
        let mut table = self.tokens.write().await;
        // check before revoking so a duplicate leaves the table untouched
        if table.by_value.contains_key(&token.value) {
            return Err(InsertTokenError::Duplicate);
        }
        let revoked = table.revoke_all(&token.username);
        table.insert(token)?;
        Ok(revoked)
    }

    async fn find_valid_for_user(&self, username: &str) -> anyhow::Result<Vec<Token>> {
        let table = self.tokens.read().await;
        Ok(table
            .by_user
            .get(username)
            .into_iter()
            .flatten()
            .filter_map(|v| table.by_value.get(v))
            .filter(|t| t.is_valid())
            .cloned()
            .collect())
    }
}

#[async_trait]
impl AssignmentRepository for MemoryStore {
    async fn trainers_of(&self, trainee: &str) -> anyhow::Result<Option<BTreeSet<String>>> {
        let users = self.users.read().await;
        if !matches!(users.get(trainee), Some(u) if u.role == UserRole::Trainee) {
            return Ok(None);
        }
        let current = self
            .assignments
            .get(trainee)
            .map(|set| set.value().clone())
            .unwrap_or_default();
        Ok(Some(current))
    }

    async fn replace_trainers(
        &self,
        trainee: &str,
        trainers: &[String],
    ) -> anyhow::Result<ReplaceOutcome> {
        // Held until the new set is published so no trainer can be
        // deactivated between resolution and write.
        let users = self.users.read().await;
        if !matches!(users.get(trainee), Some(u) if u.role == UserRole::Trainee) {
            return Ok(ReplaceOutcome::TraineeNotFound);
        }

        let resolved: Vec<TrainerRef> = trainers
            .iter()
            .filter_map(|name| users.get(name))
            .filter(|u| u.role == UserRole::Trainer)
            .map(|u| TrainerRef {
                username: u.username.clone(),
                active: u.active,
            })
            .collect();

        let missing = unresolved(trainers, &resolved);
        if !missing.is_empty() {
            return Ok(ReplaceOutcome::UnknownTrainers(missing));
        }

        let set: BTreeSet<String> = trainers.iter().cloned().collect();
        self.assignments.insert(trainee.to_string(), set.clone());
        Ok(ReplaceOutcome::Replaced(set))
    }
}
