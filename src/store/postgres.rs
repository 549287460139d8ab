use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use super::{AssignmentRepository, CredentialStore, InsertTokenError, TokenRepository};
use crate::models::assignment::{unresolved, ReplaceOutcome, TrainerRef};
use crate::models::token::{Token, TokenType};
use crate::models::user::{UserRecord, UserRole};

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPool::connect(database_url).await?;
        Ok(Self { pool })
    }

    /// Run pending migrations from the migrations/ directory.
    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    // -- User Operations --

    pub async fn create_user(&self, user: &UserRecord) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT INTO users (username, password_hash, active, role) VALUES ($1, $2, $3, $4)",
        )
        .bind(&user.username)
        .bind(&user.password_hash)
        .bind(user.active)
        .bind(user.role.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Flip the active flag. Does not touch the user's tokens.
    pub async fn set_active(&self, username: &str, active: bool) -> anyhow::Result<bool> {
        let result = sqlx::query("UPDATE users SET active = $2 WHERE username = $1")
            .bind(username)
            .bind(active)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

// -- Credential Store --

#[async_trait]
impl CredentialStore for PgStore {
    async fn lookup(&self, username: &str) -> anyhow::Result<Option<UserRecord>> {
        let row = sqlx::query_as::<_, UserRow>(
            "SELECT username, password_hash, active, role FROM users WHERE username = $1",
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;

        row.map(UserRow::into_record).transpose()
    }

    async fn set_password_hash(&self, username: &str, password_hash: &str) -> anyhow::Result<bool> {
        let result = sqlx::query("UPDATE users SET password_hash = $2 WHERE username = $1")
            .bind(username)
            .bind(password_hash)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

// -- Token Operations --

fn map_insert_error(e: sqlx::Error) -> InsertTokenError {
    let duplicate = e
        .as_database_error()
        .map(|db| db.is_unique_violation())
        .unwrap_or(false);
    if duplicate {
        InsertTokenError::Duplicate
    } else {
        InsertTokenError::Store(e.into())
    }
}

#[async_trait]
impl TokenRepository for PgStore {
    async fn insert(&self, token: &Token) -> Result<(), InsertTokenError> {
        sqlx::query(
            r#"INSERT INTO tokens (value, username, token_type, revoked, created_at)
               VALUES ($1, $2, $3, $4, $5)"#,
        )
        .bind(&token.value)
        .bind(&token.username)
        .bind(token.token_type.as_str())
        .bind(token.revoked)
        .bind(token.created_at)
        .execute(&self.pool)
        .await
        .map_err(map_insert_error)?;

        Ok(())
    }

    async fn find(&self, value: &str) -> anyhow::Result<Option<Token>> {
        let row = sqlx::query_as::<_, TokenRow>(
            "SELECT value, username, token_type, revoked, created_at, revoked_at FROM tokens WHERE value = $1",
        )
        .bind(value)
        .fetch_optional(&self.pool)
        .await?;

        row.map(TokenRow::into_token).transpose()
    }

    async fn revoke(&self, value: &str) -> anyhow::Result<bool> {
        let result = sqlx::query(
            "UPDATE tokens SET revoked = TRUE, revoked_at = NOW() WHERE value = $1 AND revoked = FALSE",
        )
        .bind(value)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn revoke_all_for_user(&self, username: &str) -> anyhow::Result<u64> {
        let result = sqlx::query(
            "UPDATE tokens SET revoked = TRUE, revoked_at = NOW() WHERE username = $1 AND revoked = FALSE",
        )
        .bind(username)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn supersede(&self, token: &Token) -> Result<u64, InsertTokenError> {
        // Dropping `tx` on any early return rolls the revocation back.
        let mut tx = self.pool.begin().await.map_err(|e| InsertTokenError::Store(e.into()))?;

        // one supersede per user at a time
        sqlx::query("SELECT 1 FROM users WHERE username = $1 FOR UPDATE")
            .bind(&token.username)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| InsertTokenError::Store(e.into()))?;

        let revoked = sqlx::query(
            "UPDATE tokens SET revoked = TRUE, revoked_at = NOW() WHERE username = $1 AND revoked = FALSE",
        )
        .bind(&token.username)
        .execute(&mut *tx)
        .await
        .map_err(|e| InsertTokenError::Store(e.into()))?
        .rows_affected();

        sqlx::query(
            r#"INSERT INTO tokens (value, username, token_type, revoked, created_at)
               VALUES ($1, $2, $3, $4, $5)"#,
        )
        .bind(&token.value)
        .bind(&token.username)
        .bind(token.token_type.as_str())
        .bind(token.revoked)
        .bind(token.created_at)
        .execute(&mut *tx)
        .await
        .map_err(map_insert_error)?;

        tx.commit().await.map_err(|e| InsertTokenError::Store(e.into()))?;
        Ok(revoked)
    }

    async fn find_valid_for_user(&self, username: &str) -> anyhow::Result<Vec<Token>> {
        let rows = sqlx::query_as::<_, TokenRow>(
            "SELECT value, username, token_type, revoked, created_at, revoked_at FROM tokens WHERE username = $1 AND revoked = FALSE ORDER BY created_at ASC",
        )
        .bind(username)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TokenRow::into_token).collect()
    }
}

// -- Assignment Operations --

#[async_trait]
impl AssignmentRepository for PgStore {
    async fn trainers_of(&self, trainee: &str) -> anyhow::Result<Option<BTreeSet<String>>> {
        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM users WHERE username = $1 AND role = 'trainee')",
        )
        .bind(trainee)
        .fetch_one(&self.pool)
        .await?;
        if !exists {
            return Ok(None);
        }

        let trainers = sqlx::query_scalar::<_, String>(
            "SELECT trainer FROM trainee_trainers WHERE trainee = $1",
        )
        .bind(trainee)
        .fetch_all(&self.pool)
        .await?;

        Ok(Some(trainers.into_iter().collect()))
    }

    async fn replace_trainers(
        &self,
        trainee: &str,
        trainers: &[String],
    ) -> anyhow::Result<ReplaceOutcome> {
        let mut tx = self.pool.begin().await?;

        // Row lock serializes writers of the same trainee.
        let locked = sqlx::query_scalar::<_, String>(
            "SELECT username FROM users WHERE username = $1 AND role = 'trainee' FOR UPDATE",
        )
        .bind(trainee)
        .fetch_optional(&mut *tx)
        .await?;
        if locked.is_none() {
            return Ok(ReplaceOutcome::TraineeNotFound);
        }

        // FOR SHARE keeps the resolved trainers from being deactivated before commit.
        let resolved: Vec<TrainerRef> = sqlx::query_as::<_, TrainerRow>(
            "SELECT username, active FROM users WHERE username = ANY($1) AND role = 'trainer' FOR SHARE",
        )
        .bind(trainers)
        .fetch_all(&mut *tx)
        .await?
        .into_iter()
        .map(|r| TrainerRef {
            username: r.username,
            active: r.active,
        })
        .collect();

        let missing = unresolved(trainers, &resolved);
        if !missing.is_empty() {
            return Ok(ReplaceOutcome::UnknownTrainers(missing));
        }

        sqlx::query("DELETE FROM trainee_trainers WHERE trainee = $1")
            .bind(trainee)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            "INSERT INTO trainee_trainers (trainee, trainer) SELECT $1, UNNEST($2::text[])",
        )
        .bind(trainee)
        .bind(trainers)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(ReplaceOutcome::Replaced(trainers.iter().cloned().collect()))
    }
}

// -- Output structs --

#[derive(Debug, sqlx::FromRow)]
struct UserRow {
    username: String,
    password_hash: String,
    active: bool,
    role: String,
}

impl UserRow {
    fn into_record(self) -> anyhow::Result<UserRecord> {
        let role = UserRole::parse(&self.role)
            .ok_or_else(|| anyhow::anyhow!("user '{}' has unknown role '{}'", self.username, self.role))?;
        Ok(UserRecord {
            username: self.username,
            password_hash: self.password_hash,
            active: self.active,
            role,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct TokenRow {
    pub value: String,
    pub username: String,
    pub token_type: String,
    pub revoked: bool,
    pub created_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
}

impl TokenRow {
    fn into_token(self) -> anyhow::Result<Token> {
        let token_type = TokenType::parse(&self.token_type)
            .ok_or_else(|| anyhow::anyhow!("unknown token type '{}'", self.token_type))?;
        Ok(Token {
            value: self.value,
            username: self.username,
            token_type,
            revoked: self.revoked,
            created_at: self.created_at,
            revoked_at: self.revoked_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct TrainerRow {
    username: String,
    active: bool,
}
