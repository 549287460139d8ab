//! Session token ledger.
//!
//! Owns issuance, validation and revocation of opaque bearer tokens.
//! Records are append-only: revocation flips a flag and a value is never
//! handed out twice, even after its token has been revoked.

use std::sync::Arc;

use rand::rngs::OsRng;
use rand::RngCore;

use crate::errors::AuthError;
use crate::models::token::{mask, Token};
use crate::models::user::User;
use crate::store::{CredentialStore, InsertTokenError, TokenRepository};

const TOKEN_PREFIX: &str = "gym_v1_";

/// Random bytes per token value (256 bits).
const TOKEN_BYTES: usize = 32;

/// Fresh values tried before giving up on a run of collisions.
const ISSUE_ATTEMPTS: usize = 3;

fn generate_value() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    format!("{}{}", TOKEN_PREFIX, hex::encode(bytes))
}

pub struct TokenLedger {
    tokens: Arc<dyn TokenRepository>,
    users: Arc<dyn CredentialStore>,
}

impl TokenLedger {
    pub fn new(tokens: Arc<dyn TokenRepository>, users: Arc<dyn CredentialStore>) -> Self {
        Self { tokens, users }
    }

    /// Issue a new access token for `user`. Existing tokens stay valid.
    pub async fn issue(&self, user: &User) -> Result<Token, AuthError> {
        self.store_fresh(user, false).await
    }

    /// Revoke every valid token of `user` and issue a new one in a single
    /// atomic step. Only the returned token is valid afterwards.
    pub async fn supersede(&self, user: &User) -> Result<Token, AuthError> {
        self.store_fresh(user, true).await
    }

    async fn store_fresh(&self, user: &User, supersede: bool) -> Result<Token, AuthError> {
        for attempt in 1..=ISSUE_ATTEMPTS {
            let token = Token::new_access(generate_value(), &user.username);
            let stored = if supersede {
                self.tokens.supersede(&token).await
            } else {
                self.tokens.insert(&token).await.map(|_| 0)
            };

            match stored {
                Ok(revoked) => {
                    tracing::info!(
                        username = %user.username,
                        token = %mask(&token.value),
                        revoked,
                        "token issued"
                    );
                    return Ok(token);
                }
                Err(InsertTokenError::Duplicate) => {
                    tracing::warn!(attempt, "token value collision, regenerating");
                }
                Err(InsertTokenError::Store(e)) => return Err(AuthError::Store(e)),
            }
        }

        Err(AuthError::Store(anyhow::anyhow!(
            "no unique token value after {} attempts",
            ISSUE_ATTEMPTS
        )))
    }

    /// Resolve a presented token to its owner.
    ///
    /// Unknown and revoked tokens are separate errors here; callers facing
    /// the network must not tell them apart.
    pub async fn validate(&self, value: &str) -> Result<User, AuthError> {
        let token = self
            .tokens
            .find(value)
            .await?
            .ok_or(AuthError::TokenNotFound)?;

        if token.revoked {
            return Err(AuthError::TokenRevoked);
        }

        // An owner that disappeared from the store invalidates the token.
        let owner = self
            .users
            .lookup(&token.username)
            .await?
            .ok_or(AuthError::TokenNotFound)?;

        Ok(owner.identity())
    }

    /// Revoke a single token. Idempotent; returns whether the flag flipped.
    pub async fn revoke(&self, value: &str) -> Result<bool, AuthError> {
        let flipped = self.tokens.revoke(value).await?;
        if flipped {
            tracing::info!(token = %mask(value), "token revoked");
        }
        Ok(flipped)
    }

    /// Revoke every currently valid token of `user`. Idempotent.
    pub async fn revoke_all_for_user(&self, user: &User) -> Result<u64, AuthError> {
        let count = self.tokens.revoke_all_for_user(&user.username).await?;
        tracing::info!(username = %user.username, count, "revoked all tokens");
        Ok(count)
    }

    pub async fn find_valid_for_user(&self, user: &User) -> Result<Vec<Token>, AuthError> {
        Ok(self.tokens.find_valid_for_user(&user.username).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::user::{UserRecord, UserRole};
    use crate::store::memory::MemoryStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    async fn setup() -> (TokenLedger, User) {
        let store = Arc::new(MemoryStore::new());
        store
            .add_user(UserRecord {
                username: "mike.t".into(),
                password_hash: String::new(),
                active: true,
                role: UserRole::Trainer,
            })
            .await
            .unwrap();
        let user = User {
            username: "mike.t".into(),
            role: UserRole::Trainer,
        };
        (TokenLedger::new(store.clone(), store), user)
    }

    #[test]
    fn test_generated_value_shape() {
        let v = generate_value();
        assert!(v.starts_with(TOKEN_PREFIX));
        assert_eq!(v.len(), TOKEN_PREFIX.len() + TOKEN_BYTES * 2);
        assert!(v[TOKEN_PREFIX.len()..].chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[tokio::test]
    async fn test_issue_then_validate() {
        let (ledger, user) = setup().await;
        let token = ledger.issue(&user).await.unwrap();
        assert!(!token.revoked);
        assert_eq!(ledger.validate(&token.value).await.unwrap(), user);
    }

    #[tokio::test]
    async fn test_unknown_and_revoked_are_distinct_internally() {
        let (ledger, user) = setup().await;
        assert!(matches!(
            ledger.validate("gym_v1_nope").await,
            Err(AuthError::TokenNotFound)
        ));

        let token = ledger.issue(&user).await.unwrap();
        ledger.revoke(&token.value).await.unwrap();
        assert!(matches!(
            ledger.validate(&token.value).await,
            Err(AuthError::TokenRevoked)
        ));
    }

    #[tokio::test]
    async fn test_revoke_one_leaves_siblings_valid() {
        let (ledger, user) = setup().await;
        let web = ledger.issue(&user).await.unwrap();
        let mobile = ledger.issue(&user).await.unwrap();

        assert!(ledger.revoke(&web.value).await.unwrap());
        assert!(!ledger.revoke(&web.value).await.unwrap(), "second revoke is a no-op");
        assert!(ledger.validate(&mobile.value).await.is_ok());
    }

    #[tokio::test]
    async fn test_supersede_leaves_one_valid_token() {
        let (ledger, user) = setup().await;
        let old_a = ledger.issue(&user).await.unwrap();
        let old_b = ledger.issue(&user).await.unwrap();

        let fresh = ledger.supersede(&user).await.unwrap();

        let valid = ledger.find_valid_for_user(&user).await.unwrap();
        assert_eq!(valid.len(), 1);
        assert_eq!(valid[0].value, fresh.value);
        assert!(ledger.validate(&old_a.value).await.is_err());
        assert!(ledger.validate(&old_b.value).await.is_err());
    }

    #[tokio::test]
    async fn test_token_of_deleted_owner_is_rejected() {
        let store = Arc::new(MemoryStore::new());
        let ledger = TokenLedger::new(store.clone(), store.clone());
        let ghost = User {
            username: "gone".into(),
            role: UserRole::Trainee,
        };
        let token = ledger.issue(&ghost).await.unwrap();
        assert!(matches!(
            ledger.validate(&token.value).await,
            Err(AuthError::TokenNotFound)
        ));
    }

    /// Reports a collision for the first `collisions` inserts.
    struct CollidingTokens {
        inner: MemoryStore,
        collisions: AtomicUsize,
    }

    #[async_trait]
    impl TokenRepository for CollidingTokens {
        async fn insert(&self, token: &Token) -> Result<(), InsertTokenError> {
            if self
                .collisions
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(InsertTokenError::Duplicate);
            }
            self.inner.insert(token).await
        }
        async fn find(&self, value: &str) -> anyhow::Result<Option<Token>> {
            self.inner.find(value).await
        }
        async fn revoke(&self, value: &str) -> anyhow::Result<bool> {
            self.inner.revoke(value).await
        }
        async fn revoke_all_for_user(&self, username: &str) -> anyhow::Result<u64> {
            self.inner.revoke_all_for_user(username).await
        }
        async fn supersede(&self, token: &Token) -> Result<u64, InsertTokenError> {
            self.inner.supersede(token).await
        }
        async fn find_valid_for_user(&self, username: &str) -> anyhow::Result<Vec<Token>> {
            self.inner.find_valid_for_user(username).await
        }
    }

    #[tokio::test]
    async fn test_collision_is_retried_with_a_new_value() {
        let (_, user) = setup().await;
        let tokens = Arc::new(CollidingTokens {
            inner: MemoryStore::new(),
            collisions: AtomicUsize::new(2),
        });
        let ledger = TokenLedger::new(tokens, Arc::new(MemoryStore::new()));
        assert!(ledger.issue(&user).await.is_ok());
    }

    #[tokio::test]
    async fn test_persistent_collisions_give_up() {
        let (_, user) = setup().await;
        let tokens = Arc::new(CollidingTokens {
            inner: MemoryStore::new(),
            collisions: AtomicUsize::new(ISSUE_ATTEMPTS),
        });
        let ledger = TokenLedger::new(tokens, Arc::new(MemoryStore::new()));
        assert!(matches!(ledger.issue(&user).await, Err(AuthError::Store(_))));
    }
}
