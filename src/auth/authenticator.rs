use std::sync::Arc;

use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::errors::AuthError;
use crate::models::user::User;
use crate::store::CredentialStore;

/// Checks a presented password against the stored hash. The hashing scheme
/// is whatever the implementation chooses.
pub trait PasswordVerifier: Send + Sync {
    fn verify(&self, password: &str, stored_hash: &str) -> bool;

    /// Hash to store for a newly chosen password.
    fn digest(&self, password: &str) -> String;
}

/// Hex SHA-256 of the password, compared in constant time.
#[derive(Debug, Default, Clone, Copy)]
pub struct Sha256Verifier;

impl Sha256Verifier {
    pub fn hash(password: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(password.as_bytes());
        hex::encode(hasher.finalize())
    }
}

impl PasswordVerifier for Sha256Verifier {
    fn verify(&self, password: &str, stored_hash: &str) -> bool {
        let computed = Self::hash(password);
        let stored = stored_hash.trim().to_ascii_lowercase();
        computed.as_bytes().ct_eq(stored.as_bytes()).into()
    }

    fn digest(&self, password: &str) -> String {
        Self::hash(password)
    }
}

/// Stateless username/password check against the credential store.
pub struct Authenticator {
    store: Arc<dyn CredentialStore>,
    verifier: Arc<dyn PasswordVerifier>,
}

impl Authenticator {
    pub fn new(store: Arc<dyn CredentialStore>, verifier: Arc<dyn PasswordVerifier>) -> Self {
        Self { store, verifier }
    }

    pub fn with_sha256(store: Arc<dyn CredentialStore>) -> Self {
        Self::new(store, Arc::new(Sha256Verifier))
    }

    /// Returns the caller's identity when the pair is valid.
    ///
    /// Empty input is refused before the store is consulted. An unknown
    /// username is `NotFound`; a wrong password or an inactive account is
    /// `Unauthorized`.
    pub async fn authenticate(&self, username: &str, password: &str) -> Result<User, AuthError> {
        if username.is_empty() || password.is_empty() {
            return Err(AuthError::Unauthorized);
        }

        let record = self
            .store
            .lookup(username)
            .await?
            .ok_or(AuthError::NotFound)?;

        if !self.verifier.verify(password, &record.password_hash) {
            tracing::debug!(username = %username, "password mismatch");
            return Err(AuthError::Unauthorized);
        }

        if !record.active {
            tracing::debug!(username = %username, "account inactive");
            return Err(AuthError::Unauthorized);
        }

        Ok(record.identity())
    }

    /// Replace the password of `username` after checking the current one
    /// exactly as `authenticate` does. Tokens are left to the caller.
    pub async fn change_password(
        &self,
        username: &str,
        current: &str,
        new: &str,
    ) -> Result<User, AuthError> {
        if new.is_empty() {
            return Err(AuthError::EmptyPassword);
        }
        let user = self.authenticate(username, current).await?;
        self.store_password(username, new).await?;
        Ok(user)
    }

    /// Administrative reset: no current password required.
    pub async fn reset_password(&self, username: &str, new: &str) -> Result<(), AuthError> {
        if new.is_empty() {
            return Err(AuthError::EmptyPassword);
        }
        self.store_password(username, new).await
    }

    async fn store_password(&self, username: &str, new: &str) -> Result<(), AuthError> {
        let hash = self.verifier.digest(new);
        if !self.store.set_password_hash(username, &hash).await? {
            return Err(AuthError::NotFound);
        }
        tracing::info!(username = %username, "password changed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::user::{UserRecord, UserRole};
    use crate::store::memory::MemoryStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Counts lookups so tests can assert the store was never reached.
    #[derive(Default)]
    struct CountingStore {
        lookups: AtomicUsize,
    }

    #[async_trait]
    impl CredentialStore for CountingStore {
        async fn lookup(&self, _username: &str) -> anyhow::Result<Option<UserRecord>> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            Ok(None)
        }

        async fn set_password_hash(&self, _username: &str, _hash: &str) -> anyhow::Result<bool> {
            Ok(false)
        }
    }

    struct FailingStore;

    #[async_trait]
    impl CredentialStore for FailingStore {
        async fn lookup(&self, _username: &str) -> anyhow::Result<Option<UserRecord>> {
            anyhow::bail!("connection refused")
        }

        async fn set_password_hash(&self, _username: &str, _hash: &str) -> anyhow::Result<bool> {
            anyhow::bail!("connection refused")
        }
    }

    async fn store_with(active: bool) -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        store
            .add_user(UserRecord {
                username: "anna.k".into(),
                password_hash: Sha256Verifier::hash("s3cret"),
                active,
                role: UserRole::Trainee,
            })
            .await
            .unwrap();
        store
    }

    #[test]
    fn test_sha256_verifier() {
        let hash = Sha256Verifier::hash("pw");
        assert_eq!(hash.len(), 64);
        assert!(Sha256Verifier.verify("pw", &hash));
        assert!(Sha256Verifier.verify("pw", &hash.to_uppercase()));
        assert!(!Sha256Verifier.verify("pw2", &hash));
        assert!(!Sha256Verifier.verify("pw", "short"));
    }

    #[tokio::test]
    async fn test_valid_pair_returns_identity() {
        let auth = Authenticator::with_sha256(store_with(true).await);
        let user = auth.authenticate("anna.k", "s3cret").await.unwrap();
        assert_eq!(user.username, "anna.k");
        assert_eq!(user.role, UserRole::Trainee);
    }

    #[tokio::test]
    async fn test_unknown_user_is_not_found() {
        let auth = Authenticator::with_sha256(store_with(true).await);
        assert!(matches!(
            auth.authenticate("ghost", "anything").await,
            Err(AuthError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_wrong_password_is_unauthorized() {
        let auth = Authenticator::with_sha256(store_with(true).await);
        assert!(matches!(
            auth.authenticate("anna.k", "nope").await,
            Err(AuthError::Unauthorized)
        ));
    }

    #[tokio::test]
    async fn test_inactive_account_is_unauthorized() {
        let auth = Authenticator::with_sha256(store_with(false).await);
        assert!(matches!(
            auth.authenticate("anna.k", "s3cret").await,
            Err(AuthError::Unauthorized)
        ));
    }

    #[tokio::test]
    async fn test_empty_input_never_reaches_store() {
        let store = Arc::new(CountingStore::default());
        let auth = Authenticator::with_sha256(store.clone());

        for (u, p) in [("", "pw"), ("anna", ""), ("", "")] {
            assert!(matches!(auth.authenticate(u, p).await, Err(AuthError::Unauthorized)));
        }
        assert_eq!(store.lookups.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_store_failure_is_propagated() {
        let auth = Authenticator::with_sha256(Arc::new(FailingStore));
        assert!(matches!(
            auth.authenticate("anna", "pw").await,
            Err(AuthError::Store(_))
        ));
    }

    #[tokio::test]
    async fn test_change_password_needs_current_password() {
        let store = store_with(true).await;
        let auth = Authenticator::with_sha256(store);

        assert!(matches!(
            auth.change_password("anna.k", "wrong", "n3w").await,
            Err(AuthError::Unauthorized)
        ));
        // nothing changed
        assert!(auth.authenticate("anna.k", "s3cret").await.is_ok());

        let user = auth.change_password("anna.k", "s3cret", "n3w").await.unwrap();
        assert_eq!(user.username, "anna.k");
        assert!(matches!(
            auth.authenticate("anna.k", "s3cret").await,
            Err(AuthError::Unauthorized)
        ));
        assert!(auth.authenticate("anna.k", "n3w").await.is_ok());
    }

    #[tokio::test]
    async fn test_empty_new_password_is_refused() {
        let auth = Authenticator::with_sha256(store_with(true).await);
        assert!(matches!(
            auth.change_password("anna.k", "s3cret", "").await,
            Err(AuthError::EmptyPassword)
        ));
        assert!(matches!(
            auth.reset_password("anna.k", "").await,
            Err(AuthError::EmptyPassword)
        ));
        assert!(auth.authenticate("anna.k", "s3cret").await.is_ok());
    }

    #[tokio::test]
    async fn test_reset_password_of_unknown_user() {
        let auth = Authenticator::with_sha256(store_with(true).await);
        assert!(matches!(
            auth.reset_password("ghost", "pw").await,
            Err(AuthError::NotFound)
        ));
        auth.reset_password("anna.k", "fresh").await.unwrap();
        assert!(auth.authenticate("anna.k", "fresh").await.is_ok());
    }
}
