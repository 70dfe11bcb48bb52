//! Credential directory: account creation and password checks.
//!
//! The relay only needs `create` and `validate`; where accounts live is up
//! to the implementation. [`MemoryDirectory`] keeps salted BLAKE3 digests
//! in a map and is what the binary and the tests use.

use std::collections::HashMap;

use async_trait::async_trait;
use rand::RngCore;
use tokio::sync::RwLock;

use super::address::canonical;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DirectoryError {
    #[error("account already exists")]
    AlreadyExists,
    #[error("account not found")]
    NotFound,
    #[error("invalid username/password")]
    BadPassword,
    #[error("directory storage error: {0}")]
    Storage(String),
}

/// Verifies and creates credentials for a username.
#[async_trait]
pub trait Directory: Send + Sync {
    async fn create(&self, username: &str, password: &str) -> Result<(), DirectoryError>;
    async fn validate(&self, username: &str, password: &str) -> Result<(), DirectoryError>;
}

#[derive(Debug)]
struct Account {
    salt: [u8; 32],
    digest: blake3::Hash,
}

impl Account {
    fn new(password: &str) -> Self {
        let mut salt = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut salt);
        let digest = digest(&salt, password);
        Self { salt, digest }
    }

    fn verify(&self, password: &str) -> bool {
        // blake3::Hash equality is constant-time.
        digest(&self.salt, password) == self.digest
    }
}

fn digest(salt: &[u8; 32], password: &str) -> blake3::Hash {
    let mut h = blake3::Hasher::new();
    h.update(hex::encode(salt).as_bytes());
    h.update(b":");
    h.update(password.as_bytes());
    h.finalize()
}

/// In-memory directory keyed by canonical username.
#[derive(Debug, Default)]
pub struct MemoryDirectory {
    accounts: RwLock<HashMap<String, Account>>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a directory pre-populated with `(username, password)` pairs.
    pub fn with_accounts<I, U, P>(accounts: I) -> Self
    where
        I: IntoIterator<Item = (U, P)>,
        U: AsRef<str>,
        P: AsRef<str>,
    {
        let accounts = accounts
            .into_iter()
            .map(|(u, p)| (canonical(u.as_ref()), Account::new(p.as_ref())))
            .collect();
        Self {
            accounts: RwLock::new(accounts),
        }
    }

    pub async fn len(&self) -> usize {
        self.accounts.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.accounts.read().await.is_empty()
    }
}

#[async_trait]
impl Directory for MemoryDirectory {
    async fn create(&self, username: &str, password: &str) -> Result<(), DirectoryError> {
        let mut accounts = self.accounts.write().await;
        let key = canonical(username);
        if accounts.contains_key(&key) {
            return Err(DirectoryError::AlreadyExists);
        }
        accounts.insert(key, Account::new(password));
        Ok(())
    }

    async fn validate(&self, username: &str, password: &str) -> Result<(), DirectoryError> {
        let accounts = self.accounts.read().await;
        let account = accounts
            .get(&canonical(username))
            .ok_or(DirectoryError::NotFound)?;
        if account.verify(password) {
            Ok(())
        } else {
            Err(DirectoryError::BadPassword)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_then_validate() {
        let dir = MemoryDirectory::new();
        dir.create("alice", "hunter2").await.unwrap();
        assert_eq!(dir.validate("alice", "hunter2").await, Ok(()));
    }

    #[tokio::test]
    async fn usernames_are_case_insensitive() {
        let dir = MemoryDirectory::new();
        dir.create("Alice", "pw").await.unwrap();
        assert_eq!(dir.validate("ALICE", "pw").await, Ok(()));
        assert_eq!(
            dir.create("alice", "other").await,
            Err(DirectoryError::AlreadyExists)
        );
    }

    #[tokio::test]
    async fn wrong_password_rejected() {
        let dir = MemoryDirectory::new();
        dir.create("alice", "pw").await.unwrap();
        assert_eq!(
            dir.validate("alice", "nope").await,
            Err(DirectoryError::BadPassword)
        );
    }

    #[tokio::test]
    async fn unknown_account_rejected() {
        let dir = MemoryDirectory::new();
        assert_eq!(
            dir.validate("ghost", "pw").await,
            Err(DirectoryError::NotFound)
        );
    }

    #[tokio::test]
    async fn seeded_accounts_validate() {
        let dir = MemoryDirectory::with_accounts([("relaya", "s3cret"), ("Bob", "pw")]);
        assert_eq!(dir.len().await, 2);
        assert_eq!(dir.validate("relaya", "s3cret").await, Ok(()));
        assert_eq!(dir.validate("bob", "pw").await, Ok(()));
    }

    #[test]
    fn same_password_different_salt() {
        let a = Account::new("pw");
        let b = Account::new("pw");
        assert_ne!(a.digest, b.digest);
        assert!(a.verify("pw") && b.verify("pw"));
    }
}
