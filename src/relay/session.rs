//! Session store: opaque token → canonical identity.

use std::collections::HashMap;
use std::time::Duration;

use rand::RngCore;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::debug;

/// Random bytes per token (hex-encoded to twice as many characters).
pub const TOKEN_BYTES: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("session not found")]
pub struct SessionNotFound;

/// How long a session stays valid after it is minted.
///
/// The default has no TTL: sessions live until the process exits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionPolicy {
    pub ttl: Option<Duration>,
}

impl SessionPolicy {
    pub fn with_ttl(ttl: Duration) -> Self {
        Self { ttl: Some(ttl) }
    }
}

#[derive(Debug)]
struct Session {
    identity: String,
    issued: Instant,
}

#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: RwLock<HashMap<String, Session>>,
    policy: SessionPolicy,
}

/// Generate a hex token from the OS-seeded CSPRNG.
pub fn generate_token() -> String {
    let mut bytes = vec![0u8; TOKEN_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

impl SessionStore {
    pub fn new(policy: SessionPolicy) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            policy,
        }
    }

    pub fn policy(&self) -> SessionPolicy {
        self.policy
    }

    /// Mint a fresh token bound to `identity`. Under a TTL, sessions that
    /// have already expired are pruned first.
    pub async fn issue(&self, identity: &str) -> String {
        let token = generate_token();
        let mut sessions = self.sessions.write().await;
        if let Some(ttl) = self.policy.ttl {
            let before = sessions.len();
            sessions.retain(|_, s| s.issued.elapsed() < ttl);
            let pruned = before - sessions.len();
            if pruned > 0 {
                debug!(pruned, "expired sessions pruned");
            }
        }
        sessions.insert(
            token.clone(),
            Session {
                identity: identity.to_owned(),
                issued: Instant::now(),
            },
        );
        token
    }

    /// Look up the identity behind a token.
    pub async fn whoami(&self, token: &str) -> Result<String, SessionNotFound> {
        {
            let sessions = self.sessions.read().await;
            let session = sessions.get(token).ok_or(SessionNotFound)?;
            let live = self
                .policy
                .ttl
                .map_or(true, |ttl| session.issued.elapsed() < ttl);
            if live {
                return Ok(session.identity.clone());
            }
        }

        self.sessions.write().await.remove(token);
        debug!("expired session removed");
        Err(SessionNotFound)
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}
