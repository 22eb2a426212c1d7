//! Session tokens.
//!
//! Each client that unlocks gets an opaque bearer token (32 random bytes,
//! base62). Unlocking again from the same client replaces its token. Lock
//! clears every token at once; there is no per-client logout.

use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::crypto::{self, CryptoError};
use crate::error::ServiceError;

/// RPC methods callable without a session token.
pub const ALLOWLIST: &[&str] = &[
    "AccountCreate",
    "AuthUnlock",
    "AuthLock",
    "AuthStatus",
    "Rand",
    "RandPassword",
];

/// Generate a new session token.
pub fn generate_token() -> Result<String, CryptoError> {
    let bytes: [u8; 32] = crypto::random_bytes()?;
    Ok(hush_core::base62::encode(&bytes))
}

/// Registry of live session tokens, keyed by client name.
#[derive(Debug, Default)]
pub struct TokenRegistry {
    tokens: RwLock<HashMap<String, String>>,
}

impl TokenRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue a token for `client`, replacing any previous one.
    pub async fn register(&self, client: &str) -> Result<String, CryptoError> {
        let token = generate_token()?;
        self.tokens
            .write()
            .await
            .insert(client.to_string(), token.clone());
        tracing::debug!(client, "Session token registered");
        Ok(token)
    }

    /// Check that `token` belongs to some client.
    pub async fn check(&self, token: &str) -> Result<(), ServiceError> {
        let tokens = self.tokens.read().await;
        if tokens.values().any(|t| t == token) {
            Ok(())
        } else {
            Err(ServiceError::Unauthenticated("invalid token"))
        }
    }

    /// Invalidate every token.
    pub async fn clear(&self) {
        let mut tokens = self.tokens.write().await;
        let count = tokens.len();
        tokens.clear();
        tracing::debug!(count, "Session tokens cleared");
    }

    /// Number of live tokens.
    pub async fn len(&self) -> usize {
        self.tokens.read().await.len()
    }

    /// Whether no tokens are live.
    pub async fn is_empty(&self) -> bool {
        self.tokens.read().await.is_empty()
    }

    /// Gate an RPC: allow-listed methods pass, others need a live token.
    pub async fn authorize(&self, method: &str, token: Option<&str>) -> Result<(), ServiceError> {
        if ALLOWLIST.contains(&method) {
            return Ok(());
        }
        match token {
            None | Some("") => Err(ServiceError::Unauthenticated("authorization missing")),
            Some(token) => self.check(token).await,
        }
    }
}
