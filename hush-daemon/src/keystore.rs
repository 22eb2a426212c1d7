//! Keystore abstraction.
//!
//! The keystore owns the master key. It is set up once with a first
//! credential, releases the master key on unlock and forgets it on lock.
//! [`MemoryKeystore`] wraps the master key under an Argon2id-stretched
//! secret per provisioned method and keeps everything in memory.

use async_trait::async_trait;
use hush_core::LifecycleState;
use hush_types::AuthMethod;
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::Mutex;
use zeroize::Zeroizing;

use crate::crypto::{self, CryptoError, MasterKey, StretchParams, KEY_SIZE, NONCE_SIZE};

/// Keystore errors.
#[derive(Debug, Error)]
pub enum KeystoreError {
    /// No credential has been set up.
    #[error("setup needed")]
    NotSetUp,

    /// Setup was already done.
    #[error("already setup")]
    AlreadySetUp,

    /// The operation needs the master key.
    #[error("locked")]
    Locked,

    /// The secret did not open the method's key slot.
    #[error("invalid password")]
    InvalidPassword,

    /// The method was never provisioned.
    #[error("invalid auth")]
    InvalidAuth,

    /// Key wrapping failed.
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),
}

/// Source of the master key.
#[async_trait]
pub trait Keystore: Send + Sync {
    /// Current lifecycle state as seen by the keystore.
    async fn status(&self) -> LifecycleState;

    /// Provision the first credential. Leaves the keystore locked.
    async fn setup(&self, secret: &str, method: AuthMethod) -> Result<(), KeystoreError>;

    /// Release the master key.
    async fn unlock(&self, secret: &str, method: AuthMethod) -> Result<MasterKey, KeystoreError>;

    /// Forget the master key.
    async fn lock(&self) -> Result<(), KeystoreError>;
}

/// The master key wrapped under one method's stretched secret.
struct KeySlot {
    salt: [u8; 16],
    nonce: [u8; NONCE_SIZE],
    wrapped: Vec<u8>,
}

#[derive(Default)]
struct MemoryKeystoreInner {
    slots: HashMap<AuthMethod, KeySlot>,
    master: Option<MasterKey>,
}

/// In-memory keystore.
pub struct MemoryKeystore {
    params: StretchParams,
    inner: Mutex<MemoryKeystoreInner>,
}

impl MemoryKeystore {
    /// Create an empty keystore (state `SetupNeeded`).
    pub fn new(params: StretchParams) -> Self {
        Self {
            params,
            inner: Mutex::new(MemoryKeystoreInner::default()),
        }
    }

    /// Add another method that unlocks the same master key.
    ///
    /// Requires the keystore to be unlocked.
    pub async fn provision(&self, secret: &str, method: AuthMethod) -> Result<(), KeystoreError> {
        let mut inner = self.inner.lock().await;
        let master = inner.master.clone().ok_or(KeystoreError::Locked)?;
        let slot = self.wrap(secret, &master).await?;
        inner.slots.insert(method, slot);
        tracing::info!(%method, "Keystore method provisioned");
        Ok(())
    }

    async fn wrap(&self, secret: &str, master: &MasterKey) -> Result<KeySlot, KeystoreError> {
        let salt: [u8; 16] = crypto::random_bytes()?;
        let kek = stretch(self.params, secret, salt).await?;
        let (wrapped, nonce) = crypto::encrypt(&kek, master.as_bytes())?;
        Ok(KeySlot {
            salt,
            nonce,
            wrapped,
        })
    }

    async fn unwrap_slot(&self, secret: &str, slot: &KeySlot) -> Result<MasterKey, KeystoreError> {
        let kek = stretch(self.params, secret, slot.salt).await?;
        let bytes = crypto::decrypt(&kek, &slot.wrapped, &slot.nonce)
            .map_err(|_| KeystoreError::InvalidPassword)?;
        Ok(MasterKey::from_bytes(&bytes)?)
    }
}

/// Argon2id stretch, run on the blocking pool.
async fn stretch(
    params: StretchParams,
    secret: &str,
    salt: [u8; 16],
) -> Result<Zeroizing<[u8; KEY_SIZE]>, KeystoreError> {
    let secret = Zeroizing::new(secret.as_bytes().to_vec());
    let kek = tokio::task::spawn_blocking(move || params.stretch(&secret, &salt))
        .await
        .map_err(|e| CryptoError::KeyDerivationFailed(e.to_string()))??;
    Ok(Zeroizing::new(kek))
}

impl Default for MemoryKeystore {
    fn default() -> Self {
        Self::new(StretchParams::default())
    }
}

#[async_trait]
impl Keystore for MemoryKeystore {
    async fn status(&self) -> LifecycleState {
        let inner = self.inner.lock().await;
        if inner.slots.is_empty() {
            LifecycleState::SetupNeeded
        } else if inner.master.is_some() {
            LifecycleState::Unlocked
        } else {
            LifecycleState::Locked
        }
    }

    async fn setup(&self, secret: &str, method: AuthMethod) -> Result<(), KeystoreError> {
        let mut inner = self.inner.lock().await;
        if !inner.slots.is_empty() {
            return Err(KeystoreError::AlreadySetUp);
        }
        let master = MasterKey::generate()?;
        let slot = self.wrap(secret, &master).await?;
        inner.slots.insert(method, slot);
        tracing::info!(%method, "Keystore set up");
        Ok(())
    }

    async fn unlock(&self, secret: &str, method: AuthMethod) -> Result<MasterKey, KeystoreError> {
        let mut inner = self.inner.lock().await;
        if inner.slots.is_empty() {
            return Err(KeystoreError::NotSetUp);
        }
        let slot = inner.slots.get(&method).ok_or(KeystoreError::InvalidAuth)?;
        let master = self.unwrap_slot(secret, slot).await?;
        inner.master = Some(master.clone());
        Ok(master)
    }

    async fn lock(&self) -> Result<(), KeystoreError> {
        let mut inner = self.inner.lock().await;
        inner.master = None;
        Ok(())
    }
}
