//! Key material and symmetric primitives for hushd.
//!
//! - [`MasterKey`]: released by the keystore on unlock
//! - [`DbKey`]: HKDF-SHA256 subkey that opens local storage
//! - [`ScopeKey`] / [`ChannelKey`]: channel keys arrive sealed to their
//!   team or account key with XChaCha20-Poly1305
//!
//! All key types zero their memory on drop and redact themselves in
//! debug output.

use argon2::{Algorithm, Argon2, Params, Version};
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    XChaCha20Poly1305, XNonce,
};
use hkdf::Hkdf;
use hush_types::SealedKey;
use sha2::{Digest, Sha256};
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Nonce size for XChaCha20-Poly1305 (192 bits = 24 bytes).
pub const NONCE_SIZE: usize = 24;

/// Key size for XChaCha20-Poly1305 (256 bits = 32 bytes).
pub const KEY_SIZE: usize = 32;

/// HKDF info string for the storage key.
const DB_KEY_INFO: &[u8] = b"hush/service.db";

/// Crypto errors.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// Encryption failed.
    #[error("encryption failed: {0}")]
    EncryptionFailed(String),

    /// Decryption failed (authentication error).
    #[error("decryption failed: authentication error")]
    DecryptionFailed,

    /// Invalid key length.
    #[error("invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength {
        /// Expected length.
        expected: usize,
        /// Actual length.
        actual: usize,
    },

    /// Key derivation failed.
    #[error("key derivation failed: {0}")]
    KeyDerivationFailed(String),

    /// The system random source failed.
    #[error("random source failed: {0}")]
    Random(String),
}

/// Fill a fixed-size array from the system random source.
pub fn random_bytes<const N: usize>() -> Result<[u8; N], CryptoError> {
    let mut bytes = [0u8; N];
    getrandom::getrandom(&mut bytes).map_err(|e| CryptoError::Random(e.to_string()))?;
    Ok(bytes)
}

/// `len` bytes from the system random source.
pub fn random_vec(len: usize) -> Result<Vec<u8>, CryptoError> {
    let mut bytes = vec![0u8; len];
    getrandom::getrandom(&mut bytes).map_err(|e| CryptoError::Random(e.to_string()))?;
    Ok(bytes)
}

fn key_from_slice(bytes: &[u8]) -> Result<[u8; KEY_SIZE], CryptoError> {
    bytes
        .try_into()
        .map_err(|_| CryptoError::InvalidKeyLength {
            expected: KEY_SIZE,
            actual: bytes.len(),
        })
}

macro_rules! secret_key {
    ($name:ident, $doc:literal) => {
        #[doc = $doc]
        #[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
        pub struct $name([u8; KEY_SIZE]);

        impl $name {
            /// Create a key from raw bytes.
            pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
                key_from_slice(bytes).map(Self)
            }

            /// Generate a random key.
            pub fn generate() -> Result<Self, CryptoError> {
                random_bytes().map(Self)
            }

            /// Get the raw bytes.
            pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
                &self.0
            }
        }

        // Don't leak key material in debug output
        impl std::fmt::Debug for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, concat!(stringify!($name), "([REDACTED])"))
            }
        }
    };
}

secret_key!(MasterKey, "Root key held by the keystore while unlocked.");
secret_key!(DbKey, "Key that opens the local store.");
secret_key!(ScopeKey, "Team or account key that seals channel keys.");
secret_key!(ChannelKey, "Per-channel key; also the source of the channel id.");

impl DbKey {
    /// Derive the storage key from the master key.
    ///
    /// HKDF-SHA256, no salt, fixed domain info.
    pub fn derive(master: &MasterKey) -> Result<Self, CryptoError> {
        let hkdf = Hkdf::<Sha256>::new(None, master.as_bytes());
        let mut okm = [0u8; KEY_SIZE];
        hkdf.expand(DB_KEY_INFO, &mut okm)
            .map_err(|e| CryptoError::KeyDerivationFailed(e.to_string()))?;
        Ok(Self(okm))
    }

    /// One-way fingerprint stored alongside the data to detect a wrong key.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(b"hush-db-key-fingerprint-v1");
        hasher.update(self.0);
        hex::encode(hasher.finalize())
    }
}

impl ScopeKey {
    /// Seal a channel key to this scope.
    pub fn seal(&self, channel_key: &ChannelKey) -> Result<SealedKey, CryptoError> {
        let (ciphertext, nonce) = encrypt(&self.0, channel_key.as_bytes())?;
        Ok(SealedKey { nonce, ciphertext })
    }

    /// Open a channel key sealed to this scope.
    pub fn open(&self, sealed: &SealedKey) -> Result<ChannelKey, CryptoError> {
        let mut plaintext = decrypt(&self.0, &sealed.ciphertext, &sealed.nonce)?;
        let key = ChannelKey::from_bytes(&plaintext);
        plaintext.zeroize();
        key
    }
}

/// Encrypt with XChaCha20-Poly1305 under a random nonce.
///
/// Returns (ciphertext, nonce).
pub fn encrypt(
    key: &[u8; KEY_SIZE],
    plaintext: &[u8],
) -> Result<(Vec<u8>, [u8; NONCE_SIZE]), CryptoError> {
    let nonce_bytes: [u8; NONCE_SIZE] = random_bytes()?;
    let nonce = XNonce::from_slice(&nonce_bytes);

    let cipher = XChaCha20Poly1305::new_from_slice(key)
        .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;

    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|_| CryptoError::EncryptionFailed("aead encrypt failed".into()))?;

    Ok((ciphertext, nonce_bytes))
}

/// Decrypt with XChaCha20-Poly1305.
pub fn decrypt(
    key: &[u8; KEY_SIZE],
    ciphertext: &[u8],
    nonce: &[u8; NONCE_SIZE],
) -> Result<Vec<u8>, CryptoError> {
    let nonce = XNonce::from_slice(nonce);

    let cipher = XChaCha20Poly1305::new_from_slice(key)
        .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;

    cipher
        .decrypt(nonce, ciphertext)
        .map_err(|_| CryptoError::DecryptionFailed)
}

/// Argon2id cost parameters for stretching keystore secrets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StretchParams {
    memory_kib: u32,
    iterations: u32,
    parallelism: u32,
}

impl StretchParams {
    /// Desktop parameters: 64 MiB, 3 iterations.
    pub fn desktop() -> Self {
        Self {
            memory_kib: 64 * 1024,
            iterations: 3,
            parallelism: 4,
        }
    }

    /// Minimal parameters for tests and constrained environments.
    pub fn light() -> Self {
        Self {
            memory_kib: 8 * 1024,
            iterations: 1,
            parallelism: 1,
        }
    }

    /// Derive a key-encryption key from a secret and salt.
    pub fn stretch(&self, secret: &[u8], salt: &[u8]) -> Result<[u8; KEY_SIZE], CryptoError> {
        let params = Params::new(
            self.memory_kib,
            self.iterations,
            self.parallelism,
            Some(KEY_SIZE),
        )
        .map_err(|e| CryptoError::KeyDerivationFailed(e.to_string()))?;
        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

        let mut output = [0u8; KEY_SIZE];
        argon2
            .hash_password_into(secret, salt, &mut output)
            .map_err(|e| CryptoError::KeyDerivationFailed(e.to_string()))?;
        Ok(output)
    }
}

impl Default for StretchParams {
    fn default() -> Self {
        Self::desktop()
    }
}
