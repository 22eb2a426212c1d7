//! Error types for hushd.

use crate::crypto::CryptoError;
use crate::keystore::KeystoreError;
use crate::relay::RelayError;
use crate::remote::RemoteError;
use hush_core::ComposeError;

/// Errors returned to RPC callers.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// Wrong secret, or a method the keystore was never set up with.
    #[error("invalid credential")]
    InvalidCredential,

    /// Missing or unknown session token.
    #[error("{0}")]
    Unauthenticated(&'static str),

    /// The keystore has not been set up.
    #[error("setup needed")]
    NotSetUp,

    /// Setup was requested on a keystore that is already set up.
    #[error("already setup")]
    AlreadySetUp,

    /// The operation needs an unlocked keystore.
    #[error("locked")]
    Locked,

    /// The remote could not be reached; retrying may succeed.
    #[error("network error: {0}")]
    TransientNetwork(String),

    /// The remote reported an index behind the local watermark.
    #[error("inconsistent index for channel {channel}: local {local}, remote {remote}")]
    Inconsistent {
        /// Channel id.
        channel: String,
        /// Local watermark.
        local: i64,
        /// Remote index.
        remote: i64,
    },

    /// No such channel in the local store.
    #[error("unknown channel: {0}")]
    UnknownChannel(String),

    /// No account scope has been registered.
    #[error("no account")]
    NoAccount,

    /// No team scope has been registered.
    #[error("no team")]
    NoTeam,

    /// The thing being created already exists.
    #[error("{0}")]
    Conflict(&'static str),

    /// Malformed request arguments.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Remote API rejected the request.
    #[error("remote error: {0}")]
    Remote(RemoteError),

    /// Local store failure.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Key material could not be opened or derived.
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// Keystore failure other than a rejected credential.
    #[error("keystore error: {0}")]
    Keystore(KeystoreError),

    /// Relay stream failure.
    #[error("relay error: {0}")]
    Relay(#[from] RelayError),
}

impl ServiceError {
    /// Stable machine-readable code for RPC responses.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidCredential => "invalid_credential",
            Self::Unauthenticated(_) => "unauthenticated",
            Self::NotSetUp => "setup_needed",
            Self::AlreadySetUp => "already_setup",
            Self::Locked => "locked",
            Self::TransientNetwork(_) => "transient_network",
            Self::Inconsistent { .. } => "inconsistent",
            Self::UnknownChannel(_) => "unknown_channel",
            Self::NoAccount => "no_account",
            Self::NoTeam => "no_team",
            Self::Conflict(_) => "conflict",
            Self::InvalidRequest(_) => "invalid_request",
            Self::Remote(_) => "remote",
            Self::Storage(_) => "storage",
            Self::Crypto(_) => "crypto",
            Self::Keystore(_) => "keystore",
            Self::Relay(_) => "relay",
        }
    }
}

impl From<KeystoreError> for ServiceError {
    fn from(err: KeystoreError) -> Self {
        match err {
            KeystoreError::InvalidPassword | KeystoreError::InvalidAuth => Self::InvalidCredential,
            KeystoreError::NotSetUp => Self::NotSetUp,
            KeystoreError::AlreadySetUp => Self::AlreadySetUp,
            KeystoreError::Locked => Self::Locked,
            other => Self::Keystore(other),
        }
    }
}

impl From<RemoteError> for ServiceError {
    fn from(err: RemoteError) -> Self {
        match err {
            RemoteError::Network(msg) => Self::TransientNetwork(msg),
            RemoteError::Conflict => Self::Conflict("already exists"),
            other => Self::Remote(other),
        }
    }
}

impl From<ComposeError> for ServiceError {
    fn from(err: ComposeError) -> Self {
        Self::InvalidRequest(err.to_string())
    }
}

/// Local store errors.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Database error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// The store is not open (locked).
    #[error("storage closed")]
    Closed,

    /// The store was opened before with a different key.
    #[error("storage key mismatch")]
    KeyMismatch,

    /// Migration error.
    #[error("migration error: {0}")]
    Migration(String),

    /// A stored row could not be decoded.
    #[error("invalid row: {0}")]
    InvalidRow(String),
}

/// Result type alias for RPC operations.
pub type Result<T> = std::result::Result<T, ServiceError>;

/// Result type alias for storage operations.
pub type StorageResult<T> = std::result::Result<T, StorageError>;
