//! Error types for hush wire payloads.

use thiserror::Error;

/// Errors that can occur encoding or decoding hush payloads.
#[derive(Debug, Error)]
pub enum WireError {
    /// MessagePack serialization failed
    #[error("serialization failed: {0}")]
    Serialization(#[source] rmp_serde::encode::Error),

    /// MessagePack deserialization failed
    #[error("deserialization failed: {0}")]
    Deserialization(#[source] rmp_serde::decode::Error),

    /// Invalid identifier encoding
    #[error("invalid id: {0}")]
    InvalidId(String),

    /// Unknown auth method name
    #[error("unknown auth method: {0}")]
    UnknownAuthMethod(String),
}
