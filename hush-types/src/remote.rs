//! Results returned by the remote API.
//!
//! Channel keys travel sealed to the scope (team or account) that owns
//! the channel; the daemon opens them with the scope key.

use serde::{Deserialize, Serialize};

use crate::{ChannelId, MessageId};

/// Nonce size of a sealed key (XChaCha20-Poly1305, 24 bytes).
pub const SEALED_NONCE_SIZE: usize = 24;

/// Which kind of scope owns a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopeKind {
    /// Channel shared with a team.
    Team,
    /// Channel owned by the user's account.
    User,
}

impl ScopeKind {
    /// Stable name, used for storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Team => "team",
            Self::User => "user",
        }
    }

    /// Parse a stored scope name.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "team" => Some(Self::Team),
            "user" => Some(Self::User),
            _ => None,
        }
    }
}

/// A channel key encrypted to its scope key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedKey {
    /// 192-bit nonce.
    pub nonce: [u8; SEALED_NONCE_SIZE],
    /// Ciphertext including the Poly1305 tag.
    pub ciphertext: Vec<u8>,
}

/// Displayable channel metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelInfo {
    /// Channel name.
    pub name: String,
    /// Optional description.
    #[serde(default)]
    pub description: String,
}

/// One channel as reported by a channel listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelDelta {
    /// Channel key sealed to the scope key.
    pub sealed_key: SealedKey,
    /// Relay token that subscribes to this channel's events.
    pub token: String,
    /// Remote message index.
    pub index: i64,
    /// Channel metadata, absent when unchanged or unset.
    pub info: Option<ChannelInfo>,
}

/// A message in a channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteMessage {
    /// Sender-assigned id, unique within the channel.
    pub id: MessageId,
    /// Sender display name.
    pub sender: String,
    /// Message text.
    pub text: String,
    /// Unix milliseconds when created.
    pub timestamp: i64,
}

/// A channel being created, as posted to the remote.
///
/// The remote never sees the channel key, only the id derived from it and
/// the key sealed to the owning scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewChannel {
    /// Id derived from the channel key.
    pub channel: ChannelId,
    /// Channel key sealed to the scope key.
    pub sealed_key: SealedKey,
    /// Initial name and description.
    pub info: ChannelInfo,
}

/// A page of messages returned by a pull.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageBatch {
    /// Messages after the requested index.
    pub messages: Vec<RemoteMessage>,
    /// Index to resume from.
    pub index: i64,
    /// More messages are available past `index`.
    pub truncated: bool,
}

/// Connection parameters for the relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Relay endpoint.
    pub url: String,
    /// Credential presented on authorize.
    pub auth: String,
}
