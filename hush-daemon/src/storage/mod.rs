//! Local channel and message store.
//!
//! The store is keyed: it only opens with the [`DbKey`] derived from the
//! master key, and it is closed whenever the daemon locks. Every data
//! method returns [`StorageError::Closed`] while closed.
//!
//! Besides channels and messages it keeps the account and team scopes,
//! so they are back after every unlock.
//!
//! [`StorageError::Closed`]: crate::error::StorageError::Closed

mod sqlite;

pub use sqlite::SqliteStore;

use crate::crypto::{ChannelKey, DbKey};
use crate::error::StorageResult;
use crate::remote::Scope;
use async_trait::async_trait;
use hush_types::{ChannelId, ChannelInfo, MessageId, RemoteMessage, ScopeKind};

/// Local state of one channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelState {
    /// Channel id (derived from the key).
    pub id: ChannelId,
    /// Display name.
    pub name: String,
    /// Description.
    pub description: String,
    /// Highest message index pulled. Never decreases.
    pub message_index: i64,
    /// Message index the user has read up to.
    pub read_index: i64,
    /// Team or account channel.
    pub scope: ScopeKind,
    /// Relay subscription token.
    pub token: String,
    /// Channel key.
    pub key: ChannelKey,
    /// Left by the user; kept for its history.
    pub hidden: bool,
}

impl ChannelState {
    /// A channel seen for the first time, at index 0.
    pub fn new(key: ChannelKey, scope: ScopeKind, token: String, info: ChannelInfo) -> Self {
        Self {
            id: ChannelId::from_key(key.as_bytes()),
            name: info.name,
            description: info.description,
            message_index: 0,
            read_index: 0,
            scope,
            token,
            key,
            hidden: false,
        }
    }

    /// Number of pulled messages past the read marker.
    pub fn unread(&self) -> i64 {
        (self.message_index - self.read_index).max(0)
    }
}

/// A message stored locally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredMessage {
    /// Channel the message belongs to.
    pub channel: ChannelId,
    /// Message id, unique within the channel.
    pub id: MessageId,
    /// Sender display name.
    pub sender: String,
    /// Message text.
    pub text: String,
    /// Unix milliseconds when created.
    pub timestamp: i64,
}

/// Trait for channel store backends.
#[async_trait]
pub trait ChannelStore: Send + Sync {
    /// Open the store with `key`.
    ///
    /// Opening an already open store with the same key succeeds. A key
    /// that differs from the one the data was written with is rejected.
    async fn open(&self, key: &DbKey) -> StorageResult<()>;

    /// Close the store. Closing a closed store succeeds.
    async fn close(&self) -> StorageResult<()>;

    /// Whether the store is open.
    async fn is_open(&self) -> bool;

    /// Look up a channel, including hidden ones.
    async fn channel(&self, id: &ChannelId) -> StorageResult<Option<ChannelState>>;

    /// All channels, including hidden ones.
    async fn channels(&self) -> StorageResult<Vec<ChannelState>>;

    /// Insert a channel if it does not exist yet.
    async fn insert_channel(&self, channel: &ChannelState) -> StorageResult<()>;

    /// Replace a channel's relay token.
    async fn set_token(&self, id: &ChannelId, token: &str) -> StorageResult<()>;

    /// Replace a channel's name and description.
    async fn set_info(&self, id: &ChannelId, info: &ChannelInfo) -> StorageResult<()>;

    /// Raise a channel's message index. Lower values are ignored.
    async fn set_message_index(&self, id: &ChannelId, index: i64) -> StorageResult<()>;

    /// Move the read marker up to the message index.
    async fn mark_read(&self, id: &ChannelId) -> StorageResult<()>;

    /// Hide a channel. Returns false if it does not exist.
    async fn hide_channel(&self, id: &ChannelId) -> StorageResult<bool>;

    /// Store messages, skipping ids already present.
    ///
    /// Returns the number of new messages.
    async fn add_messages(&self, channel: &ChannelId, messages: &[RemoteMessage])
        -> StorageResult<u64>;

    /// Messages in a channel ordered by timestamp.
    async fn messages(&self, channel: &ChannelId) -> StorageResult<Vec<StoredMessage>>;

    /// Number of messages stored for a channel.
    async fn message_count(&self, channel: &ChannelId) -> StorageResult<u64>;

    /// Relay tokens of every channel, hidden ones included.
    async fn relay_tokens(&self) -> StorageResult<Vec<String>>;

    /// Store a scope, replacing one with the same id.
    async fn save_scope(&self, scope: &Scope) -> StorageResult<()>;

    /// Every stored scope, oldest first.
    async fn scopes(&self) -> StorageResult<Vec<Scope>>;
}
