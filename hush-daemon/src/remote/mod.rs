//! Remote API abstraction.
//!
//! The remote serves channel listings, message pages and relay
//! connection parameters, and accepts new accounts, teams, channels and
//! messages. Its wire encoding and content encryption are
//! outside this crate; [`RemoteApi`] is the seam.

mod http;
mod mock;

pub use http::HttpRemote;
pub use mock::MockRemote;

use crate::crypto::{ChannelKey, ScopeKey};
use async_trait::async_trait;
use hush_types::{
    ChannelDelta, IdentityId, MessageBatch, NewChannel, RelayConfig, RemoteMessage, ScopeKind,
};
use thiserror::Error;

/// Remote API errors.
#[derive(Debug, Error)]
pub enum RemoteError {
    /// The remote could not be reached.
    #[error("network error: {0}")]
    Network(String),

    /// The remote rejected our credentials.
    #[error("unauthorized")]
    Unauthorized,

    /// The remote has no such resource.
    #[error("not found")]
    NotFound,

    /// The resource already exists.
    #[error("already exists")]
    Conflict,

    /// The remote answered with something we could not use.
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

/// A team or account that owns channels.
#[derive(Debug, Clone)]
pub struct Scope {
    /// Identity of the team or account.
    pub id: IdentityId,
    /// Team or account.
    pub kind: ScopeKind,
    /// Key that opens channel keys sealed to this scope.
    pub key: ScopeKey,
}

/// Calls the daemon makes against the remote.
#[async_trait]
pub trait RemoteApi: Send + Sync {
    /// Channels visible to `scope` that changed after `since` (0 = all).
    async fn fetch_channel_updates(
        &self,
        scope: &Scope,
        since: i64,
    ) -> Result<Vec<ChannelDelta>, RemoteError>;

    /// Messages after `since` in the channel opened by `key`.
    ///
    /// `None` means the remote has nothing for this channel.
    async fn fetch_messages(
        &self,
        key: &ChannelKey,
        since: i64,
    ) -> Result<Option<MessageBatch>, RemoteError>;

    /// Relay endpoint and credential for `identity`.
    async fn relay_config(&self, identity: &IdentityId) -> Result<RelayConfig, RemoteError>;

    /// Register a new account. [`RemoteError::Conflict`] if it exists.
    async fn create_account(&self, account: &IdentityId) -> Result<(), RemoteError>;

    /// Register a team owned by `account`.
    async fn create_team(&self, account: &IdentityId, team: &IdentityId)
        -> Result<(), RemoteError>;

    /// Create a channel owned by `scope`. It shows up in the scope's
    /// next channel listing.
    async fn create_channel(&self, scope: &IdentityId, channel: &NewChannel)
        -> Result<(), RemoteError>;

    /// Post a message to the channel opened by `key`.
    async fn send_message(&self, key: &ChannelKey, message: &RemoteMessage)
        -> Result<(), RemoteError>;
}
