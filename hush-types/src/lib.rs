//! # hush-types
//!
//! Wire and data types shared by the hush crates.
//!
//! - [`ChannelId`], [`IdentityId`], [`MessageId`] - Identifiers
//! - [`RelayEvent`], [`RelayFrame`], [`RelayOutput`] - Relay stream payloads
//! - [`ChannelDelta`], [`MessageBatch`], [`RelayConfig`] - Remote API results
//! - [`TrustRecord`] - Cached identity trust state
//! - [`WireError`] - Error types

#![warn(missing_docs)]
#![warn(clippy::all)]

mod auth;
mod error;
mod events;
mod ids;
mod remote;
mod trust;

pub use auth::AuthMethod;
pub use error::WireError;
pub use events::{RelayEvent, RelayFrame, RelayOutput};
pub use ids::{ChannelId, IdentityId, MessageId};
pub use remote::{
    ChannelDelta, ChannelInfo, MessageBatch, NewChannel, RelayConfig, RemoteMessage, ScopeKind,
    SealedKey, SEALED_NONCE_SIZE,
};
pub use trust::{TrustRecord, TrustStatus};
