//! Relay stream payloads.
//!
//! The daemon and the relay exchange [`RelayFrame`]s as MessagePack
//! binary frames. Events the daemon has acted on are forwarded to the
//! local UI as [`RelayOutput`] (JSON).

use serde::{Deserialize, Serialize};

use crate::{ChannelId, WireError};

/// A notification pushed by the relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RelayEvent {
    /// New messages exist in a channel up to `index`.
    Channel {
        /// The channel that changed.
        channel: ChannelId,
        /// Remote message index after the change.
        index: i64,
    },
    /// The set of channels changed; a full resync is needed.
    Channels,
    /// The relay accepted the connection.
    Connected,
}

/// Frames exchanged over the relay connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RelayFrame {
    /// Client subscribes to the channels behind `tokens` (full-set replace).
    Authorize {
        /// Relay credential from the remote config.
        auth: String,
        /// Every known channel token.
        tokens: Vec<String>,
    },
    /// Client keepalive.
    Ping,
    /// Relay keepalive reply.
    Pong,
    /// Relay delivers a batch of events, in order.
    Events {
        /// The events.
        events: Vec<RelayEvent>,
    },
}

impl RelayFrame {
    /// Serialize to MessagePack bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, WireError> {
        rmp_serde::to_vec_named(self).map_err(WireError::Serialization)
    }

    /// Deserialize from MessagePack bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, WireError> {
        rmp_serde::from_slice(bytes).map_err(WireError::Deserialization)
    }
}

/// Event forwarded to the consumer of the relay stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RelayOutput {
    /// Connected and authorized; sent once per stream.
    Connected,
    /// A channel's local state was brought up to date.
    Channel {
        /// The channel.
        channel: ChannelId,
    },
    /// The channel list was refreshed.
    Channels,
}

impl From<&RelayEvent> for RelayOutput {
    fn from(event: &RelayEvent) -> Self {
        match event {
            RelayEvent::Channel { channel, .. } => Self::Channel { channel: *channel },
            RelayEvent::Channels => Self::Channels,
            RelayEvent::Connected => Self::Connected,
        }
    }
}
