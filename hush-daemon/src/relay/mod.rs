//! Live relay synchronization.
//!
//! A relay stream connects to the relay named by the remote, subscribes
//! every known channel token, and turns pushed events into local syncs
//! followed by one output per event for the stream's consumer.
//!
//! # Design
//!
//! - [`RelayConnector`] opens a [`RelayConnection`] (websocket or mock)
//! - [`RelaySync`] drives one stream through the phases in
//!   [`hush_core::RelayPhase`]
//! - [`RelayHub`] keeps at most one stream active; a new stream cancels
//!   the previous one, and RPC resyncs reach the active stream through it

mod hub;
mod mock;
mod sync_loop;
mod ws;

pub use hub::{RelayHub, Registration};
pub use mock::{MockRelayConnection, MockRelayConnector};
pub use sync_loop::RelaySync;
pub use ws::{WsConnection, WsConnector};

use async_trait::async_trait;
use hush_types::{RelayFrame, WireError};
use thiserror::Error;

/// Relay connection errors.
#[derive(Debug, Error)]
pub enum RelayError {
    /// The connection could not be opened.
    #[error("connection failed: {0}")]
    Connect(String),

    /// A frame could not be written.
    #[error("send failed: {0}")]
    Send(String),

    /// A frame could not be read.
    #[error("receive failed: {0}")]
    Receive(String),

    /// The relay closed the connection.
    #[error("connection closed")]
    Closed,

    /// The stream was cancelled, replaced, or its consumer went away.
    #[error("stream cancelled: {0}")]
    Cancelled(&'static str),

    /// A frame could not be encoded or decoded.
    #[error("wire error: {0}")]
    Wire(#[from] WireError),
}

/// An open relay connection.
///
/// `recv` and `send` may be called concurrently: the reader task owns the
/// receive side while the stream sends authorizations and pings.
#[async_trait]
pub trait RelayConnection: Send + Sync {
    /// Write one frame.
    async fn send(&self, frame: &RelayFrame) -> Result<(), RelayError>;

    /// Read the next frame. Blocks until one arrives or the connection ends.
    async fn recv(&self) -> Result<RelayFrame, RelayError>;

    /// Close the connection.
    async fn close(&self) -> Result<(), RelayError>;
}

/// Opens relay connections.
#[async_trait]
pub trait RelayConnector: Send + Sync {
    /// Connect to the relay at `url`.
    async fn connect(&self, url: &str) -> Result<Box<dyn RelayConnection>, RelayError>;
}
