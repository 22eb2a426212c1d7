//! # hush-daemon
//!
//! Session and live-sync core of the hush messaging daemon.
//!
//! This crate implements a local daemon that:
//! - Unlocks a keystore and issues per-client session tokens
//! - Periodically revalidates the trust of known identities
//! - Keeps a local channel store in sync with the remote API
//! - Follows a relay stream to learn about new messages as they arrive
//!
//! ## Architecture
//!
//! ```text
//!  client ──HTTP/SSE──┐
//!                     ▼
//!        ┌────────────────────────────┐
//!        │          Service           │
//!        │  tokens · lifecycle        │     remote API
//!        │  trust scheduler ──────────┼──► (HTTP JSON)
//!        │  reconciler ───────────────┼──►
//!        │  relay sync ◄──────────────┼─── relay (websocket)
//!        │  ┌─────────────────────┐   │
//!        │  │ SQLite (channels)   │   │
//!        │  └─────────────────────┘   │
//!        └────────────────────────────┘
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod auth;
pub mod clock;
pub mod config;
pub mod crypto;
pub mod error;
pub mod http;
pub mod keystore;
pub mod lifecycle;
pub mod messaging;
pub mod random;
pub mod reconcile;
pub mod relay;
pub mod remote;
pub mod service;
pub mod storage;
pub mod telemetry;
pub mod trust;

pub use config::Config;
pub use error::{Result, ServiceError};
pub use service::{Service, ServiceDeps};
