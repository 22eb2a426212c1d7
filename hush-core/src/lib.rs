//! # hush-core
//!
//! Pure logic for the hush daemon (no I/O, instant tests).
//!
//! This crate holds the state machines and policies behind session
//! handling and live sync. Nothing here touches the network, the disk,
//! or a clock; callers pass `now` in and interpret the returned actions.
//!
//! - [`lifecycle`] - SetupNeeded / Locked / Unlocked transitions
//! - [`staleness`] - When a cached trust record must be re-verified
//! - [`cursor`] - Monotonic per-channel message index
//! - [`relay`] - Relay stream phases and per-batch dispatch plans
//! - [`compose`] - Channel names and chat commands
//! - [`base62`] - Token encoding
//!
//! The daemon crate interprets the actions produced here.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod base62;
pub mod compose;
pub mod cursor;
pub mod lifecycle;
pub mod relay;
pub mod staleness;

pub use compose::{channel_name, Command, ComposeError, Outgoing};
pub use cursor::{IndexAdvance, MessageCursor, PullStep};
pub use lifecycle::{LifecycleAction, LifecycleEvent, LifecycleState};
pub use relay::{plan_dispatch, DispatchStep, RelayAction, RelayPhase, RelayPhaseEvent};
pub use staleness::StalenessPolicy;
