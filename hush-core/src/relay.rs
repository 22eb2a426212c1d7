//! Relay stream phases and batch dispatch planning.
//!
//! A relay stream moves `Connecting → Registering → Streaming → Closed`.
//! Any failure or cancellation closes it; reconnecting is the consumer's
//! job (it opens a new stream). [`plan_dispatch`] turns one batch of relay
//! events into the ordered steps the daemon executes.

use hush_types::{ChannelId, RelayEvent, RelayOutput};

/// Phase of one relay stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayPhase {
    /// Fetching relay config and opening the connection.
    Connecting,
    /// Connected, subscribing channel tokens.
    Registering,
    /// Receiving events.
    Streaming,
    /// Finished. Terminal.
    Closed,
}

impl RelayPhase {
    /// Create a stream in the Connecting phase.
    pub fn new() -> Self {
        Self::Connecting
    }

    /// Process an event and return the new phase plus actions to execute.
    pub fn on_event(self, event: RelayPhaseEvent) -> (Self, Vec<RelayAction>) {
        match (self, event) {
            (Self::Closed, _) => (Self::Closed, vec![]),

            (Self::Connecting, RelayPhaseEvent::Connected) => {
                (Self::Registering, vec![RelayAction::Authorize])
            }
            (Self::Registering, RelayPhaseEvent::Authorized) => (
                Self::Streaming,
                vec![RelayAction::Announce, RelayAction::StartReader],
            ),
            (Self::Streaming, RelayPhaseEvent::BatchReceived { events }) => {
                (Self::Streaming, vec![RelayAction::Dispatch { events }])
            }
            (Self::Streaming, RelayPhaseEvent::PingDue) => {
                (Self::Streaming, vec![RelayAction::Ping])
            }
            (Self::Streaming, RelayPhaseEvent::TokensChanged) => {
                (Self::Streaming, vec![RelayAction::Authorize])
            }

            (_, RelayPhaseEvent::Failed { error }) => {
                (Self::Closed, vec![RelayAction::Close { reason: error }])
            }
            (_, RelayPhaseEvent::Cancelled) => (
                Self::Closed,
                vec![RelayAction::Close {
                    reason: "cancelled".into(),
                }],
            ),

            // Invalid transitions - stay in current phase
            (phase, _) => (phase, vec![]),
        }
    }

    /// Check if the stream is delivering events.
    pub fn is_streaming(&self) -> bool {
        matches!(self, Self::Streaming)
    }

    /// Check if the stream has finished.
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }
}

impl Default for RelayPhase {
    fn default() -> Self {
        Self::new()
    }
}

/// Events in the life of a relay stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayPhaseEvent {
    /// The connection is open.
    Connected,
    /// The relay accepted the token set.
    Authorized,
    /// The reader delivered a batch.
    BatchReceived {
        /// Events in relay order.
        events: Vec<RelayEvent>,
    },
    /// The keepalive timer fired.
    PingDue,
    /// The local token set changed outside the stream (an RPC resync).
    TokensChanged,
    /// Connecting, authorizing, reading or writing failed.
    Failed {
        /// Error message describing the failure.
        error: String,
    },
    /// The consumer went away or was replaced.
    Cancelled,
}

/// Actions the daemon performs for a relay phase transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayAction {
    /// Send the full set of channel tokens.
    Authorize,
    /// Tell the consumer the stream is connected.
    Announce,
    /// Spawn the reader task.
    StartReader,
    /// Execute [`plan_dispatch`] for a batch.
    Dispatch {
        /// Events in relay order.
        events: Vec<RelayEvent>,
    },
    /// Send a keepalive.
    Ping,
    /// Tear the stream down.
    Close {
        /// Why the stream ended.
        reason: String,
    },
}

/// One step in handling a batch of relay events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchStep {
    /// Pull messages for a channel if the local index is behind `index`.
    PullChannel {
        /// The channel.
        channel: ChannelId,
        /// Remote index announced by the relay.
        index: i64,
    },
    /// Resync channel listings for every registered scope.
    ResyncChannels,
    /// Send the (possibly changed) full token set to the relay.
    Reauthorize,
    /// Forward an output to the consumer.
    Emit(RelayOutput),
}

/// Plan the handling of one batch of relay events.
///
/// All sync work runs first, in event order, so a channel's pulls happen
/// in the order the relay reported them. Outputs follow, one per event,
/// also in order. A batch with several `Channels` events resyncs once.
/// Relay-side `Connected` events produce no output; the stream announces
/// itself when it is authorized.
pub fn plan_dispatch(events: &[RelayEvent]) -> Vec<DispatchStep> {
    let mut steps = Vec::with_capacity(events.len() * 2);
    let mut resynced = false;

    for event in events {
        match event {
            RelayEvent::Channel { channel, index } => steps.push(DispatchStep::PullChannel {
                channel: *channel,
                index: *index,
            }),
            RelayEvent::Channels if !resynced => {
                resynced = true;
                steps.push(DispatchStep::ResyncChannels);
                steps.push(DispatchStep::Reauthorize);
            }
            RelayEvent::Channels | RelayEvent::Connected => {}
        }
    }

    steps.extend(
        events
            .iter()
            .filter(|e| !matches!(e, RelayEvent::Connected))
            .map(|e| DispatchStep::Emit(RelayOutput::from(e))),
    );
    steps
}

#[cfg(test)]
mod tests {
    use super::*;

    // ===========================================
    // Phase transitions
    // ===========================================

    #[test]
    fn happy_path_reaches_streaming() {
        let phase = RelayPhase::new();
        let (phase, actions) = phase.on_event(RelayPhaseEvent::Connected);
        assert_eq!(phase, RelayPhase::Registering);
        assert_eq!(actions, vec![RelayAction::Authorize]);

        let (phase, actions) = phase.on_event(RelayPhaseEvent::Authorized);
        assert!(phase.is_streaming());
        assert_eq!(actions, vec![RelayAction::Announce, RelayAction::StartReader]);
    }

    #[test]
    fn batch_before_streaming_is_ignored() {
        let (phase, actions) = RelayPhase::Registering.on_event(RelayPhaseEvent::BatchReceived {
            events: vec![RelayEvent::Channels],
        });
        assert_eq!(phase, RelayPhase::Registering);
        assert!(actions.is_empty());
    }

    #[test]
    fn failure_closes_from_any_phase() {
        for phase in [
            RelayPhase::Connecting,
            RelayPhase::Registering,
            RelayPhase::Streaming,
        ] {
            let (phase, actions) = phase.on_event(RelayPhaseEvent::Failed {
                error: "eof".into(),
            });
            assert!(phase.is_closed());
            assert_eq!(
                actions,
                vec![RelayAction::Close {
                    reason: "eof".into()
                }]
            );
        }
    }

    #[test]
    fn cancel_closes() {
        let (phase, actions) = RelayPhase::Streaming.on_event(RelayPhaseEvent::Cancelled);
        assert!(phase.is_closed());
        assert_eq!(actions.len(), 1);
    }

    #[test]
    fn closed_is_terminal() {
        let (phase, actions) = RelayPhase::Closed.on_event(RelayPhaseEvent::Connected);
        assert!(phase.is_closed());
        assert!(actions.is_empty());

        let (_, actions) = RelayPhase::Closed.on_event(RelayPhaseEvent::Cancelled);
        assert!(actions.is_empty());
    }

    #[test]
    fn token_change_reauthorizes_only_while_streaming() {
        let (phase, actions) = RelayPhase::Streaming.on_event(RelayPhaseEvent::TokensChanged);
        assert!(phase.is_streaming());
        assert_eq!(actions, vec![RelayAction::Authorize]);

        let (phase, actions) = RelayPhase::Registering.on_event(RelayPhaseEvent::TokensChanged);
        assert_eq!(phase, RelayPhase::Registering);
        assert!(actions.is_empty());
    }

    #[test]
    fn ping_only_while_streaming() {
        let (_, actions) = RelayPhase::Streaming.on_event(RelayPhaseEvent::PingDue);
        assert_eq!(actions, vec![RelayAction::Ping]);
        let (_, actions) = RelayPhase::Connecting.on_event(RelayPhaseEvent::PingDue);
        assert!(actions.is_empty());
    }

    // ===========================================
    // Dispatch planning
    // ===========================================

    #[test]
    fn pulls_precede_outputs_in_event_order() {
        let a = ChannelId::from_key(b"a");
        let b = ChannelId::from_key(b"b");
        let events = vec![
            RelayEvent::Channel { channel: a, index: 1 },
            RelayEvent::Channel { channel: a, index: 2 },
            RelayEvent::Channel { channel: b, index: 1 },
        ];

        let steps = plan_dispatch(&events);
        assert_eq!(
            steps,
            vec![
                DispatchStep::PullChannel { channel: a, index: 1 },
                DispatchStep::PullChannel { channel: a, index: 2 },
                DispatchStep::PullChannel { channel: b, index: 1 },
                DispatchStep::Emit(RelayOutput::Channel { channel: a }),
                DispatchStep::Emit(RelayOutput::Channel { channel: a }),
                DispatchStep::Emit(RelayOutput::Channel { channel: b }),
            ]
        );
    }

    #[test]
    fn channels_event_resyncs_then_reauthorizes() {
        let steps = plan_dispatch(&[RelayEvent::Channels]);
        assert_eq!(
            steps,
            vec![
                DispatchStep::ResyncChannels,
                DispatchStep::Reauthorize,
                DispatchStep::Emit(RelayOutput::Channels),
            ]
        );
    }

    #[test]
    fn repeated_channels_events_resync_once() {
        let steps = plan_dispatch(&[RelayEvent::Channels, RelayEvent::Channels]);
        let resyncs = steps
            .iter()
            .filter(|s| matches!(s, DispatchStep::ResyncChannels))
            .count();
        assert_eq!(resyncs, 1);
        let emits = steps
            .iter()
            .filter(|s| matches!(s, DispatchStep::Emit(_)))
            .count();
        assert_eq!(emits, 2);
    }

    #[test]
    fn relay_connected_event_is_swallowed() {
        assert!(plan_dispatch(&[RelayEvent::Connected]).is_empty());
    }

    #[test]
    fn empty_batch_plans_nothing() {
        assert!(plan_dispatch(&[]).is_empty());
    }
}
