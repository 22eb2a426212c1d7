//! Session lifecycle state machine.
//!
//! Pure transitions between `SetupNeeded`, `Locked` and `Unlocked`. The
//! daemon feeds events in after the keystore has answered and performs
//! the returned actions in order.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of the local keystore and everything keyed by it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    /// No credential has been provisioned yet.
    SetupNeeded,
    /// Provisioned, master key not in memory.
    Locked,
    /// Master key available, storage open.
    Unlocked,
}

impl LifecycleState {
    /// Process an event and return the new state plus actions to execute.
    ///
    /// This is a pure function. The caller performs the actions in order.
    pub fn on_event(self, event: LifecycleEvent) -> (Self, Vec<LifecycleAction>) {
        match (self, event) {
            (Self::SetupNeeded, LifecycleEvent::SetupCompleted) => (Self::Locked, vec![]),

            // Unlocking twice is allowed; every step below is idempotent
            // except the session, which is issued fresh.
            (Self::Locked | Self::Unlocked, LifecycleEvent::CredentialAccepted) => (
                Self::Unlocked,
                vec![
                    LifecycleAction::OpenStorage,
                    LifecycleAction::RegisterSession,
                    LifecycleAction::StartTrustCheck,
                ],
            ),

            // Locking an already locked keystore repeats the teardown so
            // stray sessions or an open store never survive a lock.
            (Self::Locked | Self::Unlocked, LifecycleEvent::LockRequested) => (
                Self::Locked,
                vec![
                    LifecycleAction::StopTrustCheck,
                    LifecycleAction::CloseStorage,
                    LifecycleAction::ClearSessions,
                    LifecycleAction::LockKeystore,
                ],
            ),

            // Nothing to tear down before setup
            (Self::SetupNeeded, LifecycleEvent::LockRequested) => (Self::SetupNeeded, vec![]),

            // Invalid transitions - stay in current state
            (state, _) => (state, vec![]),
        }
    }

    /// Check if the master key is available.
    pub fn is_unlocked(&self) -> bool {
        matches!(self, Self::Unlocked)
    }

    /// Stable name of this state.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SetupNeeded => "setup_needed",
            Self::Locked => "locked",
            Self::Unlocked => "unlocked",
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Events fed into the lifecycle state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// The keystore was provisioned with a first credential.
    SetupCompleted,
    /// The keystore accepted a credential and released the master key.
    CredentialAccepted,
    /// The caller asked to lock.
    LockRequested,
}

/// Side effects the daemon performs for a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleAction {
    /// Derive the storage key and open local storage.
    OpenStorage,
    /// Issue a session token for the calling client.
    RegisterSession,
    /// Start the trust revalidation scheduler.
    StartTrustCheck,
    /// Stop the trust revalidation scheduler.
    StopTrustCheck,
    /// Close local storage.
    CloseStorage,
    /// Invalidate every session token.
    ClearSessions,
    /// Drop the master key from the keystore.
    LockKeystore,
}

#[cfg(test)]
mod tests {
    use super::*;

    // ===========================================
    // Unlock
    // ===========================================

    #[test]
    fn unlock_from_locked_opens_everything() {
        let (state, actions) = LifecycleState::Locked.on_event(LifecycleEvent::CredentialAccepted);
        assert_eq!(state, LifecycleState::Unlocked);
        assert_eq!(
            actions,
            vec![
                LifecycleAction::OpenStorage,
                LifecycleAction::RegisterSession,
                LifecycleAction::StartTrustCheck,
            ]
        );
    }

    #[test]
    fn unlock_while_unlocked_issues_new_session() {
        let (state, actions) =
            LifecycleState::Unlocked.on_event(LifecycleEvent::CredentialAccepted);
        assert!(state.is_unlocked());
        assert!(actions.contains(&LifecycleAction::RegisterSession));
    }

    #[test]
    fn credential_before_setup_is_ignored() {
        let (state, actions) =
            LifecycleState::SetupNeeded.on_event(LifecycleEvent::CredentialAccepted);
        assert_eq!(state, LifecycleState::SetupNeeded);
        assert!(actions.is_empty());
    }

    // ===========================================
    // Setup
    // ===========================================

    #[test]
    fn setup_moves_to_locked() {
        let (state, actions) = LifecycleState::SetupNeeded.on_event(LifecycleEvent::SetupCompleted);
        assert_eq!(state, LifecycleState::Locked);
        assert!(actions.is_empty());
    }

    #[test]
    fn setup_twice_is_ignored() {
        let (state, actions) = LifecycleState::Locked.on_event(LifecycleEvent::SetupCompleted);
        assert_eq!(state, LifecycleState::Locked);
        assert!(actions.is_empty());
    }

    // ===========================================
    // Lock
    // ===========================================

    #[test]
    fn lock_stops_scheduler_before_closing_storage() {
        let (state, actions) = LifecycleState::Unlocked.on_event(LifecycleEvent::LockRequested);
        assert_eq!(state, LifecycleState::Locked);
        assert_eq!(
            actions,
            vec![
                LifecycleAction::StopTrustCheck,
                LifecycleAction::CloseStorage,
                LifecycleAction::ClearSessions,
                LifecycleAction::LockKeystore,
            ]
        );
    }

    #[test]
    fn lock_while_locked_repeats_teardown() {
        let (state, actions) = LifecycleState::Locked.on_event(LifecycleEvent::LockRequested);
        assert_eq!(state, LifecycleState::Locked);
        assert!(actions.contains(&LifecycleAction::ClearSessions));
    }

    #[test]
    fn lock_before_setup_is_noop() {
        let (state, actions) = LifecycleState::SetupNeeded.on_event(LifecycleEvent::LockRequested);
        assert_eq!(state, LifecycleState::SetupNeeded);
        assert!(actions.is_empty());
    }

    #[test]
    fn full_cycle() {
        let state = LifecycleState::SetupNeeded;
        let (state, _) = state.on_event(LifecycleEvent::SetupCompleted);
        let (state, _) = state.on_event(LifecycleEvent::CredentialAccepted);
        assert!(state.is_unlocked());
        let (state, _) = state.on_event(LifecycleEvent::LockRequested);
        let (state, _) = state.on_event(LifecycleEvent::CredentialAccepted);
        assert!(state.is_unlocked());
    }

    #[test]
    fn state_serializes_snake_case() {
        let json = serde_json::to_string(&LifecycleState::SetupNeeded).unwrap();
        assert_eq!(json, "\"setup_needed\"");
        assert_eq!(LifecycleState::Unlocked.to_string(), "unlocked");
    }
}
