//! Active-stream bookkeeping.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

struct Active {
    id: u64,
    cancel: CancellationToken,
    reauthorize: Arc<Notify>,
}

#[derive(Default)]
struct HubState {
    next_id: u64,
    active: Option<Active>,
    closed: bool,
}

/// A stream's slot in the hub.
pub struct Registration {
    id: u64,
    reauthorize: Arc<Notify>,
}

impl Registration {
    /// Registration id for [`RelayHub::unregister`].
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Resolves when the stream should resend its token set.
    pub async fn reauthorize_requested(&self) {
        self.reauthorize.notified().await
    }
}

/// Tracks the one active relay stream.
///
/// Last writer wins: registering a stream cancels the one before it.
/// A closed hub (daemon locked) cancels every stream that registers.
#[derive(Default)]
pub struct RelayHub {
    state: Mutex<HubState>,
}

impl RelayHub {
    /// Create an open hub with no active stream.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_state(&self) -> MutexGuard<'_, HubState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make the stream behind `cancel` the active one.
    ///
    /// Streams register before connecting, so cancelling the active
    /// stream also stops one that is still connecting.
    pub fn register(&self, cancel: &CancellationToken) -> Registration {
        let mut state = self.lock_state();
        state.next_id += 1;
        let id = state.next_id;
        let reauthorize = Arc::new(Notify::new());

        if state.closed {
            tracing::debug!(stream = id, "Relay hub closed, stream refused");
            cancel.cancel();
            return Registration { id, reauthorize };
        }

        let active = Active {
            id,
            cancel: cancel.clone(),
            reauthorize: Arc::clone(&reauthorize),
        };
        if let Some(previous) = state.active.replace(active) {
            tracing::info!(previous = previous.id, current = id, "Relay stream replaced");
            previous.cancel.cancel();
        }
        Registration { id, reauthorize }
    }

    /// Clear the active stream if it is still `id`.
    pub fn unregister(&self, id: u64) {
        let mut state = self.lock_state();
        if matches!(&state.active, Some(active) if active.id == id) {
            state.active = None;
        }
    }

    /// Cancel the active stream, if any.
    pub fn cancel_active(&self) {
        if let Some(active) = self.lock_state().active.take() {
            tracing::debug!(stream = active.id, "Relay stream cancelled");
            active.cancel.cancel();
        }
    }

    /// Cancel the active stream and refuse new ones until [`open`](Self::open).
    pub fn close(&self) {
        self.lock_state().closed = true;
        self.cancel_active();
    }

    /// Accept streams again.
    pub fn open(&self) {
        self.lock_state().closed = false;
    }

    /// Ask the active stream to resend its token set.
    ///
    /// Returns false when no stream is active.
    pub fn request_reauthorize(&self) -> bool {
        match &self.lock_state().active {
            Some(active) => {
                active.reauthorize.notify_one();
                true
            }
            None => false,
        }
    }

    /// Check if a stream is active.
    pub fn is_active(&self) -> bool {
        self.lock_state().active.is_some()
    }
}
