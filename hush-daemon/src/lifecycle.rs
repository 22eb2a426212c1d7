//! Unlock, lock and setup.
//!
//! Interprets the actions of [`hush_core::LifecycleState`] against the
//! keystore, the store, the token registry and the trust scheduler. Every
//! operation runs under one mutex, so an unlock never interleaves with a
//! lock.

use crate::auth::TokenRegistry;
use crate::crypto::{DbKey, MasterKey};
use crate::error::{Result, ServiceError};
use crate::keystore::Keystore;
use crate::storage::ChannelStore;
use crate::trust::TrustScheduler;
use hush_core::{LifecycleAction, LifecycleEvent, LifecycleState};
use hush_types::AuthMethod;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Drives the session lifecycle.
pub struct LifecycleManager {
    keystore: Arc<dyn Keystore>,
    store: Arc<dyn ChannelStore>,
    tokens: Arc<TokenRegistry>,
    scheduler: Arc<TrustScheduler>,
    transition: Mutex<()>,
}

impl LifecycleManager {
    /// Create a manager over its collaborators.
    pub fn new(
        keystore: Arc<dyn Keystore>,
        store: Arc<dyn ChannelStore>,
        tokens: Arc<TokenRegistry>,
        scheduler: Arc<TrustScheduler>,
    ) -> Self {
        Self {
            keystore,
            store,
            tokens,
            scheduler,
            transition: Mutex::new(()),
        }
    }

    /// Current state, as reported by the keystore.
    pub async fn status(&self) -> LifecycleState {
        self.keystore.status().await
    }

    /// Provision the first credential.
    pub async fn setup(&self, secret: &str, method: AuthMethod) -> Result<()> {
        let _guard = self.transition.lock().await;
        let state = self.keystore.status().await;
        if state != LifecycleState::SetupNeeded {
            return Err(ServiceError::AlreadySetUp);
        }
        self.setup_locked(state, secret, method).await?;
        Ok(())
    }

    async fn setup_locked(
        &self,
        state: LifecycleState,
        secret: &str,
        method: AuthMethod,
    ) -> Result<LifecycleState> {
        self.keystore.setup(secret, method).await?;
        let (next, _) = state.on_event(LifecycleEvent::SetupCompleted);
        tracing::debug!(%method, state = %next, "Setup completed");
        Ok(next)
    }

    /// Unlock and issue a session token for `client`.
    ///
    /// Performs setup first when nothing is provisioned yet. Unlocking an
    /// unlocked daemon succeeds and issues a fresh token.
    pub async fn unlock(&self, secret: &str, method: AuthMethod, client: &str) -> Result<String> {
        let _guard = self.transition.lock().await;

        let mut state = self.keystore.status().await;
        if state == LifecycleState::SetupNeeded {
            state = self.setup_locked(state, secret, method).await?;
        }

        let master = match self.keystore.unlock(secret, method).await {
            Ok(master) => master,
            Err(e) => {
                let err = ServiceError::from(e);
                tracing::warn!(%method, client, "Unlock rejected: {}", err);
                return Err(err);
            }
        };

        let (next, actions) = state.on_event(LifecycleEvent::CredentialAccepted);
        let mut token = String::new();
        for action in actions {
            if let Err(e) = self.apply_unlock(action, &master, client, &mut token).await {
                tracing::error!(client, "Unlock failed: {}", e);
                // Tear down whatever the partial unlock opened.
                let (_, teardown) = next.on_event(LifecycleEvent::LockRequested);
                if let Some(lock_err) = self.teardown(teardown).await {
                    tracing::warn!("Teardown after failed unlock incomplete: {}", lock_err);
                }
                return Err(e);
            }
        }

        tracing::info!(client, %method, state = %next, "Unlocked");
        Ok(token)
    }

    async fn apply_unlock(
        &self,
        action: LifecycleAction,
        master: &MasterKey,
        client: &str,
        token: &mut String,
    ) -> Result<()> {
        match action {
            LifecycleAction::OpenStorage => {
                let key = DbKey::derive(master)?;
                self.store.open(&key).await?;
            }
            LifecycleAction::RegisterSession => {
                *token = self.tokens.register(client).await?;
            }
            LifecycleAction::StartTrustCheck => self.scheduler.start(),
            other => tracing::debug!(?other, "Skipping non-unlock action"),
        }
        Ok(())
    }

    /// Stop background work, close storage, drop every session and lock
    /// the keystore.
    ///
    /// Teardown runs to the end even if a step fails; the first failure is
    /// returned. A scheduler that does not stop in time is logged, not an
    /// error.
    pub async fn lock(&self) -> Result<()> {
        let _guard = self.transition.lock().await;

        let state = self.keystore.status().await;
        let (next, actions) = state.on_event(LifecycleEvent::LockRequested);
        if actions.is_empty() {
            tracing::debug!(%state, "Nothing to lock");
            return Ok(());
        }

        let first_error = self.teardown(actions).await;
        tracing::info!(state = %next, "Locked");
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Run lock actions to the end. Returns the first failure.
    async fn teardown(&self, actions: Vec<LifecycleAction>) -> Option<ServiceError> {
        let mut first_error: Option<ServiceError> = None;
        for action in actions {
            let result = match action {
                LifecycleAction::StopTrustCheck => {
                    if !self.scheduler.stop().await {
                        tracing::warn!("Trust check did not stop in time, locking anyway");
                    }
                    Ok(())
                }
                LifecycleAction::CloseStorage => {
                    self.store.close().await.map_err(ServiceError::from)
                }
                LifecycleAction::ClearSessions => {
                    self.tokens.clear().await;
                    Ok(())
                }
                LifecycleAction::LockKeystore => {
                    self.keystore.lock().await.map_err(ServiceError::from)
                }
                other => {
                    tracing::debug!(?other, "Skipping non-lock action");
                    Ok(())
                }
            };
            if let Err(e) = result {
                tracing::error!(?action, "Lock step failed: {}", e);
                first_error.get_or_insert(e);
            }
        }
        first_error
    }

    /// Check if the trust scheduler is running.
    pub fn is_checking(&self) -> bool {
        self.scheduler.is_checking()
    }
}
