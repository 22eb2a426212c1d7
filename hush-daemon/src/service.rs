//! The daemon's service object.
//!
//! Owns every component and exposes the operations the RPC layer calls.

use crate::auth::TokenRegistry;
use crate::clock::Clock;
use crate::config::Config;
use crate::error::{Result, ServiceError};
use crate::keystore::Keystore;
use crate::crypto::ScopeKey;
use crate::lifecycle::LifecycleManager;
use crate::messaging::{Messenger, OutgoingMessage};
use crate::reconcile::Reconciler;
use crate::relay::{RelayConnector, RelayHub, RelaySync};
use crate::remote::{RemoteApi, RemoteError, Scope};
use crate::storage::{ChannelState, ChannelStore, StoredMessage};
use crate::trust::{CycleReport, TrustEngine, TrustScheduler};
use hush_core::LifecycleState;
use hush_types::{AuthMethod, ChannelId, IdentityId, MessageId, RelayOutput, ScopeKind};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Collaborators the service is built from.
pub struct ServiceDeps {
    /// Source of the master key.
    pub keystore: Arc<dyn Keystore>,
    /// Local channel and message store.
    pub store: Arc<dyn ChannelStore>,
    /// Identity verification engine.
    pub trust: Arc<dyn TrustEngine>,
    /// Remote API.
    pub remote: Arc<dyn RemoteApi>,
    /// Opens relay connections.
    pub connector: Arc<dyn RelayConnector>,
    /// Wall clock for staleness checks.
    pub clock: Arc<dyn Clock>,
}

/// Session lifecycle, trust checks and channel sync behind one object.
pub struct Service {
    tokens: Arc<TokenRegistry>,
    scheduler: Arc<TrustScheduler>,
    lifecycle: LifecycleManager,
    reconciler: Arc<Reconciler>,
    messenger: Messenger,
    remote: Arc<dyn RemoteApi>,
    relay: RelaySync,
}

impl Service {
    /// Wire the components together. Starts locked (or in setup).
    pub fn new(config: &Config, deps: ServiceDeps) -> Self {
        let tokens = Arc::new(TokenRegistry::new());
        let scheduler = Arc::new(TrustScheduler::new(
            deps.trust,
            Arc::clone(&deps.clock),
            config.trust.staleness(),
            config.trust.check_interval(),
            config.trust.stop_timeout(),
        ));
        let lifecycle = LifecycleManager::new(
            deps.keystore,
            Arc::clone(&deps.store),
            Arc::clone(&tokens),
            Arc::clone(&scheduler),
        );
        let reconciler = Arc::new(Reconciler::new(deps.store, Arc::clone(&deps.remote)));
        let messenger = Messenger::new(
            Arc::clone(&reconciler),
            Arc::clone(&deps.remote),
            deps.clock,
        );
        let relay = RelaySync::new(
            Arc::clone(&reconciler),
            Arc::clone(&deps.remote),
            deps.connector,
            Arc::new(RelayHub::new()),
            config.relay.ping_interval(),
            config.relay.event_buffer,
        );

        Self {
            tokens,
            scheduler,
            lifecycle,
            reconciler,
            messenger,
            remote: deps.remote,
            relay,
        }
    }

    // ---- Auth ----

    /// Gate an RPC by method name and bearer token.
    pub async fn authorize(&self, method: &str, token: Option<&str>) -> Result<()> {
        self.tokens.authorize(method, token).await
    }

    /// Current lifecycle state.
    pub async fn status(&self) -> LifecycleState {
        self.lifecycle.status().await
    }

    /// Provision the first credential.
    pub async fn setup(&self, secret: &str, method: AuthMethod) -> Result<()> {
        self.lifecycle.setup(secret, method).await
    }

    /// Unlock and return a session token for `client`.
    ///
    /// Stored scopes are registered again and relay streams are accepted.
    pub async fn unlock(&self, secret: &str, method: AuthMethod, client: &str) -> Result<String> {
        let token = self.lifecycle.unlock(secret, method, client).await?;
        match self.reconciler.load_scopes().await {
            Ok(count) => tracing::debug!(scopes = count, "Scopes loaded"),
            Err(e) => tracing::warn!("Loading scopes failed: {}", e),
        }
        self.relay.hub().open();
        Ok(token)
    }

    /// Lock: end relay streams (connecting ones too), forget scope keys,
    /// then tear down.
    pub async fn lock(&self) -> Result<()> {
        self.relay.hub().close();
        self.reconciler.clear_scopes().await;
        self.lifecycle.lock().await
    }

    // ---- Account ----

    /// Create an account and unlock with its first credential.
    ///
    /// Unlocks with `secret`, setting the keystore up with it first if
    /// needed. Returns the session token and the account identity.
    pub async fn create_account(
        &self,
        secret: &str,
        method: AuthMethod,
        client: &str,
    ) -> Result<(String, IdentityId)> {
        let token = self.unlock(secret, method, client).await?;
        if self.reconciler.scope(ScopeKind::User).await.is_some() {
            return Err(ServiceError::Conflict("account already exists"));
        }

        let account = Scope {
            id: IdentityId::random(),
            kind: ScopeKind::User,
            key: ScopeKey::generate()?,
        };
        self.remote
            .create_account(&account.id)
            .await
            .map_err(|e| match e {
                RemoteError::Conflict => ServiceError::Conflict("account already exists"),
                other => other.into(),
            })?;
        let id = account.id;
        self.reconciler.add_scope(account).await?;
        tracing::info!(account = %id, "Account created");
        Ok((token, id))
    }

    /// Create a team owned by the account.
    pub async fn create_team(&self) -> Result<IdentityId> {
        self.ensure_unlocked().await?;
        let account = self.reconciler.account().await?;
        if self.reconciler.scope(ScopeKind::Team).await.is_some() {
            return Err(ServiceError::Conflict("already in a team"));
        }

        let team = Scope {
            id: IdentityId::random(),
            kind: ScopeKind::Team,
            key: ScopeKey::generate()?,
        };
        self.remote.create_team(&account, &team.id).await?;
        let id = team.id;
        self.reconciler.add_scope(team).await?;
        tracing::info!(team = %id, "Team created");
        Ok(id)
    }

    /// Import an existing account or team key. Stored until replaced.
    ///
    /// Importing the scope already held refreshes its key; a different
    /// scope of the same kind is a conflict.
    pub async fn import_scope(&self, scope: Scope) -> Result<()> {
        self.ensure_unlocked().await?;
        if let Some(existing) = self.reconciler.scope(scope.kind).await {
            if existing.id != scope.id {
                return Err(ServiceError::Conflict(match scope.kind {
                    ScopeKind::User => "account already exists",
                    ScopeKind::Team => "already in a team",
                }));
            }
        }
        self.reconciler.add_scope(scope).await
    }

    /// Check if the trust scheduler is running.
    pub fn is_checking(&self) -> bool {
        self.lifecycle.is_checking()
    }

    /// Run a trust check cycle now.
    pub async fn check_trust(&self) -> Result<CycleReport> {
        self.ensure_unlocked().await?;
        Ok(self.scheduler.check_now().await)
    }

    async fn ensure_unlocked(&self) -> Result<()> {
        match self.lifecycle.status().await {
            LifecycleState::Unlocked => Ok(()),
            LifecycleState::Locked => Err(ServiceError::Locked),
            LifecycleState::SetupNeeded => Err(ServiceError::NotSetUp),
        }
    }

    // ---- Channels ----

    /// Visible channels, optionally resynced first.
    ///
    /// A resync that changes relay tokens makes the active relay stream
    /// authorize again.
    pub async fn channels(&self, update: bool) -> Result<Vec<ChannelState>> {
        self.ensure_unlocked().await?;
        if update {
            let report = self.reconciler.resync_all().await?;
            if report.tokens_changed() && self.relay.hub().request_reauthorize() {
                tracing::debug!("Relay reauthorize requested");
            }
        }
        self.reconciler.channels(false).await
    }

    /// A channel's messages, optionally pulled first.
    pub async fn messages(&self, channel: &ChannelId, update: bool) -> Result<Vec<StoredMessage>> {
        self.ensure_unlocked().await?;
        self.reconciler.messages(channel, update).await
    }

    /// Hide a channel.
    pub async fn leave_channel(&self, channel: &ChannelId) -> Result<()> {
        self.ensure_unlocked().await?;
        self.reconciler.leave_channel(channel).await
    }

    /// Create a channel. See [`Messenger::create_channel`].
    pub async fn create_channel(&self, name: &str, private: bool) -> Result<ChannelId> {
        self.ensure_unlocked().await?;
        self.messenger.create_channel(name, private).await
    }

    /// Compose a message without sending it.
    pub async fn prepare_message(
        &self,
        channel: &ChannelId,
        text: &str,
    ) -> Result<OutgoingMessage> {
        self.ensure_unlocked().await?;
        self.messenger.prepare(channel, text).await
    }

    /// Send a message or run a command. See [`Messenger::send`].
    pub async fn send_message(
        &self,
        channel: &ChannelId,
        text: &str,
        id: Option<MessageId>,
    ) -> Result<Option<OutgoingMessage>> {
        self.ensure_unlocked().await?;
        self.messenger.send(channel, text, id).await
    }

    /// The reconciler (resync and pull entry points).
    pub fn reconciler(&self) -> &Arc<Reconciler> {
        &self.reconciler
    }

    // ---- Relay ----

    /// Run a relay stream into `output` until it ends.
    ///
    /// A newer stream replaces this one. Locking ends it.
    pub async fn relay(
        &self,
        output: mpsc::Sender<RelayOutput>,
        cancel: CancellationToken,
    ) -> Result<()> {
        self.ensure_unlocked().await?;
        self.relay.run(output, cancel).await
    }

    /// Check if a relay stream is active.
    pub fn relay_active(&self) -> bool {
        self.relay.hub().is_active()
    }
}
