//! Channel and message reconciliation.
//!
//! Pulls channel listings and message pages from the remote and merges
//! them into the local store. Merges are idempotent: messages are keyed
//! by id and the per-channel index only moves forward.

use crate::error::{Result, ServiceError, StorageError};
use crate::remote::{RemoteApi, Scope};
use crate::storage::{ChannelState, ChannelStore, StoredMessage};
use hush_core::{MessageCursor, PullStep};
use hush_types::{ChannelDelta, ChannelId, IdentityId, ScopeKind};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Outcome of a channel resync.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResyncReport {
    /// Channels in the listing.
    pub channels: usize,
    /// Channels seen for the first time.
    pub created: usize,
    /// Channels whose messages were pulled.
    pub pulled: usize,
    /// Known channels whose relay token changed.
    pub retokened: usize,
    /// Channels that could not be reconciled.
    pub failed: usize,
}

impl ResyncReport {
    fn merge(&mut self, other: ResyncReport) {
        self.channels += other.channels;
        self.created += other.created;
        self.pulled += other.pulled;
        self.retokened += other.retokened;
        self.failed += other.failed;
    }

    /// Check if the relay token set differs from before the resync.
    pub fn tokens_changed(&self) -> bool {
        self.created > 0 || self.retokened > 0
    }
}

/// Outcome of a message pull.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PullReport {
    /// Index before the pull.
    pub from: i64,
    /// Index after the pull.
    pub to: i64,
    /// New messages stored.
    pub added: u64,
    /// Pages fetched.
    pub batches: usize,
    /// The remote reported an index behind ours.
    pub inconsistent: bool,
}

/// What happened to one channel of a listing.
#[derive(Default)]
struct DeltaOutcome {
    created: bool,
    retokened: bool,
    pulled: bool,
}

/// Merges remote channel and message state into the local store.
pub struct Reconciler {
    store: Arc<dyn ChannelStore>,
    remote: Arc<dyn RemoteApi>,
    scopes: RwLock<Vec<Scope>>,
}

impl Reconciler {
    /// Create a reconciler with no registered scopes.
    pub fn new(store: Arc<dyn ChannelStore>, remote: Arc<dyn RemoteApi>) -> Self {
        Self {
            store,
            remote,
            scopes: RwLock::new(Vec::new()),
        }
    }

    /// Register a team or account scope. Replaces a scope with the same id.
    pub async fn register_scope(&self, scope: Scope) {
        let mut scopes = self.scopes.write().await;
        scopes.retain(|s| s.id != scope.id);
        tracing::debug!(scope = %scope.id, kind = scope.kind.as_str(), "Scope registered");
        scopes.push(scope);
    }

    /// Store a scope and register it.
    pub async fn add_scope(&self, scope: Scope) -> Result<()> {
        self.store.save_scope(&scope).await?;
        self.register_scope(scope).await;
        Ok(())
    }

    /// Register every stored scope. Returns how many there were.
    pub async fn load_scopes(&self) -> Result<usize> {
        let stored = self.store.scopes().await?;
        let count = stored.len();
        for scope in stored {
            self.register_scope(scope).await;
        }
        Ok(count)
    }

    /// Forget every scope (their keys included).
    pub async fn clear_scopes(&self) {
        self.scopes.write().await.clear();
    }

    /// The first registered scope of `kind`.
    pub async fn scope(&self, kind: ScopeKind) -> Option<Scope> {
        self.scopes
            .read()
            .await
            .iter()
            .find(|s| s.kind == kind)
            .cloned()
    }

    /// The registered account scope.
    pub async fn account_scope(&self) -> Result<Scope> {
        self.scope(ScopeKind::User).await.ok_or(ServiceError::NoAccount)
    }

    /// The registered team scope.
    pub async fn team_scope(&self) -> Result<Scope> {
        self.scope(ScopeKind::Team).await.ok_or(ServiceError::NoTeam)
    }

    /// Identity of the registered account scope.
    pub async fn account(&self) -> Result<IdentityId> {
        self.account_scope().await.map(|s| s.id)
    }

    /// Fetch the channel listing for `scope` and reconcile every channel.
    ///
    /// A channel that fails (bad key, network, storage) is logged and
    /// counted; the rest of the listing is still processed. Only a failure
    /// to fetch the listing itself is returned.
    pub async fn resync_channels(&self, scope: &Scope) -> Result<ResyncReport> {
        let deltas = self.remote.fetch_channel_updates(scope, 0).await?;
        let mut report = ResyncReport {
            channels: deltas.len(),
            ..Default::default()
        };

        for delta in deltas {
            match self.apply_delta(scope, delta).await {
                Ok(outcome) => {
                    report.created += usize::from(outcome.created);
                    report.retokened += usize::from(outcome.retokened);
                    report.pulled += usize::from(outcome.pulled);
                }
                // Locked mid-resync: nothing else can succeed.
                Err(ServiceError::Storage(StorageError::Closed)) => {
                    return Err(StorageError::Closed.into());
                }
                Err(e) => {
                    tracing::warn!(scope = %scope.id, "Channel resync failed: {}", e);
                    report.failed += 1;
                }
            }
        }

        tracing::debug!(scope = %scope.id, ?report, "Channels resynced");
        Ok(report)
    }

    /// Resync every registered scope.
    pub async fn resync_all(&self) -> Result<ResyncReport> {
        let scopes = self.scopes.read().await.clone();
        let mut report = ResyncReport::default();
        for scope in &scopes {
            report.merge(self.resync_channels(scope).await?);
        }
        Ok(report)
    }

    async fn apply_delta(&self, scope: &Scope, delta: ChannelDelta) -> Result<DeltaOutcome> {
        let key = scope.key.open(&delta.sealed_key)?;
        let id = ChannelId::from_key(key.as_bytes());

        let mut outcome = DeltaOutcome::default();
        let local_index = match self.store.channel(&id).await? {
            Some(existing) => {
                if existing.token != delta.token {
                    self.store.set_token(&id, &delta.token).await?;
                    outcome.retokened = true;
                }
                if let Some(info) = &delta.info {
                    if info.name != existing.name || info.description != existing.description {
                        self.store.set_info(&id, info).await?;
                    }
                }
                existing.message_index
            }
            None => {
                let state = ChannelState::new(
                    key,
                    scope.kind,
                    delta.token.clone(),
                    delta.info.clone().unwrap_or_default(),
                );
                self.store.insert_channel(&state).await?;
                tracing::info!(channel = %id, name = %state.name, "Channel added");
                outcome.created = true;
                0
            }
        };

        if delta.index != local_index {
            self.pull_messages(&id).await?;
            outcome.pulled = true;
        }
        Ok(outcome)
    }

    /// Pull every message past the local index.
    ///
    /// Keeps fetching while the remote reports truncated pages. A remote
    /// index behind the local one is logged and ends the pull without
    /// touching local state.
    pub async fn pull_messages(&self, channel: &ChannelId) -> Result<PullReport> {
        let state = self
            .store
            .channel(channel)
            .await?
            .ok_or_else(|| ServiceError::UnknownChannel(channel.to_string()))?;

        let mut cursor = MessageCursor::new(state.message_index);
        let mut report = PullReport {
            from: cursor.index(),
            ..Default::default()
        };

        loop {
            let since = cursor.index();
            let Some(batch) = self.remote.fetch_messages(&state.key, since).await? else {
                break;
            };
            report.batches += 1;

            let step = cursor.apply_batch(batch.index, batch.truncated);
            if let PullStep::Inconsistent { local, remote } = step {
                let err = ServiceError::Inconsistent {
                    channel: channel.to_string(),
                    local,
                    remote,
                };
                tracing::warn!("Pull skipped: {}", err);
                report.inconsistent = true;
                break;
            }

            report.added += self.store.add_messages(channel, &batch.messages).await?;
            self.store.set_message_index(channel, cursor.index()).await?;

            match step {
                PullStep::Continue => continue,
                PullStep::Stalled => {
                    tracing::warn!(
                        channel = %channel,
                        index = since,
                        "Truncated page did not advance"
                    );
                    break;
                }
                PullStep::Done | PullStep::Inconsistent { .. } => break,
            }
        }

        report.to = cursor.index();
        if report.added > 0 {
            tracing::debug!(
                channel = %channel,
                from = report.from,
                to = report.to,
                added = report.added,
                "Messages pulled"
            );
        }
        Ok(report)
    }

    /// Pull only if `remote_index` is past the local index.
    ///
    /// Returns `None` when the channel was already up to date.
    pub async fn pull_if_behind(
        &self,
        channel: &ChannelId,
        remote_index: i64,
    ) -> Result<Option<PullReport>> {
        let state = self
            .store
            .channel(channel)
            .await?
            .ok_or_else(|| ServiceError::UnknownChannel(channel.to_string()))?;

        if !MessageCursor::new(state.message_index).is_behind(remote_index) {
            return Ok(None);
        }
        self.pull_messages(channel).await.map(Some)
    }

    /// Visible channels sorted by name, optionally resyncing first.
    pub async fn channels(&self, update: bool) -> Result<Vec<ChannelState>> {
        if update {
            self.resync_all().await?;
        }
        let channels = self.store.channels().await?;
        Ok(channels.into_iter().filter(|c| !c.hidden).collect())
    }

    /// Messages of a channel, optionally pulling first. Marks the channel read.
    pub async fn messages(&self, channel: &ChannelId, update: bool) -> Result<Vec<StoredMessage>> {
        if self.store.channel(channel).await?.is_none() {
            return Err(ServiceError::UnknownChannel(channel.to_string()));
        }
        if update {
            self.pull_messages(channel).await?;
        }
        self.store.mark_read(channel).await?;
        Ok(self.store.messages(channel).await?)
    }

    /// A known channel, hidden ones included.
    pub async fn channel(&self, channel: &ChannelId) -> Result<ChannelState> {
        self.store
            .channel(channel)
            .await?
            .ok_or_else(|| ServiceError::UnknownChannel(channel.to_string()))
    }

    /// Hide a channel from listings.
    pub async fn leave_channel(&self, channel: &ChannelId) -> Result<()> {
        if !self.store.hide_channel(channel).await? {
            return Err(ServiceError::UnknownChannel(channel.to_string()));
        }
        tracing::info!(channel = %channel, "Channel left");
        Ok(())
    }

    /// Relay tokens of every known channel.
    pub async fn relay_tokens(&self) -> Result<Vec<String>> {
        Ok(self.store.relay_tokens().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{ChannelKey, DbKey, ScopeKey};
    use crate::remote::{MockRemote, RemoteError};
    use crate::storage::SqliteStore;

    struct Fixture {
        store: Arc<SqliteStore>,
        remote: MockRemote,
        reconciler: Reconciler,
        team: Scope,
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(SqliteStore::in_memory());
        store.open(&DbKey::from_bytes(&[4u8; 32]).unwrap()).await.unwrap();
        let remote = MockRemote::new();
        let reconciler = Reconciler::new(store.clone(), Arc::new(remote.clone()));
        let team = Scope {
            id: IdentityId::random(),
            kind: ScopeKind::Team,
            key: ScopeKey::generate().unwrap(),
        };
        reconciler.register_scope(team.clone()).await;
        Fixture {
            store,
            remote,
            reconciler,
            team,
        }
    }

    fn id_of(key: &ChannelKey) -> ChannelId {
        ChannelId::from_key(key.as_bytes())
    }

    // ===========================================
    // Resync
    // ===========================================

    #[tokio::test]
    async fn new_channel_is_created_and_pulled() {
        let f = fixture().await;
        let key = f.remote.add_channel(&f.team, "testing");
        let id = id_of(&key);
        f.remote.push_messages(&id, &["1", "2", "3", "4", "5"]);

        let report = f.reconciler.resync_channels(&f.team).await.unwrap();
        assert_eq!(report.created, 1);
        assert_eq!(report.pulled, 1);

        let state = f.store.channel(&id).await.unwrap().unwrap();
        assert_eq!(state.name, "testing");
        assert_eq!(state.message_index, 5);
        assert_eq!(f.store.message_count(&id).await.unwrap(), 5);
    }

    #[tokio::test]
    async fn empty_channel_is_created_without_pull() {
        let f = fixture().await;
        f.remote.add_channel(&f.team, "quiet");

        let report = f.reconciler.resync_channels(&f.team).await.unwrap();
        assert_eq!(report.created, 1);
        assert_eq!(report.pulled, 0);
        assert!(f.remote.message_calls().is_empty());
    }

    #[tokio::test]
    async fn resync_updates_token_and_info() {
        let f = fixture().await;
        let key = f.remote.add_channel(&f.team, "general");
        let id = id_of(&key);
        f.reconciler.resync_channels(&f.team).await.unwrap();

        let unchanged = f.reconciler.resync_channels(&f.team).await.unwrap();
        assert!(!unchanged.tokens_changed());

        f.remote.set_token(&id, "tok-rotated");
        let report = f.reconciler.resync_channels(&f.team).await.unwrap();
        assert_eq!(report.retokened, 1);
        assert!(report.tokens_changed());

        let state = f.store.channel(&id).await.unwrap().unwrap();
        assert_eq!(state.token, "tok-rotated");
        assert_eq!(f.reconciler.relay_tokens().await.unwrap(), vec!["tok-rotated"]);
    }

    #[tokio::test]
    async fn one_bad_channel_does_not_stop_resync() {
        let f = fixture().await;
        // Sealed to a different scope key: cannot be opened.
        let foreign = ScopeKey::generate().unwrap();
        f.remote.add_channel_with_key(
            &f.team.id,
            &foreign,
            &ChannelKey::generate().unwrap(),
            "broken",
        );
        let good = f.remote.add_channel(&f.team, "good");
        let good_id = id_of(&good);
        f.remote.push_messages(&good_id, &["hi"]);

        let report = f.reconciler.resync_channels(&f.team).await.unwrap();
        assert_eq!(report.channels, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(f.store.message_count(&good_id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn pull_failure_is_isolated_per_channel() {
        let f = fixture().await;
        let a = id_of(&f.remote.add_channel(&f.team, "a"));
        let b = id_of(&f.remote.add_channel(&f.team, "b"));
        f.remote.push_messages(&a, &["x"]);
        f.remote.push_messages(&b, &["y"]);
        f.remote.fail_messages(&a, "timeout");

        let report = f.reconciler.resync_channels(&f.team).await.unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(f.store.message_count(&b).await.unwrap(), 1);
        // The failed channel was still created, at index 0.
        assert_eq!(f.store.channel(&a).await.unwrap().unwrap().message_index, 0);
    }

    #[tokio::test]
    async fn listing_failure_is_returned() {
        let f = fixture().await;
        f.remote
            .fail_next_channels(RemoteError::Network("unreachable".into()));
        let err = f.reconciler.resync_channels(&f.team).await.unwrap_err();
        assert!(matches!(err, ServiceError::TransientNetwork(_)));
    }

    #[tokio::test]
    async fn resync_on_closed_store_fails() {
        let f = fixture().await;
        f.remote.add_channel(&f.team, "general");
        f.store.close().await.unwrap();
        let err = f.reconciler.resync_channels(&f.team).await.unwrap_err();
        assert!(matches!(err, ServiceError::Storage(StorageError::Closed)));
    }

    // ===========================================
    // Pull
    // ===========================================

    #[tokio::test]
    async fn pull_follows_truncated_pages() {
        let f = fixture().await;
        f.remote.set_page_size(2);
        let id = id_of(&f.remote.add_channel(&f.team, "paged"));
        f.reconciler.resync_channels(&f.team).await.unwrap();
        f.remote.push_messages(&id, &["1", "2", "3", "4", "5"]);

        let report = f.reconciler.pull_messages(&id).await.unwrap();
        assert_eq!(report.from, 0);
        assert_eq!(report.to, 5);
        assert_eq!(report.added, 5);
        assert_eq!(report.batches, 3);
    }

    #[tokio::test]
    async fn pull_twice_is_idempotent() {
        let f = fixture().await;
        let id = id_of(&f.remote.add_channel(&f.team, "general"));
        f.remote.push_messages(&id, &["a", "b"]);
        f.reconciler.resync_channels(&f.team).await.unwrap();

        let first = f.store.message_count(&id).await.unwrap();
        let report = f.reconciler.pull_messages(&id).await.unwrap();
        assert_eq!(report.added, 0);
        assert_eq!(report.from, report.to);
        assert_eq!(f.store.message_count(&id).await.unwrap(), first);
    }

    #[tokio::test]
    async fn backward_index_is_not_applied() {
        let f = fixture().await;
        let id = id_of(&f.remote.add_channel(&f.team, "general"));
        f.remote.push_messages(&id, &["a", "b", "c"]);
        f.reconciler.resync_channels(&f.team).await.unwrap();

        f.remote.force_index(&id, 1);
        let report = f.reconciler.pull_messages(&id).await.unwrap();
        assert!(report.inconsistent);
        assert_eq!(report.to, 3);
        assert_eq!(f.store.channel(&id).await.unwrap().unwrap().message_index, 3);
    }

    #[tokio::test]
    async fn stalled_pages_end_the_pull() {
        let f = fixture().await;
        let id = id_of(&f.remote.add_channel(&f.team, "stuck"));
        f.reconciler.resync_channels(&f.team).await.unwrap();
        f.remote.stall(&id);

        let report = f.reconciler.pull_messages(&id).await.unwrap();
        assert_eq!(report.batches, 1);
        assert_eq!(report.to, 0);
    }

    #[tokio::test]
    async fn pull_if_behind_skips_up_to_date_channel() {
        let f = fixture().await;
        let id = id_of(&f.remote.add_channel(&f.team, "general"));
        f.remote.push_messages(&id, &["a", "b"]);
        f.reconciler.resync_channels(&f.team).await.unwrap();
        let calls = f.remote.message_calls().len();

        assert!(f.reconciler.pull_if_behind(&id, 2).await.unwrap().is_none());
        assert!(f.reconciler.pull_if_behind(&id, 1).await.unwrap().is_none());
        assert_eq!(f.remote.message_calls().len(), calls);

        f.remote.push_messages(&id, &["c"]);
        let report = f.reconciler.pull_if_behind(&id, 3).await.unwrap().unwrap();
        assert_eq!(report.to, 3);
    }

    #[tokio::test]
    async fn pull_unknown_channel_fails() {
        let f = fixture().await;
        let err = f.reconciler.pull_messages(&ChannelId::random()).await.unwrap_err();
        assert!(matches!(err, ServiceError::UnknownChannel(_)));
    }

    // ===========================================
    // Read paths
    // ===========================================

    #[tokio::test]
    async fn leave_hides_channel() {
        let f = fixture().await;
        let a = id_of(&f.remote.add_channel(&f.team, "alpha"));
        f.remote.add_channel(&f.team, "beta");

        let listed = f.reconciler.channels(true).await.unwrap();
        assert_eq!(listed.len(), 2);

        f.reconciler.leave_channel(&a).await.unwrap();
        let listed = f.reconciler.channels(false).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].name, "beta");

        // Hidden, not forgotten: a resync does not bring it back.
        let listed = f.reconciler.channels(true).await.unwrap();
        assert_eq!(listed.len(), 1);
    }

    #[tokio::test]
    async fn leave_unknown_channel_fails() {
        let f = fixture().await;
        assert!(matches!(
            f.reconciler.leave_channel(&ChannelId::random()).await,
            Err(ServiceError::UnknownChannel(_))
        ));
    }

    #[tokio::test]
    async fn messages_with_update_pulls_and_marks_read() {
        let f = fixture().await;
        let id = id_of(&f.remote.add_channel(&f.team, "general"));
        f.reconciler.resync_channels(&f.team).await.unwrap();
        f.remote.push_messages(&id, &["a", "b"]);

        let messages = f.reconciler.messages(&id, true).await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].text, "a");
        assert_eq!(f.store.channel(&id).await.unwrap().unwrap().unread(), 0);
    }

    #[tokio::test]
    async fn account_requires_user_scope() {
        let f = fixture().await;
        assert!(matches!(f.reconciler.account().await, Err(ServiceError::NoAccount)));

        let user = Scope {
            id: IdentityId::random(),
            kind: ScopeKind::User,
            key: ScopeKey::generate().unwrap(),
        };
        f.reconciler.register_scope(user.clone()).await;
        assert_eq!(f.reconciler.account().await.unwrap(), user.id);
    }

    #[tokio::test]
    async fn stored_scopes_come_back_after_clear() {
        let f = fixture().await;
        let user = Scope {
            id: IdentityId::random(),
            kind: ScopeKind::User,
            key: ScopeKey::generate().unwrap(),
        };
        f.reconciler.add_scope(user.clone()).await.unwrap();
        assert_eq!(f.reconciler.account().await.unwrap(), user.id);

        f.reconciler.clear_scopes().await;
        assert!(matches!(f.reconciler.team_scope().await, Err(ServiceError::NoTeam)));

        // Only the stored account comes back; the fixture's team was never saved.
        assert_eq!(f.reconciler.load_scopes().await.unwrap(), 1);
        assert_eq!(f.reconciler.account_scope().await.unwrap().key, user.key);
        assert!(f.reconciler.scope(ScopeKind::Team).await.is_none());
    }
}
