//! Mock remote API for testing.
//!
//! Holds accounts, teams, channels and messages in memory, pages
//! messages, and lets tests queue failures, slow pulls down or force the
//! index a pull reports.

use super::{RemoteApi, RemoteError, Scope};
use crate::crypto::{ChannelKey, ScopeKey};
use async_trait::async_trait;
use hush_types::{
    ChannelDelta, ChannelId, ChannelInfo, IdentityId, MessageBatch, MessageId, NewChannel,
    RelayConfig, RemoteMessage,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Mock remote API.
#[derive(Debug, Clone)]
pub struct MockRemote {
    inner: Arc<Mutex<MockRemoteInner>>,
}

#[derive(Debug)]
struct MockChannel {
    scope: IdentityId,
    delta: ChannelDelta,
    messages: Vec<RemoteMessage>,
}

#[derive(Debug)]
struct MockRemoteInner {
    channels: Vec<(ChannelId, MockChannel)>,
    page_size: usize,
    relay: RelayConfig,
    forced_index: HashMap<ChannelId, i64>,
    stalled: HashMap<ChannelId, bool>,
    fail_next_channels: Option<RemoteError>,
    failing_channels: HashMap<ChannelId, String>,
    fail_next_relay_config: Option<RemoteError>,
    fail_next_send: Option<RemoteError>,
    message_delay: Option<Duration>,
    accounts: Vec<IdentityId>,
    teams: Vec<(IdentityId, IdentityId)>,
    channel_calls: usize,
    message_calls: Vec<(ChannelId, i64)>,
}

impl Default for MockRemote {
    fn default() -> Self {
        Self::new()
    }
}

impl MockRemote {
    /// Create an empty remote with a page size of 100.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(MockRemoteInner {
                channels: Vec::new(),
                page_size: 100,
                relay: RelayConfig {
                    url: "ws://relay.invalid/relay".into(),
                    auth: "relay-auth".into(),
                },
                forced_index: HashMap::new(),
                stalled: HashMap::new(),
                fail_next_channels: None,
                failing_channels: HashMap::new(),
                fail_next_relay_config: None,
                fail_next_send: None,
                message_delay: None,
                accounts: Vec::new(),
                teams: Vec::new(),
                channel_calls: 0,
                message_calls: Vec::new(),
            })),
        }
    }

    /// Messages returned per page.
    pub fn set_page_size(&self, page_size: usize) {
        let mut inner = self.inner.lock().unwrap();
        inner.page_size = page_size.max(1);
    }

    /// Relay parameters returned by `relay_config`.
    pub fn set_relay_config(&self, relay: RelayConfig) {
        let mut inner = self.inner.lock().unwrap();
        inner.relay = relay;
    }

    /// Create a channel owned by `scope`. Returns its key.
    pub fn add_channel(&self, scope: &Scope, name: &str) -> ChannelKey {
        let key = ChannelKey::generate().unwrap();
        self.add_channel_with_key(&scope.id, &scope.key, &key, name);
        key
    }

    /// Create a channel with a given key, sealed to `scope_key`.
    pub fn add_channel_with_key(
        &self,
        scope: &IdentityId,
        scope_key: &ScopeKey,
        key: &ChannelKey,
        name: &str,
    ) -> ChannelId {
        let id = ChannelId::from_key(key.as_bytes());
        let delta = ChannelDelta {
            sealed_key: scope_key.seal(key).unwrap(),
            token: format!("tok-{}", name),
            index: 0,
            info: Some(ChannelInfo {
                name: name.to_string(),
                description: String::new(),
            }),
        };
        let mut inner = self.inner.lock().unwrap();
        inner.channels.push((
            id,
            MockChannel {
                scope: *scope,
                delta,
                messages: Vec::new(),
            },
        ));
        id
    }

    /// Append messages to a channel, raising its index.
    pub fn push_messages(&self, channel: &ChannelId, texts: &[&str]) {
        let mut inner = self.inner.lock().unwrap();
        let ch = inner
            .channels
            .iter_mut()
            .find(|(id, _)| id == channel)
            .map(|(_, ch)| ch)
            .expect("unknown mock channel");
        for text in texts {
            let n = ch.messages.len() + 1;
            ch.messages.push(RemoteMessage {
                id: MessageId::new(format!("{}-{}", &channel.to_string()[..6], n)),
                sender: "alice".into(),
                text: text.to_string(),
                timestamp: 1_700_000_000_000 + n as i64,
            });
        }
        ch.delta.index = ch.messages.len() as i64;
    }

    /// Replace a channel's relay token.
    pub fn set_token(&self, channel: &ChannelId, token: &str) {
        let mut inner = self.inner.lock().unwrap();
        if let Some((_, ch)) = inner.channels.iter_mut().find(|(id, _)| id == channel) {
            ch.delta.token = token.to_string();
        }
    }

    /// Report `index` (not truncated) on every pull of `channel`.
    pub fn force_index(&self, channel: &ChannelId, index: i64) {
        let mut inner = self.inner.lock().unwrap();
        inner.forced_index.insert(*channel, index);
    }

    /// Report a truncated batch that never advances for `channel`.
    pub fn stall(&self, channel: &ChannelId) {
        let mut inner = self.inner.lock().unwrap();
        inner.stalled.insert(*channel, true);
    }

    /// Cause the next channel listing to fail.
    pub fn fail_next_channels(&self, error: RemoteError) {
        let mut inner = self.inner.lock().unwrap();
        inner.fail_next_channels = Some(error);
    }

    /// Make every message pull of `channel` fail.
    pub fn fail_messages(&self, channel: &ChannelId, error: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.failing_channels.insert(*channel, error.to_string());
    }

    /// Cause the next relay_config() to fail.
    pub fn fail_next_relay_config(&self, error: RemoteError) {
        let mut inner = self.inner.lock().unwrap();
        inner.fail_next_relay_config = Some(error);
    }

    /// Cause the next send_message() to fail.
    pub fn fail_next_send(&self, error: RemoteError) {
        let mut inner = self.inner.lock().unwrap();
        inner.fail_next_send = Some(error);
    }

    /// Delay every message pull by `delay`.
    pub fn set_message_delay(&self, delay: Duration) {
        let mut inner = self.inner.lock().unwrap();
        inner.message_delay = Some(delay);
    }

    /// Accounts registered so far.
    pub fn accounts(&self) -> Vec<IdentityId> {
        let inner = self.inner.lock().unwrap();
        inner.accounts.clone()
    }

    /// Teams registered so far, as (account, team).
    pub fn teams(&self) -> Vec<(IdentityId, IdentityId)> {
        let inner = self.inner.lock().unwrap();
        inner.teams.clone()
    }

    /// Name of every channel owned by `scope`, in creation order.
    pub fn channel_names(&self, scope: &IdentityId) -> Vec<String> {
        let inner = self.inner.lock().unwrap();
        inner
            .channels
            .iter()
            .filter(|(_, ch)| ch.scope == *scope)
            .filter_map(|(_, ch)| ch.delta.info.as_ref().map(|i| i.name.clone()))
            .collect()
    }

    /// Messages held for a channel, in index order.
    pub fn messages_of(&self, channel: &ChannelId) -> Vec<RemoteMessage> {
        let inner = self.inner.lock().unwrap();
        inner
            .channels
            .iter()
            .find(|(id, _)| id == channel)
            .map(|(_, ch)| ch.messages.clone())
            .unwrap_or_default()
    }

    /// Number of channel listings served.
    pub fn channel_calls(&self) -> usize {
        let inner = self.inner.lock().unwrap();
        inner.channel_calls
    }

    /// Message pulls served, as (channel, since).
    pub fn message_calls(&self) -> Vec<(ChannelId, i64)> {
        let inner = self.inner.lock().unwrap();
        inner.message_calls.clone()
    }
}

#[async_trait]
impl RemoteApi for MockRemote {
    async fn fetch_channel_updates(
        &self,
        scope: &Scope,
        since: i64,
    ) -> Result<Vec<ChannelDelta>, RemoteError> {
        let mut inner = self.inner.lock().unwrap();
        inner.channel_calls += 1;
        if let Some(error) = inner.fail_next_channels.take() {
            return Err(error);
        }
        Ok(inner
            .channels
            .iter()
            .filter(|(_, ch)| ch.scope == scope.id && ch.delta.index >= since)
            .map(|(_, ch)| ch.delta.clone())
            .collect())
    }

    async fn fetch_messages(
        &self,
        key: &ChannelKey,
        since: i64,
    ) -> Result<Option<MessageBatch>, RemoteError> {
        let id = ChannelId::from_key(key.as_bytes());
        let delay = {
            let mut inner = self.inner.lock().unwrap();
            inner.message_calls.push((id, since));
            inner.message_delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let inner = self.inner.lock().unwrap();

        if let Some(error) = inner.failing_channels.get(&id) {
            return Err(RemoteError::Network(error.clone()));
        }
        if let Some(&index) = inner.forced_index.get(&id) {
            return Ok(Some(MessageBatch {
                messages: Vec::new(),
                index,
                truncated: false,
            }));
        }
        if inner.stalled.contains_key(&id) {
            return Ok(Some(MessageBatch {
                messages: Vec::new(),
                index: since,
                truncated: true,
            }));
        }

        let page_size = inner.page_size;
        let Some((_, ch)) = inner.channels.iter().find(|(cid, _)| *cid == id) else {
            return Ok(None);
        };

        let start = since.clamp(0, ch.messages.len() as i64) as usize;
        let page: Vec<RemoteMessage> = ch.messages[start..]
            .iter()
            .take(page_size)
            .cloned()
            .collect();
        let index = (start + page.len()) as i64;
        Ok(Some(MessageBatch {
            truncated: (index as usize) < ch.messages.len(),
            messages: page,
            index,
        }))
    }

    async fn relay_config(&self, _identity: &IdentityId) -> Result<RelayConfig, RemoteError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(error) = inner.fail_next_relay_config.take() {
            return Err(error);
        }
        Ok(inner.relay.clone())
    }

    async fn create_account(&self, account: &IdentityId) -> Result<(), RemoteError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.accounts.contains(account) {
            return Err(RemoteError::Conflict);
        }
        inner.accounts.push(*account);
        Ok(())
    }

    async fn create_team(
        &self,
        account: &IdentityId,
        team: &IdentityId,
    ) -> Result<(), RemoteError> {
        let mut inner = self.inner.lock().unwrap();
        if !inner.accounts.contains(account) {
            return Err(RemoteError::NotFound);
        }
        if inner.teams.iter().any(|(_, t)| t == team) {
            return Err(RemoteError::Conflict);
        }
        inner.teams.push((*account, *team));
        Ok(())
    }

    async fn create_channel(
        &self,
        scope: &IdentityId,
        channel: &NewChannel,
    ) -> Result<(), RemoteError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.channels.iter().any(|(id, _)| *id == channel.channel) {
            return Err(RemoteError::Conflict);
        }
        let delta = ChannelDelta {
            sealed_key: channel.sealed_key.clone(),
            token: format!("tok-{}", channel.info.name),
            index: 0,
            info: Some(channel.info.clone()),
        };
        inner.channels.push((
            channel.channel,
            MockChannel {
                scope: *scope,
                delta,
                messages: Vec::new(),
            },
        ));
        Ok(())
    }

    async fn send_message(
        &self,
        key: &ChannelKey,
        message: &RemoteMessage,
    ) -> Result<(), RemoteError> {
        let id = ChannelId::from_key(key.as_bytes());
        let mut inner = self.inner.lock().unwrap();
        if let Some(error) = inner.fail_next_send.take() {
            return Err(error);
        }
        let Some((_, ch)) = inner.channels.iter_mut().find(|(cid, _)| *cid == id) else {
            return Err(RemoteError::NotFound);
        };
        if ch.messages.iter().any(|m| m.id == message.id) {
            return Err(RemoteError::Conflict);
        }
        ch.messages.push(message.clone());
        ch.delta.index = ch.messages.len() as i64;
        Ok(())
    }
}
