//! Outgoing channels and messages.
//!
//! A created channel is only registered with the remote. It reaches the
//! local store through the next resync like any other channel, and a sent
//! message comes back through the next pull.

use crate::clock::Clock;
use crate::crypto::{self, ChannelKey};
use crate::error::Result;
use crate::reconcile::Reconciler;
use crate::remote::RemoteApi;
use hush_core::{base62, channel_name, Command, Outgoing};
use hush_types::{ChannelId, ChannelInfo, MessageId, NewChannel, RemoteMessage};
use serde::Serialize;
use std::sync::Arc;

/// Bytes of randomness in a message id.
const MESSAGE_ID_BYTES: usize = 32;

/// Delivery state of an outgoing message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    /// Composed, not sent yet.
    Pending,
    /// Accepted by the remote.
    Sent,
}

/// A message composed on this device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutgoingMessage {
    /// Base62 of 32 random bytes.
    pub id: MessageId,
    /// Target channel.
    pub channel: ChannelId,
    /// Account identity of the sender.
    pub sender: String,
    /// Trimmed text.
    pub text: String,
    /// Unix milliseconds.
    pub timestamp: i64,
    /// Pending until sent.
    pub status: MessageStatus,
}

/// Creates channels and sends messages for the registered account.
pub struct Messenger {
    reconciler: Arc<Reconciler>,
    remote: Arc<dyn RemoteApi>,
    clock: Arc<dyn Clock>,
}

impl Messenger {
    /// Create a messenger.
    pub fn new(
        reconciler: Arc<Reconciler>,
        remote: Arc<dyn RemoteApi>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            reconciler,
            remote,
            clock,
        }
    }

    /// Create a channel and return its id.
    ///
    /// A private channel belongs to the account, any other to the team.
    pub async fn create_channel(&self, name: &str, private: bool) -> Result<ChannelId> {
        let name = channel_name(name)?;
        let account = self.reconciler.account_scope().await?;
        let scope = if private {
            account
        } else {
            self.reconciler.team_scope().await?
        };

        let key = ChannelKey::generate()?;
        let channel = NewChannel {
            channel: ChannelId::from_key(key.as_bytes()),
            sealed_key: scope.key.seal(&key)?,
            info: ChannelInfo {
                name: name.to_string(),
                description: String::new(),
            },
        };
        self.remote.create_channel(&scope.id, &channel).await?;

        tracing::info!(
            channel = %channel.channel,
            name,
            scope = scope.kind.as_str(),
            "Channel created"
        );
        Ok(channel.channel)
    }

    /// Compose a message without sending it.
    pub async fn prepare(&self, channel: &ChannelId, text: &str) -> Result<OutgoingMessage> {
        let sender = self.reconciler.account().await?;
        Ok(OutgoingMessage {
            id: new_message_id()?,
            channel: *channel,
            sender: sender.to_string(),
            text: text.trim().to_string(),
            timestamp: self.clock.now_millis(),
            status: MessageStatus::Pending,
        })
    }

    /// Send text to a channel.
    ///
    /// Text starting with `/` is a command: it runs instead of being sent
    /// and nothing is returned. `id` keeps the id of a prepared message.
    pub async fn send(
        &self,
        channel: &ChannelId,
        text: &str,
        id: Option<MessageId>,
    ) -> Result<Option<OutgoingMessage>> {
        let text = match Outgoing::parse(text)? {
            Outgoing::Command(command) => {
                self.run_command(channel, command).await?;
                return Ok(None);
            }
            Outgoing::Text(text) => text,
        };

        let sender = self.reconciler.account().await?;
        let state = self.reconciler.channel(channel).await?;
        let message = RemoteMessage {
            id: match id {
                Some(id) => id,
                None => new_message_id()?,
            },
            sender: sender.to_string(),
            text,
            timestamp: self.clock.now_millis(),
        };
        self.remote.send_message(&state.key, &message).await?;
        tracing::debug!(channel = %channel, id = %message.id, "Message sent");

        Ok(Some(OutgoingMessage {
            id: message.id,
            channel: *channel,
            sender: message.sender,
            text: message.text,
            timestamp: message.timestamp,
            status: MessageStatus::Sent,
        }))
    }

    async fn run_command(&self, channel: &ChannelId, command: Command) -> Result<()> {
        match command {
            Command::Leave => self.reconciler.leave_channel(channel).await,
            Command::Create { name } => self.create_channel(&name, false).await.map(|_| ()),
        }
    }
}

fn new_message_id() -> Result<MessageId> {
    let bytes: [u8; MESSAGE_ID_BYTES] = crypto::random_bytes()?;
    Ok(MessageId::new(base62::encode(&bytes)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::crypto::{DbKey, ScopeKey};
    use crate::error::ServiceError;
    use crate::remote::{MockRemote, RemoteError, Scope};
    use crate::storage::{ChannelStore, SqliteStore};
    use hush_types::{IdentityId, ScopeKind};

    const NOW: u64 = 1_700_000_000;

    struct Fixture {
        remote: MockRemote,
        reconciler: Arc<Reconciler>,
        messenger: Messenger,
        user: Scope,
        team: Scope,
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(SqliteStore::in_memory());
        store.open(&DbKey::from_bytes(&[5u8; 32]).unwrap()).await.unwrap();
        let remote = MockRemote::new();
        let reconciler = Arc::new(Reconciler::new(store, Arc::new(remote.clone())));
        let messenger = Messenger::new(
            Arc::clone(&reconciler),
            Arc::new(remote.clone()),
            Arc::new(ManualClock::new(NOW)),
        );

        let user = Scope {
            id: IdentityId::random(),
            kind: ScopeKind::User,
            key: ScopeKey::generate().unwrap(),
        };
        let team = Scope {
            id: IdentityId::random(),
            kind: ScopeKind::Team,
            key: ScopeKey::generate().unwrap(),
        };
        Fixture {
            remote,
            reconciler,
            messenger,
            user,
            team,
        }
    }

    async fn with_scopes() -> Fixture {
        let f = fixture().await;
        f.reconciler.register_scope(f.user.clone()).await;
        f.reconciler.register_scope(f.team.clone()).await;
        f
    }

    // ===========================================
    // Channels
    // ===========================================

    #[tokio::test]
    async fn created_channel_arrives_with_next_resync() {
        let f = with_scopes().await;
        let id = f.messenger.create_channel(" general ", false).await.unwrap();
        assert_eq!(f.remote.channel_names(&f.team.id), vec!["general"]);
        assert!(f.reconciler.channel(&id).await.is_err());

        f.reconciler.resync_all().await.unwrap();
        let state = f.reconciler.channel(&id).await.unwrap();
        assert_eq!(state.name, "general");
        assert_eq!(state.scope, ScopeKind::Team);
    }

    #[tokio::test]
    async fn private_channel_belongs_to_account() {
        let f = with_scopes().await;
        f.messenger.create_channel("notes", true).await.unwrap();
        assert_eq!(f.remote.channel_names(&f.user.id), vec!["notes"]);
        assert!(f.remote.channel_names(&f.team.id).is_empty());
    }

    #[tokio::test]
    async fn channel_needs_valid_name() {
        let f = with_scopes().await;
        for name in ["", "   ", "General", "has space", "seventeen-letters"] {
            let err = f.messenger.create_channel(name, false).await.unwrap_err();
            assert!(matches!(err, ServiceError::InvalidRequest(_)), "{}", name);
        }
    }

    #[tokio::test]
    async fn channel_needs_account_and_team() {
        let f = fixture().await;
        assert!(matches!(
            f.messenger.create_channel("general", false).await,
            Err(ServiceError::NoAccount)
        ));

        f.reconciler.register_scope(f.user.clone()).await;
        assert!(matches!(
            f.messenger.create_channel("general", false).await,
            Err(ServiceError::NoTeam)
        ));
        f.messenger.create_channel("general", true).await.unwrap();
    }

    // ===========================================
    // Messages
    // ===========================================

    #[tokio::test]
    async fn prepare_fills_in_sender_and_time() {
        let f = with_scopes().await;
        let channel = ChannelId::random();
        let message = f.messenger.prepare(&channel, "  hi there ").await.unwrap();

        assert_eq!(message.text, "hi there");
        assert_eq!(message.sender, f.user.id.to_string());
        assert_eq!(message.timestamp, NOW as i64 * 1000);
        assert_eq!(message.status, MessageStatus::Pending);
        assert!(message.id.as_str().chars().all(|c| c.is_ascii_alphanumeric()));
        assert!(message.id.as_str().len() >= 40);

        let other = f.messenger.prepare(&channel, "hi").await.unwrap();
        assert_ne!(message.id, other.id);
    }

    #[tokio::test]
    async fn sent_message_is_pulled_back() {
        let f = with_scopes().await;
        let key = f.remote.add_channel(&f.team, "general");
        let channel = ChannelId::from_key(key.as_bytes());
        f.reconciler.resync_all().await.unwrap();

        let prepared = f.messenger.prepare(&channel, "hello").await.unwrap();
        let sent = f
            .messenger
            .send(&channel, " hello ", Some(prepared.id.clone()))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(sent.id, prepared.id);
        assert_eq!(sent.text, "hello");
        assert_eq!(sent.status, MessageStatus::Sent);

        let remote = f.remote.messages_of(&channel);
        assert_eq!(remote.len(), 1);
        assert_eq!(remote[0].sender, f.user.id.to_string());

        let messages = f.reconciler.messages(&channel, true).await.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].text, "hello");
    }

    #[tokio::test]
    async fn send_to_unknown_channel_fails() {
        let f = with_scopes().await;
        assert!(matches!(
            f.messenger.send(&ChannelId::random(), "hello", None).await,
            Err(ServiceError::UnknownChannel(_))
        ));
    }

    #[tokio::test]
    async fn remote_send_failure_is_returned() {
        let f = with_scopes().await;
        let key = f.remote.add_channel(&f.team, "general");
        let channel = ChannelId::from_key(key.as_bytes());
        f.reconciler.resync_all().await.unwrap();

        f.remote.fail_next_send(RemoteError::Network("down".into()));
        assert!(matches!(
            f.messenger.send(&channel, "hello", None).await,
            Err(ServiceError::TransientNetwork(_))
        ));
        assert!(f.remote.messages_of(&channel).is_empty());
    }

    // ===========================================
    // Commands
    // ===========================================

    #[tokio::test]
    async fn leave_command_hides_channel() {
        let f = with_scopes().await;
        let key = f.remote.add_channel(&f.team, "general");
        let channel = ChannelId::from_key(key.as_bytes());
        f.reconciler.resync_all().await.unwrap();

        let sent = f.messenger.send(&channel, "/leave", None).await.unwrap();
        assert!(sent.is_none());
        assert!(f.reconciler.channels(false).await.unwrap().is_empty());
        assert!(f.remote.messages_of(&channel).is_empty());
    }

    #[tokio::test]
    async fn create_command_makes_team_channel() {
        let f = with_scopes().await;
        let sent = f
            .messenger
            .send(&ChannelId::random(), "/create random", None)
            .await
            .unwrap();
        assert!(sent.is_none());
        assert_eq!(f.remote.channel_names(&f.team.id), vec!["random"]);
    }

    #[tokio::test]
    async fn unknown_command_is_rejected() {
        let f = with_scopes().await;
        let err = f
            .messenger
            .send(&ChannelId::random(), "/shrug", None)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidRequest(_)));
        assert_eq!(err.to_string(), "invalid request: unrecognized command: /shrug");
    }
}
