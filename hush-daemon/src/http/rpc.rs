//! JSON RPC handlers.

use crate::crypto::ScopeKey;
use crate::error::{Result, ServiceError};
use crate::messaging::OutgoingMessage;
use crate::random::{self, Encoding};
use crate::remote::Scope;
use crate::service::Service;
use crate::storage::{ChannelState, StoredMessage};
use axum::{Extension, Json};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hush_types::{AuthMethod, ChannelId, IdentityId, MessageId, ScopeKind};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use zeroize::Zeroizing;

#[derive(Debug, Deserialize)]
pub(super) struct UnlockRequest {
    secret: String,
    method: AuthMethod,
    client: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct UnlockResponse {
    auth_token: String,
}

pub(super) async fn auth_unlock(
    Extension(service): Extension<Arc<Service>>,
    Json(req): Json<UnlockRequest>,
) -> Result<Json<UnlockResponse>> {
    let auth_token = service.unlock(&req.secret, req.method, &req.client).await?;
    Ok(Json(UnlockResponse { auth_token }))
}

pub(super) async fn auth_lock(Extension(service): Extension<Arc<Service>>) -> Result<Json<Empty>> {
    service.lock().await?;
    Ok(Json(Empty {}))
}

#[derive(Debug, Serialize)]
pub(super) struct StatusResponse {
    status: String,
}

pub(super) async fn auth_status(
    Extension(service): Extension<Arc<Service>>,
) -> Json<StatusResponse> {
    Json(StatusResponse {
        status: service.status().await.to_string(),
    })
}

#[derive(Debug, Serialize)]
pub(super) struct Empty {}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct AccountCreateResponse {
    auth_token: String,
    account: IdentityId,
}

pub(super) async fn account_create(
    Extension(service): Extension<Arc<Service>>,
    Json(req): Json<UnlockRequest>,
) -> Result<Json<AccountCreateResponse>> {
    let (auth_token, account) = service
        .create_account(&req.secret, req.method, &req.client)
        .await?;
    Ok(Json(AccountCreateResponse {
        auth_token,
        account,
    }))
}

#[derive(Debug, Serialize)]
pub(super) struct TeamCreateResponse {
    team: IdentityId,
}

pub(super) async fn team_create(
    Extension(service): Extension<Arc<Service>>,
) -> Result<Json<TeamCreateResponse>> {
    let team = service.create_team().await?;
    Ok(Json(TeamCreateResponse { team }))
}

/// An account or team key, URL-safe base64 like ids.
#[derive(Debug, Deserialize)]
pub(super) struct KeyImportRequest {
    id: IdentityId,
    kind: ScopeKind,
    key: String,
}

pub(super) async fn key_import(
    Extension(service): Extension<Arc<Service>>,
    Json(req): Json<KeyImportRequest>,
) -> Result<Json<Empty>> {
    let bytes = Zeroizing::new(
        URL_SAFE_NO_PAD
            .decode(req.key.as_bytes())
            .map_err(|_| ServiceError::InvalidRequest("invalid key".into()))?,
    );
    let key = ScopeKey::from_bytes(&bytes)
        .map_err(|_| ServiceError::InvalidRequest("invalid key".into()))?;
    service
        .import_scope(Scope {
            id: req.id,
            kind: req.kind,
            key,
        })
        .await?;
    Ok(Json(Empty {}))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct RandRequest {
    num_bytes: usize,
    #[serde(default)]
    encoding: Encoding,
    #[serde(default)]
    no_padding: bool,
    #[serde(default)]
    lowercase: bool,
}

#[derive(Debug, Serialize)]
pub(super) struct RandResponse {
    data: String,
}

pub(super) async fn rand(Json(req): Json<RandRequest>) -> Result<Json<RandResponse>> {
    let data = random::rand(req.num_bytes, req.encoding, req.no_padding, req.lowercase)?;
    Ok(Json(RandResponse { data }))
}

#[derive(Debug, Deserialize)]
pub(super) struct RandPasswordRequest {
    length: usize,
}

#[derive(Debug, Serialize)]
pub(super) struct RandPasswordResponse {
    password: String,
}

pub(super) async fn rand_password(
    Json(req): Json<RandPasswordRequest>,
) -> Result<Json<RandPasswordResponse>> {
    let password = random::rand_password(req.length)?;
    Ok(Json(RandPasswordResponse { password }))
}

/// A channel as clients see it. Keys and relay tokens stay in the daemon.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct ChannelView {
    id: ChannelId,
    name: String,
    description: String,
    index: i64,
    read_index: i64,
    unread: i64,
    scope: ScopeKind,
}

impl From<ChannelState> for ChannelView {
    fn from(ch: ChannelState) -> Self {
        Self {
            unread: ch.unread(),
            id: ch.id,
            name: ch.name,
            description: ch.description,
            index: ch.message_index,
            read_index: ch.read_index,
            scope: ch.scope,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub(super) struct ChannelsRequest {
    #[serde(default)]
    update: bool,
}

#[derive(Debug, Serialize)]
pub(super) struct ChannelsResponse {
    channels: Vec<ChannelView>,
}

pub(super) async fn channels(
    Extension(service): Extension<Arc<Service>>,
    Json(req): Json<ChannelsRequest>,
) -> Result<Json<ChannelsResponse>> {
    let channels = service.channels(req.update).await?;
    Ok(Json(ChannelsResponse {
        channels: channels.into_iter().map(ChannelView::from).collect(),
    }))
}

#[derive(Debug, Serialize)]
pub(super) struct MessageView {
    id: String,
    sender: String,
    text: String,
    timestamp: i64,
}

impl From<StoredMessage> for MessageView {
    fn from(m: StoredMessage) -> Self {
        Self {
            id: m.id.to_string(),
            sender: m.sender,
            text: m.text,
            timestamp: m.timestamp,
        }
    }
}

#[derive(Debug, Deserialize)]
pub(super) struct MessagesRequest {
    channel: ChannelId,
    #[serde(default)]
    update: bool,
}

#[derive(Debug, Serialize)]
pub(super) struct MessagesResponse {
    messages: Vec<MessageView>,
}

pub(super) async fn messages(
    Extension(service): Extension<Arc<Service>>,
    Json(req): Json<MessagesRequest>,
) -> Result<Json<MessagesResponse>> {
    let messages = service.messages(&req.channel, req.update).await?;
    Ok(Json(MessagesResponse {
        messages: messages.into_iter().map(MessageView::from).collect(),
    }))
}

#[derive(Debug, Deserialize)]
pub(super) struct ChannelLeaveRequest {
    channel: ChannelId,
}

pub(super) async fn channel_leave(
    Extension(service): Extension<Arc<Service>>,
    Json(req): Json<ChannelLeaveRequest>,
) -> Result<Json<Empty>> {
    service.leave_channel(&req.channel).await?;
    Ok(Json(Empty {}))
}

#[derive(Debug, Deserialize)]
pub(super) struct ChannelCreateRequest {
    name: String,
    #[serde(default)]
    private: bool,
}

#[derive(Debug, Serialize)]
pub(super) struct ChannelCreateResponse {
    channel: ChannelId,
}

pub(super) async fn channel_create(
    Extension(service): Extension<Arc<Service>>,
    Json(req): Json<ChannelCreateRequest>,
) -> Result<Json<ChannelCreateResponse>> {
    let channel = service.create_channel(&req.name, req.private).await?;
    Ok(Json(ChannelCreateResponse { channel }))
}

#[derive(Debug, Deserialize)]
pub(super) struct MessagePrepareRequest {
    channel: ChannelId,
    text: String,
}

#[derive(Debug, Serialize)]
pub(super) struct MessageResponse {
    message: Option<OutgoingMessage>,
}

pub(super) async fn message_prepare(
    Extension(service): Extension<Arc<Service>>,
    Json(req): Json<MessagePrepareRequest>,
) -> Result<Json<MessageResponse>> {
    let message = service.prepare_message(&req.channel, &req.text).await?;
    Ok(Json(MessageResponse {
        message: Some(message),
    }))
}

#[derive(Debug, Deserialize)]
pub(super) struct MessageSendRequest {
    channel: ChannelId,
    text: String,
    #[serde(default)]
    id: Option<MessageId>,
}

/// `message` is null when the text was a command.
pub(super) async fn message_send(
    Extension(service): Extension<Arc<Service>>,
    Json(req): Json<MessageSendRequest>,
) -> Result<Json<MessageResponse>> {
    let message = service.send_message(&req.channel, &req.text, req.id).await?;
    Ok(Json(MessageResponse { message }))
}
