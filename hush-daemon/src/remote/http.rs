//! JSON-over-HTTP remote client.

use super::{RemoteApi, RemoteError, Scope};
use crate::crypto::ChannelKey;
use async_trait::async_trait;
use hush_types::{
    ChannelDelta, ChannelId, IdentityId, MessageBatch, NewChannel, RelayConfig, RemoteMessage,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;

impl From<reqwest::Error> for RemoteError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            RemoteError::InvalidResponse(e.to_string())
        } else {
            RemoteError::Network(e.to_string())
        }
    }
}

/// Remote API client.
///
/// Routes (JSON bodies):
/// - `GET /scopes/{id}/channels?since=N`
/// - `GET /channels/{id}/messages?since=N` (404 = nothing for this channel)
/// - `GET /relay/{identity}`
/// - `POST /accounts/{id}` (409 = already exists)
/// - `POST /accounts/{account}/teams/{team}`
/// - `POST /scopes/{id}/channels` with a [`NewChannel`]
/// - `POST /channels/{id}/messages` with a [`RemoteMessage`]
pub struct HttpRemote {
    base_url: String,
    http: reqwest::Client,
}

impl HttpRemote {
    /// Create a client for `base_url` with a per-request timeout.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, RemoteError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RemoteError::Network(e.to_string()))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http,
        })
    }

    /// Get the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get<T: DeserializeOwned>(&self, url: &str) -> Result<T, RemoteError> {
        let response = Self::check(self.http.get(url).send().await?).await?;
        Ok(response.json().await?)
    }

    async fn post<B: Serialize + ?Sized>(&self, url: &str, body: &B) -> Result<(), RemoteError> {
        Self::check(self.http.post(url).json(body).send().await?).await?;
        Ok(())
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, RemoteError> {
        match response.status() {
            reqwest::StatusCode::UNAUTHORIZED | reqwest::StatusCode::FORBIDDEN => {
                Err(RemoteError::Unauthorized)
            }
            reqwest::StatusCode::NOT_FOUND => Err(RemoteError::NotFound),
            reqwest::StatusCode::CONFLICT => Err(RemoteError::Conflict),
            status if status.is_server_error() => {
                Err(RemoteError::Network(format!("server returned {}", status)))
            }
            status if !status.is_success() => {
                let body = response.text().await.unwrap_or_default();
                Err(RemoteError::InvalidResponse(format!("{}: {}", status, body)))
            }
            _ => Ok(response),
        }
    }
}

#[async_trait]
impl RemoteApi for HttpRemote {
    async fn fetch_channel_updates(
        &self,
        scope: &Scope,
        since: i64,
    ) -> Result<Vec<ChannelDelta>, RemoteError> {
        let url = format!("{}/scopes/{}/channels?since={}", self.base_url, scope.id, since);
        self.get(&url).await
    }

    async fn fetch_messages(
        &self,
        key: &ChannelKey,
        since: i64,
    ) -> Result<Option<MessageBatch>, RemoteError> {
        let channel = ChannelId::from_key(key.as_bytes());
        let url = format!(
            "{}/channels/{}/messages?since={}",
            self.base_url, channel, since
        );
        match self.get(&url).await {
            Ok(batch) => Ok(Some(batch)),
            Err(RemoteError::NotFound) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn relay_config(&self, identity: &IdentityId) -> Result<RelayConfig, RemoteError> {
        let url = format!("{}/relay/{}", self.base_url, identity);
        self.get(&url).await
    }

    async fn create_account(&self, account: &IdentityId) -> Result<(), RemoteError> {
        let url = format!("{}/accounts/{}", self.base_url, account);
        self.post(&url, &serde_json::json!({})).await
    }

    async fn create_team(
        &self,
        account: &IdentityId,
        team: &IdentityId,
    ) -> Result<(), RemoteError> {
        let url = format!("{}/accounts/{}/teams/{}", self.base_url, account, team);
        self.post(&url, &serde_json::json!({})).await
    }

    async fn create_channel(
        &self,
        scope: &IdentityId,
        channel: &NewChannel,
    ) -> Result<(), RemoteError> {
        let url = format!("{}/scopes/{}/channels", self.base_url, scope);
        self.post(&url, channel).await
    }

    async fn send_message(
        &self,
        key: &ChannelKey,
        message: &RemoteMessage,
    ) -> Result<(), RemoteError> {
        let channel = ChannelId::from_key(key.as_bytes());
        let url = format!("{}/channels/{}/messages", self.base_url, channel);
        self.post(&url, message).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::ScopeKey;
    use axum::extract::{Path, Query};
    use axum::http::StatusCode;
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use hush_types::{ChannelInfo, MessageId, RemoteMessage, ScopeKind};
    use std::collections::HashMap;

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn client(base: &str) -> HttpRemote {
        HttpRemote::new(base, Duration::from_secs(5)).unwrap()
    }

    fn scope() -> Scope {
        Scope {
            id: IdentityId::random(),
            kind: ScopeKind::Team,
            key: ScopeKey::generate().unwrap(),
        }
    }

    #[tokio::test]
    async fn fetches_channel_listing() {
        let scope = scope();
        let sealed = scope.key.seal(&ChannelKey::generate().unwrap()).unwrap();
        let delta = ChannelDelta {
            sealed_key: sealed,
            token: "tok".into(),
            index: 3,
            info: Some(ChannelInfo {
                name: "general".into(),
                description: String::new(),
            }),
        };
        let served = delta.clone();
        let app = Router::new().route(
            "/scopes/:id/channels",
            get(move |Query(q): Query<HashMap<String, String>>| {
                let served = served.clone();
                async move {
                    assert_eq!(q.get("since").map(String::as_str), Some("0"));
                    Json(vec![served])
                }
            }),
        );
        let remote = client(&serve(app).await);

        let deltas = remote.fetch_channel_updates(&scope, 0).await.unwrap();
        assert_eq!(deltas, vec![delta]);
    }

    #[tokio::test]
    async fn fetches_message_page() {
        let key = ChannelKey::generate().unwrap();
        let expected = ChannelId::from_key(key.as_bytes()).to_string();
        let app = Router::new().route(
            "/channels/:id/messages",
            get(move |Path(id): Path<String>| {
                let expected = expected.clone();
                async move {
                    assert_eq!(id, expected);
                    Json(MessageBatch {
                        messages: vec![RemoteMessage {
                            id: MessageId::new("m1"),
                            sender: "alice".into(),
                            text: "hi".into(),
                            timestamp: 1,
                        }],
                        index: 1,
                        truncated: false,
                    })
                }
            }),
        );
        let remote = client(&serve(app).await);

        let batch = remote.fetch_messages(&key, 0).await.unwrap().unwrap();
        assert_eq!(batch.index, 1);
        assert_eq!(batch.messages[0].text, "hi");
    }

    #[tokio::test]
    async fn missing_channel_is_none() {
        let remote = client(&serve(Router::new()).await);
        let batch = remote
            .fetch_messages(&ChannelKey::generate().unwrap(), 0)
            .await
            .unwrap();
        assert!(batch.is_none());
    }

    #[tokio::test]
    async fn status_codes_map_to_errors() {
        let app = Router::new()
            .route("/relay/:id", get(|| async { StatusCode::UNAUTHORIZED }))
            .route(
                "/scopes/:id/channels",
                get(|| async { StatusCode::SERVICE_UNAVAILABLE }),
            );
        let remote = client(&serve(app).await);

        assert!(matches!(
            remote.relay_config(&IdentityId::random()).await,
            Err(RemoteError::Unauthorized)
        ));
        assert!(matches!(
            remote.fetch_channel_updates(&scope(), 0).await,
            Err(RemoteError::Network(_))
        ));
    }

    #[tokio::test]
    async fn posts_message_to_channel() {
        let key = ChannelKey::generate().unwrap();
        let expected = ChannelId::from_key(key.as_bytes()).to_string();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let app = Router::new().route(
            "/channels/:id/messages",
            post(move |Path(id): Path<String>, Json(msg): Json<RemoteMessage>| {
                let tx = tx.clone();
                async move {
                    tx.send((id, msg)).unwrap();
                    StatusCode::CREATED
                }
            }),
        );
        let remote = client(&serve(app).await);

        let message = RemoteMessage {
            id: MessageId::new("m1"),
            sender: "alice".into(),
            text: "hi".into(),
            timestamp: 1,
        };
        remote.send_message(&key, &message).await.unwrap();
        let (id, received) = rx.recv().await.unwrap();
        assert_eq!(id, expected);
        assert_eq!(received, message);
    }

    #[tokio::test]
    async fn existing_account_is_conflict() {
        let app = Router::new().route("/accounts/:id", post(|| async { StatusCode::CONFLICT }));
        let remote = client(&serve(app).await);
        assert!(matches!(
            remote.create_account(&IdentityId::random()).await,
            Err(RemoteError::Conflict)
        ));
    }

    #[tokio::test]
    async fn unreachable_remote_is_network_error() {
        // Bind then drop to get a port nobody listens on.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let remote = client(&format!("http://{}", addr));
        assert!(matches!(
            remote.relay_config(&IdentityId::random()).await,
            Err(RemoteError::Network(_))
        ));
    }
}
