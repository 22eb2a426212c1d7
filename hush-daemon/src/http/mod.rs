//! HTTP endpoints for hushd.
//!
//! RPCs are `POST /rpc/<Method>` with JSON bodies; the relay stream is
//! `GET /rpc/Relay` as server-sent events. Every RPC outside the
//! allow-list needs the session token in the `authorization` header.

mod relay;
mod rpc;

use crate::error::ServiceError;
use crate::service::Service;
use axum::extract::Request;
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use serde::Serialize;
use std::sync::Arc;

/// Build the HTTP router with all endpoints.
pub fn build_router(service: Arc<Service>) -> Router {
    Router::new()
        .route("/rpc/AuthUnlock", post(rpc::auth_unlock))
        .route("/rpc/AuthLock", post(rpc::auth_lock))
        .route("/rpc/AuthStatus", post(rpc::auth_status))
        .route("/rpc/AccountCreate", post(rpc::account_create))
        .route("/rpc/TeamCreate", post(rpc::team_create))
        .route("/rpc/KeyImport", post(rpc::key_import))
        .route("/rpc/Rand", post(rpc::rand))
        .route("/rpc/RandPassword", post(rpc::rand_password))
        .route("/rpc/Channels", post(rpc::channels))
        .route("/rpc/Messages", post(rpc::messages))
        .route("/rpc/ChannelLeave", post(rpc::channel_leave))
        .route("/rpc/ChannelCreate", post(rpc::channel_create))
        .route("/rpc/MessagePrepare", post(rpc::message_prepare))
        .route("/rpc/MessageSend", post(rpc::message_send))
        .route("/rpc/Relay", get(relay::relay_handler))
        .route_layer(middleware::from_fn(require_auth))
        .route("/health", get(health_handler))
        .layer(Extension(service))
}

/// Reject RPCs without a valid session token.
async fn require_auth(
    Extension(service): Extension<Arc<Service>>,
    req: Request,
    next: Next,
) -> Response {
    let method = req.uri().path().rsplit('/').next().unwrap_or_default();
    let token = req
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.strip_prefix("Bearer ").unwrap_or(v));

    match service.authorize(method, token).await {
        Ok(()) => next.run(req).await,
        Err(e) => {
            tracing::info!(method, "Rejected RPC: {}", e);
            e.into_response()
        }
    }
}

/// Health status response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    /// Overall status.
    pub status: String,
    /// Daemon version.
    pub version: String,
    /// Lifecycle state.
    pub state: String,
    /// Whether the trust scheduler is running.
    pub checking: bool,
    /// Whether a relay stream is active.
    pub relay: bool,
}

/// Health check handler.
async fn health_handler(Extension(service): Extension<Arc<Service>>) -> Json<HealthStatus> {
    Json(HealthStatus {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        state: service.status().await.to_string(),
        checking: service.is_checking(),
        relay: service.relay_active(),
    })
}

/// Error body for failed RPCs and the relay stream's final `error` event.
#[derive(Debug, Serialize)]
struct ErrorBody {
    code: &'static str,
    message: String,
}

impl From<&ServiceError> for ErrorBody {
    fn from(err: &ServiceError) -> Self {
        Self {
            code: err.code(),
            message: err.to_string(),
        }
    }
}

impl ServiceError {
    /// HTTP status for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidCredential | Self::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            Self::NotSetUp | Self::AlreadySetUp | Self::Locked => StatusCode::CONFLICT,
            Self::NoAccount | Self::NoTeam | Self::Conflict(_) => StatusCode::CONFLICT,
            Self::TransientNetwork(_) | Self::Remote(_) | Self::Relay(_) => {
                StatusCode::BAD_GATEWAY
            }
            Self::UnknownChannel(_) => StatusCode::NOT_FOUND,
            Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(code = self.code(), "RPC failed: {}", self);
        }
        (status, Json(ErrorBody::from(&self))).into_response()
    }
}
