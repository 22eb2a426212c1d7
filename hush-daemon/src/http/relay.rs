//! Relay stream as server-sent events.

use super::ErrorBody;
use crate::error::{Result, ServiceError};
use crate::relay::RelayError;
use crate::service::Service;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::Extension;
use futures_util::Stream;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;

/// Outputs buffered between the stream task and the HTTP body.
const SSE_BUFFER: usize = 64;

/// `GET /rpc/Relay`: one JSON event per relay output.
///
/// A stream that fails before `connected` is an ordinary error response.
/// Once streaming, the last event is an `error` event carrying the reason
/// the stream ended. The stream task ends when the client disconnects
/// (the receiver is dropped), when a newer stream starts, or when the
/// daemon locks.
pub(super) async fn relay_handler(
    Extension(service): Extension<Arc<Service>>,
) -> Result<Sse<impl Stream<Item = std::result::Result<Event, axum::Error>>>> {
    let (tx, mut rx) = mpsc::channel(SSE_BUFFER);
    let cancel = CancellationToken::new();
    let task = tokio::spawn(async move { service.relay(tx, cancel).await });

    let Some(first) = rx.recv().await else {
        return Err(finished(task).await);
    };

    let outputs = tokio_stream::once(first)
        .chain(ReceiverStream::new(rx))
        .map(|output| Event::default().json_data(output));
    let end = futures_util::stream::once(async move {
        let err = finished(task).await;
        tracing::info!(code = err.code(), "Relay stream ended: {}", err);
        Event::default().event("error").json_data(ErrorBody::from(&err))
    });

    Ok(Sse::new(outputs.chain(end)).keep_alive(KeepAlive::default()))
}

/// The error a relay task ended with.
async fn finished(task: JoinHandle<Result<()>>) -> ServiceError {
    match task.await {
        Ok(Err(e)) => e,
        Ok(Ok(())) => RelayError::Closed.into(),
        Err(e) => {
            tracing::error!("Relay task failed: {}", e);
            RelayError::Closed.into()
        }
    }
}
