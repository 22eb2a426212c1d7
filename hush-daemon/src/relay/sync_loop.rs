//! The relay stream loop.

use super::{RelayConnection, RelayConnector, RelayError, RelayHub, Registration};
use crate::error::{Result, ServiceError};
use crate::reconcile::Reconciler;
use crate::remote::RemoteApi;
use hush_core::{plan_dispatch, DispatchStep, RelayAction, RelayPhase, RelayPhaseEvent};
use hush_types::{RelayEvent, RelayFrame, RelayOutput};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant};
use tokio_util::sync::CancellationToken;

type Batch = std::result::Result<Vec<RelayEvent>, RelayError>;

/// Runs relay streams.
pub struct RelaySync {
    reconciler: Arc<Reconciler>,
    remote: Arc<dyn RemoteApi>,
    connector: Arc<dyn RelayConnector>,
    hub: Arc<RelayHub>,
    ping_interval: Duration,
    event_buffer: usize,
}

impl RelaySync {
    /// Create a relay runner.
    pub fn new(
        reconciler: Arc<Reconciler>,
        remote: Arc<dyn RemoteApi>,
        connector: Arc<dyn RelayConnector>,
        hub: Arc<RelayHub>,
        ping_interval: Duration,
        event_buffer: usize,
    ) -> Self {
        Self {
            reconciler,
            remote,
            connector,
            hub,
            ping_interval,
            event_buffer,
        }
    }

    /// The hub tracking the active stream.
    pub fn hub(&self) -> &Arc<RelayHub> {
        &self.hub
    }

    /// Run one relay stream until it fails, is cancelled, or `output` is
    /// dropped.
    ///
    /// Sends `Connected` once the relay has the token set, then one output
    /// per relay event after the local state for that event is synced.
    /// Always ends with an error; cancellation (including replacement by a
    /// newer stream or a lock) is [`RelayError::Cancelled`].
    pub async fn run(
        &self,
        output: mpsc::Sender<RelayOutput>,
        cancel: CancellationToken,
    ) -> Result<()> {
        let registration = self.hub.register(&cancel);
        let result = self.stream(&registration, output, cancel).await;
        self.hub.unregister(registration.id());
        result
    }

    async fn stream(
        &self,
        registration: &Registration,
        output: mpsc::Sender<RelayOutput>,
        cancel: CancellationToken,
    ) -> Result<()> {
        let (conn, auth) = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(RelayError::Cancelled("cancelled").into()),
            opened = self.open() => opened?,
        };

        let mut stream = Stream {
            sync: self,
            registration,
            phase: RelayPhase::new(),
            conn: Arc::from(conn),
            auth,
            output,
            reader_cancel: cancel.child_token(),
            cancel,
            batches: None,
            close_reason: None,
        };

        let result = stream.drive().await;
        stream.shutdown().await;
        result
    }

    /// Look up the relay for the account and connect to it.
    async fn open(&self) -> Result<(Box<dyn RelayConnection>, String)> {
        let identity = self.reconciler.account().await?;
        let config = self.remote.relay_config(&identity).await?;
        let conn = self.connector.connect(&config.url).await?;
        tracing::info!(url = %config.url, "Relay connected");
        Ok((conn, config.auth))
    }
}

/// State of one running stream.
struct Stream<'a> {
    sync: &'a RelaySync,
    registration: &'a Registration,
    phase: RelayPhase,
    conn: Arc<dyn RelayConnection>,
    auth: String,
    output: mpsc::Sender<RelayOutput>,
    cancel: CancellationToken,
    reader_cancel: CancellationToken,
    batches: Option<mpsc::Receiver<Batch>>,
    close_reason: Option<String>,
}

impl Stream<'_> {
    async fn drive(&mut self) -> Result<()> {
        self.step(RelayPhaseEvent::Connected).await?;
        self.step(RelayPhaseEvent::Authorized).await?;

        let period = self.sync.ping_interval.max(Duration::from_millis(1));
        let mut ping = interval_at(Instant::now() + period, period);

        loop {
            let (event, failure) = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    (RelayPhaseEvent::Cancelled, Some(RelayError::Cancelled("cancelled")))
                }
                _ = self.output.closed() => {
                    (RelayPhaseEvent::Cancelled, Some(RelayError::Cancelled("consumer gone")))
                }
                batch = next_batch(&mut self.batches) => match batch {
                    Some(Ok(events)) => (RelayPhaseEvent::BatchReceived { events }, None),
                    Some(Err(e)) => (RelayPhaseEvent::Failed { error: e.to_string() }, Some(e)),
                    None => (
                        RelayPhaseEvent::Failed { error: "reader stopped".into() },
                        Some(RelayError::Closed),
                    ),
                },
                _ = self.registration.reauthorize_requested() => {
                    (RelayPhaseEvent::TokensChanged, None)
                }
                _ = ping.tick() => (RelayPhaseEvent::PingDue, None),
            };

            self.step(event).await?;
            if let Some(e) = failure {
                return Err(e.into());
            }
        }
    }

    /// Advance the phase and run its actions. An action failure closes
    /// the stream.
    async fn step(&mut self, event: RelayPhaseEvent) -> Result<()> {
        let (next, actions) = std::mem::take(&mut self.phase).on_event(event);
        self.phase = next;

        for action in actions {
            if let Err(e) = self.execute(action).await {
                let (next, _) = std::mem::take(&mut self.phase).on_event(RelayPhaseEvent::Failed {
                    error: e.to_string(),
                });
                self.phase = next;
                self.close_reason = Some(e.to_string());
                return Err(e);
            }
        }
        Ok(())
    }

    async fn execute(&mut self, action: RelayAction) -> Result<()> {
        match action {
            RelayAction::Authorize => self.authorize().await,
            RelayAction::Announce => {
                self.emit(RelayOutput::Connected).await;
                Ok(())
            }
            RelayAction::StartReader => {
                self.start_reader();
                Ok(())
            }
            RelayAction::Dispatch { events } => self.dispatch(&events).await,
            RelayAction::Ping => Ok(self.conn.send(&RelayFrame::Ping).await?),
            RelayAction::Close { reason } => {
                self.close_reason = Some(reason);
                Ok(())
            }
        }
    }

    async fn authorize(&self) -> Result<()> {
        let tokens = self.sync.reconciler.relay_tokens().await?;
        tracing::debug!(tokens = tokens.len(), "Relay authorize");
        self.conn
            .send(&RelayFrame::Authorize {
                auth: self.auth.clone(),
                tokens,
            })
            .await?;
        Ok(())
    }

    fn start_reader(&mut self) {
        let (tx, rx) = mpsc::channel(self.sync.event_buffer.max(1));
        let conn = Arc::clone(&self.conn);
        let cancel = self.reader_cancel.clone();

        tokio::spawn(async move {
            loop {
                let frame = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    frame = conn.recv() => frame,
                };
                let batch = match frame {
                    Ok(RelayFrame::Events { events }) => Ok(events),
                    Ok(RelayFrame::Pong) => continue,
                    Ok(other) => {
                        tracing::debug!(?other, "Ignoring relay frame");
                        continue;
                    }
                    Err(e) => Err(e),
                };
                let failed = batch.is_err();
                if tx.send(batch).await.is_err() || failed {
                    break;
                }
            }
        });

        self.batches = Some(rx);
    }

    /// Sync everything a batch names, then emit its outputs in order.
    async fn dispatch(&self, events: &[RelayEvent]) -> Result<()> {
        let reconciler = &self.sync.reconciler;

        for step in plan_dispatch(events) {
            match step {
                DispatchStep::PullChannel { channel, index } => {
                    match reconciler.pull_if_behind(&channel, index).await {
                        Ok(_) => {}
                        Err(e) => tolerate(e, "Relay pull failed")?,
                    }
                }
                DispatchStep::ResyncChannels => match reconciler.resync_all().await {
                    Ok(report) => tracing::debug!(?report, "Relay resync"),
                    Err(e) => tolerate(e, "Relay resync failed")?,
                },
                DispatchStep::Reauthorize => self.authorize().await?,
                DispatchStep::Emit(out) => self.emit(out).await,
            }
        }
        Ok(())
    }

    /// Forward an output unless the stream is going away.
    async fn emit(&self, out: RelayOutput) {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {}
            result = self.output.send(out) => {
                if result.is_err() {
                    tracing::debug!("Relay consumer gone");
                }
            }
        }
    }

    async fn shutdown(&mut self) {
        self.reader_cancel.cancel();
        if let Err(e) = self.conn.close().await {
            tracing::debug!("Relay close: {}", e);
        }
        tracing::info!(
            reason = self.close_reason.as_deref().unwrap_or("done"),
            "Relay stream closed"
        );
    }
}

/// A sync failure for one event is logged and the stream continues.
/// Storage failures (the store was closed by a lock) end the stream.
fn tolerate(err: ServiceError, context: &str) -> Result<()> {
    match err {
        ServiceError::Storage(_) => Err(err),
        other => {
            tracing::warn!("{}: {}", context, other);
            Ok(())
        }
    }
}

async fn next_batch(batches: &mut Option<mpsc::Receiver<Batch>>) -> Option<Batch> {
    match batches {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
