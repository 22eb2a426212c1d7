//! Mock relay for testing.
//!
//! Tests push frames into a connection and inspect what the daemon sent.
//! `recv` waits for pushed frames, so a stream stays open until the test
//! disconnects it or cancels the stream.

use super::{RelayConnection, RelayConnector, RelayError};
use async_trait::async_trait;
use hush_types::{RelayEvent, RelayFrame};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, Notify};

/// Mock relay connection.
#[derive(Clone)]
pub struct MockRelayConnection {
    inner: Arc<Mutex<MockConnectionInner>>,
    incoming: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<Result<RelayFrame, String>>>>,
    sent_notify: Arc<Notify>,
}

struct MockConnectionInner {
    incoming_tx: Option<mpsc::UnboundedSender<Result<RelayFrame, String>>>,
    sent: Vec<RelayFrame>,
    closed: bool,
    fail_next_send: Option<String>,
}

impl Default for MockRelayConnection {
    fn default() -> Self {
        Self::new()
    }
}

impl MockRelayConnection {
    /// Create an open connection with nothing queued.
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(Mutex::new(MockConnectionInner {
                incoming_tx: Some(tx),
                sent: Vec::new(),
                closed: false,
                fail_next_send: None,
            })),
            incoming: Arc::new(tokio::sync::Mutex::new(rx)),
            sent_notify: Arc::new(Notify::new()),
        }
    }

    /// Deliver a frame to the daemon.
    pub fn push_frame(&self, frame: RelayFrame) {
        let inner = self.inner.lock().unwrap();
        if let Some(tx) = &inner.incoming_tx {
            let _ = tx.send(Ok(frame));
        }
    }

    /// Deliver a batch of events.
    pub fn push_events(&self, events: Vec<RelayEvent>) {
        self.push_frame(RelayFrame::Events { events });
    }

    /// Make the next `recv` fail with a read error.
    pub fn push_error(&self, error: &str) {
        let inner = self.inner.lock().unwrap();
        if let Some(tx) = &inner.incoming_tx {
            let _ = tx.send(Err(error.to_string()));
        }
    }

    /// Close the relay side: `recv` reports `Closed` once the queue drains.
    pub fn disconnect(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.incoming_tx = None;
    }

    /// Cause the next send() to fail with the given error.
    pub fn fail_next_send(&self, error: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.fail_next_send = Some(error.to_string());
    }

    /// Every frame the daemon sent, in order.
    pub fn sent_frames(&self) -> Vec<RelayFrame> {
        let inner = self.inner.lock().unwrap();
        inner.sent.clone()
    }

    /// Token sets of every Authorize frame sent, in order.
    pub fn authorizations(&self) -> Vec<Vec<String>> {
        self.sent_frames()
            .into_iter()
            .filter_map(|frame| match frame {
                RelayFrame::Authorize { tokens, .. } => Some(tokens),
                _ => None,
            })
            .collect()
    }

    /// Wait until at least `count` frames have been sent.
    pub async fn wait_for_sent(&self, count: usize) -> Vec<RelayFrame> {
        loop {
            let notified = self.sent_notify.notified();
            let sent = self.sent_frames();
            if sent.len() >= count {
                return sent;
            }
            notified.await;
        }
    }

    /// Check if the daemon closed the connection.
    pub fn is_closed(&self) -> bool {
        let inner = self.inner.lock().unwrap();
        inner.closed
    }
}

#[async_trait]
impl RelayConnection for MockRelayConnection {
    async fn send(&self, frame: &RelayFrame) -> Result<(), RelayError> {
        {
            let mut inner = self.inner.lock().unwrap();
            if inner.closed {
                return Err(RelayError::Closed);
            }
            if let Some(error) = inner.fail_next_send.take() {
                return Err(RelayError::Send(error));
            }
            inner.sent.push(frame.clone());
        }
        self.sent_notify.notify_waiters();
        Ok(())
    }

    async fn recv(&self) -> Result<RelayFrame, RelayError> {
        let mut incoming = self.incoming.lock().await;
        match incoming.recv().await {
            Some(Ok(frame)) => Ok(frame),
            Some(Err(error)) => Err(RelayError::Receive(error)),
            None => Err(RelayError::Closed),
        }
    }

    async fn close(&self) -> Result<(), RelayError> {
        let mut inner = self.inner.lock().unwrap();
        inner.closed = true;
        Ok(())
    }
}

/// Mock connector handing out [`MockRelayConnection`]s.
#[derive(Clone, Default)]
pub struct MockRelayConnector {
    inner: Arc<Mutex<MockConnectorInner>>,
}

#[derive(Default)]
struct MockConnectorInner {
    queued: VecDeque<MockRelayConnection>,
    opened: Vec<(String, MockRelayConnection)>,
    fail_next_connect: Option<String>,
    connect_delay: Option<Duration>,
}

impl MockRelayConnector {
    /// Create a connector. Connections are created on demand.
    pub fn new() -> Self {
        Self::default()
    }

    /// Hand out `connection` on the next connect.
    pub fn queue_connection(&self, connection: MockRelayConnection) {
        let mut inner = self.inner.lock().unwrap();
        inner.queued.push_back(connection);
    }

    /// Cause the next connect() to fail with the given error.
    pub fn fail_next_connect(&self, error: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.fail_next_connect = Some(error.to_string());
    }

    /// Make every connect() wait `delay` before answering.
    pub fn set_connect_delay(&self, delay: Duration) {
        let mut inner = self.inner.lock().unwrap();
        inner.connect_delay = Some(delay);
    }

    /// URLs connected to, in order.
    pub fn connected_urls(&self) -> Vec<String> {
        let inner = self.inner.lock().unwrap();
        inner.opened.iter().map(|(url, _)| url.clone()).collect()
    }

    /// Connections handed out, in order.
    pub fn connections(&self) -> Vec<MockRelayConnection> {
        let inner = self.inner.lock().unwrap();
        inner.opened.iter().map(|(_, conn)| conn.clone()).collect()
    }
}

#[async_trait]
impl RelayConnector for MockRelayConnector {
    async fn connect(&self, url: &str) -> Result<Box<dyn RelayConnection>, RelayError> {
        let delay = self.inner.lock().unwrap().connect_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let mut inner = self.inner.lock().unwrap();
        if let Some(error) = inner.fail_next_connect.take() {
            return Err(RelayError::Connect(error));
        }
        let connection = inner.queued.pop_front().unwrap_or_default();
        inner.opened.push((url.to_string(), connection.clone()));
        Ok(Box::new(connection))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn pushed_frames_arrive_in_order() {
        let conn = MockRelayConnection::new();
        conn.push_frame(RelayFrame::Pong);
        conn.push_events(vec![RelayEvent::Channels]);

        assert_eq!(conn.recv().await.unwrap(), RelayFrame::Pong);
        assert_eq!(
            conn.recv().await.unwrap(),
            RelayFrame::Events {
                events: vec![RelayEvent::Channels]
            }
        );
    }

    #[tokio::test]
    async fn disconnect_ends_recv() {
        let conn = MockRelayConnection::new();
        conn.disconnect();
        assert!(matches!(conn.recv().await, Err(RelayError::Closed)));
    }

    #[tokio::test]
    async fn send_after_close_fails() {
        let conn = MockRelayConnection::new();
        conn.send(&RelayFrame::Ping).await.unwrap();
        conn.close().await.unwrap();
        assert!(matches!(conn.send(&RelayFrame::Ping).await, Err(RelayError::Closed)));
        assert_eq!(conn.sent_frames(), vec![RelayFrame::Ping]);
    }

    #[tokio::test]
    async fn connector_hands_out_queued_connection() {
        let connector = MockRelayConnector::new();
        let conn = MockRelayConnection::new();
        connector.queue_connection(conn.clone());

        let opened = connector.connect("ws://relay").await.unwrap();
        opened.send(&RelayFrame::Ping).await.unwrap();

        assert_eq!(conn.sent_frames(), vec![RelayFrame::Ping]);
        assert_eq!(connector.connected_urls(), vec!["ws://relay"]);
    }

    #[tokio::test]
    async fn connector_failure() {
        let connector = MockRelayConnector::new();
        connector.fail_next_connect("refused");
        assert!(matches!(
            connector.connect("ws://relay").await,
            Err(RelayError::Connect(_))
        ));
        assert!(connector.connect("ws://relay").await.is_ok());
    }
}
