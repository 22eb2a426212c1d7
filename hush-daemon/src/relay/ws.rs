//! WebSocket relay transport.
//!
//! Frames travel as binary MessagePack messages. Websocket-level pings
//! and text messages are skipped.

use super::{RelayConnection, RelayConnector, RelayError};
use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use hush_types::RelayFrame;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Opens websocket relay connections.
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

#[async_trait]
impl RelayConnector for WsConnector {
    async fn connect(&self, url: &str) -> Result<Box<dyn RelayConnection>, RelayError> {
        let (stream, _response) = connect_async(url)
            .await
            .map_err(|e| RelayError::Connect(e.to_string()))?;
        tracing::debug!(url, "Relay websocket connected");
        Ok(Box::new(WsConnection::new(stream)))
    }
}

/// An open websocket to the relay.
pub struct WsConnection {
    sink: Mutex<SplitSink<WsStream, Message>>,
    stream: Mutex<SplitStream<WsStream>>,
}

impl WsConnection {
    fn new(ws: WsStream) -> Self {
        let (sink, stream) = ws.split();
        Self {
            sink: Mutex::new(sink),
            stream: Mutex::new(stream),
        }
    }
}

#[async_trait]
impl RelayConnection for WsConnection {
    async fn send(&self, frame: &RelayFrame) -> Result<(), RelayError> {
        let bytes = frame.to_bytes()?;
        self.sink
            .lock()
            .await
            .send(Message::Binary(bytes))
            .await
            .map_err(|e| RelayError::Send(e.to_string()))
    }

    async fn recv(&self) -> Result<RelayFrame, RelayError> {
        let mut stream = self.stream.lock().await;
        loop {
            match stream.next().await {
                Some(Ok(Message::Binary(bytes))) => return Ok(RelayFrame::from_bytes(&bytes)?),
                Some(Ok(Message::Close(_))) | None => return Err(RelayError::Closed),
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(RelayError::Receive(e.to_string())),
            }
        }
    }

    async fn close(&self) -> Result<(), RelayError> {
        self.sink
            .lock()
            .await
            .close()
            .await
            .map_err(|e| RelayError::Send(e.to_string()))
    }
}
