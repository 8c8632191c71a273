//! Transport seam over the gateway connection.
//!
//! The client only ever needs three capabilities: send a text frame,
//! receive the next text frame, close. They are split into sink/stream
//! halves so the frame reader can own the receiving side while callers
//! share the sending side, and so tests can substitute channel-backed
//! fakes for the WebSocket.

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::debug;

/// Transport-level failure.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The connection could not be opened.
    #[error("failed to open gateway connection: {0}")]
    Connect(String),

    /// A frame could not be written.
    #[error("failed to send frame: {0}")]
    Send(String),

    /// The inbound stream failed.
    #[error("failed to receive frame: {0}")]
    Receive(String),
}

/// Sending half of a transport.
#[async_trait]
pub trait TransportSink: Send {
    /// Write one text frame.
    async fn send(&mut self, text: String) -> Result<(), TransportError>;

    /// Close the connection.
    async fn close(&mut self) -> Result<(), TransportError>;
}

/// Receiving half of a transport.
#[async_trait]
pub trait TransportStream: Send {
    /// Next inbound text frame; `None` means the stream ended.
    async fn next(&mut self) -> Option<Result<String, TransportError>>;
}

/// Opens a transport on demand.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open the connection and split it into halves.
    async fn connect(
        &self,
    ) -> Result<(Box<dyn TransportSink>, Box<dyn TransportStream>), TransportError>;
}

// ── WebSocket implementation ────────────────────────────────────────

type WsSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Production connector over `tokio-tungstenite`.
pub struct WsConnector {
    endpoint: String,
    token: Option<String>,
}

impl WsConnector {
    /// Create a connector for the given endpoint.
    #[must_use]
    pub fn new(endpoint: impl Into<String>, token: Option<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            token,
        }
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(
        &self,
    ) -> Result<(Box<dyn TransportSink>, Box<dyn TransportStream>), TransportError> {
        let mut request = self
            .endpoint
            .as_str()
            .into_client_request()
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        if let Some(token) = &self.token {
            let value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|e| TransportError::Connect(e.to_string()))?;
            let _ = request.headers_mut().insert(AUTHORIZATION, value);
        }

        let (socket, _response) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        debug!(endpoint = %self.endpoint, "gateway connection open");

        let (tx, rx) = socket.split();
        Ok((Box::new(WsSink { tx }), Box::new(WsStream { rx })))
    }
}

struct WsSink {
    tx: SplitSink<WsSocket, Message>,
}

#[async_trait]
impl TransportSink for WsSink {
    async fn send(&mut self, text: String) -> Result<(), TransportError> {
        self.tx
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| TransportError::Send(e.to_string()))
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        let _ = self.tx.send(Message::Close(None)).await;
        self.tx
            .close()
            .await
            .map_err(|e| TransportError::Send(e.to_string()))
    }
}

struct WsStream {
    rx: SplitStream<WsSocket>,
}

#[async_trait]
impl TransportStream for WsStream {
    async fn next(&mut self) -> Option<Result<String, TransportError>> {
        loop {
            match self.rx.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(text.to_string())),
                // Some gateways send JSON in binary frames; tolerate UTF-8.
                Ok(Message::Binary(data)) => match std::str::from_utf8(&data) {
                    Ok(s) => return Some(Ok(s.to_owned())),
                    Err(_) => {
                        debug!(len = data.len(), "ignoring non-UTF8 binary frame");
                    }
                },
                Ok(Message::Close(_)) => return None,
                Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => {}
                Err(e) => return Some(Err(TransportError::Receive(e.to_string()))),
            }
        }
    }
}
