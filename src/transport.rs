// Transport seam for the live channel.
//
// The channel's state machine is written against the `Connector`/`Transport`
// traits so tests can drive it with scripted in-memory transports without
// opening sockets. The production implementation speaks WebSocket via
// tokio-tungstenite.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to connect to {url}: {source}")]
    Connect {
        url: String,
        source: tokio_tungstenite::tungstenite::Error,
    },

    #[error("websocket error: {0}")]
    Ws(#[from] tokio_tungstenite::tungstenite::Error),
}

/// One established bidirectional connection carrying text frames.
#[async_trait]
pub trait Transport: Send {
    /// Send one text frame.
    async fn send(&mut self, text: String) -> Result<(), TransportError>;

    /// Receive the next text frame. `None` means the peer closed the
    /// connection cleanly; an error means it dropped.
    async fn recv(&mut self) -> Option<Result<String, TransportError>>;

    /// Close the connection. Errors are ignored; the connection is going
    /// away either way.
    async fn close(&mut self);
}

/// Establishes a fresh [`Transport`] for every (re)connect attempt.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Transport: Transport + 'static;

    async fn connect(&self) -> Result<Self::Transport, TransportError>;
}

// ---------------------------------------------------------------------------
// WebSocket implementation
// ---------------------------------------------------------------------------

/// Connects to a `ws://`/`wss://` endpoint.
#[derive(Debug, Clone)]
pub struct WsConnector {
    url: String,
}

impl WsConnector {
    pub fn new(url: impl Into<String>) -> Self {
        WsConnector { url: url.into() }
    }
}

#[async_trait]
impl Connector for WsConnector {
    type Transport = WsTransport;

    async fn connect(&self) -> Result<WsTransport, TransportError> {
        let (stream, _response) = tokio_tungstenite::connect_async(self.url.as_str())
            .await
            .map_err(|source| TransportError::Connect {
                url: self.url.clone(),
                source,
            })?;
        debug!("websocket handshake complete with {}", self.url);
        Ok(WsTransport { inner: stream })
    }
}

pub struct WsTransport {
    inner: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl Transport for WsTransport {
    async fn send(&mut self, text: String) -> Result<(), TransportError> {
        self.inner.send(Message::Text(text.into())).await?;
        Ok(())
    }

    async fn recv(&mut self) -> Option<Result<String, TransportError>> {
        while let Some(frame) = self.inner.next().await {
            match frame {
                Ok(Message::Text(text)) => return Some(Ok(text.to_string())),
                Ok(Message::Close(_)) => {
                    debug!("server sent close frame");
                    return None;
                }
                Err(e) => return Some(Err(e.into())),
                _ => {
                    // Ignore Binary, Ping, Pong, Frame variants.
                }
            }
        }
        None
    }

    async fn close(&mut self) {
        if let Err(e) = self.inner.close(None).await {
            warn!("error closing websocket: {e}");
        }
    }
}
