//! Transport abstraction and the WebSocket implementation
//!
//! The engine talks to the server through the [`Transport`] /
//! [`TransportConn`] seam: discrete text frames in both directions, an
//! orderly-close signal, and transport errors surfaced as values. The
//! shipped implementation is a WebSocket client ([`WsTransport`]); the
//! test suite runs against the in-memory pair in [`memory`].

pub mod memory;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::Message;
use tracing::debug;

use crate::error::{ChatError, ChatResult};

/// Factory for transport connections.
///
/// One logical connection exists at a time; the session manager calls
/// `connect` again for every (re)connection attempt.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open a new connection to the server.
    async fn connect(&self, url: &str) -> ChatResult<Box<dyn TransportConn>>;
}

/// One open bidirectional connection carrying discrete text frames.
#[async_trait]
pub trait TransportConn: Send {
    /// Write one text frame.
    async fn send(&mut self, frame: String) -> ChatResult<()>;

    /// Read the next text frame.
    ///
    /// `None` means the peer closed the connection in an orderly way;
    /// `Some(Err(_))` is a transport failure. Both end the connection's
    /// useful life.
    async fn recv(&mut self) -> Option<ChatResult<String>>;

    /// Close the connection. Idempotent.
    async fn close(&mut self);
}

/// WebSocket transport over `tokio-tungstenite`.
pub struct WsTransport;

impl WsTransport {
    /// Create the WebSocket transport factory.
    pub fn new() -> Self {
        Self
    }
}

impl Default for WsTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn connect(&self, url: &str) -> ChatResult<Box<dyn TransportConn>> {
        debug!(url, "Opening WebSocket connection");
        let (stream, _response) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| ChatError::Transport(format!("websocket connect failed: {e}")))?;
        Ok(Box::new(WsConn { stream }))
    }
}

struct WsConn {
    stream: tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >,
}

#[async_trait]
impl TransportConn for WsConn {
    async fn send(&mut self, frame: String) -> ChatResult<()> {
        self.stream
            .send(Message::Text(frame.into()))
            .await
            .map_err(|e| ChatError::Transport(format!("websocket send failed: {e}")))
    }

    async fn recv(&mut self) -> Option<ChatResult<String>> {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => return Some(Ok(text.to_string())),
                Some(Ok(Message::Close(_))) => return None,
                // Ping/pong are handled by tungstenite; binary frames are
                // not part of this protocol.
                Some(Ok(other)) => {
                    debug!(?other, "Ignoring non-text websocket frame");
                }
                Some(Err(e)) => {
                    return Some(Err(ChatError::Transport(format!(
                        "websocket receive failed: {e}"
                    ))))
                }
                None => return None,
            }
        }
    }

    async fn close(&mut self) {
        let _ = self.stream.close(None).await;
    }
}
