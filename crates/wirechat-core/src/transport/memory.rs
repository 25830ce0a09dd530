//! In-memory duplex transport
//!
//! Backs the test suite: each `connect` call yields a client connection
//! wired to a [`MemoryPeer`] the test harness drives as the "server".
//! Reconnection shows up as a fresh peer on the acceptor, so tests can
//! observe every connect attempt without sockets or timing games.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::{ChatError, ChatResult};
use crate::protocol::ServerFrame;

use super::{Transport, TransportConn};

/// Transport whose connections terminate in-process.
pub struct MemoryTransport {
    accept_tx: mpsc::UnboundedSender<MemoryPeer>,
    fail_connect: AtomicBool,
    fail_sends: Arc<AtomicBool>,
    connect_attempts: AtomicUsize,
}

impl MemoryTransport {
    /// Create the transport and the acceptor the test drives.
    pub fn new() -> (Arc<Self>, MemoryAcceptor) {
        let (accept_tx, accept_rx) = mpsc::unbounded_channel();
        (
            Arc::new(Self {
                accept_tx,
                fail_connect: AtomicBool::new(false),
                fail_sends: Arc::new(AtomicBool::new(false)),
                connect_attempts: AtomicUsize::new(0),
            }),
            MemoryAcceptor { rx: accept_rx },
        )
    }

    /// Make subsequent `connect` calls fail at the transport level.
    pub fn set_connect_failure(&self, fail: bool) {
        self.fail_connect.store(fail, Ordering::SeqCst);
    }

    /// Make writes on all connections fail at the transport level.
    pub fn set_send_failure(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }

    /// Total `connect` calls observed, including failed ones.
    pub fn connect_attempts(&self) -> usize {
        self.connect_attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn connect(&self, _url: &str) -> ChatResult<Box<dyn TransportConn>> {
        self.connect_attempts.fetch_add(1, Ordering::SeqCst);

        if self.fail_connect.load(Ordering::SeqCst) {
            return Err(ChatError::Transport("connection refused".to_string()));
        }

        let (client_tx, peer_rx) = mpsc::unbounded_channel();
        let (peer_tx, client_rx) = mpsc::unbounded_channel();

        self.accept_tx
            .send(MemoryPeer { tx: peer_tx, rx: peer_rx })
            .map_err(|_| ChatError::Transport("no acceptor listening".to_string()))?;

        Ok(Box::new(MemoryConn {
            tx: Some(client_tx),
            rx: client_rx,
            fail_sends: Arc::clone(&self.fail_sends),
        }))
    }
}

/// Receives one [`MemoryPeer`] per successful connect attempt.
pub struct MemoryAcceptor {
    rx: mpsc::UnboundedReceiver<MemoryPeer>,
}

impl MemoryAcceptor {
    /// Wait for the next connection.
    pub async fn accept(&mut self) -> Option<MemoryPeer> {
        self.rx.recv().await
    }
}

/// The server end of an in-memory connection.
pub struct MemoryPeer {
    tx: mpsc::UnboundedSender<String>,
    rx: mpsc::UnboundedReceiver<String>,
}

impl MemoryPeer {
    /// Next frame sent by the client, or `None` once the client closed.
    pub async fn recv(&mut self) -> Option<String> {
        self.rx.recv().await
    }

    /// Send a raw text frame to the client.
    pub fn send_raw(&self, text: impl Into<String>) {
        let _ = self.tx.send(text.into());
    }

    /// Send a structured frame to the client.
    pub fn send(&self, frame: &ServerFrame) {
        if let Ok(text) = serde_json::to_string(frame) {
            self.send_raw(text);
        }
    }

    /// Read the client's `auth` frame and reply with `auth_success`.
    ///
    /// Returns the authenticated user id, or `None` if the client closed
    /// or sent something other than an auth frame first.
    pub async fn accept_auth(&mut self) -> Option<String> {
        let text = self.recv().await?;
        let value: serde_json::Value = serde_json::from_str(&text).ok()?;
        if value.get("type")?.as_str()? != "auth" {
            return None;
        }
        let user_id = value.get("user_id")?.as_str()?.to_string();
        self.send(&ServerFrame::AuthSuccess { user_id: Some(user_id.clone()) });
        Some(user_id)
    }

    /// Drop the connection, which the client observes as an orderly close.
    pub fn disconnect(self) {}
}

struct MemoryConn {
    tx: Option<mpsc::UnboundedSender<String>>,
    rx: mpsc::UnboundedReceiver<String>,
    fail_sends: Arc<AtomicBool>,
}

#[async_trait]
impl TransportConn for MemoryConn {
    async fn send(&mut self, frame: String) -> ChatResult<()> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(ChatError::Transport("injected write failure".to_string()));
        }
        match &self.tx {
            Some(tx) => tx
                .send(frame)
                .map_err(|_| ChatError::Transport("peer closed".to_string())),
            None => Err(ChatError::Transport("connection closed".to_string())),
        }
    }

    async fn recv(&mut self) -> Option<ChatResult<String>> {
        self.rx.recv().await.map(Ok)
    }

    async fn close(&mut self) {
        self.tx = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_frames_cross_the_pair() {
        let (transport, mut acceptor) = MemoryTransport::new();

        let mut conn = transport.connect("mem://test").await.unwrap();
        let mut peer = acceptor.accept().await.unwrap();

        conn.send("hello server".to_string()).await.unwrap();
        assert_eq!(peer.recv().await.unwrap(), "hello server");

        peer.send_raw("hello client");
        assert_eq!(conn.recv().await.unwrap().unwrap(), "hello client");
    }

    #[tokio::test]
    async fn test_peer_drop_is_orderly_close() {
        let (transport, mut acceptor) = MemoryTransport::new();

        let mut conn = transport.connect("mem://test").await.unwrap();
        let peer = acceptor.accept().await.unwrap();
        peer.disconnect();

        assert!(conn.recv().await.is_none());
        assert!(conn.send("too late".to_string()).await.is_err());
    }

    #[tokio::test]
    async fn test_forced_connect_failure() {
        let (transport, _acceptor) = MemoryTransport::new();
        transport.set_connect_failure(true);

        let err = transport.connect("mem://test").await.err().unwrap();
        assert!(matches!(err, ChatError::Transport(_)));
        assert_eq!(transport.connect_attempts(), 1);

        transport.set_connect_failure(false);
        assert!(transport.connect("mem://test").await.is_ok());
        assert_eq!(transport.connect_attempts(), 2);
    }

    #[tokio::test]
    async fn test_accept_auth_helper() {
        let (transport, mut acceptor) = MemoryTransport::new();

        let mut conn = transport.connect("mem://test").await.unwrap();
        conn.send(r#"{"type":"auth","user_id":"u1"}"#.to_string())
            .await
            .unwrap();

        let mut peer = acceptor.accept().await.unwrap();
        assert_eq!(peer.accept_auth().await.as_deref(), Some("u1"));

        let reply = conn.recv().await.unwrap().unwrap();
        assert!(reply.contains("auth_success"));
    }
}
