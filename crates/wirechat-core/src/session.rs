//! Session lifecycle and the inbound read loop
//!
//! The [`SessionManager`] owns the one logical connection to the server:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  SessionManager                                                 │
//! │  ├── connect: transport connect → auth handshake → Active       │
//! │  ├── connection task: select! over inbound frames + outbound    │
//! │  │   queue (sole writer to store/presence)                      │
//! │  ├── supervisor: fixed-delay reconnect after failure            │
//! │  └── connectivity: watch channel over ConnectionState           │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Connection states: Disconnected → Connecting → Authenticating →
//! Active, with Reconnecting between attempts after a failure. At most
//! one connection is active at a time; a superseded supervisor notices
//! its stale epoch and exits without touching the new session.
//!
//! Failure semantics: transport errors and orderly closes both route
//! into reconnection (fixed 3 s delay, unbounded retries); a malformed
//! inbound frame is logged and skipped without ending the connection.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tracing::{debug, info, warn};

use crate::chat::{ChatMessage, ConversationStore, MessageOrigin};
use crate::crypto::ContentTransform;
use crate::error::{ChatError, ChatResult};
use crate::events::{EventBus, ReceiptEvent, ReceiptKind};
use crate::presence::{PresenceTracker, TYPING_TIMEOUT};
use crate::protocol::{ClientFrame, ReceiptData, ServerFrame};
use crate::transport::{Transport, TransportConn};
use crate::types::{ConversationId, UserId};

/// Delay between reconnect attempts.
///
/// Flat, with unbounded retries: tolerable for a client the user keeps
/// foregrounded. A production deployment would want bounded exponential
/// backoff with jitter here.
pub const RECONNECT_DELAY: Duration = Duration::from_secs(3);

/// Depth of the outbound write queue.
const OUTBOUND_QUEUE: usize = 64;

/// Capacity of the internal acknowledgement channel.
const ACK_CHANNEL_CAPACITY: usize = 16;

/// Lifecycle state of the logical connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No connection and none being attempted
    Disconnected,
    /// Transport-level connect in progress
    Connecting,
    /// Connected, waiting for `auth_success`
    Authenticating,
    /// Authenticated and serving traffic
    Active,
    /// Lost the connection; retrying after the fixed delay
    Reconnecting,
}

impl ConnectionState {
    /// Whether the session is authenticated and usable.
    pub fn is_active(self) -> bool {
        matches!(self, ConnectionState::Active)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "Disconnected",
            ConnectionState::Connecting => "Connecting",
            ConnectionState::Authenticating => "Authenticating",
            ConnectionState::Active => "Active",
            ConnectionState::Reconnecting => "Reconnecting",
        };
        write!(f, "{s}")
    }
}

/// Acknowledgement of a sent message, surfaced to the dispatcher.
///
/// Fields are absent when the server sent a bare `message_sent`.
#[derive(Debug, Clone)]
pub struct SendAck {
    /// Server-assigned message id
    pub message_id: Option<String>,
    /// Server timestamp in milliseconds
    pub timestamp: Option<i64>,
}

struct OutboundCommand {
    frame: String,
    done: oneshot::Sender<ChatResult<()>>,
}

struct SessionTarget {
    server_url: String,
    user_id: UserId,
}

/// Owns the transport connection lifecycle and translates the wire
/// protocol into store/presence mutations and bus events.
pub struct SessionManager {
    shared: Arc<SessionShared>,
}

struct SessionShared {
    transport: Arc<dyn Transport>,
    store: Arc<ConversationStore>,
    presence: Arc<PresenceTracker>,
    bus: Arc<EventBus>,
    transform: Arc<dyn ContentTransform>,
    state_tx: watch::Sender<ConnectionState>,
    /// Write handle of the current connection task, tagged with its epoch
    outbound: Mutex<Option<(u64, mpsc::Sender<OutboundCommand>)>>,
    ack_tx: broadcast::Sender<SendAck>,
    /// Set by `close`; suppresses reconnection
    shutdown: AtomicBool,
    /// Bumped per `connect`; stale supervisors exit quietly
    epoch: AtomicU64,
    target: Mutex<Option<SessionTarget>>,
}

impl SessionManager {
    /// Create a session manager over the given transport and state.
    pub fn new(
        transport: Arc<dyn Transport>,
        store: Arc<ConversationStore>,
        presence: Arc<PresenceTracker>,
        bus: Arc<EventBus>,
        transform: Arc<dyn ContentTransform>,
    ) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let (ack_tx, _) = broadcast::channel(ACK_CHANNEL_CAPACITY);
        Self {
            shared: Arc::new(SessionShared {
                transport,
                store,
                presence,
                bus,
                transform,
                state_tx,
                outbound: Mutex::new(None),
                ack_tx,
                shutdown: AtomicBool::new(false),
                epoch: AtomicU64::new(0),
                target: Mutex::new(None),
            }),
        }
    }

    /// Connect and authenticate.
    ///
    /// Suspends until authentication succeeds or the attempt fails.
    /// Fails fast with [`ChatError::AlreadyConnected`] when a session is
    /// already established or being established. If the transport-level
    /// connect fails, a reconnect is scheduled and the session reports
    /// Disconnected until the first retry.
    pub async fn connect(&self, server_url: &str, user_id: impl Into<UserId>) -> ChatResult<()> {
        let shared = &self.shared;

        if *shared.state_tx.borrow() != ConnectionState::Disconnected {
            return Err(ChatError::AlreadyConnected);
        }

        shared.shutdown.store(false, Ordering::SeqCst);
        let epoch = shared.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        *shared.target.lock() = Some(SessionTarget {
            server_url: server_url.to_string(),
            user_id: user_id.into(),
        });

        match shared.establish(epoch).await {
            Ok(mut conn) => {
                if !shared.epoch_current(epoch) {
                    // A concurrent connect superseded this one.
                    conn.close().await;
                    return Err(ChatError::AlreadyConnected);
                }
                let out_rx = shared.register_outbound(epoch);
                let shared = Arc::clone(shared);
                tokio::spawn(async move {
                    shared.supervise(epoch, Some((conn, out_rx))).await;
                });
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "Connect failed, scheduling reconnect");
                shared.set_state(ConnectionState::Disconnected);
                let shared = Arc::clone(shared);
                tokio::spawn(async move {
                    shared.supervise(epoch, None).await;
                });
                Err(e)
            }
        }
    }

    /// Serialize a frame and write it to the transport.
    ///
    /// Suspends only for the transport write; acknowledgements arrive
    /// asynchronously via the event channels. Fails with
    /// [`ChatError::NotConnected`] when the session is not Active,
    /// never a silent drop.
    pub async fn send(&self, frame: ClientFrame) -> ChatResult<()> {
        let shared = &self.shared;

        if !shared.state_tx.borrow().is_active() {
            return Err(ChatError::NotConnected);
        }
        let out_tx = shared
            .outbound
            .lock()
            .as_ref()
            .map(|(_, tx)| tx.clone())
            .ok_or(ChatError::NotConnected)?;

        let encoded = frame.encode()?;
        let (done_tx, done_rx) = oneshot::channel();
        out_tx
            .send(OutboundCommand { frame: encoded, done: done_tx })
            .await
            .map_err(|_| ChatError::NotConnected)?;

        done_rx
            .await
            .map_err(|_| ChatError::Transport("connection closed during send".to_string()))?
    }

    /// Close the session and suppress reconnection.
    ///
    /// Idempotent and safe to call when already Disconnected.
    pub fn close(&self) {
        let shared = &self.shared;
        shared.shutdown.store(true, Ordering::SeqCst);
        // Withdrawing the write handle ends the connection task's loop.
        let _ = shared.outbound.lock().take();
        shared.set_state(ConnectionState::Disconnected);
        info!("Session closed");
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.shared.state_tx.borrow()
    }

    /// Whether the session is Active.
    pub fn is_connected(&self) -> bool {
        self.state().is_active()
    }

    /// Observe connection-state transitions (the connectivity signal).
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state_tx.subscribe()
    }

    /// Observe send acknowledgements. Used by the dispatcher's
    /// confirmation wait.
    pub fn subscribe_acks(&self) -> broadcast::Receiver<SendAck> {
        self.shared.ack_tx.subscribe()
    }

    /// The user id this session authenticated (or will authenticate) as.
    pub fn user_id(&self) -> Option<UserId> {
        self.shared.target.lock().as_ref().map(|t| t.user_id.clone())
    }
}

impl SessionShared {
    fn set_state(&self, next: ConnectionState) {
        self.state_tx.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                debug!(from = %current, to = %next, "Connection state changed");
                *current = next;
                true
            }
        });
    }

    fn epoch_current(&self, epoch: u64) -> bool {
        self.epoch.load(Ordering::SeqCst) == epoch
    }

    fn register_outbound(&self, epoch: u64) -> mpsc::Receiver<OutboundCommand> {
        let (tx, rx) = mpsc::channel(OUTBOUND_QUEUE);
        *self.outbound.lock() = Some((epoch, tx));
        rx
    }

    /// Transport connect plus authentication handshake.
    ///
    /// Returns the connection once `auth_success` arrives; the caller
    /// owns wiring it into the read loop.
    async fn establish(&self, epoch: u64) -> ChatResult<Box<dyn TransportConn>> {
        let (server_url, user_id) = {
            let guard = self.target.lock();
            let target = guard
                .as_ref()
                .ok_or_else(|| ChatError::InvalidOperation("no connection target".to_string()))?;
            (target.server_url.clone(), target.user_id.clone())
        };

        self.set_state(ConnectionState::Connecting);
        info!(%server_url, %user_id, "Connecting");

        let mut conn = match self.transport.connect(&server_url).await {
            Ok(conn) => conn,
            Err(e) => return Err(e),
        };

        conn.send(ClientFrame::Auth { user_id: user_id.to_string() }.encode()?)
            .await?;
        self.set_state(ConnectionState::Authenticating);

        loop {
            if !self.epoch_current(epoch) || self.shutdown.load(Ordering::SeqCst) {
                conn.close().await;
                return Err(ChatError::InvalidOperation(
                    "session closed during connect".to_string(),
                ));
            }

            match conn.recv().await {
                Some(Ok(text)) => match ServerFrame::decode(&text) {
                    Ok(ServerFrame::AuthSuccess { .. }) => {
                        self.set_state(ConnectionState::Active);
                        info!(%user_id, "Session active");
                        return Ok(conn);
                    }
                    Ok(ServerFrame::Error { message }) => {
                        conn.close().await;
                        return Err(ChatError::AuthFailed(message));
                    }
                    Ok(_) => debug!("Ignoring frame received before auth_success"),
                    Err(e) => warn!(error = %e, "Skipping malformed frame during handshake"),
                },
                Some(Err(e)) => {
                    conn.close().await;
                    return Err(e);
                }
                None => {
                    return Err(ChatError::Transport(
                        "connection closed during authentication".to_string(),
                    ))
                }
            }
        }
    }

    /// Run the connection until it dies, then reconnect on the fixed
    /// delay until `close` is called or a newer session supersedes this
    /// epoch.
    async fn supervise(
        self: Arc<Self>,
        epoch: u64,
        first: Option<(Box<dyn TransportConn>, mpsc::Receiver<OutboundCommand>)>,
    ) {
        let mut conn = first;
        loop {
            if let Some((active, out_rx)) = conn.take() {
                self.run_connection(epoch, active, out_rx).await;

                if !self.epoch_current(epoch) {
                    return;
                }
                if self.shutdown.load(Ordering::SeqCst) {
                    self.set_state(ConnectionState::Disconnected);
                    return;
                }
                self.set_state(ConnectionState::Reconnecting);
                info!(delay_secs = RECONNECT_DELAY.as_secs(), "Connection lost, scheduling reconnect");
            }

            tokio::time::sleep(RECONNECT_DELAY).await;

            if !self.epoch_current(epoch) {
                return;
            }
            if self.shutdown.load(Ordering::SeqCst) {
                self.set_state(ConnectionState::Disconnected);
                return;
            }

            match self.establish(epoch).await {
                Ok(mut new_conn) => {
                    if !self.epoch_current(epoch) {
                        new_conn.close().await;
                        return;
                    }
                    let out_rx = self.register_outbound(epoch);
                    conn = Some((new_conn, out_rx));
                    info!("Reconnected");
                }
                Err(e) => {
                    warn!(error = %e, "Reconnect attempt failed");
                    self.set_state(ConnectionState::Reconnecting);
                }
            }
        }
    }

    /// The read/write loop for one connection. Sole writer to the
    /// conversation store and presence tracker for inbound events.
    async fn run_connection(
        &self,
        epoch: u64,
        mut conn: Box<dyn TransportConn>,
        mut out_rx: mpsc::Receiver<OutboundCommand>,
    ) {
        debug!("Connection task started");

        loop {
            tokio::select! {
                cmd = out_rx.recv() => match cmd {
                    Some(cmd) => {
                        let result = conn.send(cmd.frame).await;
                        let failed = result.is_err();
                        if let Err(ref e) = result {
                            warn!(error = %e, "Transport write failed");
                        }
                        let _ = cmd.done.send(result);
                        if failed {
                            break;
                        }
                    }
                    // Write handle withdrawn: deliberate close.
                    None => break,
                },
                frame = conn.recv() => match frame {
                    Some(Ok(text)) => self.handle_frame(&text),
                    Some(Err(e)) => {
                        warn!(error = %e, "Transport read failed");
                        break;
                    }
                    None => {
                        info!("Server closed the connection");
                        break;
                    }
                },
            }
        }

        // Withdraw the write handle unless a newer connection already
        // registered its own.
        {
            let mut guard = self.outbound.lock();
            if guard.as_ref().map(|(e, _)| *e) == Some(epoch) {
                *guard = None;
            }
        }
        conn.close().await;
        debug!("Connection task ended");
    }

    /// Decode one inbound frame and apply it.
    ///
    /// Must never terminate the connection: malformed and unrecognized
    /// frames are logged and skipped.
    fn handle_frame(&self, text: &str) {
        let frame = match ServerFrame::decode(text) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "Skipping malformed frame");
                return;
            }
        };

        match frame {
            ServerFrame::AuthSuccess { .. } => {
                debug!("Ignoring duplicate auth_success");
            }
            ServerFrame::Message { data } => {
                let content = self.transform.inbound(&data.content);
                let timestamp = data.timestamp_millis();
                let mut message = ChatMessage::received(
                    data.id,
                    data.sender_id.clone(),
                    content,
                    timestamp,
                );
                if data.is_me {
                    message.origin = MessageOrigin::Local;
                }
                // The wire carries no conversation field; direct
                // deliveries are keyed by their sender.
                let conversation_id = ConversationId::new(data.sender_id);
                self.store.append(&conversation_id, message);
            }
            ServerFrame::Presence { data } => {
                self.presence
                    .set_online(&UserId::new(data.user_id), data.status.is_online());
            }
            ServerFrame::Typing { data } => {
                let conversation_id = ConversationId::new(data.sender_id.clone());
                let user_id = UserId::new(data.sender_id);
                let generation =
                    self.presence
                        .set_typing(&conversation_id, &user_id, data.is_typing);
                if data.is_typing {
                    // Expire the indicator if no follow-up arrives.
                    let presence = Arc::clone(&self.presence);
                    tokio::spawn(async move {
                        tokio::time::sleep(TYPING_TIMEOUT).await;
                        presence.clear_typing_if_current(&conversation_id, &user_id, generation);
                    });
                }
            }
            ServerFrame::MessageSent { data } => {
                let ack = SendAck {
                    message_id: data.as_ref().map(|d| d.message_id.clone()),
                    timestamp: data.as_ref().map(|d| d.timestamp_millis()),
                };
                let _ = self.ack_tx.send(ack);
            }
            ServerFrame::Delivered { data } => self.publish_receipt(data, ReceiptKind::Delivered),
            ServerFrame::Read { data } => self.publish_receipt(data, ReceiptKind::Read),
            ServerFrame::Error { message } => {
                warn!(%message, "Server reported an error");
                self.bus.publish_server_error(message);
            }
            ServerFrame::Unknown => {
                warn!(frame = %text, "Unrecognized frame type, skipping");
            }
        }
    }

    fn publish_receipt(&self, data: ReceiptData, kind: ReceiptKind) {
        self.bus.publish_receipt(ReceiptEvent {
            message_id: data.message_id,
            user_id: UserId::new(data.user_id),
            kind,
            timestamp: data.timestamp.map(|ts| (ts * 1000.0) as i64),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::Passthrough;
    use crate::transport::memory::MemoryTransport;

    fn session_over(transport: Arc<MemoryTransport>) -> SessionManager {
        let bus = Arc::new(EventBus::new());
        let store = Arc::new(ConversationStore::new(bus.clone()));
        let presence = Arc::new(PresenceTracker::new(bus.clone()));
        SessionManager::new(transport, store, presence, bus, Arc::new(Passthrough))
    }

    #[test]
    fn test_connection_state_display() {
        assert_eq!(ConnectionState::Disconnected.to_string(), "Disconnected");
        assert_eq!(ConnectionState::Active.to_string(), "Active");
        assert!(ConnectionState::Active.is_active());
        assert!(!ConnectionState::Reconnecting.is_active());
    }

    #[tokio::test]
    async fn test_send_when_disconnected_is_reported() {
        let (transport, _acceptor) = MemoryTransport::new();
        let session = session_over(transport);

        let err = session
            .send(ClientFrame::Typing { recipient_id: "u2".to_string(), is_typing: true })
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::NotConnected));
    }

    #[tokio::test]
    async fn test_close_when_disconnected_is_idempotent() {
        let (transport, _acceptor) = MemoryTransport::new();
        let session = session_over(transport);

        session.close();
        session.close();
        assert_eq!(session.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_connect_and_authenticate() {
        let (transport, mut acceptor) = MemoryTransport::new();
        let session = session_over(transport);

        let server = tokio::spawn(async move {
            let mut peer = acceptor.accept().await.unwrap();
            peer.accept_auth().await
        });

        session.connect("mem://server", "u1").await.unwrap();
        assert!(session.is_connected());
        assert_eq!(session.user_id(), Some(UserId::new("u1")));
        assert_eq!(server.await.unwrap().as_deref(), Some("u1"));
    }

    #[tokio::test]
    async fn test_second_connect_fails_fast() {
        let (transport, mut acceptor) = MemoryTransport::new();
        let session = session_over(transport);

        tokio::spawn(async move {
            let mut peer = acceptor.accept().await.unwrap();
            peer.accept_auth().await;
            // Hold the connection open
            loop {
                if peer.recv().await.is_none() {
                    break;
                }
            }
        });

        session.connect("mem://server", "u1").await.unwrap();
        let err = session.connect("mem://server", "u1").await.unwrap_err();
        assert!(matches!(err, ChatError::AlreadyConnected));
    }

    #[tokio::test]
    async fn test_auth_rejected_by_error_frame() {
        let (transport, mut acceptor) = MemoryTransport::new();
        let session = session_over(transport);

        tokio::spawn(async move {
            let mut peer = acceptor.accept().await.unwrap();
            // Consume the auth frame, reject it
            let _ = peer.recv().await;
            peer.send(&ServerFrame::Error { message: "Authentication required".to_string() });
            peer
        });

        let err = session.connect("mem://server", "u1").await.unwrap_err();
        assert!(matches!(err, ChatError::AuthFailed(_)));
    }
}
