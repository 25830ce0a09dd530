//! Main ChatEngine - the primary entry point for wirechat
//!
//! ChatEngine wires ConversationStore, PresenceTracker, EventBus,
//! SessionManager and MessageDispatcher together behind one explicitly
//! constructed object with a well-defined lifecycle. There is no global
//! state: whichever layer needs the engine receives it by reference.
//!
//! # Example
//!
//! ```ignore
//! use wirechat_core::ChatEngine;
//!
//! let engine = ChatEngine::websocket();
//!
//! // Observe events before connecting
//! let mut messages = engine.subscribe_messages();
//!
//! engine.connect("ws://localhost:8000/ws", "u1").await?;
//! engine.send_message(&"u2".into(), "hi").await?;
//!
//! while let Ok(event) = messages.recv().await {
//!     println!("{}: {}", event.message.sender_id, event.message.content);
//! }
//! ```

use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::{broadcast, watch};
use tracing::{info, warn};

use crate::chat::{ChatMessage, ConversationStore};
use crate::crypto::{ContentTransform, Passthrough};
use crate::dispatch::MessageDispatcher;
use crate::directory::{UserDirectory, UserInfo};
use crate::error::ChatResult;
use crate::events::{EventBus, MessageEvent, PresenceSnapshot, ReceiptEvent, TypingSnapshot};
use crate::presence::PresenceTracker;
use crate::session::{ConnectionState, SessionManager};
use crate::transport::{Transport, WsTransport};
use crate::types::{ConversationId, ConversationKind, UserId};

/// One chat session engine: store, presence, events, session and
/// dispatch behind a single lifecycle.
pub struct ChatEngine {
    bus: Arc<EventBus>,
    store: Arc<ConversationStore>,
    presence: Arc<PresenceTracker>,
    session: Arc<SessionManager>,
    dispatcher: MessageDispatcher,
    directory: Option<Arc<dyn UserDirectory>>,
    roster: RwLock<Vec<UserInfo>>,
}

impl ChatEngine {
    /// Create an engine over the given transport, with content passed
    /// through untransformed and no user directory.
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self::with_options(transport, Arc::new(Passthrough), None)
    }

    /// Create an engine over the WebSocket transport.
    pub fn websocket() -> Self {
        Self::new(Arc::new(WsTransport::new()))
    }

    /// Create an engine with an explicit content transform and an
    /// optional user directory.
    pub fn with_options(
        transport: Arc<dyn Transport>,
        transform: Arc<dyn ContentTransform>,
        directory: Option<Arc<dyn UserDirectory>>,
    ) -> Self {
        let bus = Arc::new(EventBus::new());
        let store = Arc::new(ConversationStore::new(bus.clone()));
        let presence = Arc::new(PresenceTracker::new(bus.clone()));
        let session = Arc::new(SessionManager::new(
            transport,
            store.clone(),
            presence.clone(),
            bus.clone(),
            transform.clone(),
        ));
        let dispatcher = MessageDispatcher::new(session.clone(), store.clone(), transform);

        Self {
            bus,
            store,
            presence,
            session,
            dispatcher,
            directory,
            roster: RwLock::new(Vec::new()),
        }
    }

    // ═══════════════════════════════════════════════════════════════════
    // Lifecycle
    // ═══════════════════════════════════════════════════════════════════

    /// Connect and authenticate, then seed the roster from the user
    /// directory when one is configured.
    ///
    /// Suspends until authentication succeeds or the attempt fails.
    pub async fn connect(&self, server_url: &str, user_id: impl Into<UserId>) -> ChatResult<()> {
        self.session.connect(server_url, user_id).await?;

        if let Some(ref directory) = self.directory {
            match directory.list_users().await {
                Ok(users) => {
                    info!(count = users.len(), "Roster loaded");
                    *self.roster.write() = users;
                }
                // Roster is a convenience, never a correctness dependency.
                Err(e) => warn!(error = %e, "User directory unavailable"),
            }
        }
        Ok(())
    }

    /// Close the connection, keeping local state. Idempotent.
    pub fn disconnect(&self) {
        self.session.close();
    }

    /// Full logout: close the connection, clear all conversation,
    /// presence and roster state, and reset the event channels.
    ///
    /// The engine remains usable; a fresh `connect` starts clean with no
    /// residual subscribers observing stale data.
    pub fn teardown(&self) {
        self.session.close();
        self.store.clear();
        self.presence.clear();
        self.roster.write().clear();
        self.bus.reset();
        info!("Engine torn down");
    }

    // ═══════════════════════════════════════════════════════════════════
    // Sending
    // ═══════════════════════════════════════════════════════════════════

    /// Send a direct message. See
    /// [`MessageDispatcher::send_message_with_options`] for the error
    /// contract.
    pub async fn send_message(
        &self,
        recipient: &ConversationId,
        content: &str,
    ) -> ChatResult<ChatMessage> {
        self.dispatcher
            .send_message(recipient, content, ConversationKind::Direct)
            .await
    }

    /// Send a message to a group thread.
    pub async fn send_group_message(
        &self,
        group: &ConversationId,
        content: &str,
    ) -> ChatResult<ChatMessage> {
        self.dispatcher
            .send_message(group, content, ConversationKind::Group)
            .await
    }

    /// Forward a typing indicator.
    pub async fn send_typing(&self, recipient: &ConversationId, is_typing: bool) -> ChatResult<()> {
        self.dispatcher.send_typing(recipient, is_typing).await
    }

    /// Report a received message as delivered.
    pub async fn mark_delivered(&self, message_id: &str) -> ChatResult<()> {
        self.dispatcher.mark_delivered(message_id).await
    }

    /// Report a received message as read.
    pub async fn mark_read(&self, message_id: &str) -> ChatResult<()> {
        self.dispatcher.mark_read(message_id).await
    }

    // ═══════════════════════════════════════════════════════════════════
    // State queries (snapshot copies, safe from any task)
    // ═══════════════════════════════════════════════════════════════════

    /// Ordered history of a conversation.
    pub fn conversation(&self, conversation_id: &ConversationId) -> Vec<ChatMessage> {
        self.store.get(conversation_id)
    }

    /// Ids of all conversations with history.
    pub fn conversations(&self) -> Vec<ConversationId> {
        self.store.conversation_ids()
    }

    /// Current online-user snapshot.
    pub fn online_users(&self) -> PresenceSnapshot {
        self.presence.online_snapshot()
    }

    /// Current typing-index snapshot.
    pub fn typing_users(&self) -> TypingSnapshot {
        self.presence.typing_snapshot()
    }

    /// The roster loaded at session start (empty without a directory).
    pub fn known_users(&self) -> Vec<UserInfo> {
        self.roster.read().clone()
    }

    /// Current connection state. Always queryable.
    pub fn connection_state(&self) -> ConnectionState {
        self.session.state()
    }

    /// Whether the session is Active.
    pub fn is_connected(&self) -> bool {
        self.session.is_connected()
    }

    // ═══════════════════════════════════════════════════════════════════
    // Subscriptions
    // ═══════════════════════════════════════════════════════════════════

    /// Observe connection-state transitions (the connectivity signal).
    pub fn subscribe_connection(&self) -> watch::Receiver<ConnectionState> {
        self.session.subscribe_state()
    }

    /// Observe stored messages.
    pub fn subscribe_messages(&self) -> broadcast::Receiver<MessageEvent> {
        self.bus.subscribe_messages()
    }

    /// Observe online-set snapshots.
    pub fn subscribe_presence(&self) -> broadcast::Receiver<PresenceSnapshot> {
        self.bus.subscribe_presence()
    }

    /// Observe typing-index snapshots.
    pub fn subscribe_typing(&self) -> broadcast::Receiver<TypingSnapshot> {
        self.bus.subscribe_typing()
    }

    /// Observe delivered/read receipts.
    pub fn subscribe_receipts(&self) -> broadcast::Receiver<ReceiptEvent> {
        self.bus.subscribe_receipts()
    }

    /// Observe server-reported application errors.
    pub fn subscribe_server_errors(&self) -> broadcast::Receiver<String> {
        self.bus.subscribe_server_errors()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::memory::MemoryTransport;

    #[tokio::test]
    async fn test_engine_starts_disconnected_and_empty() {
        let (transport, _acceptor) = MemoryTransport::new();
        let engine = ChatEngine::new(transport);

        assert_eq!(engine.connection_state(), ConnectionState::Disconnected);
        assert!(!engine.is_connected());
        assert!(engine.conversations().is_empty());
        assert!(engine.online_users().online.is_empty());
        assert!(engine.known_users().is_empty());
    }

    #[tokio::test]
    async fn test_teardown_is_safe_when_disconnected() {
        let (transport, _acceptor) = MemoryTransport::new();
        let engine = ChatEngine::new(transport);

        engine.teardown();
        engine.teardown();
        assert_eq!(engine.connection_state(), ConnectionState::Disconnected);
    }
}
