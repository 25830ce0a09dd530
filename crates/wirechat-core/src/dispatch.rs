//! Optimistic message sending and reconciliation
//!
//! The [`MessageDispatcher`] is what a chat screen calls to send. Per
//! attempt it walks: optimistic pending entry in the conversation store
//! → transport send → wait for the server acknowledgement → promote the
//! entry to confirmed, or remove it and surface the failure with the
//! original content preserved for retry.
//!
//! One send may be in flight per dispatcher at a time; a second send is
//! rejected outright rather than queued. When no acknowledgement
//! arrives within the grace window the entry is promoted optimistically
//! rather than failing the send.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::chat::{ChatMessage, ConversationStore};
use crate::crypto::ContentTransform;
use crate::error::{ChatError, ChatResult};
use crate::protocol::ClientFrame;
use crate::session::SessionManager;
use crate::types::{ConversationId, ConversationKind};

/// How long to wait for a `message_sent` acknowledgement before
/// promoting the pending entry optimistically.
pub const CONFIRMATION_GRACE: Duration = Duration::from_secs(1);

/// Client-facing send façade with optimistic local insertion.
pub struct MessageDispatcher {
    session: Arc<SessionManager>,
    store: Arc<ConversationStore>,
    transform: Arc<dyn ContentTransform>,
    in_flight: Mutex<bool>,
}

impl MessageDispatcher {
    /// Create a dispatcher over the given session and store.
    pub fn new(
        session: Arc<SessionManager>,
        store: Arc<ConversationStore>,
        transform: Arc<dyn ContentTransform>,
    ) -> Self {
        Self {
            session,
            store,
            transform,
            in_flight: Mutex::new(false),
        }
    }

    /// Send a message to a peer or group.
    ///
    /// Returns the stored message in its confirmed form. See
    /// [`MessageDispatcher::send_message_with_options`] for the error
    /// contract.
    pub async fn send_message(
        &self,
        recipient: &ConversationId,
        content: &str,
        kind: ConversationKind,
    ) -> ChatResult<ChatMessage> {
        self.send_message_with_options(recipient, content, kind, None)
            .await
    }

    /// Send a message, optionally with a server-side self-destruct
    /// timer (passed through opaquely).
    ///
    /// # Errors
    ///
    /// - [`ChatError::SendInFlight`] when another send on this
    ///   dispatcher has not resolved yet (no queueing).
    /// - [`ChatError::NotConnected`] when the session is not Active; no
    ///   optimistic entry is retained in that case.
    /// - [`ChatError::SendFailed`] when the transport write fails after
    ///   the optimistic entry was inserted; the entry is removed and the
    ///   original content travels in the error for retry.
    pub async fn send_message_with_options(
        &self,
        recipient: &ConversationId,
        content: &str,
        kind: ConversationKind,
        self_destruct_seconds: Option<u64>,
    ) -> ChatResult<ChatMessage> {
        {
            let mut in_flight = self.in_flight.lock();
            if *in_flight {
                return Err(ChatError::SendInFlight);
            }
            *in_flight = true;
        }

        let result = self
            .send_inner(recipient, content, kind, self_destruct_seconds)
            .await;
        *self.in_flight.lock() = false;
        result
    }

    async fn send_inner(
        &self,
        recipient: &ConversationId,
        content: &str,
        kind: ConversationKind,
        self_destruct_seconds: Option<u64>,
    ) -> ChatResult<ChatMessage> {
        // Fail before inserting anything when there is no session.
        if !self.session.is_connected() {
            return Err(ChatError::NotConnected);
        }
        let sender = self.session.user_id().ok_or(ChatError::NotConnected)?;

        // Subscribe before sending so the acknowledgement cannot slip
        // past between the write and the wait.
        let mut acks = self.session.subscribe_acks();

        let group_id = kind.is_group().then(|| recipient.as_str().to_string());
        let pending = ChatMessage::local_pending(sender.as_str(), content, kind, group_id);
        let temp_id = pending.id.clone();
        self.store.append(recipient, pending.clone());

        let frame = ClientFrame::SendMessage {
            recipient_id: recipient.as_str().to_string(),
            content: self.transform.outbound(content),
            is_group: kind.is_group(),
            self_destruct_seconds,
        };

        if let Err(e) = self.session.send(frame).await {
            self.store.remove_by_id(recipient, &temp_id);
            warn!(error = %e, "Send failed, optimistic entry removed");
            return Err(ChatError::SendFailed {
                content: content.to_string(),
                reason: e.to_string(),
            });
        }

        let (server_id, server_timestamp) =
            match tokio::time::timeout(CONFIRMATION_GRACE, acks.recv()).await {
                Ok(Ok(ack)) => {
                    debug!(message_id = ?ack.message_id, "Send acknowledged");
                    (ack.message_id, ack.timestamp)
                }
                Ok(Err(_)) | Err(_) => {
                    debug!(temp_id, "No confirmation within grace period, promoting optimistically");
                    (None, None)
                }
            };

        let confirmed = pending.into_confirmed(server_id, server_timestamp);
        self.store.resolve_pending(recipient, &temp_id, confirmed.clone());
        Ok(confirmed)
    }

    /// Forward a typing indicator for a conversation.
    pub async fn send_typing(&self, recipient: &ConversationId, is_typing: bool) -> ChatResult<()> {
        self.session
            .send(ClientFrame::Typing {
                recipient_id: recipient.as_str().to_string(),
                is_typing,
            })
            .await
    }

    /// Report a received message as delivered.
    pub async fn mark_delivered(&self, message_id: &str) -> ChatResult<()> {
        self.session
            .send(ClientFrame::Delivered { message_id: message_id.to_string() })
            .await
    }

    /// Report a received message as read.
    pub async fn mark_read(&self, message_id: &str) -> ChatResult<()> {
        self.session
            .send(ClientFrame::Read { message_id: message_id.to_string() })
            .await
    }
}
