//! Chat message types for display and history
//!
//! This module provides the [`ChatMessage`] struct, the unit stored in
//! conversation logs and published on the message channel.

use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::types::ConversationKind;

/// Where a message originated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageOrigin {
    /// Authored on this client
    Local,
    /// Delivered by the server
    Received,
}

/// Delivery state of a message
///
/// A locally-authored message starts `Pending` (optimistic entry) and is
/// either promoted to `Confirmed` or removed from the log on send failure.
/// Received messages are `Confirmed` from the start. A confirmed message
/// is never mutated again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeliveryState {
    /// Inserted optimistically, awaiting server acknowledgement
    Pending,
    /// Acknowledged by the server (or promoted after the grace window)
    Confirmed,
}

/// A single chat message.
///
/// # Example
///
/// ```
/// use wirechat_core::chat::ChatMessage;
/// use wirechat_core::types::ConversationKind;
///
/// let msg = ChatMessage::local_pending("u1", "hello", ConversationKind::Direct, None);
/// assert!(msg.is_pending());
/// assert!(msg.is_mine());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Unique id within the conversation. A client-generated ULID for
    /// optimistic entries, replaced by the server-confirmed id on
    /// acknowledgement.
    pub id: String,
    /// Sender's user id
    pub sender_id: String,
    /// Message content. Opaque to the engine; any cryptographic transform
    /// happens outside via a content transform collaborator.
    pub content: String,
    /// Unix timestamp in milliseconds
    pub timestamp: i64,
    /// Whether this message was authored locally
    pub origin: MessageOrigin,
    /// Pending vs confirmed
    pub state: DeliveryState,
    /// Direct or group thread
    pub kind: ConversationKind,
    /// Group id when `kind` is `Group`
    pub group_id: Option<String>,
}

impl ChatMessage {
    /// Create an optimistic pending entry for a locally-authored message.
    ///
    /// Generates a temporary ULID id and stamps the current time.
    pub fn local_pending(
        sender_id: impl Into<String>,
        content: impl Into<String>,
        kind: ConversationKind,
        group_id: Option<String>,
    ) -> Self {
        Self {
            id: Ulid::new().to_string(),
            sender_id: sender_id.into(),
            content: content.into(),
            timestamp: chrono::Utc::now().timestamp_millis(),
            origin: MessageOrigin::Local,
            state: DeliveryState::Pending,
            kind,
            group_id,
        }
    }

    /// Create a confirmed message from an inbound delivery.
    pub fn received(
        id: impl Into<String>,
        sender_id: impl Into<String>,
        content: impl Into<String>,
        timestamp: i64,
    ) -> Self {
        Self {
            id: id.into(),
            sender_id: sender_id.into(),
            content: content.into(),
            timestamp,
            origin: MessageOrigin::Received,
            state: DeliveryState::Confirmed,
            kind: ConversationKind::Direct,
            group_id: None,
        }
    }

    /// Promote this pending entry to confirmed.
    ///
    /// When the server acknowledgement carried an id and timestamp they
    /// replace the temporary values; otherwise the optimistic ones stand.
    pub fn into_confirmed(mut self, server_id: Option<String>, server_timestamp: Option<i64>) -> Self {
        if let Some(id) = server_id {
            self.id = id;
        }
        if let Some(ts) = server_timestamp {
            self.timestamp = ts;
        }
        self.state = DeliveryState::Confirmed;
        self
    }

    /// Whether this message was authored locally
    pub fn is_mine(&self) -> bool {
        self.origin == MessageOrigin::Local
    }

    /// Whether this message is still awaiting acknowledgement
    pub fn is_pending(&self) -> bool {
        self.state == DeliveryState::Pending
    }
}
