//! Wire protocol frames
//!
//! Each frame is one discrete JSON text message with a `type`
//! discriminator. Inbound frames decode into a closed set of tagged
//! variants with an explicit unrecognized-type fallback, so an unknown
//! frame is skipped rather than killing the read loop.
//!
//! ## Frame Flow
//!
//! ```text
//! Client                            Server
//!   |                                 |
//!   |--- auth {user_id} ------------->|
//!   |<-- auth_success ----------------|
//!   |                                 |
//!   |--- send_message --------------->|
//!   |<-- message_sent {id, ts} -------|   (acknowledgement)
//!   |                                 |
//!   |<-- message {data} --------------|   (inbound delivery)
//!   |<-- presence {user, status} -----|
//!   |<-- typing {sender, flag} -------|
//!   |<-- error {message} -------------|
//! ```
//!
//! Timestamps on the wire are Unix epoch seconds as JSON numbers
//! (fractional); the engine stores milliseconds.

use serde::{Deserialize, Serialize};

use crate::error::{ChatError, ChatResult};

/// Frames sent from client to server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Authentication handshake, first frame on every connection
    Auth {
        /// Our user id
        user_id: String,
    },

    /// Send a chat message
    SendMessage {
        /// Peer user id, or group id when `is_group`
        recipient_id: String,
        /// Opaque message content
        content: String,
        /// Whether the recipient is a group
        is_group: bool,
        /// Server-side self-destruct timer, passed through opaquely
        #[serde(skip_serializing_if = "Option::is_none")]
        self_destruct_seconds: Option<u64>,
    },

    /// Typing indicator for a peer
    Typing {
        /// Peer user id
        recipient_id: String,
        /// Started (true) or stopped (false) typing
        is_typing: bool,
    },

    /// Delivery receipt for a received message
    Delivered {
        /// Id of the received message
        message_id: String,
    },

    /// Read receipt for a received message
    Read {
        /// Id of the received message
        message_id: String,
    },
}

impl ClientFrame {
    /// Serialize to a wire frame.
    pub fn encode(&self) -> ChatResult<String> {
        serde_json::to_string(self).map_err(ChatError::from)
    }
}

/// Payload of an inbound `message` frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageData {
    /// Server-assigned message id
    pub id: String,
    /// Sender's user id
    pub sender_id: String,
    /// Opaque message content
    pub content: String,
    /// Unix epoch seconds (fractional)
    pub timestamp: f64,
    /// Whether this is an echo of our own message
    #[serde(default)]
    pub is_me: bool,
}

impl MessageData {
    /// Wire timestamp converted to milliseconds.
    pub fn timestamp_millis(&self) -> i64 {
        (self.timestamp * 1000.0) as i64
    }
}

/// Payload of an inbound `presence` frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresenceData {
    /// The user whose presence changed
    pub user_id: String,
    /// New status
    pub status: PresenceStatus,
}

/// Wire presence status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    /// User came online
    Online,
    /// User went offline
    Offline,
}

impl PresenceStatus {
    /// Whether this status means online.
    pub fn is_online(self) -> bool {
        matches!(self, PresenceStatus::Online)
    }
}

/// Payload of an inbound `typing` frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypingData {
    /// The user typing (or no longer typing)
    pub sender_id: String,
    /// Started (true) or stopped (false)
    pub is_typing: bool,
}

/// Payload of a `message_sent` acknowledgement.
///
/// Some servers send a bare `message_sent`, others include the assigned
/// id and timestamp, so the whole payload is optional at the frame
/// level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AckData {
    /// Server-assigned id for the message we just sent
    pub message_id: String,
    /// Unix epoch seconds (fractional)
    pub timestamp: f64,
}

impl AckData {
    /// Wire timestamp converted to milliseconds.
    pub fn timestamp_millis(&self) -> i64 {
        (self.timestamp * 1000.0) as i64
    }
}

/// Payload of an inbound `delivered`/`read` receipt frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReceiptData {
    /// Id of the acknowledged message
    pub message_id: String,
    /// The user acknowledging it
    pub user_id: String,
    /// Unix epoch seconds (fractional)
    #[serde(default)]
    pub timestamp: Option<f64>,
}

/// Frames received from the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// Authentication accepted
    AuthSuccess {
        /// Echo of our user id, when the server includes it
        #[serde(default)]
        user_id: Option<String>,
    },

    /// Inbound message delivery
    Message {
        /// Message payload
        data: MessageData,
    },

    /// A user's presence changed
    Presence {
        /// Presence payload
        data: PresenceData,
    },

    /// A user's typing state changed
    Typing {
        /// Typing payload
        data: TypingData,
    },

    /// Acknowledgement for a message we sent
    MessageSent {
        /// Server-assigned id and timestamp, when provided
        #[serde(default)]
        data: Option<AckData>,
    },

    /// A message we sent reached the recipient's client
    Delivered {
        /// Receipt payload
        data: ReceiptData,
    },

    /// A message we sent was read
    Read {
        /// Receipt payload
        data: ReceiptData,
    },

    /// Server-reported application error
    Error {
        /// Human-readable description
        message: String,
    },

    /// Any frame type this client does not recognize.
    ///
    /// Logged and skipped; never fatal to the connection.
    #[serde(other)]
    Unknown,
}

impl ServerFrame {
    /// Decode one wire frame.
    pub fn decode(text: &str) -> ChatResult<Self> {
        serde_json::from_str(text).map_err(|e| ChatError::Protocol(e.to_string()))
    }
}
