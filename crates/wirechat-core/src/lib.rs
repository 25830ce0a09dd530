//! Wirechat Core Library
//!
//! Real-time chat session and state-synchronization engine.
//!
//! ## Overview
//!
//! Wirechat owns a single persistent WebSocket connection to a chat
//! server, authenticates it, multiplexes inbound events (messages,
//! presence, typing indicators, delivery acknowledgements, errors) into
//! independently observable channels, reconnects after failure, and
//! maintains consistent per-conversation message history that UI layers
//! subscribe to without data races.
//!
//! ## Core Principles
//!
//! - **One connection**: at most one Active connection per engine;
//!   reconnection is automatic on a fixed delay
//! - **Snapshot reads**: every published collection is a copy, so
//!   subscribers never observe in-progress mutation
//! - **Nothing is fatal**: transport failures degrade to reconnection,
//!   malformed frames are skipped, server errors are surfaced as events
//!
//! ## Quick Start
//!
//! ```ignore
//! use wirechat_core::ChatEngine;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let engine = ChatEngine::websocket();
//!     let mut messages = engine.subscribe_messages();
//!
//!     engine.connect("ws://localhost:8000/ws", "u1").await?;
//!     engine.send_message(&"u2".into(), "hi").await?;
//!
//!     while let Ok(event) = messages.recv().await {
//!         println!("{}: {}", event.message.sender_id, event.message.content);
//!     }
//!     Ok(())
//! }
//! ```

pub mod chat;
pub mod crypto;
pub mod directory;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod events;
pub mod presence;
pub mod protocol;
pub mod session;
pub mod transport;
pub mod types;

// Re-exports
pub use chat::{ChatMessage, ConversationLog, ConversationStore, DeliveryState, MessageOrigin};
pub use crypto::{ContentTransform, Passthrough};
pub use directory::{StaticDirectory, UserDirectory, UserInfo};
pub use dispatch::{MessageDispatcher, CONFIRMATION_GRACE};
pub use engine::ChatEngine;
pub use error::{ChatError, ChatResult};
pub use events::{
    EventBus, MessageEvent, PresenceSnapshot, ReceiptEvent, ReceiptKind, TypingSnapshot,
};
pub use presence::{PresenceTracker, TYPING_TIMEOUT};
pub use protocol::{ClientFrame, ServerFrame};
pub use session::{ConnectionState, SendAck, SessionManager, RECONNECT_DELAY};
pub use transport::{Transport, TransportConn, WsTransport};
pub use types::{ConversationId, ConversationKind, UserId};
