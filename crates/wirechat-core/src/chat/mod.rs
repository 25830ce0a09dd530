//! Conversation state management
//!
//! This module owns the in-memory message history of every conversation.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  ConversationStore                                              │
//! │  ├── conversation id → ConversationLog                          │
//! │  ├── append: insert + publish on the message channel            │
//! │  └── get: snapshot copy, safe for concurrent observers          │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  ConversationLog: insertion-ordered history of one thread       │
//! │  ChatMessage: single message with origin + delivery state       │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Writes come from the session read loop (inbound deliveries) and the
//! message dispatcher (optimistic entries and their reconciliation).
//! Reads are snapshot copies, so any number of observers can iterate
//! without seeing in-progress mutation.

mod log;
mod message;

pub use log::ConversationLog;
pub use message::{ChatMessage, DeliveryState, MessageOrigin};

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use crate::events::{EventBus, MessageEvent};
use crate::types::ConversationId;

/// In-memory mapping from conversation id to ordered message history.
///
/// Every successful append (and every pending-entry promotion) is
/// published on the event bus's message channel.
pub struct ConversationStore {
    logs: RwLock<HashMap<ConversationId, ConversationLog>>,
    bus: Arc<EventBus>,
}

impl ConversationStore {
    /// Create an empty store publishing to the given bus.
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self {
            logs: RwLock::new(HashMap::new()),
            bus,
        }
    }

    /// Append a message to a conversation, creating the log if absent,
    /// and publish it on the message channel.
    ///
    /// Returns `false` (and publishes nothing) if the conversation
    /// already holds a message with the same id.
    pub fn append(&self, conversation_id: &ConversationId, message: ChatMessage) -> bool {
        let appended = {
            let mut logs = self.logs.write();
            logs.entry(conversation_id.clone())
                .or_default()
                .append(message.clone())
        };

        if appended {
            debug!(%conversation_id, message_id = %message.id, "Message appended");
            self.bus.publish_message(MessageEvent {
                conversation_id: conversation_id.clone(),
                message,
            });
        } else {
            debug!(%conversation_id, message_id = %message.id, "Duplicate message ignored");
        }
        appended
    }

    /// The full ordered history of a conversation, as a snapshot copy.
    ///
    /// Returns an empty vec for an unknown conversation.
    pub fn get(&self, conversation_id: &ConversationId) -> Vec<ChatMessage> {
        self.logs
            .read()
            .get(conversation_id)
            .map(|log| log.messages().to_vec())
            .unwrap_or_default()
    }

    /// Remove a message by id.
    ///
    /// Used only during optimistic-send reconciliation. Idempotent:
    /// an absent conversation or message id is a no-op.
    pub fn remove_by_id(&self, conversation_id: &ConversationId, message_id: &str) -> bool {
        let mut logs = self.logs.write();
        logs.get_mut(conversation_id)
            .map(|log| log.remove_by_id(message_id))
            .unwrap_or(false)
    }

    /// Promote a pending entry to its confirmed form, in place, and
    /// republish it on the message channel so subscribers can reconcile
    /// by id.
    ///
    /// Returns `false` if the pending entry is no longer present (e.g. a
    /// caller cancelled it via [`ConversationStore::remove_by_id`]).
    pub fn resolve_pending(
        &self,
        conversation_id: &ConversationId,
        temp_id: &str,
        confirmed: ChatMessage,
    ) -> bool {
        let replaced = {
            let mut logs = self.logs.write();
            logs.get_mut(conversation_id)
                .map(|log| log.replace(temp_id, confirmed.clone()))
                .unwrap_or(false)
        };

        if replaced {
            debug!(
                %conversation_id,
                temp_id,
                message_id = %confirmed.id,
                "Pending message promoted"
            );
            self.bus.publish_message(MessageEvent {
                conversation_id: conversation_id.clone(),
                message: confirmed,
            });
        }
        replaced
    }

    /// Ids of all conversations with history.
    pub fn conversation_ids(&self) -> Vec<ConversationId> {
        self.logs.read().keys().cloned().collect()
    }

    /// Number of messages stored for a conversation.
    pub fn message_count(&self, conversation_id: &ConversationId) -> usize {
        self.logs
            .read()
            .get(conversation_id)
            .map(ConversationLog::len)
            .unwrap_or(0)
    }

    /// Drop all conversation history (engine teardown).
    pub fn clear(&self) {
        self.logs.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ConversationKind;

    fn store() -> ConversationStore {
        ConversationStore::new(Arc::new(EventBus::new()))
    }

    #[test]
    fn test_append_creates_conversation() {
        let store = store();
        let convo = ConversationId::new("u2");

        assert!(store.get(&convo).is_empty());
        store.append(&convo, ChatMessage::received("1", "u2", "yo", 1000));
        assert_eq!(store.get(&convo).len(), 1);
    }

    #[test]
    fn test_get_returns_append_order() {
        let store = store();
        let convo = ConversationId::new("u2");

        for (i, content) in ["a", "b", "c"].iter().enumerate() {
            store.append(
                &convo,
                ChatMessage::received(format!("{i}"), "u2", *content, 1000 + i as i64),
            );
        }

        let contents: Vec<_> = store.get(&convo).iter().map(|m| m.content.clone()).collect();
        assert_eq!(contents, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_get_is_a_snapshot() {
        let store = store();
        let convo = ConversationId::new("u2");
        store.append(&convo, ChatMessage::received("1", "u2", "yo", 1000));

        let snapshot = store.get(&convo);
        store.append(&convo, ChatMessage::received("2", "u2", "more", 1001));

        // The earlier snapshot is unaffected by later appends
        assert_eq!(snapshot.len(), 1);
        assert_eq!(store.get(&convo).len(), 2);
    }

    #[test]
    fn test_remove_absent_is_noop() {
        let store = store();
        let convo = ConversationId::new("u2");

        // Unknown conversation
        assert!(!store.remove_by_id(&convo, "1"));

        store.append(&convo, ChatMessage::received("1", "u2", "yo", 1000));
        // Unknown message id
        assert!(!store.remove_by_id(&convo, "nope"));
        assert_eq!(store.message_count(&convo), 1);
    }

    #[tokio::test]
    async fn test_append_publishes_on_message_channel() {
        let bus = Arc::new(EventBus::new());
        let store = ConversationStore::new(bus.clone());
        let mut rx = bus.subscribe_messages();

        let convo = ConversationId::new("u2");
        store.append(&convo, ChatMessage::received("5", "u2", "yo", 1000));

        let event = rx.recv().await.unwrap();
        assert_eq!(event.conversation_id, convo);
        assert_eq!(event.message.content, "yo");
        // Exactly one event for one append
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_resolve_pending_republishes() {
        let bus = Arc::new(EventBus::new());
        let store = ConversationStore::new(bus.clone());
        let convo = ConversationId::new("u2");

        let pending = ChatMessage::local_pending("u1", "hi", ConversationKind::Direct, None);
        let temp_id = pending.id.clone();
        store.append(&convo, pending.clone());

        let mut rx = bus.subscribe_messages();
        let confirmed = pending.into_confirmed(Some("srv-1".to_string()), Some(2000));
        assert!(store.resolve_pending(&convo, &temp_id, confirmed));

        let event = rx.recv().await.unwrap();
        assert_eq!(event.message.id, "srv-1");
        assert!(!event.message.is_pending());

        let log = store.get(&convo);
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].id, "srv-1");
    }

    #[test]
    fn test_resolve_pending_after_removal_is_noop() {
        let store = store();
        let convo = ConversationId::new("u2");

        let pending = ChatMessage::local_pending("u1", "hi", ConversationKind::Direct, None);
        let temp_id = pending.id.clone();
        store.append(&convo, pending.clone());
        store.remove_by_id(&convo, &temp_id);

        let confirmed = pending.into_confirmed(None, None);
        assert!(!store.resolve_pending(&convo, &temp_id, confirmed));
        assert!(store.get(&convo).is_empty());
    }

    #[test]
    fn test_clear_drops_all_history() {
        let store = store();
        store.append(&ConversationId::new("u2"), ChatMessage::received("1", "u2", "a", 1));
        store.append(&ConversationId::new("u3"), ChatMessage::received("1", "u3", "b", 2));

        store.clear();
        assert!(store.conversation_ids().is_empty());
        assert!(store.get(&ConversationId::new("u2")).is_empty());
    }
}
