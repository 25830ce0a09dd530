//! Per-conversation message history
//!
//! A [`ConversationLog`] holds the ordered messages of one conversation.
//! It is insertion-order preserving and append-only, except for the
//! pending-entry removal/replacement performed during optimistic-send
//! reconciliation.

use super::message::ChatMessage;

/// Ordered message history for a single conversation.
///
/// Message ids are unique within a conversation; an append with an id
/// already present is ignored (duplicate delivery guard).
#[derive(Debug, Clone, Default)]
pub struct ConversationLog {
    messages: Vec<ChatMessage>,
}

impl ConversationLog {
    /// Create an empty log.
    pub fn new() -> Self {
        Self { messages: Vec::new() }
    }

    /// Append a message, preserving insertion order.
    ///
    /// Returns `false` if a message with the same id is already present.
    pub fn append(&mut self, message: ChatMessage) -> bool {
        if self.messages.iter().any(|m| m.id == message.id) {
            return false;
        }
        self.messages.push(message);
        true
    }

    /// All messages in insertion order.
    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    /// Remove a message by id.
    ///
    /// Idempotent: returns `false` (and changes nothing) if the id is
    /// absent.
    pub fn remove_by_id(&mut self, message_id: &str) -> bool {
        let before = self.messages.len();
        self.messages.retain(|m| m.id != message_id);
        self.messages.len() != before
    }

    /// Replace the message with `message_id` in place, keeping its
    /// position in the log.
    ///
    /// Used when a pending entry is promoted to confirmed (the id may be
    /// rewritten to the server-assigned one). Returns `false` if the id
    /// is absent.
    pub fn replace(&mut self, message_id: &str, replacement: ChatMessage) -> bool {
        match self.messages.iter_mut().find(|m| m.id == message_id) {
            Some(slot) => {
                *slot = replacement;
                true
            }
            None => false,
        }
    }

    /// Number of messages in the log.
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Whether the log is empty.
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// The most recent message, if any.
    pub fn last_message(&self) -> Option<&ChatMessage> {
        self.messages.last()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ConversationKind;

    fn make_message(id: &str, content: &str) -> ChatMessage {
        ChatMessage::received(id, "u2", content, 1000)
    }

    #[test]
    fn test_append_preserves_order() {
        let mut log = ConversationLog::new();
        log.append(make_message("1", "first"));
        log.append(make_message("2", "second"));
        log.append(make_message("3", "third"));

        let contents: Vec<_> = log.messages().iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["first", "second", "third"]);
    }

    #[test]
    fn test_duplicate_id_ignored() {
        let mut log = ConversationLog::new();
        assert!(log.append(make_message("1", "first")));
        assert!(!log.append(make_message("1", "again")));
        assert_eq!(log.len(), 1);
        assert_eq!(log.messages()[0].content, "first");
    }

    #[test]
    fn test_remove_by_id() {
        let mut log = ConversationLog::new();
        log.append(make_message("1", "first"));
        log.append(make_message("2", "second"));

        assert!(log.remove_by_id("1"));
        assert_eq!(log.len(), 1);
        assert_eq!(log.messages()[0].id, "2");
    }

    #[test]
    fn test_remove_absent_id_is_noop() {
        let mut log = ConversationLog::new();
        log.append(make_message("1", "first"));

        assert!(!log.remove_by_id("nope"));
        assert_eq!(log.len(), 1);

        // Removing twice is also a no-op
        assert!(log.remove_by_id("1"));
        assert!(!log.remove_by_id("1"));
        assert!(log.is_empty());
    }

    #[test]
    fn test_replace_keeps_position() {
        let mut log = ConversationLog::new();
        log.append(make_message("1", "first"));
        let pending = ChatMessage::local_pending("u1", "hi", ConversationKind::Direct, None);
        let temp_id = pending.id.clone();
        log.append(pending.clone());
        log.append(make_message("3", "third"));

        let confirmed = pending.into_confirmed(Some("srv-9".to_string()), None);
        assert!(log.replace(&temp_id, confirmed));

        assert_eq!(log.len(), 3);
        assert_eq!(log.messages()[1].id, "srv-9");
        assert!(!log.messages()[1].is_pending());
    }

    #[test]
    fn test_replace_absent_id_returns_false() {
        let mut log = ConversationLog::new();
        let replacement = make_message("x", "x");
        assert!(!log.replace("missing", replacement));
        assert!(log.is_empty());
    }

    #[test]
    fn test_last_message() {
        let mut log = ConversationLog::new();
        assert!(log.last_message().is_none());
        log.append(make_message("1", "first"));
        log.append(make_message("2", "last"));
        assert_eq!(log.last_message().unwrap().content, "last");
    }
}
