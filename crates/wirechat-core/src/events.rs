//! Event bus and engine event types
//!
//! The [`EventBus`] fans inbound state changes out to UI subscribers over
//! independent broadcast channels:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  EventBus                                                       │
//! │  ├── messages:  every message appended or confirmed             │
//! │  ├── presence:  snapshot of the full online set per change      │
//! │  ├── typing:    snapshot of the full typing index per change    │
//! │  ├── receipts:  delivered/read acknowledgements                 │
//! │  └── errors:    server-reported application errors              │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Channel contract:
//!
//! - A subscription receives only events published after it subscribed.
//! - Publishing with zero subscribers is a safe no-op; the event is
//!   dropped, not queued. This engine is not a durable log.
//! - Publishing after a channel was torn down transparently re-creates
//!   the channel rather than failing. Tearing down (see
//!   [`EventBus::reset`]) disconnects existing subscribers.

use std::collections::{HashMap, HashSet};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::chat::ChatMessage;
use crate::types::{ConversationId, UserId};

/// Capacity of each broadcast channel
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// A message appended to a conversation log (or a pending entry promoted
/// to confirmed, republished under its final id).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageEvent {
    /// The conversation the message belongs to
    pub conversation_id: ConversationId,
    /// The message as stored
    pub message: ChatMessage,
}

/// Snapshot of the full online-user set.
///
/// Replaced wholesale on every presence change so subscribers never
/// observe a mutating collection.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PresenceSnapshot {
    /// User ids currently online
    pub online: HashSet<UserId>,
}

impl PresenceSnapshot {
    /// Whether a user is present in this snapshot
    pub fn is_online(&self, user: &UserId) -> bool {
        self.online.contains(user)
    }
}

/// Snapshot of the full typing index.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TypingSnapshot {
    /// Conversation id to the set of users currently typing in it
    pub typing: HashMap<ConversationId, HashSet<UserId>>,
}

impl TypingSnapshot {
    /// Users typing in a conversation (empty set if none)
    pub fn typing_in(&self, conversation: &ConversationId) -> HashSet<UserId> {
        self.typing.get(conversation).cloned().unwrap_or_default()
    }
}

/// Kind of delivery receipt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReceiptKind {
    /// Message reached the recipient's client
    Delivered,
    /// Message was read by the recipient
    Read,
}

/// A delivered/read acknowledgement for a previously sent message.
///
/// Receipts are informational events only; they never mutate stored
/// messages (a confirmed message is immutable).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiptEvent {
    /// Id of the acknowledged message
    pub message_id: String,
    /// The user acknowledging it
    pub user_id: UserId,
    /// Delivered or read
    pub kind: ReceiptKind,
    /// Server timestamp of the receipt, when provided
    pub timestamp: Option<i64>,
}

/// A broadcast channel that is created on first use and transparently
/// re-created after teardown.
///
/// `tokio::sync::broadcast` itself never rejects a publish with zero
/// receivers; what this wrapper adds is the reset-then-reopen lifecycle:
/// after [`LazyChannel::close`], the next publish or subscribe builds a
/// fresh channel instead of erroring.
struct LazyChannel<T> {
    inner: Mutex<Option<broadcast::Sender<T>>>,
}

impl<T: Clone> LazyChannel<T> {
    fn new() -> Self {
        Self { inner: Mutex::new(None) }
    }

    fn sender(&self) -> broadcast::Sender<T> {
        let mut guard = self.inner.lock();
        guard
            .get_or_insert_with(|| broadcast::channel(EVENT_CHANNEL_CAPACITY).0)
            .clone()
    }

    /// Publish a value. Dropped silently when no subscribers exist.
    fn publish(&self, value: T) {
        let _ = self.sender().send(value);
    }

    fn subscribe(&self) -> broadcast::Receiver<T> {
        self.sender().subscribe()
    }

    /// Tear the channel down, disconnecting current subscribers.
    fn close(&self) {
        *self.inner.lock() = None;
    }
}

/// Independently-subscribable broadcast channels for engine events.
pub struct EventBus {
    messages: LazyChannel<MessageEvent>,
    presence: LazyChannel<PresenceSnapshot>,
    typing: LazyChannel<TypingSnapshot>,
    receipts: LazyChannel<ReceiptEvent>,
    errors: LazyChannel<String>,
}

impl EventBus {
    /// Create a bus with all channels unopened (they open lazily).
    pub fn new() -> Self {
        Self {
            messages: LazyChannel::new(),
            presence: LazyChannel::new(),
            typing: LazyChannel::new(),
            receipts: LazyChannel::new(),
            errors: LazyChannel::new(),
        }
    }

    /// Publish a stored message.
    pub fn publish_message(&self, event: MessageEvent) {
        self.messages.publish(event);
    }

    /// Subscribe to stored messages. Only events published after this
    /// call are received.
    pub fn subscribe_messages(&self) -> broadcast::Receiver<MessageEvent> {
        self.messages.subscribe()
    }

    /// Publish an online-set snapshot.
    pub fn publish_presence(&self, snapshot: PresenceSnapshot) {
        self.presence.publish(snapshot);
    }

    /// Subscribe to online-set snapshots.
    pub fn subscribe_presence(&self) -> broadcast::Receiver<PresenceSnapshot> {
        self.presence.subscribe()
    }

    /// Publish a typing-index snapshot.
    pub fn publish_typing(&self, snapshot: TypingSnapshot) {
        self.typing.publish(snapshot);
    }

    /// Subscribe to typing-index snapshots.
    pub fn subscribe_typing(&self) -> broadcast::Receiver<TypingSnapshot> {
        self.typing.subscribe()
    }

    /// Publish a delivery/read receipt.
    pub fn publish_receipt(&self, receipt: ReceiptEvent) {
        self.receipts.publish(receipt);
    }

    /// Subscribe to delivery/read receipts.
    pub fn subscribe_receipts(&self) -> broadcast::Receiver<ReceiptEvent> {
        self.receipts.subscribe()
    }

    /// Publish a server-reported application error.
    pub fn publish_server_error(&self, message: String) {
        self.errors.publish(message);
    }

    /// Subscribe to server-reported application errors.
    pub fn subscribe_server_errors(&self) -> broadcast::Receiver<String> {
        self.errors.subscribe()
    }

    /// Tear down all channels, disconnecting current subscribers.
    ///
    /// The bus remains usable: the next publish or subscribe on any
    /// channel re-creates it.
    pub fn reset(&self) {
        self.messages.close();
        self.presence.close();
        self.typing.close();
        self.receipts.close();
        self.errors.close();
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::broadcast::error::TryRecvError;

    fn sample_event(content: &str) -> MessageEvent {
        MessageEvent {
            conversation_id: ConversationId::new("u2"),
            message: ChatMessage::received("1", "u2", content, 1000),
        }
    }

    #[test]
    fn test_publish_with_no_subscribers_is_noop() {
        let bus = EventBus::new();
        // Must not panic or error
        bus.publish_message(sample_event("dropped"));
        bus.publish_server_error("dropped too".to_string());
    }

    #[tokio::test]
    async fn test_subscriber_sees_events_in_publish_order() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe_messages();

        bus.publish_message(sample_event("one"));
        bus.publish_message(sample_event("two"));

        assert_eq!(rx.recv().await.unwrap().message.content, "one");
        assert_eq!(rx.recv().await.unwrap().message.content, "two");
    }

    #[tokio::test]
    async fn test_no_replay_of_earlier_events() {
        let bus = EventBus::new();
        // Keep one subscriber alive so the early publishes are consumed
        // into a live channel rather than dropped.
        let _early = bus.subscribe_messages();

        bus.publish_message(sample_event("before-1"));
        bus.publish_message(sample_event("before-2"));

        let mut late = bus.subscribe_messages();
        bus.publish_message(sample_event("after"));

        assert_eq!(late.recv().await.unwrap().message.content, "after");
        assert!(matches!(late.try_recv(), Err(TryRecvError::Empty)));
    }

    #[tokio::test]
    async fn test_reset_disconnects_subscribers_and_reopens_lazily() {
        let bus = EventBus::new();
        let mut old = bus.subscribe_messages();

        bus.reset();

        // The old subscription is dead...
        assert!(matches!(old.try_recv(), Err(TryRecvError::Closed)));

        // ...but publishing re-creates the channel instead of failing,
        bus.publish_message(sample_event("into the void"));

        // ...and new subscribers attach to the fresh channel.
        let mut fresh = bus.subscribe_messages();
        bus.publish_message(sample_event("seen"));
        assert_eq!(fresh.recv().await.unwrap().message.content, "seen");
    }

    #[tokio::test]
    async fn test_channels_are_independent() {
        let bus = EventBus::new();
        let mut messages = bus.subscribe_messages();
        let mut presence = bus.subscribe_presence();

        let mut snapshot = PresenceSnapshot::default();
        snapshot.online.insert(UserId::new("u2"));
        bus.publish_presence(snapshot.clone());

        assert_eq!(presence.recv().await.unwrap(), snapshot);
        assert!(matches!(messages.try_recv(), Err(TryRecvError::Empty)));
    }

    #[tokio::test]
    async fn test_every_subscriber_gets_every_event() {
        let bus = EventBus::new();
        let mut a = bus.subscribe_receipts();
        let mut b = bus.subscribe_receipts();

        let receipt = ReceiptEvent {
            message_id: "m1".to_string(),
            user_id: UserId::new("u2"),
            kind: ReceiptKind::Read,
            timestamp: Some(1234),
        };
        bus.publish_receipt(receipt.clone());

        assert_eq!(a.recv().await.unwrap(), receipt);
        assert_eq!(b.recv().await.unwrap(), receipt);
    }

    #[test]
    fn test_typing_snapshot_lookup() {
        let mut snapshot = TypingSnapshot::default();
        snapshot
            .typing
            .entry(ConversationId::new("u2"))
            .or_default()
            .insert(UserId::new("u2"));

        assert_eq!(snapshot.typing_in(&ConversationId::new("u2")).len(), 1);
        assert!(snapshot.typing_in(&ConversationId::new("nobody")).is_empty());
    }
}
