//! Presence and typing-indicator tracking
//!
//! The [`PresenceTracker`] owns the online-user set and the
//! per-conversation typing sets. Every mutation publishes a wholesale
//! snapshot copy on the event bus, so subscribers never observe a
//! mutating collection.
//!
//! Typing indicators expire: the wire only guarantees a "stopped typing"
//! event on a well-behaved peer, so a client-local timeout clears the
//! indicator as well, whichever comes first. The timer itself is armed by
//! the session read loop; this tracker provides the generation counter
//! that keeps a stale timer from clobbering a newer typing burst.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use crate::events::{EventBus, PresenceSnapshot, TypingSnapshot};
use crate::types::{ConversationId, UserId};

/// How long a typing indicator stays lit without a follow-up event.
pub const TYPING_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(5);

#[derive(Default)]
struct PresenceState {
    online: HashSet<UserId>,
    typing: HashMap<ConversationId, HashSet<UserId>>,
    /// Bumped on every `set_typing` call per (conversation, user); lets
    /// a timeout verify it is still the latest burst before clearing.
    typing_generations: HashMap<(ConversationId, UserId), u64>,
}

/// Tracks who is online and who is typing where.
pub struct PresenceTracker {
    state: RwLock<PresenceState>,
    bus: Arc<EventBus>,
}

impl PresenceTracker {
    /// Create an empty tracker publishing to the given bus.
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self {
            state: RwLock::new(PresenceState::default()),
            bus,
        }
    }

    /// Mark a user online or offline and publish the new online set.
    ///
    /// A call that changes nothing (marking an online user online again)
    /// publishes nothing.
    pub fn set_online(&self, user_id: &UserId, is_online: bool) {
        let snapshot = {
            let mut state = self.state.write();
            let changed = if is_online {
                state.online.insert(user_id.clone())
            } else {
                state.online.remove(user_id)
            };
            if !changed {
                return;
            }
            PresenceSnapshot { online: state.online.clone() }
        };

        debug!(%user_id, is_online, "Presence updated");
        self.bus.publish_presence(snapshot);
    }

    /// Whether a user is currently online.
    pub fn is_online(&self, user_id: &UserId) -> bool {
        self.state.read().online.contains(user_id)
    }

    /// Snapshot copy of the current online set.
    pub fn online_snapshot(&self) -> PresenceSnapshot {
        PresenceSnapshot {
            online: self.state.read().online.clone(),
        }
    }

    /// Update a typing indicator and publish the new typing index.
    ///
    /// Returns the generation token for this burst; pass it to
    /// [`PresenceTracker::clear_typing_if_current`] from the timeout path.
    pub fn set_typing(
        &self,
        conversation_id: &ConversationId,
        user_id: &UserId,
        is_typing: bool,
    ) -> u64 {
        let (generation, snapshot) = {
            let mut state = self.state.write();

            let key = (conversation_id.clone(), user_id.clone());
            let generation = state
                .typing_generations
                .entry(key)
                .and_modify(|g| *g += 1)
                .or_insert(0);
            let generation = *generation;

            let changed = if is_typing {
                state
                    .typing
                    .entry(conversation_id.clone())
                    .or_default()
                    .insert(user_id.clone())
            } else {
                let removed = state
                    .typing
                    .get_mut(conversation_id)
                    .map(|set| set.remove(user_id))
                    .unwrap_or(false);
                state.typing.retain(|_, set| !set.is_empty());
                removed
            };

            if !changed {
                return generation;
            }
            (generation, TypingSnapshot { typing: state.typing.clone() })
        };

        debug!(%conversation_id, %user_id, is_typing, "Typing updated");
        self.bus.publish_typing(snapshot);
        generation
    }

    /// Clear a typing indicator from the timeout path, but only when no
    /// newer `set_typing` call superseded the burst that armed the timer.
    ///
    /// Returns `true` if the indicator was cleared.
    pub fn clear_typing_if_current(
        &self,
        conversation_id: &ConversationId,
        user_id: &UserId,
        generation: u64,
    ) -> bool {
        let snapshot = {
            let mut state = self.state.write();

            let key = (conversation_id.clone(), user_id.clone());
            if state.typing_generations.get(&key) != Some(&generation) {
                return false;
            }

            let removed = state
                .typing
                .get_mut(conversation_id)
                .map(|set| set.remove(user_id))
                .unwrap_or(false);
            if !removed {
                return false;
            }
            state.typing.retain(|_, set| !set.is_empty());
            TypingSnapshot { typing: state.typing.clone() }
        };

        debug!(%conversation_id, %user_id, "Typing indicator expired");
        self.bus.publish_typing(snapshot);
        true
    }

    /// Snapshot copy of the current typing index.
    pub fn typing_snapshot(&self) -> TypingSnapshot {
        TypingSnapshot {
            typing: self.state.read().typing.clone(),
        }
    }

    /// Drop all presence and typing state (engine teardown).
    pub fn clear(&self) {
        *self.state.write() = PresenceState::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker() -> (Arc<EventBus>, PresenceTracker) {
        let bus = Arc::new(EventBus::new());
        let tracker = PresenceTracker::new(bus.clone());
        (bus, tracker)
    }

    #[test]
    fn test_online_then_offline_removes_user() {
        let (_bus, tracker) = tracker();
        let user = UserId::new("u2");

        tracker.set_online(&user, true);
        assert!(tracker.is_online(&user));

        tracker.set_online(&user, false);
        assert!(!tracker.is_online(&user));
        assert!(tracker.online_snapshot().online.is_empty());
    }

    #[tokio::test]
    async fn test_presence_publishes_snapshot_copy() {
        let (bus, tracker) = tracker();
        let mut rx = bus.subscribe_presence();

        tracker.set_online(&UserId::new("u2"), true);
        let snapshot = rx.recv().await.unwrap();
        assert!(snapshot.is_online(&UserId::new("u2")));

        // Later mutation does not alter the snapshot we already hold
        tracker.set_online(&UserId::new("u2"), false);
        assert!(snapshot.is_online(&UserId::new("u2")));
    }

    #[tokio::test]
    async fn test_redundant_presence_update_publishes_nothing() {
        let (bus, tracker) = tracker();
        let user = UserId::new("u2");
        tracker.set_online(&user, true);

        let mut rx = bus.subscribe_presence();
        tracker.set_online(&user, true);
        assert!(rx.try_recv().is_err());

        // Going offline for someone never online is also silent
        tracker.set_online(&UserId::new("ghost"), false);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_typing_set_and_explicit_stop() {
        let (_bus, tracker) = tracker();
        let convo = ConversationId::new("u2");
        let user = UserId::new("u2");

        tracker.set_typing(&convo, &user, true);
        assert!(tracker.typing_snapshot().typing_in(&convo).contains(&user));

        tracker.set_typing(&convo, &user, false);
        assert!(tracker.typing_snapshot().typing_in(&convo).is_empty());
        // Empty conversation entries are pruned
        assert!(tracker.typing_snapshot().typing.is_empty());
    }

    #[test]
    fn test_stale_timeout_does_not_clear_newer_burst() {
        let (_bus, tracker) = tracker();
        let convo = ConversationId::new("u2");
        let user = UserId::new("u2");

        let first = tracker.set_typing(&convo, &user, true);
        // A newer burst arrives before the first timer fires
        let _second = tracker.set_typing(&convo, &user, true);

        assert!(!tracker.clear_typing_if_current(&convo, &user, first));
        assert!(tracker.typing_snapshot().typing_in(&convo).contains(&user));
    }

    #[test]
    fn test_current_timeout_clears_indicator() {
        let (_bus, tracker) = tracker();
        let convo = ConversationId::new("u2");
        let user = UserId::new("u2");

        let generation = tracker.set_typing(&convo, &user, true);
        assert!(tracker.clear_typing_if_current(&convo, &user, generation));
        assert!(tracker.typing_snapshot().typing_in(&convo).is_empty());

        // Firing again is a no-op
        assert!(!tracker.clear_typing_if_current(&convo, &user, generation));
    }

    #[test]
    fn test_typing_isolated_per_conversation() {
        let (_bus, tracker) = tracker();
        let user = UserId::new("u2");

        tracker.set_typing(&ConversationId::new("a"), &user, true);
        tracker.set_typing(&ConversationId::new("b"), &user, true);
        tracker.set_typing(&ConversationId::new("a"), &user, false);

        let snapshot = tracker.typing_snapshot();
        assert!(snapshot.typing_in(&ConversationId::new("a")).is_empty());
        assert!(snapshot.typing_in(&ConversationId::new("b")).contains(&user));
    }

    #[test]
    fn test_clear_resets_everything() {
        let (_bus, tracker) = tracker();
        tracker.set_online(&UserId::new("u2"), true);
        tracker.set_typing(&ConversationId::new("u2"), &UserId::new("u2"), true);

        tracker.clear();
        assert!(tracker.online_snapshot().online.is_empty());
        assert!(tracker.typing_snapshot().typing.is_empty());
    }
}
