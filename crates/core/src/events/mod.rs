//! Topic-addressed event fan-out
//!
//! One broadcast channel carries the global room-list topic and one is
//! created lazily per lobby. Delivery is at-most-once best-effort: a
//! receiver that lags past the channel capacity skips events
//! (`RecvError::Lagged`), and publishing with no subscribers is not an
//! error. Events are published only after the underlying state change
//! has committed.

use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::broadcast;
use uuid::Uuid;

use crate::models::Lobby;

/// Capacity of each topic channel
const TOPIC_CAPACITY: usize = 256;

/// Everything the session layer announces.
///
/// Global topic: `LobbyCreated`, `LobbyUpdated`, `LobbyDeleted`,
/// `LobbyMembershipChanged`. Per-lobby topic: `UserJoined`, `UserLeft`,
/// `UserKicked`, `HostChanged`, `LobbyUpdated`.
#[derive(Debug, Clone)]
pub enum LobbyEvent {
    LobbyCreated(Lobby),
    LobbyUpdated(Lobby),
    LobbyDeleted(Uuid),
    LobbyMembershipChanged(Uuid),
    UserJoined { lobby_id: Uuid, user_id: i64 },
    UserLeft { lobby_id: Uuid, user_id: i64 },
    UserKicked { lobby_id: Uuid, user_id: i64 },
    HostChanged { lobby_id: Uuid, new_host_id: i64 },
}

/// Publish/subscribe hub for lobby state changes
pub struct EventBus {
    global: broadcast::Sender<LobbyEvent>,
    topics: Mutex<HashMap<Uuid, broadcast::Sender<LobbyEvent>>>,
}

impl EventBus {
    pub fn new() -> Self {
        let (global, _) = broadcast::channel(TOPIC_CAPACITY);
        Self {
            global,
            topics: Mutex::new(HashMap::new()),
        }
    }

    /// Subscribe to room-list level changes
    pub fn subscribe_global(&self) -> broadcast::Receiver<LobbyEvent> {
        self.global.subscribe()
    }

    /// Subscribe to a single room's membership changes. The topic is
    /// created on first subscription.
    pub fn subscribe_lobby(&self, lobby_id: Uuid) -> broadcast::Receiver<LobbyEvent> {
        let mut topics = self.lock_topics();
        topics
            .entry(lobby_id)
            .or_insert_with(|| broadcast::channel(TOPIC_CAPACITY).0)
            .subscribe()
    }

    /// Publish to the global topic
    pub fn publish_global(&self, event: LobbyEvent) {
        let _ = self.global.send(event);
    }

    /// Publish to a lobby topic. A topic nobody ever subscribed to
    /// simply drops the event; a topic whose last receiver is gone is
    /// pruned here, so abandoned subscriptions do not accumulate.
    pub fn publish_lobby(&self, lobby_id: Uuid, event: LobbyEvent) {
        let mut topics = self.lock_topics();
        if let Some(sender) = topics.get(&lobby_id) {
            if sender.receiver_count() == 0 {
                topics.remove(&lobby_id);
            } else {
                let _ = sender.send(event);
            }
        }
    }

    /// Number of live per-lobby topics
    pub fn topic_count(&self) -> usize {
        self.lock_topics().len()
    }

    /// Tear down a lobby topic after the room is gone
    pub fn drop_topic(&self, lobby_id: Uuid) {
        self.lock_topics().remove(&lobby_id);
    }

    fn lock_topics(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, broadcast::Sender<LobbyEvent>>> {
        self.topics
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
