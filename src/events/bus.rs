//! Event bus for broadcasting room events to WebSocket clients

use super::{Room, RoomBroadcaster, RoomEvent};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::debug;

/// Default broadcast channel capacity
const DEFAULT_CAPACITY: usize = 1024;

/// Event bus that distributes RoomEvents via `tokio::sync::broadcast`
///
/// Every connection subscribes to the single channel and filters by the rooms
/// it has joined. Room membership is counted so publishers can tell whether
/// anyone was listening.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<RoomEvent>,
    members: Arc<DashMap<Room, usize>>,
}

impl EventBus {
    /// Create a new EventBus with the given channel capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            members: Arc::new(DashMap::new()),
        }
    }

    /// Subscribe to receive events (for WebSocket clients)
    pub fn subscribe(&self) -> broadcast::Receiver<RoomEvent> {
        self.sender.subscribe()
    }

    /// Number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Register a listener in `room` until the returned guard is dropped.
    pub fn join(&self, room: Room) -> RoomMembership {
        *self.members.entry(room.clone()).or_insert(0) += 1;
        RoomMembership {
            room,
            members: self.members.clone(),
        }
    }

    /// Listeners currently joined to `room`.
    pub fn member_count(&self, room: &Room) -> usize {
        self.members.get(room).map(|n| *n).unwrap_or(0)
    }
}

impl RoomBroadcaster for EventBus {
    fn broadcast(&self, event: RoomEvent) -> anyhow::Result<usize> {
        let listeners = self.member_count(&event.room);
        let room = event.room.to_string();
        let name = event.event.name();
        match self.sender.send(event) {
            Ok(subscribers) => {
                debug!(room = %room, event = name, listeners, subscribers, "RoomEvent emitted");
                Ok(listeners)
            }
            // No subscribers at all
            Err(_) => Ok(0),
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

/// Membership of one connection in one room.
#[derive(Debug)]
pub struct RoomMembership {
    room: Room,
    members: Arc<DashMap<Room, usize>>,
}

impl RoomMembership {
    pub fn room(&self) -> &Room {
        &self.room
    }
}

impl Drop for RoomMembership {
    fn drop(&mut self) {
        let emptied = match self.members.get_mut(&self.room) {
            Some(mut count) => {
                *count = count.saturating_sub(1);
                *count == 0
            }
            None => false,
        };
        if emptied {
            self.members.remove_if(&self.room, |_, count| *count == 0);
        }
    }
}
