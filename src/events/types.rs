//! Room-scoped chat events for WebSocket delivery

use crate::chat::models::MessageView;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Audience of an event.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Room {
    /// A single visitor's conversation, keyed by `user_id`.
    Visitor(String),
    /// Every connected staff console.
    Admin,
}

impl fmt::Display for Room {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Room::Visitor(id) => write!(f, "visitor:{}", id),
            Room::Admin => f.write_str("admin"),
        }
    }
}

/// Payload pushed to clients, serialized as `{"event": ..., "data": ...}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ChatEvent {
    /// A message was added to the conversation.
    NewMessage(MessageView),
    /// Something changed that the dashboard should refetch.
    AdminUpdate,
}

impl ChatEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ChatEvent::NewMessage(_) => "new_message",
            ChatEvent::AdminUpdate => "admin_update",
        }
    }
}

/// An event addressed to one room.
///
/// Must be Clone for `tokio::sync::broadcast`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomEvent {
    pub room: Room,
    pub event: ChatEvent,
}

impl RoomEvent {
    pub fn new(room: Room, event: ChatEvent) -> Self {
        Self { room, event }
    }

    pub fn new_message(user_id: impl Into<String>, view: MessageView) -> Self {
        Self::new(Room::Visitor(user_id.into()), ChatEvent::NewMessage(view))
    }

    pub fn admin_update() -> Self {
        Self::new(Room::Admin, ChatEvent::AdminUpdate)
    }
}

/// Anything that can fan a [`RoomEvent`] out to listeners.
pub trait RoomBroadcaster: Send + Sync {
    /// Deliver the event. Returns how many listeners were in the room.
    fn broadcast(&self, event: RoomEvent) -> anyhow::Result<usize>;
}
