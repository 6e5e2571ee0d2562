//! Chat event system for real-time WebSocket notifications
//!
//! This module provides:
//! - `RoomEvent`: a `ChatEvent` addressed to a visitor room or the admin room
//! - `EventBus`: broadcast channel plus room membership counts

mod bus;
mod types;

pub use bus::{EventBus, RoomMembership};
pub use types::{ChatEvent, Room, RoomBroadcaster, RoomEvent};
