//! Message relay: persist, then fan out.
//!
//! A message is stored first. Only then is `new_message` pushed to the
//! visitor's room and `admin_update` to the staff room. A failed broadcast is
//! reported in the outcome and never undoes the stored message.

use super::models::{ChatMessage, MessageType, MessageView, NewMessage};
use super::store::ChatStore;
use crate::events::{RoomBroadcaster, RoomEvent};
use anyhow::Result;
use std::sync::Arc;
use tracing::{debug, warn};

/// How the live fan-out went.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// At least one listener was in the visitor or admin room.
    Delivered { listeners: usize },
    /// Broadcast succeeded but nobody was listening.
    NoListeners,
    /// Broadcast failed; the message is still persisted.
    Failed(String),
}

/// Result of [`MessageRelay::publish`].
#[derive(Debug, Clone)]
pub struct PublishOutcome {
    pub message: ChatMessage,
    pub delivery: Delivery,
}

/// Persists chat messages and pushes them to connected clients.
#[derive(Clone)]
pub struct MessageRelay {
    store: Arc<dyn ChatStore>,
    broadcaster: Arc<dyn RoomBroadcaster>,
}

impl MessageRelay {
    pub fn new(store: Arc<dyn ChatStore>, broadcaster: Arc<dyn RoomBroadcaster>) -> Self {
        Self { store, broadcaster }
    }

    /// Persist a message and broadcast it.
    ///
    /// Errors only when persisting fails, in which case nothing is broadcast.
    pub async fn publish(
        &self,
        user_id: &str,
        content: &str,
        message_type: MessageType,
        is_admin: bool,
    ) -> Result<PublishOutcome> {
        let message = self
            .store
            .insert_message(NewMessage {
                user_id: user_id.to_string(),
                content: content.to_string(),
                message_type,
                is_admin,
            })
            .await?;

        let view = MessageView::from(&message);
        let events = [
            RoomEvent::new_message(user_id, view),
            RoomEvent::admin_update(),
        ];

        let mut listeners = 0;
        let mut failures = Vec::new();
        for event in events {
            match self.broadcaster.broadcast(event) {
                Ok(n) => listeners += n,
                Err(e) => failures.push(e.to_string()),
            }
        }

        let delivery = if !failures.is_empty() {
            let reason = failures.join("; ");
            warn!(
                user_id,
                message_id = message.id,
                "Broadcast failed, message kept: {}",
                reason
            );
            Delivery::Failed(reason)
        } else if listeners == 0 {
            Delivery::NoListeners
        } else {
            Delivery::Delivered { listeners }
        };

        debug!(
            user_id,
            message_id = message.id,
            is_admin,
            message_type = %message_type,
            delivery = ?delivery,
            "Message published"
        );

        Ok(PublishOutcome { message, delivery })
    }
}
