//! WebSocket endpoint for live chat delivery
//!
//! One connection can join any number of rooms. Frames are JSON
//! `{"event": ..., "data": ...}` in both directions.

use super::handlers::{AppError, ChatState, SendMessageRequest};
use crate::auth::jwt::decode_jwt;
use crate::events::{Room, RoomEvent, RoomMembership};
use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use std::collections::HashMap;
use tokio::sync::broadcast::error::RecvError;
use tokio::time::{interval, Duration};
use tracing::{debug, info, warn};
use uuid::Uuid;

const PING_INTERVAL: Duration = Duration::from_secs(30);

/// Client → server frames
#[derive(Debug, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientFrame {
    JoinRoom { user_id: String },
    JoinAdminRoom { token: String },
    SendMessage(SendMessageRequest),
}

/// Per-connection state: joined rooms and whether staff authenticated.
pub struct WsSession {
    id: Uuid,
    rooms: HashMap<Room, RoomMembership>,
    is_admin: bool,
}

impl WsSession {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            rooms: HashMap::new(),
            is_admin: false,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.is_admin
    }

    /// Whether this connection should see `event`.
    pub fn wants(&self, event: &RoomEvent) -> bool {
        self.rooms.contains_key(&event.room)
    }

    fn join(&mut self, state: &ChatState, room: Room) {
        if !self.rooms.contains_key(&room) {
            debug!(conn = %self.id, room = %room, "Joined room");
            let membership = state.event_bus.join(room.clone());
            self.rooms.insert(room, membership);
        }
    }

    /// Apply one text frame. Returns an `error` frame to send back, if any.
    pub async fn handle_text(&mut self, state: &ChatState, text: &str) -> Option<String> {
        let frame = match serde_json::from_str::<ClientFrame>(text) {
            Ok(frame) => frame,
            Err(e) => return Some(error_frame(&format!("Invalid frame: {}", e))),
        };
        match self.apply(state, frame).await {
            Ok(()) => None,
            Err(e) => {
                debug!(conn = %self.id, "WS frame rejected: {}", e);
                Some(error_frame(&e.to_string()))
            }
        }
    }

    async fn apply(&mut self, state: &ChatState, frame: ClientFrame) -> Result<(), AppError> {
        match frame {
            ClientFrame::JoinRoom { user_id } => {
                if user_id.is_empty() {
                    return Err(AppError::BadRequest("user_id is required".to_string()));
                }
                self.join(state, Room::Visitor(user_id));
            }
            ClientFrame::JoinAdminRoom { token } => {
                let claims = decode_jwt(&token, &state.auth.jwt_secret)
                    .map_err(|e| AppError::Unauthorized(format!("Invalid token: {}", e)))?;
                info!(conn = %self.id, username = %claims.sub, "Admin joined live room");
                self.is_admin = true;
                self.join(state, Room::Admin);
            }
            ClientFrame::SendMessage(req) => {
                req.validate()?;
                if state.store.get_visitor(&req.user_id).await?.is_none() {
                    return Err(AppError::NotFound(format!("Visitor not found: {}", req.user_id)));
                }
                state
                    .relay
                    .publish(&req.user_id, &req.content, req.message_type, self.is_admin)
                    .await?;
                if !self.is_admin {
                    state
                        .responder
                        .respond(&req.user_id, &req.content, req.message_type)
                        .await?;
                }
            }
        }
        Ok(())
    }
}

impl Default for WsSession {
    fn default() -> Self {
        Self::new()
    }
}

fn error_frame(message: &str) -> String {
    serde_json::json!({ "event": "error", "data": { "message": message } }).to_string()
}

/// GET /ws
pub async fn ws_chat(ws: WebSocketUpgrade, State(state): State<ChatState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_ws(socket, state))
}

async fn handle_ws(socket: WebSocket, state: ChatState) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let mut event_rx = state.event_bus.subscribe();
    let mut session = WsSession::new();

    let mut ping_interval = interval(PING_INTERVAL);
    // Skip the first immediate tick
    ping_interval.tick().await;

    debug!(conn = %session.id, "WebSocket client connected");

    loop {
        tokio::select! {
            result = event_rx.recv() => {
                match result {
                    Ok(event) => {
                        if !session.wants(&event) {
                            continue;
                        }
                        match serde_json::to_string(&event.event) {
                            Ok(json) => {
                                if ws_sender.send(Message::Text(json.into())).await.is_err() {
                                    debug!("WebSocket send failed, client disconnected");
                                    break;
                                }
                            }
                            Err(e) => warn!("Failed to serialize ChatEvent: {}", e),
                        }
                    }
                    Err(RecvError::Lagged(n)) => {
                        warn!(conn = %session.id, skipped = n, "WebSocket client lagged, skipping events");
                    }
                    Err(RecvError::Closed) => {
                        debug!("Event bus closed, shutting down WebSocket");
                        break;
                    }
                }
            }

            _ = ping_interval.tick() => {
                if ws_sender.send(Message::Ping(vec![].into())).await.is_err() {
                    debug!("Ping failed, client disconnected");
                    break;
                }
            }

            msg = ws_receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(reply) = session.handle_text(&state, text.as_str()).await {
                            if ws_sender.send(Message::Text(reply.into())).await.is_err() {
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        debug!("WebSocket client disconnected");
                        break;
                    }
                    Some(Err(e)) => {
                        debug!("WebSocket error: {}", e);
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    debug!(conn = %session.id, admin = session.is_admin(), "WebSocket connection closed");
}
