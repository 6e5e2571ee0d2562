//! Chat domain models: visitors, messages, canned replies, settings

use crate::uploads::{MediaKind, UploadPolicy};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Timestamp format used in every client-facing payload.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

/// Kind of chat message. For `Image`/`Video` the content is a blob name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    #[default]
    Text,
    Image,
    Video,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Text => "text",
            MessageType::Image => "image",
            MessageType::Video => "video",
        }
    }

    pub fn is_media(&self) -> bool {
        !matches!(self, MessageType::Text)
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(MessageType::Text),
            "image" => Ok(MessageType::Image),
            "video" => Ok(MessageType::Video),
            other => Err(format!("unknown message type: {}", other)),
        }
    }
}

impl From<MediaKind> for MessageType {
    fn from(kind: MediaKind) -> Self {
        match kind {
            MediaKind::Image => MessageType::Image,
            MediaKind::Video => MessageType::Video,
        }
    }
}

// ============================================================================
// Persisted entities
// ============================================================================

/// An anonymous site visitor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Visitor {
    pub user_id: String,
    pub alias: String,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub remark: String,
    pub created_at: DateTime<Utc>,
}

impl Visitor {
    pub fn new(user_id: impl Into<String>, ip_address: Option<String>, user_agent: Option<String>) -> Self {
        Self {
            user_id: user_id.into(),
            alias: String::new(),
            ip_address,
            user_agent,
            remark: String::new(),
            created_at: Utc::now(),
        }
    }
}

/// One message in a visitor's conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: u64,
    pub user_id: String,
    pub content: String,
    pub is_admin: bool,
    pub is_read: bool,
    pub message_type: MessageType,
    pub created_at: DateTime<Utc>,
}

/// Message as sent to clients (history and live events).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageView {
    pub content: String,
    pub is_admin: bool,
    pub message_type: MessageType,
    pub created_at: String,
}

impl From<&ChatMessage> for MessageView {
    fn from(msg: &ChatMessage) -> Self {
        Self {
            content: msg.content.clone(),
            is_admin: msg.is_admin,
            message_type: msg.message_type,
            created_at: format_timestamp(&msg.created_at),
        }
    }
}

/// Message about to be persisted; the store assigns id and timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub user_id: String,
    pub content: String,
    pub message_type: MessageType,
    pub is_admin: bool,
}

/// Keyword-triggered canned reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoReply {
    pub id: u64,
    pub keyword: String,
    pub content: String,
    pub message_type: MessageType,
    pub order_index: i32,
}

/// Canned answer to an exact question, also listed on the visitor page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommonQuestion {
    pub id: u64,
    pub question: String,
    pub content: String,
    pub message_type: MessageType,
    pub order_index: i32,
}

/// Greeting seeded into every new conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WelcomeMessage {
    pub id: u64,
    pub content: String,
    pub message_type: MessageType,
    pub order_index: i32,
}

/// Staff account; only the bcrypt hash is kept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdminAccount {
    pub username: String,
    pub password_hash: String,
}

// ============================================================================
// Settings
// ============================================================================

/// Runtime-editable system settings.
///
/// Handlers read one snapshot per request and pass it down.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub allow_user_images: bool,
    pub allow_user_videos: bool,
    pub chat_path: String,
    pub enable_user_agent_filter: bool,
    /// Comma-separated, matched case-insensitively as substrings.
    pub blocked_user_agents: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            allow_user_images: true,
            allow_user_videos: true,
            chat_path: "/".into(),
            enable_user_agent_filter: false,
            blocked_user_agents: "bot,crawler,spider,scraper,python-requests,curl,wget".into(),
        }
    }
}

impl Settings {
    pub const KEYS: [&'static str; 5] = [
        "allow_user_images",
        "allow_user_videos",
        "chat_path",
        "enable_user_agent_filter",
        "blocked_user_agents",
    ];

    /// Set one key from its string form. Booleans are `"true"`, anything else is false.
    /// Returns `false` for an unknown key.
    pub fn set(&mut self, key: &str, value: &str) -> bool {
        let flag = value.trim() == "true";
        match key {
            "allow_user_images" => self.allow_user_images = flag,
            "allow_user_videos" => self.allow_user_videos = flag,
            "chat_path" => self.chat_path = normalize_chat_path(value),
            "enable_user_agent_filter" => self.enable_user_agent_filter = flag,
            "blocked_user_agents" => self.blocked_user_agents = value.to_string(),
            _ => return false,
        }
        true
    }

    /// Trimmed, lower-cased, non-empty blocked keywords.
    pub fn blocked_keywords(&self) -> Vec<String> {
        self.blocked_user_agents
            .split(',')
            .map(|k| k.trim().to_lowercase())
            .filter(|k| !k.is_empty())
            .collect()
    }

    /// Whether the visitor page is served at `path`.
    pub fn serves_path(&self, path: &str) -> bool {
        normalize_chat_path(path) == self.chat_path
    }

    /// Policy for visitor uploads under this snapshot.
    pub fn visitor_upload_policy(&self, allowed_extensions: Arc<HashSet<String>>) -> UploadPolicy {
        UploadPolicy::new(allowed_extensions, self.allow_user_images, self.allow_user_videos)
    }
}

/// Leading slash, no trailing slash except for the root.
pub fn normalize_chat_path(path: &str) -> String {
    let trimmed = path.trim().trim_matches('/');
    format!("/{}", trimmed)
}
