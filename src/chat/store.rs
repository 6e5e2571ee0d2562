//! ChatStore trait definition
//!
//! Abstract interface over everything the chat server persists, so handlers
//! and the relay can be exercised against any backend.

use super::models::*;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Persistence for visitors, conversations, canned replies, admin account and settings.
#[async_trait]
pub trait ChatStore: Send + Sync {
    // ========================================================================
    // Visitors
    // ========================================================================

    /// Insert a visitor. Replaces an existing record with the same id.
    async fn create_visitor(&self, visitor: &Visitor) -> Result<()>;

    async fn get_visitor(&self, user_id: &str) -> Result<Option<Visitor>>;

    async fn list_visitors(&self) -> Result<Vec<Visitor>>;

    /// Returns `false` if the visitor does not exist.
    async fn update_visitor_info(&self, user_id: &str, alias: &str, remark: &str) -> Result<bool>;

    /// Delete a visitor and all their messages. Returns `false` if unknown.
    async fn delete_visitor(&self, user_id: &str) -> Result<bool>;

    // ========================================================================
    // Messages
    // ========================================================================

    /// Persist a message, assigning id and creation time.
    async fn insert_message(&self, message: NewMessage) -> Result<ChatMessage>;

    /// Conversation history ordered by creation time, ties by id.
    async fn list_messages(&self, user_id: &str) -> Result<Vec<ChatMessage>>;

    /// Mark the visitor's own messages read. Returns how many changed.
    async fn mark_visitor_messages_read(&self, user_id: &str) -> Result<usize>;

    /// Visitor-authored messages not yet read by staff.
    async fn unread_count(&self, user_id: &str) -> Result<usize>;

    async fn latest_message_time(&self, user_id: &str) -> Result<Option<DateTime<Utc>>>;

    // ========================================================================
    // Canned content
    // ========================================================================

    /// Auto-replies ordered by `order_index`, ties by id.
    async fn list_auto_replies(&self) -> Result<Vec<AutoReply>>;

    async fn add_auto_reply(
        &self,
        keyword: &str,
        content: &str,
        message_type: MessageType,
        order_index: i32,
    ) -> Result<AutoReply>;

    async fn delete_auto_reply(&self, id: u64) -> Result<bool>;

    /// Common questions ordered by `order_index`, ties by id.
    async fn list_common_questions(&self) -> Result<Vec<CommonQuestion>>;

    async fn add_common_question(
        &self,
        question: &str,
        content: &str,
        message_type: MessageType,
        order_index: i32,
    ) -> Result<CommonQuestion>;

    async fn delete_common_question(&self, id: u64) -> Result<bool>;

    /// Welcome messages ordered by `order_index`, ties by id.
    async fn list_welcome_messages(&self) -> Result<Vec<WelcomeMessage>>;

    async fn add_welcome_message(
        &self,
        content: &str,
        message_type: MessageType,
        order_index: i32,
    ) -> Result<WelcomeMessage>;

    /// Remove and return the welcome message, if it existed.
    async fn delete_welcome_message(&self, id: u64) -> Result<Option<WelcomeMessage>>;

    // ========================================================================
    // Admin account
    // ========================================================================

    async fn get_admin(&self, username: &str) -> Result<Option<AdminAccount>>;

    async fn put_admin(&self, account: AdminAccount) -> Result<()>;

    // ========================================================================
    // Settings
    // ========================================================================

    async fn get_settings(&self) -> Result<Settings>;

    async fn put_settings(&self, settings: Settings) -> Result<()>;

    /// Update one key. Returns `false` for an unknown key.
    async fn update_setting(&self, key: &str, value: &str) -> Result<bool>;
}
