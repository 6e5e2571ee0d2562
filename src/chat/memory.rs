//! In-memory ChatStore.
//!
//! State lives in `tokio::sync::RwLock` collections and is rebuilt from the
//! default seed on every start.

use super::models::*;
use super::store::ChatStore;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;

/// Chat store backed by process memory.
pub struct MemoryChatStore {
    visitors: RwLock<HashMap<String, Visitor>>,
    messages: RwLock<Vec<ChatMessage>>,
    auto_replies: RwLock<Vec<AutoReply>>,
    common_questions: RwLock<Vec<CommonQuestion>>,
    welcome_messages: RwLock<Vec<WelcomeMessage>>,
    admins: RwLock<HashMap<String, AdminAccount>>,
    settings: RwLock<Settings>,
    next_id: AtomicU64,
}

impl Default for MemoryChatStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryChatStore {
    /// Empty store with default settings and no admin account.
    pub fn new() -> Self {
        Self {
            visitors: RwLock::new(HashMap::new()),
            messages: RwLock::new(Vec::new()),
            auto_replies: RwLock::new(Vec::new()),
            common_questions: RwLock::new(Vec::new()),
            welcome_messages: RwLock::new(Vec::new()),
            admins: RwLock::new(HashMap::new()),
            settings: RwLock::new(Settings::default()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Store populated with the default admin, canned replies and greetings.
    pub async fn with_defaults(admin: AdminAccount) -> Result<Self> {
        let store = Self::new();
        store.put_admin(admin).await?;

        for (i, (question, answer)) in DEFAULT_COMMON_QUESTIONS.iter().enumerate() {
            store
                .add_common_question(question, answer, MessageType::Text, i as i32)
                .await?;
        }
        for (i, (keyword, reply)) in DEFAULT_AUTO_REPLIES.iter().enumerate() {
            store
                .add_auto_reply(keyword, reply, MessageType::Text, i as i32)
                .await?;
        }
        for (i, content) in DEFAULT_WELCOME_MESSAGES.iter().enumerate() {
            store
                .add_welcome_message(content, MessageType::Text, i as i32)
                .await?;
        }

        Ok(store)
    }

    fn allocate_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }
}

const DEFAULT_COMMON_QUESTIONS: [(&str, &str); 3] = [
    ("如何注册账号？", "您可以点击首页的注册按钮，填写相关信息即可注册。"),
    ("如何找回密码？", "您可以点击登录页面的忘记密码，按照提示操作即可找回。"),
    ("客服工作时间？", "我们的客服工作时间是周一至周日 9:00-21:00。"),
];

const DEFAULT_AUTO_REPLIES: [(&str, &str); 3] = [
    ("你好", "你好！请问有什么可以帮助您的？"),
    ("谢谢", "不客气，很高兴为您服务！"),
    ("再见", "再见，祝您生活愉快！"),
];

const DEFAULT_WELCOME_MESSAGES: [&str; 2] = [
    "您好！欢迎使用我们的客服系统，请问有什么可以帮助您的？",
    "我们的工作时间是周一至周日 9:00-21:00",
];

#[async_trait]
impl ChatStore for MemoryChatStore {
    async fn create_visitor(&self, visitor: &Visitor) -> Result<()> {
        self.visitors
            .write()
            .await
            .insert(visitor.user_id.clone(), visitor.clone());
        Ok(())
    }

    async fn get_visitor(&self, user_id: &str) -> Result<Option<Visitor>> {
        Ok(self.visitors.read().await.get(user_id).cloned())
    }

    async fn list_visitors(&self) -> Result<Vec<Visitor>> {
        Ok(self.visitors.read().await.values().cloned().collect())
    }

    async fn update_visitor_info(&self, user_id: &str, alias: &str, remark: &str) -> Result<bool> {
        let mut visitors = self.visitors.write().await;
        match visitors.get_mut(user_id) {
            Some(v) => {
                v.alias = alias.to_string();
                v.remark = remark.to_string();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete_visitor(&self, user_id: &str) -> Result<bool> {
        self.messages.write().await.retain(|m| m.user_id != user_id);
        Ok(self.visitors.write().await.remove(user_id).is_some())
    }

    async fn insert_message(&self, message: NewMessage) -> Result<ChatMessage> {
        let stored = ChatMessage {
            id: self.allocate_id(),
            user_id: message.user_id,
            content: message.content,
            is_admin: message.is_admin,
            is_read: false,
            message_type: message.message_type,
            created_at: Utc::now(),
        };
        self.messages.write().await.push(stored.clone());
        Ok(stored)
    }

    async fn list_messages(&self, user_id: &str) -> Result<Vec<ChatMessage>> {
        let mut list: Vec<ChatMessage> = self
            .messages
            .read()
            .await
            .iter()
            .filter(|m| m.user_id == user_id)
            .cloned()
            .collect();
        list.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(list)
    }

    async fn mark_visitor_messages_read(&self, user_id: &str) -> Result<usize> {
        let mut count = 0;
        for m in self.messages.write().await.iter_mut() {
            if m.user_id == user_id && !m.is_admin && !m.is_read {
                m.is_read = true;
                count += 1;
            }
        }
        Ok(count)
    }

    async fn unread_count(&self, user_id: &str) -> Result<usize> {
        Ok(self
            .messages
            .read()
            .await
            .iter()
            .filter(|m| m.user_id == user_id && !m.is_admin && !m.is_read)
            .count())
    }

    async fn latest_message_time(&self, user_id: &str) -> Result<Option<DateTime<Utc>>> {
        Ok(self
            .messages
            .read()
            .await
            .iter()
            .filter(|m| m.user_id == user_id)
            .map(|m| m.created_at)
            .max())
    }

    async fn list_auto_replies(&self) -> Result<Vec<AutoReply>> {
        let mut list = self.auto_replies.read().await.clone();
        list.sort_by_key(|r| (r.order_index, r.id));
        Ok(list)
    }

    async fn add_auto_reply(
        &self,
        keyword: &str,
        content: &str,
        message_type: MessageType,
        order_index: i32,
    ) -> Result<AutoReply> {
        let reply = AutoReply {
            id: self.allocate_id(),
            keyword: keyword.to_string(),
            content: content.to_string(),
            message_type,
            order_index,
        };
        self.auto_replies.write().await.push(reply.clone());
        Ok(reply)
    }

    async fn delete_auto_reply(&self, id: u64) -> Result<bool> {
        let mut list = self.auto_replies.write().await;
        let before = list.len();
        list.retain(|r| r.id != id);
        Ok(list.len() != before)
    }

    async fn list_common_questions(&self) -> Result<Vec<CommonQuestion>> {
        let mut list = self.common_questions.read().await.clone();
        list.sort_by_key(|q| (q.order_index, q.id));
        Ok(list)
    }

    async fn add_common_question(
        &self,
        question: &str,
        content: &str,
        message_type: MessageType,
        order_index: i32,
    ) -> Result<CommonQuestion> {
        let entry = CommonQuestion {
            id: self.allocate_id(),
            question: question.to_string(),
            content: content.to_string(),
            message_type,
            order_index,
        };
        self.common_questions.write().await.push(entry.clone());
        Ok(entry)
    }

    async fn delete_common_question(&self, id: u64) -> Result<bool> {
        let mut list = self.common_questions.write().await;
        let before = list.len();
        list.retain(|q| q.id != id);
        Ok(list.len() != before)
    }

    async fn list_welcome_messages(&self) -> Result<Vec<WelcomeMessage>> {
        let mut list = self.welcome_messages.read().await.clone();
        list.sort_by_key(|w| (w.order_index, w.id));
        Ok(list)
    }

    async fn add_welcome_message(
        &self,
        content: &str,
        message_type: MessageType,
        order_index: i32,
    ) -> Result<WelcomeMessage> {
        let entry = WelcomeMessage {
            id: self.allocate_id(),
            content: content.to_string(),
            message_type,
            order_index,
        };
        self.welcome_messages.write().await.push(entry.clone());
        Ok(entry)
    }

    async fn delete_welcome_message(&self, id: u64) -> Result<Option<WelcomeMessage>> {
        let mut list = self.welcome_messages.write().await;
        Ok(list
            .iter()
            .position(|w| w.id == id)
            .map(|pos| list.remove(pos)))
    }

    async fn get_admin(&self, username: &str) -> Result<Option<AdminAccount>> {
        Ok(self.admins.read().await.get(username).cloned())
    }

    async fn put_admin(&self, account: AdminAccount) -> Result<()> {
        self.admins
            .write()
            .await
            .insert(account.username.clone(), account);
        Ok(())
    }

    async fn get_settings(&self) -> Result<Settings> {
        Ok(self.settings.read().await.clone())
    }

    async fn put_settings(&self, settings: Settings) -> Result<()> {
        *self.settings.write().await = settings;
        Ok(())
    }

    async fn update_setting(&self, key: &str, value: &str) -> Result<bool> {
        Ok(self.settings.write().await.set(key, value))
    }
}
