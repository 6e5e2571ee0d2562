//! Canned replies to visitor text messages.
//!
//! Exact common-question matches win over keyword matches; within each list
//! the lowest `order_index` wins.

use super::models::{AutoReply, CommonQuestion, MessageType};
use super::relay::{MessageRelay, PublishOutcome};
use super::store::ChatStore;
use anyhow::Result;
use std::sync::Arc;
use tracing::debug;

/// What the responder decided to send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CannedReply {
    pub content: String,
    pub message_type: MessageType,
    pub source: ReplySource,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplySource {
    CommonQuestion(u64),
    Keyword(u64),
}

/// Pick a reply for `content`. Both slices must already be in `order_index` order.
pub fn find_reply(
    questions: &[CommonQuestion],
    keywords: &[AutoReply],
    content: &str,
) -> Option<CannedReply> {
    if let Some(q) = questions.iter().find(|q| q.question == content) {
        return Some(CannedReply {
            content: q.content.clone(),
            message_type: q.message_type,
            source: ReplySource::CommonQuestion(q.id),
        });
    }

    keywords
        .iter()
        .find(|r| !r.keyword.is_empty() && content.contains(r.keyword.as_str()))
        .map(|r| CannedReply {
            content: r.content.clone(),
            message_type: r.message_type,
            source: ReplySource::Keyword(r.id),
        })
}

/// Looks up and publishes canned replies after a visitor message.
#[derive(Clone)]
pub struct AutoResponder {
    store: Arc<dyn ChatStore>,
    relay: MessageRelay,
}

impl AutoResponder {
    pub fn new(store: Arc<dyn ChatStore>, relay: MessageRelay) -> Self {
        Self { store, relay }
    }

    /// React to a message the visitor just sent.
    ///
    /// Only visitor text messages are considered. The reply is published as an
    /// admin-authored message.
    pub async fn respond(
        &self,
        user_id: &str,
        content: &str,
        message_type: MessageType,
    ) -> Result<Option<PublishOutcome>> {
        if message_type != MessageType::Text {
            return Ok(None);
        }

        let questions = self.store.list_common_questions().await?;
        let keywords = self.store.list_auto_replies().await?;
        let Some(reply) = find_reply(&questions, &keywords, content) else {
            return Ok(None);
        };

        debug!(user_id, source = ?reply.source, "Sending auto-reply");
        let outcome = self
            .relay
            .publish(user_id, &reply.content, reply.message_type, true)
            .await?;
        Ok(Some(outcome))
    }
}
