//! Message endpoints.

use sn_core::error::{SnError, SnResult};

use crate::client::ApiClient;
use crate::models::{ChatMessage, MessagePage, SentMessage};

/// Paging parameters for chat history.
#[derive(Debug, Clone)]
pub struct MessageQuery {
    /// Page size (the server caps it at 100).
    pub limit: u32,
    /// Only messages sent before this RFC 3339 timestamp.
    pub before: Option<String>,
}

impl Default for MessageQuery {
    fn default() -> Self {
        Self {
            limit: 50,
            before: None,
        }
    }
}

impl MessageQuery {
    fn params(&self) -> Vec<(&'static str, String)> {
        let mut params = vec![("limit", self.limit.clamp(1, 100).to_string())];
        if let Some(before) = &self.before {
            params.push(("before", before.clone()));
        }
        params
    }
}

impl ApiClient {
    /// Fetch a page of messages of a chat, newest first.
    pub async fn chat_messages(&self, chat_id: &str, query: &MessageQuery) -> SnResult<MessagePage> {
        self.get_json(&format!("/chats/{chat_id}/messages"), &query.params())
            .await
    }

    /// Send a message over HTTP.
    ///
    /// The backend stores it and pushes a `new_message` frame to the other
    /// participants. Dispatch [`ChatMessage::to_echo_frame`] locally to show
    /// it without waiting for the push.
    pub async fn send_message(&self, chat_id: &str, content: &str) -> SnResult<ChatMessage> {
        if content.trim().is_empty() {
            return Err(SnError::InvalidFrame("message content is empty".into()));
        }
        let body = serde_json::json!({ "content": content });
        let sent: SentMessage = self
            .post_json(&format!("/chats/{chat_id}/messages"), &body)
            .await?;
        Ok(sent.message)
    }
}
