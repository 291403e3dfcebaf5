//! Response types of the chat and notification endpoints.

use serde::{Deserialize, Serialize};

use sn_socket::{Frame, MessageSender};

/// Preview of the newest message in a chat listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LastMessage {
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub sender_id: String,
    #[serde(default)]
    pub sent_at: serde_json::Value,
    #[serde(default)]
    pub sender: Option<MessageSender>,
}

/// A chat the current user participates in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatSummary {
    pub id: String,
    /// "direct" or "group".
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub participants: Vec<String>,
    #[serde(default)]
    pub last_message: Option<LastMessage>,
}

impl ChatSummary {
    pub fn is_group(&self) -> bool {
        self.kind == "group"
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct ChatList {
    #[serde(default)]
    pub chats: Option<Vec<ChatSummary>>,
}

/// A stored chat message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    #[serde(default)]
    pub chat_id: String,
    #[serde(default)]
    pub sender_id: String,
    #[serde(default)]
    pub content: String,
    /// Epoch seconds or RFC 3339, depending on the endpoint.
    #[serde(default)]
    pub sent_at: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<serde_json::Value>,
}

impl ChatMessage {
    /// The `new_message` frame the backend pushes for this message.
    ///
    /// Dispatching it locally marks the id as seen, so the later push of the
    /// same message is suppressed by the router.
    pub fn to_echo_frame(&self) -> Frame {
        let data = serde_json::to_value(self).unwrap_or_else(|_| {
            serde_json::json!({
                "id": self.id,
                "chat_id": self.chat_id,
                "content": self.content,
            })
        });
        Frame::new_message(self.chat_id.as_str(), data)
    }
}

/// One page of chat history.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MessagePage {
    #[serde(default, deserialize_with = "null_as_empty")]
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub has_more: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct SentMessage {
    pub message: ChatMessage,
}

/// A notification as listed by the notifications endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    #[serde(deserialize_with = "id_string")]
    pub id: String,
    #[serde(default)]
    pub user_id: serde_json::Value,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub reference_id: String,
    #[serde(default)]
    pub actor_id: String,
    #[serde(default)]
    pub is_read: bool,
    #[serde(default)]
    pub created_at: serde_json::Value,
    #[serde(default)]
    pub actor_nickname: String,
    #[serde(default)]
    pub actor_avatar: String,
}

fn null_as_empty<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}

/// Accept ids encoded as strings or numbers.
fn id_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!("invalid id: {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sn_socket::{FrameType, Topic};

    #[test]
    fn test_echo_frame_matches_push_key() {
        let message: ChatMessage = serde_json::from_value(serde_json::json!({
            "id": "m-1",
            "chat_id": "c-1",
            "sender_id": "u-1",
            "content": "hello",
            "sent_at": 1719829800
        }))
        .unwrap();

        let echo = message.to_echo_frame();
        assert_eq!(echo.frame_type(), &FrameType::NewMessage);
        assert_eq!(echo.topic(), Some(Topic::chat("c-1")));

        let push = Frame::parse_line(
            r#"{"type":"new_message","chat_id":"c-1","data":{"id":"m-1","content":"hello"}}"#,
        )
        .unwrap();
        assert_eq!(echo.dedupe_key(), push.dedupe_key());
    }

    #[test]
    fn test_message_page_null_messages() {
        let page: MessagePage =
            serde_json::from_str(r#"{"messages":null,"has_more":false}"#).unwrap();
        assert!(page.messages.is_empty());
    }

    #[test]
    fn test_chat_summary_group() {
        let chat: ChatSummary = serde_json::from_value(serde_json::json!({
            "id": "c-2",
            "type": "group",
            "name": "Hikers",
            "participants": ["u-1", "u-2"],
            "group": { "id": "g-1", "name": "Hikers" }
        }))
        .unwrap();
        assert!(chat.is_group());
        assert_eq!(chat.participants.len(), 2);
        assert!(chat.last_message.is_none());
    }

    #[test]
    fn test_notification_numeric_id() {
        let n: Notification = serde_json::from_value(serde_json::json!({
            "id": 12,
            "user_id": 3,
            "type": "follow_request",
            "reference_id": "u-9",
            "is_read": false
        }))
        .unwrap();
        assert_eq!(n.id, "12");
        assert_eq!(n.kind, "follow_request");
    }
}
