//! Frame types exchanged over the streaming connection.
//!
//! Every frame on the wire is a single JSON object per line:
//! `{ "type": string, "chat_id"?: string, "data": object }`.
//! Frames are immutable once constructed; the dedupe key and routing topic
//! are derived at construction time.

use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};

use sn_core::constants::frame_types;
use sn_core::error::{SnError, SnResult};

/// All frame types known to the client.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FrameType {
    /// A chat message was stored and pushed to participants (`new_message`).
    NewMessage,
    /// A notification for the current user (`notification`).
    Notification,
    /// Ask the backend to route a chat's messages to this connection (`join_chat`).
    JoinChat,
    /// A user-authored chat message sent over the socket (`message`).
    Message,
    /// Typing indicator (`typing`).
    Typing,
    /// Unknown/unhandled frame type.
    Unknown(String),
}

impl FrameType {
    /// Parse a frame type tag from the wire.
    pub fn from_str(s: &str) -> Self {
        match s {
            frame_types::NEW_MESSAGE => Self::NewMessage,
            frame_types::NOTIFICATION => Self::Notification,
            frame_types::JOIN_CHAT => Self::JoinChat,
            frame_types::MESSAGE => Self::Message,
            frame_types::TYPING => Self::Typing,
            other => Self::Unknown(other.to_string()),
        }
    }

    /// Convert to the wire tag.
    pub fn as_str(&self) -> &str {
        match self {
            Self::NewMessage => frame_types::NEW_MESSAGE,
            Self::Notification => frame_types::NOTIFICATION,
            Self::JoinChat => frame_types::JOIN_CHAT,
            Self::Message => frame_types::MESSAGE,
            Self::Typing => frame_types::TYPING,
            Self::Unknown(s) => s.as_str(),
        }
    }

    /// Whether the backend pushes this type to clients.
    pub fn is_inbound(&self) -> bool {
        matches!(self, Self::NewMessage | Self::Notification)
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, Self::Unknown(_))
    }
}

impl std::fmt::Display for FrameType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Routing key a subscriber registers interest in.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Topic {
    /// Notifications for the current user.
    Global,
    /// Messages of one conversation.
    Chat(String),
}

impl Topic {
    pub fn chat(chat_id: impl Into<String>) -> Self {
        Self::Chat(chat_id.into())
    }

    /// Chat id for chat topics.
    pub fn chat_id(&self) -> Option<&str> {
        match self {
            Self::Chat(id) => Some(id.as_str()),
            Self::Global => None,
        }
    }
}

impl std::fmt::Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Global => write!(f, "global"),
            Self::Chat(id) => write!(f, "chat:{id}"),
        }
    }
}

/// Wire representation used for (de)serialization.
#[derive(Debug, Serialize, Deserialize)]
struct WireFrame {
    #[serde(rename = "type")]
    frame_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    chat_id: Option<String>,
    #[serde(default)]
    data: serde_json::Value,
}

/// One discrete unit of data exchanged over the streaming transport.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    frame_type: FrameType,
    chat_id: Option<String>,
    data: serde_json::Value,
    dedupe_key: Option<String>,
}

impl Frame {
    fn build(frame_type: FrameType, chat_id: Option<String>, data: serde_json::Value) -> Self {
        // Pushed messages carry the chat id inside `data` as well.
        let chat_id = chat_id.filter(|id| !id.is_empty()).or_else(|| {
            if frame_type == FrameType::NewMessage {
                data.get("chat_id").and_then(json_id)
            } else {
                None
            }
        });
        let dedupe_key = derive_dedupe_key(&frame_type, &data);
        Self {
            frame_type,
            chat_id,
            data,
            dedupe_key,
        }
    }

    /// Parse one line of the wire protocol.
    pub fn parse_line(line: &str) -> SnResult<Self> {
        let wire: WireFrame = serde_json::from_str(line.trim())
            .map_err(|e| SnError::Protocol(format!("malformed frame: {e}")))?;
        if wire.frame_type.is_empty() {
            return Err(SnError::Protocol("frame without type".into()));
        }
        Ok(Self::build(
            FrameType::from_str(&wire.frame_type),
            wire.chat_id,
            wire.data,
        ))
    }

    /// Parse a transport text message, which may hold several
    /// newline-separated frames. Blank lines are skipped.
    pub fn parse_text(text: &str) -> Vec<SnResult<Self>> {
        text.lines()
            .filter(|line| !line.trim().is_empty())
            .map(Self::parse_line)
            .collect()
    }

    /// A `new_message` frame, e.g. built from the HTTP response of a send.
    pub fn new_message(chat_id: impl Into<String>, data: serde_json::Value) -> Self {
        Self::build(FrameType::NewMessage, Some(chat_id.into()), data)
    }

    /// A `notification` frame.
    pub fn notification(data: serde_json::Value) -> Self {
        Self::build(FrameType::Notification, None, data)
    }

    /// Outbound request to join a chat room.
    pub fn join_chat(chat_id: impl Into<String>) -> Self {
        let chat_id = chat_id.into();
        let data = serde_json::json!({ "chat_id": chat_id });
        Self::build(FrameType::JoinChat, Some(chat_id), data)
    }

    /// Outbound user-authored chat message.
    pub fn chat_message(
        chat_id: impl Into<String>,
        content: impl Into<String>,
        client_id: impl Into<String>,
    ) -> Self {
        let data = serde_json::json!({
            "content": content.into(),
            "client_id": client_id.into(),
        });
        Self::build(FrameType::Message, Some(chat_id.into()), data)
    }

    /// Outbound typing indicator.
    pub fn typing(chat_id: impl Into<String>, is_typing: bool) -> Self {
        let data = serde_json::json!({ "typing": is_typing });
        Self::build(FrameType::Typing, Some(chat_id.into()), data)
    }

    pub fn frame_type(&self) -> &FrameType {
        &self.frame_type
    }

    pub fn chat_id(&self) -> Option<&str> {
        self.chat_id.as_deref()
    }

    pub fn data(&self) -> &serde_json::Value {
        &self.data
    }

    /// Identifier used to recognise redelivered frames.
    pub fn dedupe_key(&self) -> Option<&str> {
        self.dedupe_key.as_deref()
    }

    /// Topic an inbound frame is routed to.
    ///
    /// `None` for outbound/unknown types and for messages without a chat id.
    pub fn topic(&self) -> Option<Topic> {
        match self.frame_type {
            FrameType::NewMessage => self.chat_id.clone().map(Topic::Chat),
            FrameType::Notification => Some(Topic::Global),
            _ => None,
        }
    }

    /// Critical frames are never evicted from the outbound queue.
    pub fn is_critical(&self) -> bool {
        self.frame_type == FrameType::Message
    }

    /// Serialize to a single wire line (without trailing newline).
    pub fn to_wire(&self) -> SnResult<String> {
        let wire = WireFrame {
            frame_type: self.frame_type.as_str().to_string(),
            chat_id: self.chat_id.clone(),
            data: self.data.clone(),
        };
        Ok(serde_json::to_string(&wire)?)
    }

    /// Try to parse the data as a chat message.
    pub fn as_chat_message(&self) -> Option<ChatMessagePayload> {
        if self.frame_type == FrameType::NewMessage {
            serde_json::from_value(self.data.clone()).ok()
        } else {
            None
        }
    }

    /// Try to parse the data as a notification.
    pub fn as_notification(&self) -> Option<NotificationPayload> {
        if self.frame_type == FrameType::Notification {
            serde_json::from_value(self.data.clone()).ok()
        } else {
            None
        }
    }
}

/// Render a JSON id (string or number) as a string.
fn json_id(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn derive_dedupe_key(frame_type: &FrameType, data: &serde_json::Value) -> Option<String> {
    match frame_type {
        FrameType::NewMessage => data.get("id").and_then(json_id),
        FrameType::Notification => data
            .pointer("/notification/id")
            .and_then(json_id)
            .or_else(|| data.get("id").and_then(json_id))
            .or_else(|| Some(content_hash(data))),
        _ => None,
    }
}

/// MD5 over the canonical JSON encoding (object keys sorted recursively).
fn content_hash(data: &serde_json::Value) -> String {
    let canonical = canonicalize(data).to_string();
    format!("{:x}", Md5::digest(canonical.as_bytes()))
}

fn canonicalize(value: &serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(map) => {
            let sorted: std::collections::BTreeMap<&String, serde_json::Value> =
                map.iter().map(|(k, v)| (k, canonicalize(v))).collect();
            serde_json::Value::Object(
                sorted.into_iter().map(|(k, v)| (k.clone(), v)).collect(),
            )
        }
        serde_json::Value::Array(items) => {
            serde_json::Value::Array(items.iter().map(canonicalize).collect())
        }
        other => other.clone(),
    }
}

/// Sender details embedded in pushed chat messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageSender {
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub avatar_url: String,
}

/// Typed payload of a `new_message` frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessagePayload {
    pub id: String,
    #[serde(default)]
    pub chat_id: String,
    #[serde(default)]
    pub sender_id: String,
    #[serde(default)]
    pub content: String,
    /// Timestamp as sent by the backend (RFC 3339 string or epoch number).
    #[serde(default)]
    pub sent_at: serde_json::Value,
    pub sender: Option<MessageSender>,
}

/// Stored notification record inside a `notification` frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationRecord {
    pub id: String,
    #[serde(default)]
    pub user_id: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub reference_id: String,
    #[serde(default)]
    pub actor_id: Option<String>,
    #[serde(default)]
    pub is_read: bool,
}

/// Typed payload of a `notification` frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationPayload {
    pub notification: NotificationRecord,
    #[serde(default)]
    pub data: Option<serde_json::Value>,
}
