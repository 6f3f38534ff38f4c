//! Chat messages as carried on the `chat-message` event.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The single room every client joins.
pub const CHAT_CHANNEL: &str = "chat-room";
/// Event name for user-authored messages on [`CHAT_CHANNEL`].
pub const CHAT_EVENT: &str = "chat-message";
/// Author shown on join/leave notifications.
pub const SYSTEM_AUTHOR: &str = "System";

/// A chat message. Built by the sender, immutable afterwards, never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    pub username: String,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_system: bool,
}

impl ChatMessage {
    /// User-authored message stamped with the current time.
    pub fn user(username: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: generate_message_id(),
            username: username.into(),
            text: text.into(),
            timestamp: Utc::now(),
            is_system: false,
        }
    }

    /// Locally generated notification; not published.
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            id: generate_message_id(),
            username: SYSTEM_AUTHOR.to_string(),
            text: text.into(),
            timestamp: Utc::now(),
            is_system: true,
        }
    }

    pub fn joined(name: &str) -> Self {
        Self::system(format!("{} joined the chat", name))
    }

    pub fn left(name: &str) -> Self {
        Self::system(format!("{} left the chat", name))
    }
}

/// `<unix millis>-<random float>`. Collisions are possible but negligible at chat scale.
pub fn generate_message_id() -> String {
    format!("{}-{}", Utc::now().timestamp_millis(), rand::random::<f64>())
}
