//! Presence members on the chat channel.

use serde::{Deserialize, Serialize};

/// Shown when a presence member carries no client id.
pub const ANONYMOUS: &str = "Anonymous";

/// Member data entered on presence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceData {
    pub username: String,
}

/// A presence member as reported by the messaging service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceMember {
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub data: Option<serde_json::Value>,
}

impl PresenceMember {
    pub fn new(client_id: impl Into<String>, data: Option<serde_json::Value>) -> Self {
        Self {
            client_id: Some(client_id.into()),
            data,
        }
    }

    /// The identifier used in the online-user list.
    pub fn display_name(&self) -> &str {
        self.client_id
            .as_deref()
            .filter(|id| !id.is_empty())
            .unwrap_or(ANONYMOUS)
    }
}
