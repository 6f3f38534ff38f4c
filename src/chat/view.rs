//! Client-side view of the room: message log and online users.

use crate::models::message::ChatMessage;

/// Each client's own derived cache; it may briefly disagree with the service.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatView {
    messages: Vec<ChatMessage>,
    online_users: Vec<String>,
}

impl ChatView {
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages in arrival order.
    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    /// Online users in the order they were first seen.
    pub fn online_users(&self) -> &[String] {
        &self.online_users
    }

    pub fn is_online(&self, name: &str) -> bool {
        self.online_users.iter().any(|u| u == name)
    }

    pub fn push_message(&mut self, message: ChatMessage) {
        self.messages.push(message);
    }

    /// Replace the online set with a presence snapshot.
    pub fn seed_online<I, S>(&mut self, names: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.online_users.clear();
        for name in names {
            self.add_user(name.into());
        }
    }

    pub fn member_entered(&mut self, name: &str) {
        self.add_user(name.to_string());
        self.messages.push(ChatMessage::joined(name));
    }

    pub fn member_left(&mut self, name: &str) {
        self.online_users.retain(|u| u != name);
        self.messages.push(ChatMessage::left(name));
    }

    pub fn clear(&mut self) {
        self.messages.clear();
        self.online_users.clear();
    }

    fn add_user(&mut self, name: String) {
        if !self.online_users.contains(&name) {
            self.online_users.push(name);
        }
    }
}
