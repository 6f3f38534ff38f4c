//! Chat session lifecycle: Unjoined -> Connecting -> Joined, and back on teardown.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use super::credential::CredentialSource;
use super::view::ChatView;
use crate::error::{ChatError, ChatResult};
use crate::models::message::{ChatMessage, CHAT_CHANNEL, CHAT_EVENT};
use crate::models::presence::PresenceData;
use crate::realtime::{Connector, EventReceiver, RealtimeConnection, RealtimeEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unjoined,
    Connecting,
    Joined,
}

impl SessionState {
    fn describe(self) -> &'static str {
        match self {
            SessionState::Unjoined => "unjoined",
            SessionState::Connecting => "connecting",
            SessionState::Joined => "joined",
        }
    }
}

/// One user's session in the room. Owns the connection and its event stream
/// from a successful join until [`ChatSession::teardown`].
pub struct ChatSession {
    credentials: Arc<dyn CredentialSource>,
    connector: Arc<dyn Connector>,
    state: SessionState,
    username: Option<String>,
    connection: Option<Box<dyn RealtimeConnection>>,
    events: Option<EventReceiver>,
    connected: bool,
    view: ChatView,
}

impl ChatSession {
    pub fn new(credentials: Arc<dyn CredentialSource>, connector: Arc<dyn Connector>) -> Self {
        Self {
            credentials,
            connector,
            state: SessionState::Unjoined,
            username: None,
            connection: None,
            events: None,
            connected: false,
            view: ChatView::new(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    pub fn view(&self) -> &ChatView {
        &self.view
    }

    /// Whether the realtime connection is still up.
    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Join the room as `name`. On failure every acquired resource is released,
    /// the session is back in [`SessionState::Unjoined`] and the user may retry.
    pub async fn join(&mut self, name: &str) -> ChatResult<()> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ChatError::EmptyName);
        }
        if self.state != SessionState::Unjoined {
            return Err(ChatError::InvalidState(self.state.describe()));
        }

        self.state = SessionState::Connecting;
        self.username = Some(name.to_string());
        match self.establish(name).await {
            Ok(()) => {
                self.state = SessionState::Joined;
                info!(username = %name, online = self.view.online_users().len(), "joined chat");
                Ok(())
            }
            Err(e) => {
                error!(username = %name, error = %e, "error joining chat");
                self.teardown().await;
                Err(e)
            }
        }
    }

    async fn establish(&mut self, name: &str) -> ChatResult<()> {
        let credential = self.credentials.fetch(name).await?;

        let (connection, events) = self.connector.connect(name, credential).await?;
        self.events = Some(events);
        self.connected = true;
        let connection = self.connection.insert(connection);

        connection.subscribe(CHAT_CHANNEL).await?;
        debug!(channel = CHAT_CHANNEL, "subscribed");

        let data = serde_json::to_value(PresenceData {
            username: name.to_string(),
        })?;
        connection.presence_enter(CHAT_CHANNEL, data).await?;

        let members = connection.presence_get(CHAT_CHANNEL).await?;
        self.view
            .seed_online(members.iter().map(|m| m.display_name().to_string()));
        Ok(())
    }

    /// Publish `text` as a chat message. Returns `Ok(false)` without publishing
    /// when the text is blank or there is no live channel. The message shows up
    /// in the log only when the service delivers it back.
    pub async fn send(&mut self, text: &str) -> ChatResult<bool> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(false);
        }
        let (Some(connection), Some(username)) = (self.connection.as_ref(), self.username.as_ref())
        else {
            return Ok(false);
        };

        let message = ChatMessage::user(username.clone(), text);
        let data = serde_json::to_value(&message)?;
        connection.publish(CHAT_CHANNEL, CHAT_EVENT, data).await?;
        debug!(id = %message.id, "message published");
        Ok(true)
    }

    /// Apply one event to the view.
    pub fn handle_event(&mut self, event: RealtimeEvent) {
        match event {
            RealtimeEvent::Message { channel, name, data }
                if channel == CHAT_CHANNEL && name == CHAT_EVENT =>
            {
                match serde_json::from_value::<ChatMessage>(data) {
                    Ok(message) => self.view.push_message(message),
                    Err(e) => warn!(error = %e, "dropping malformed chat message"),
                }
            }
            RealtimeEvent::PresenceEnter { channel, member } if channel == CHAT_CHANNEL => {
                self.view.member_entered(member.display_name());
            }
            RealtimeEvent::PresenceLeave { channel, member } if channel == CHAT_CHANNEL => {
                self.view.member_left(member.display_name());
            }
            RealtimeEvent::Disconnected { reason } => {
                warn!(reason = %reason, "disconnected from chat");
                self.connected = false;
            }
            other => debug!(event = ?other, "ignoring event"),
        }
    }

    /// Apply every event already received. Returns how many were applied.
    pub fn process_pending(&mut self) -> usize {
        let mut applied = 0;
        while let Some(event) = self.events.as_mut().and_then(|rx| rx.try_recv().ok()) {
            self.handle_event(event);
            applied += 1;
        }
        applied
    }

    /// Wait for the next event and apply it. Returns `false` once the stream has ended.
    pub async fn next_event(&mut self) -> bool {
        let event = match self.events.as_mut() {
            Some(rx) => rx.recv().await,
            None => None,
        };
        match event {
            Some(event) => {
                self.handle_event(event);
                true
            }
            None => {
                self.connected = false;
                false
            }
        }
    }

    /// Unsubscribe, leave presence and close. Best-effort; errors are ignored.
    pub async fn teardown(&mut self) {
        if let Some(connection) = self.connection.take() {
            if let Err(e) = connection.unsubscribe(CHAT_CHANNEL).await {
                debug!(error = %e, "unsubscribe during teardown");
            }
            if let Err(e) = connection.presence_leave(CHAT_CHANNEL).await {
                debug!(error = %e, "presence leave during teardown");
            }
            connection.close().await;
        }
        self.events = None;
        self.connected = false;
        self.username = None;
        self.view.clear();
        self.state = SessionState::Unjoined;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RealtimeError;
    use crate::models::presence::PresenceMember;
    use crate::models::token::TokenRequest;
    use crate::realtime::LocalHub;
    use crate::services::TokenIssuer;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const KEY: &str = "app.key:secret";

    fn session(hub: &LocalHub) -> ChatSession {
        let issuer = TokenIssuer::from_key_str(KEY).unwrap();
        ChatSession::new(Arc::new(issuer), Arc::new(hub.clone()))
    }

    fn hub() -> LocalHub {
        LocalHub::new(TokenIssuer::from_key_str(KEY).unwrap())
    }

    struct FailingCredentials;

    #[async_trait]
    impl CredentialSource for FailingCredentials {
        async fn fetch(&self, _client_id: &str) -> ChatResult<TokenRequest> {
            Err(ChatError::Credential("Failed to create authentication token".to_string()))
        }
    }

    /// Connects through a hub but fails the presence snapshot.
    struct SnapshotFails {
        hub: LocalHub,
        closes: Arc<AtomicUsize>,
    }

    struct SnapshotFailsConnection {
        inner: Box<dyn RealtimeConnection>,
        closes: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Connector for SnapshotFails {
        async fn connect(
            &self,
            client_id: &str,
            credential: TokenRequest,
        ) -> Result<(Box<dyn RealtimeConnection>, EventReceiver), RealtimeError> {
            let (inner, rx) = self.hub.connect(client_id, credential).await?;
            let conn = SnapshotFailsConnection {
                inner,
                closes: self.closes.clone(),
            };
            Ok((Box::new(conn), rx))
        }
    }

    #[async_trait]
    impl RealtimeConnection for SnapshotFailsConnection {
        async fn subscribe(&self, channel: &str) -> Result<(), RealtimeError> {
            self.inner.subscribe(channel).await
        }
        async fn unsubscribe(&self, channel: &str) -> Result<(), RealtimeError> {
            self.inner.unsubscribe(channel).await
        }
        async fn publish(
            &self,
            channel: &str,
            name: &str,
            data: serde_json::Value,
        ) -> Result<(), RealtimeError> {
            self.inner.publish(channel, name, data).await
        }
        async fn presence_enter(
            &self,
            channel: &str,
            data: serde_json::Value,
        ) -> Result<(), RealtimeError> {
            self.inner.presence_enter(channel, data).await
        }
        async fn presence_leave(&self, channel: &str) -> Result<(), RealtimeError> {
            self.inner.presence_leave(channel).await
        }
        async fn presence_get(&self, _channel: &str) -> Result<Vec<PresenceMember>, RealtimeError> {
            Err(RealtimeError::Protocol("presence unavailable".to_string()))
        }
        async fn close(&self) {
            self.closes.fetch_add(1, Ordering::SeqCst);
            self.inner.close().await;
        }
    }

    #[tokio::test]
    async fn blank_name_does_not_start_connecting() {
        let hub = hub();
        let mut s = session(&hub);
        assert!(matches!(s.join("   ").await, Err(ChatError::EmptyName)));
        assert_eq!(s.state(), SessionState::Unjoined);
        assert_eq!(hub.connection_count().await, 0);
    }

    #[tokio::test]
    async fn join_trims_name_and_seeds_presence() {
        let hub = hub();
        let mut s = session(&hub);
        s.join("  Alice  ").await.unwrap();
        assert_eq!(s.state(), SessionState::Joined);
        assert_eq!(s.username(), Some("Alice"));
        assert_eq!(s.view().online_users(), &["Alice".to_string()]);
        assert!(s.is_connected());
    }

    #[tokio::test]
    async fn second_join_is_rejected() {
        let hub = hub();
        let mut s = session(&hub);
        s.join("Alice").await.unwrap();
        assert!(matches!(
            s.join("Alice").await,
            Err(ChatError::InvalidState("joined"))
        ));
    }

    #[tokio::test]
    async fn credential_failure_returns_to_unjoined() {
        let hub = hub();
        let mut s = ChatSession::new(Arc::new(FailingCredentials), Arc::new(hub.clone()));
        assert!(matches!(s.join("Alice").await, Err(ChatError::Credential(_))));
        assert_eq!(s.state(), SessionState::Unjoined);
        assert_eq!(hub.connection_count().await, 0);
    }

    #[tokio::test]
    async fn late_step_failure_releases_connection() {
        let hub = hub();
        let closes = Arc::new(AtomicUsize::new(0));
        let connector = SnapshotFails {
            hub: hub.clone(),
            closes: closes.clone(),
        };
        let issuer = TokenIssuer::from_key_str(KEY).unwrap();
        let mut s = ChatSession::new(Arc::new(issuer), Arc::new(connector));

        assert!(matches!(s.join("Alice").await, Err(ChatError::Realtime(_))));
        assert_eq!(s.state(), SessionState::Unjoined);
        assert_eq!(closes.load(Ordering::SeqCst), 1);
        assert!(hub.members(CHAT_CHANNEL).await.is_empty());
        assert_eq!(hub.connection_count().await, 0);

        // manual retry with a working connector
        let mut retry = session(&hub);
        retry.join("Alice").await.unwrap();
        assert_eq!(retry.state(), SessionState::Joined);
    }

    #[tokio::test]
    async fn blank_message_is_not_published() {
        let hub = hub();
        let mut s = session(&hub);
        s.join("Alice").await.unwrap();
        s.process_pending();
        let before = s.view().messages().len();

        assert!(!s.send("   \t ").await.unwrap());
        assert_eq!(s.process_pending(), 0);
        assert_eq!(s.view().messages().len(), before);
    }

    #[tokio::test]
    async fn send_before_join_is_noop() {
        let hub = hub();
        let mut s = session(&hub);
        assert!(!s.send("hello").await.unwrap());
    }

    #[tokio::test]
    async fn malformed_chat_payload_is_dropped() {
        let hub = hub();
        let mut s = session(&hub);
        s.join("Alice").await.unwrap();
        s.process_pending();
        let before = s.view().messages().len();
        s.handle_event(RealtimeEvent::Message {
            channel: CHAT_CHANNEL.to_string(),
            name: CHAT_EVENT.to_string(),
            data: serde_json::json!({ "text": 42 }),
        });
        assert_eq!(s.view().messages().len(), before);
    }

    #[tokio::test]
    async fn teardown_resets_session() {
        let hub = hub();
        let mut s = session(&hub);
        s.join("Alice").await.unwrap();
        s.teardown().await;
        assert_eq!(s.state(), SessionState::Unjoined);
        assert!(s.view().messages().is_empty());
        assert!(hub.members(CHAT_CHANNEL).await.is_empty());
        assert!(!s.send("hello").await.unwrap());
    }
}
