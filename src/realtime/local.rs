//! In-process messaging service: fan-out and presence with the hosted service's semantics.
//!
//! Credentials are verified against the issuer key and capabilities are
//! enforced per operation. Publishers receive their own messages. Presence
//! requires an attached channel, and unsubscribing only stops delivery. Closing
//! or dropping a connection that is still present emits leave events for it.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info};
use uuid::Uuid;

use super::{Connector, EventReceiver, RealtimeConnection, RealtimeEvent};
use crate::error::RealtimeError;
use crate::models::presence::PresenceMember;
use crate::models::token::{Capability, Operation, TokenRequest};
use crate::services::TokenIssuer;

struct ConnectionEntry {
    client_id: String,
    capability: Capability,
    tx: mpsc::UnboundedSender<RealtimeEvent>,
}

struct Member {
    connection: Uuid,
    client_id: String,
    data: serde_json::Value,
}

#[derive(Default)]
struct HubChannel {
    /// Attached connections in attach order.
    subscribers: Vec<Uuid>,
    /// Attached but no longer listening.
    muted: HashSet<Uuid>,
    members: Vec<Member>,
}

#[derive(Default)]
struct HubState {
    connections: HashMap<Uuid, ConnectionEntry>,
    channels: HashMap<String, HubChannel>,
}

impl HubState {
    fn fan_out(&self, channel: &str, event: RealtimeEvent) {
        let Some(ch) = self.channels.get(channel) else {
            return;
        };
        for id in ch.subscribers.iter().filter(|id| !ch.muted.contains(*id)) {
            if let Some(conn) = self.connections.get(id) {
                let _ = conn.tx.send(event.clone());
            }
        }
    }

    fn authorize(&self, id: Uuid, channel: &str, op: Operation) -> Result<&ConnectionEntry, RealtimeError> {
        let conn = self.connections.get(&id).ok_or(RealtimeError::Closed)?;
        if !conn.capability.allows(channel, op) {
            return Err(RealtimeError::Forbidden(format!("{:?} on {}", op, channel)));
        }
        Ok(conn)
    }

    fn attached_channel(&mut self, id: Uuid, channel: &str) -> Result<&mut HubChannel, RealtimeError> {
        self.channels
            .get_mut(channel)
            .filter(|ch| ch.subscribers.contains(&id))
            .ok_or_else(|| RealtimeError::Protocol(format!("{} is not attached", channel)))
    }

    fn remove_member(&mut self, id: Uuid, channel: &str) -> Option<Member> {
        let ch = self.channels.get_mut(channel)?;
        let idx = ch.members.iter().position(|m| m.connection == id)?;
        Some(ch.members.remove(idx))
    }
}

/// Shared in-process hub. Clone to hand the same hub to several clients.
#[derive(Clone)]
pub struct LocalHub {
    issuer: TokenIssuer,
    state: Arc<Mutex<HubState>>,
}

impl LocalHub {
    /// Accepts credentials signed by `issuer`.
    pub fn new(issuer: TokenIssuer) -> Self {
        Self {
            issuer,
            state: Arc::new(Mutex::new(HubState::default())),
        }
    }

    /// Client ids currently present on `channel`, in enter order.
    pub async fn members(&self, channel: &str) -> Vec<String> {
        let state = self.state.lock().await;
        state
            .channels
            .get(channel)
            .map(|ch| ch.members.iter().map(|m| m.client_id.clone()).collect())
            .unwrap_or_default()
    }

    pub async fn connection_count(&self) -> usize {
        self.state.lock().await.connections.len()
    }

    /// Drop a connection without a graceful leave, as when a client vanishes.
    async fn drop_connection(&self, id: Uuid) {
        let mut state = self.state.lock().await;
        let Some(conn) = state.connections.remove(&id) else {
            return;
        };
        let channels: Vec<String> = state.channels.keys().cloned().collect();
        for channel in channels {
            if let Some(member) = state.remove_member(id, &channel) {
                let event = RealtimeEvent::PresenceLeave {
                    channel: channel.clone(),
                    member: PresenceMember::new(member.client_id, Some(member.data)),
                };
                state.fan_out(&channel, event);
            }
            if let Some(ch) = state.channels.get_mut(&channel) {
                ch.subscribers.retain(|s| *s != id);
                ch.muted.remove(&id);
            }
        }
        let _ = conn.tx.send(RealtimeEvent::Disconnected {
            reason: "closed by client".to_string(),
        });
        info!(client_id = %conn.client_id, "local connection closed");
    }
}

#[async_trait]
impl Connector for LocalHub {
    async fn connect(
        &self,
        client_id: &str,
        credential: TokenRequest,
    ) -> Result<(Box<dyn RealtimeConnection>, EventReceiver), RealtimeError> {
        self.issuer
            .verify(&credential)
            .map_err(|e| RealtimeError::Rejected {
                code: 40101,
                message: e.to_string(),
            })?;
        if credential.client_id != client_id {
            return Err(RealtimeError::Rejected {
                code: 40102,
                message: "clientId does not match credential".to_string(),
            });
        }
        let capability = credential.capability()?;

        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        self.state.lock().await.connections.insert(
            id,
            ConnectionEntry {
                client_id: client_id.to_string(),
                capability,
                tx,
            },
        );
        info!(client_id = %client_id, connection = %id, "local connection opened");

        let connection = LocalConnection {
            hub: self.clone(),
            id,
        };
        Ok((Box::new(connection), rx))
    }
}

/// A client's handle on a [`LocalHub`].
pub struct LocalConnection {
    hub: LocalHub,
    id: Uuid,
}

#[async_trait]
impl RealtimeConnection for LocalConnection {
    async fn subscribe(&self, channel: &str) -> Result<(), RealtimeError> {
        let mut state = self.hub.state.lock().await;
        state.authorize(self.id, channel, Operation::Subscribe)?;
        let ch = state.channels.entry(channel.to_string()).or_default();
        if !ch.subscribers.contains(&self.id) {
            ch.subscribers.push(self.id);
        }
        ch.muted.remove(&self.id);
        debug!(channel = %channel, connection = %self.id, "attached");
        Ok(())
    }

    async fn unsubscribe(&self, channel: &str) -> Result<(), RealtimeError> {
        let mut state = self.hub.state.lock().await;
        if !state.connections.contains_key(&self.id) {
            return Err(RealtimeError::Closed);
        }
        if let Some(ch) = state.channels.get_mut(channel) {
            if ch.subscribers.contains(&self.id) {
                ch.muted.insert(self.id);
            }
        }
        Ok(())
    }

    async fn publish(
        &self,
        channel: &str,
        name: &str,
        data: serde_json::Value,
    ) -> Result<(), RealtimeError> {
        let state = self.hub.state.lock().await;
        state.authorize(self.id, channel, Operation::Publish)?;
        state.fan_out(
            channel,
            RealtimeEvent::Message {
                channel: channel.to_string(),
                name: name.to_string(),
                data,
            },
        );
        Ok(())
    }

    async fn presence_enter(
        &self,
        channel: &str,
        data: serde_json::Value,
    ) -> Result<(), RealtimeError> {
        let mut state = self.hub.state.lock().await;
        let client_id = state
            .authorize(self.id, channel, Operation::Presence)?
            .client_id
            .clone();
        let ch = state.attached_channel(self.id, channel)?;
        if let Some(existing) = ch.members.iter_mut().find(|m| m.connection == self.id) {
            existing.data = data;
            return Ok(());
        }
        ch.members.push(Member {
            connection: self.id,
            client_id: client_id.clone(),
            data: data.clone(),
        });
        state.fan_out(
            channel,
            RealtimeEvent::PresenceEnter {
                channel: channel.to_string(),
                member: PresenceMember::new(client_id, Some(data)),
            },
        );
        Ok(())
    }

    async fn presence_leave(&self, channel: &str) -> Result<(), RealtimeError> {
        let mut state = self.hub.state.lock().await;
        state.authorize(self.id, channel, Operation::Presence)?;
        state.attached_channel(self.id, channel)?;
        if let Some(member) = state.remove_member(self.id, channel) {
            state.fan_out(
                channel,
                RealtimeEvent::PresenceLeave {
                    channel: channel.to_string(),
                    member: PresenceMember::new(member.client_id, Some(member.data)),
                },
            );
        }
        Ok(())
    }

    async fn presence_get(&self, channel: &str) -> Result<Vec<PresenceMember>, RealtimeError> {
        let state = self.hub.state.lock().await;
        state.authorize(self.id, channel, Operation::Subscribe)?;
        Ok(state
            .channels
            .get(channel)
            .map(|ch| {
                ch.members
                    .iter()
                    .map(|m| PresenceMember::new(m.client_id.clone(), Some(m.data.clone())))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn close(&self) {
        self.hub.drop_connection(self.id).await;
    }
}

impl Drop for LocalConnection {
    fn drop(&mut self) {
        let hub = self.hub.clone();
        let id = self.id;
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            runtime.spawn(async move { hub.drop_connection(id).await });
        }
    }
}
