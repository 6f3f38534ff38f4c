//! Client side of the managed messaging service.
//!
//! [`Connector`] authenticates with a [`TokenRequest`] and hands back a
//! [`RealtimeConnection`] plus the stream of [`RealtimeEvent`]s for every
//! channel the connection is subscribed to. [`AblyConnector`] talks to the
//! hosted service over WebSocket; [`LocalHub`] is an in-process stand-in with
//! the same semantics.

mod client;
mod connection;
mod local;
pub mod protocol;

pub use client::{AblyConnection, AblyConnector};
pub use local::LocalHub;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::RealtimeError;
use crate::models::presence::PresenceMember;
use crate::models::token::TokenRequest;

/// Events delivered to a connected client.
#[derive(Debug, Clone, PartialEq)]
pub enum RealtimeEvent {
    /// A message published on a subscribed channel (including our own).
    Message {
        channel: String,
        name: String,
        data: serde_json::Value,
    },
    PresenceEnter {
        channel: String,
        member: PresenceMember,
    },
    PresenceLeave {
        channel: String,
        member: PresenceMember,
    },
    /// The connection ended; no further events follow.
    Disconnected { reason: String },
}

pub type EventReceiver = mpsc::UnboundedReceiver<RealtimeEvent>;

/// Opens authenticated connections to the messaging service.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Resolves once the service has accepted the credential.
    async fn connect(
        &self,
        client_id: &str,
        credential: TokenRequest,
    ) -> Result<(Box<dyn RealtimeConnection>, EventReceiver), RealtimeError>;
}

/// One live connection. Operations resolve when the service acknowledges them.
#[async_trait]
pub trait RealtimeConnection: Send + Sync {
    async fn subscribe(&self, channel: &str) -> Result<(), RealtimeError>;

    async fn unsubscribe(&self, channel: &str) -> Result<(), RealtimeError>;

    async fn publish(
        &self,
        channel: &str,
        name: &str,
        data: serde_json::Value,
    ) -> Result<(), RealtimeError>;

    async fn presence_enter(
        &self,
        channel: &str,
        data: serde_json::Value,
    ) -> Result<(), RealtimeError>;

    async fn presence_leave(&self, channel: &str) -> Result<(), RealtimeError>;

    /// Current members of the channel.
    async fn presence_get(&self, channel: &str) -> Result<Vec<PresenceMember>, RealtimeError>;

    /// Best-effort close; never fails.
    async fn close(&self);
}
