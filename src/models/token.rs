//! Capability-scoped token requests handed to chat clients.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// An operation a credential may grant on a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Operation {
    Publish,
    Subscribe,
    Presence,
}

/// Channel name -> granted operations.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Capability(BTreeMap<String, Vec<Operation>>);

impl Capability {
    pub fn new() -> Self {
        Self::default()
    }

    /// Grant publish, subscribe and presence on one channel.
    pub fn chat(channel: &str) -> Self {
        Self::new().grant(
            channel,
            [Operation::Publish, Operation::Subscribe, Operation::Presence],
        )
    }

    pub fn grant(mut self, channel: &str, ops: impl IntoIterator<Item = Operation>) -> Self {
        let entry = self.0.entry(channel.to_string()).or_default();
        for op in ops {
            if !entry.contains(&op) {
                entry.push(op);
            }
        }
        self
    }

    pub fn allows(&self, channel: &str, op: Operation) -> bool {
        self.0
            .get(channel)
            .or_else(|| self.0.get("*"))
            .is_some_and(|ops| ops.contains(&op))
    }

    pub fn channels(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn operations(&self, channel: &str) -> &[Operation] {
        self.0.get(channel).map(Vec::as_slice).unwrap_or(&[])
    }

    /// The JSON text embedded in a token request and covered by its signature.
    pub fn to_json_string(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&self.0)
    }

    pub fn parse(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw).map(Self)
    }
}

/// A signed request the client exchanges with the messaging service for a token.
/// The signing secret never leaves the issuer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenRequest {
    pub key_name: String,
    pub client_id: String,
    /// Capability JSON text, see [`Capability::to_json_string`].
    pub capability: String,
    /// Unix milliseconds at issue time.
    pub timestamp: i64,
    pub nonce: String,
    pub mac: String,
    /// Token lifetime in milliseconds; `None` leaves the service default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl: Option<u64>,
}

impl TokenRequest {
    pub fn capability(&self) -> Result<Capability, serde_json::Error> {
        Capability::parse(&self.capability)
    }
}
