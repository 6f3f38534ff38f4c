//! JSON wire protocol of the hosted messaging service.

use serde::{Deserialize, Serialize};

use crate::models::presence::PresenceMember;

/// Protocol message actions.
pub mod action {
    pub const HEARTBEAT: u8 = 0;
    pub const ACK: u8 = 1;
    pub const NACK: u8 = 2;
    pub const CONNECTED: u8 = 4;
    pub const DISCONNECTED: u8 = 6;
    pub const CLOSE: u8 = 7;
    pub const CLOSED: u8 = 8;
    pub const ERROR: u8 = 9;
    pub const ATTACH: u8 = 10;
    pub const ATTACHED: u8 = 11;
    pub const DETACH: u8 = 12;
    pub const DETACHED: u8 = 13;
    pub const PRESENCE: u8 = 14;
    pub const MESSAGE: u8 = 15;
    pub const SYNC: u8 = 16;
}

/// Presence message actions.
pub mod presence_action {
    pub const ABSENT: u8 = 0;
    pub const PRESENT: u8 = 1;
    pub const ENTER: u8 = 2;
    pub const LEAVE: u8 = 3;
    pub const UPDATE: u8 = 4;
}

/// Envelope for every frame on the realtime socket.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProtocolMessage {
    pub action: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub msg_serial: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub messages: Option<Vec<WireMessage>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub presence: Option<Vec<WirePresence>>,
}

impl ProtocolMessage {
    pub fn new(action: u8) -> Self {
        Self {
            action,
            ..Default::default()
        }
    }

    pub fn for_channel(action: u8, channel: &str) -> Self {
        Self {
            action,
            channel: Some(channel.to_string()),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorInfo {
    #[serde(default)]
    pub code: Option<i64>,
    #[serde(default)]
    pub status_code: Option<u16>,
    #[serde(default)]
    pub message: Option<String>,
}

impl ErrorInfo {
    pub fn describe(&self) -> (i64, String) {
        (
            self.code.unwrap_or(50000),
            self.message.clone().unwrap_or_else(|| "unknown error".to_string()),
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encoding: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
}

impl WireMessage {
    pub fn new(name: &str, data: &serde_json::Value) -> Result<Self, serde_json::Error> {
        let (data, encoding) = encode_data(data)?;
        Ok(Self {
            name: Some(name.to_string()),
            data: Some(data),
            encoding,
            client_id: None,
        })
    }

    pub fn decoded_data(&self) -> serde_json::Value {
        decode_data(self.data.clone(), self.encoding.as_deref())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WirePresence {
    pub action: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encoding: Option<String>,
}

impl WirePresence {
    pub fn new(action: u8, data: Option<&serde_json::Value>) -> Result<Self, serde_json::Error> {
        let (data, encoding) = match data {
            Some(value) => {
                let (data, encoding) = encode_data(value)?;
                (Some(data), encoding)
            }
            None => (None, None),
        };
        Ok(Self {
            action,
            data,
            encoding,
            ..Default::default()
        })
    }

    pub fn into_member(self) -> PresenceMember {
        let data = match self.data {
            Some(data) => Some(decode_data(Some(data), self.encoding.as_deref())),
            None => None,
        };
        PresenceMember {
            client_id: self.client_id,
            data,
        }
    }
}

/// Objects and arrays travel as JSON text tagged `encoding: "json"`.
pub fn encode_data(
    value: &serde_json::Value,
) -> Result<(serde_json::Value, Option<String>), serde_json::Error> {
    match value {
        serde_json::Value::Object(_) | serde_json::Value::Array(_) => Ok((
            serde_json::Value::String(serde_json::to_string(value)?),
            Some("json".to_string()),
        )),
        other => Ok((other.clone(), None)),
    }
}

/// Reverse of [`encode_data`]. Undecodable payloads are passed through untouched.
pub fn decode_data(data: Option<serde_json::Value>, encoding: Option<&str>) -> serde_json::Value {
    let data = data.unwrap_or(serde_json::Value::Null);
    let is_json = encoding
        .map(|enc| enc.split('/').any(|step| step == "json"))
        .unwrap_or(false);
    if is_json {
        if let serde_json::Value::String(text) = &data {
            if let Ok(parsed) = serde_json::from_str(text) {
                return parsed;
            }
        }
    }
    data
}
