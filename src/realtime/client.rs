//! Hosted messaging-service client: token exchange, socket handshake, REST presence.

use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use futures::StreamExt;
use reqwest::Url;
use serde::Deserialize;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, info};

use super::connection::{connection_loop, Command, WsStream};
use super::protocol::{action, presence_action, ErrorInfo, ProtocolMessage, WireMessage, WirePresence};
use super::{Connector, EventReceiver, RealtimeConnection};
use crate::config::ClientConfig;
use crate::error::RealtimeError;
use crate::models::presence::PresenceMember;
use crate::models::token::TokenRequest;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);
const PROTOCOL_VERSION: &str = "1.2";

/// Token issued by the service in exchange for a signed [`TokenRequest`].
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenDetails {
    token: String,
    #[serde(default)]
    client_id: Option<String>,
    #[serde(default)]
    expires: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct RestErrorBody {
    error: ErrorInfo,
}

/// Connects to the hosted service.
#[derive(Clone)]
pub struct AblyConnector {
    http: reqwest::Client,
    rest_host: String,
    realtime_host: String,
}

impl AblyConnector {
    pub fn new(config: &ClientConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            rest_host: config.rest_host.clone(),
            realtime_host: config.realtime_host.clone(),
        }
    }

    async fn request_token(&self, credential: &TokenRequest) -> Result<TokenDetails, RealtimeError> {
        let url = format!(
            "https://{}/keys/{}/requestToken",
            self.rest_host, credential.key_name
        );
        let res = self.http.post(&url).json(credential).send().await?;
        if !res.status().is_success() {
            return Err(rest_error(res).await);
        }
        let details: TokenDetails = res.json().await?;
        debug!(client_id = ?details.client_id, expires = ?details.expires, "token obtained");
        Ok(details)
    }

    fn socket_url(&self, token: &str) -> Result<Url, RealtimeError> {
        Url::parse_with_params(
            &format!("wss://{}/", self.realtime_host),
            &[
                ("access_token", token),
                ("format", "json"),
                ("heartbeats", "true"),
                ("v", PROTOCOL_VERSION),
            ],
        )
        .map_err(|e| RealtimeError::Connect(format!("invalid realtime host: {e}")))
    }
}

#[async_trait]
impl Connector for AblyConnector {
    async fn connect(
        &self,
        client_id: &str,
        credential: TokenRequest,
    ) -> Result<(Box<dyn RealtimeConnection>, EventReceiver), RealtimeError> {
        let details = self.request_token(&credential).await?;
        let url = self.socket_url(&details.token)?;

        info!(host = %self.realtime_host, client_id = %client_id, "connecting to realtime service");
        let (mut ws, _) = tokio::time::timeout(
            CONNECT_TIMEOUT,
            tokio_tungstenite::connect_async(url.as_str()),
        )
        .await
        .map_err(|_| RealtimeError::Connect("connection timed out after 15s".to_string()))??;

        let connection_id = tokio::time::timeout(CONNECT_TIMEOUT, await_connected(&mut ws))
            .await
            .map_err(|_| RealtimeError::Connect("no CONNECTED frame within 15s".to_string()))??;
        info!(connection_id = %connection_id, "connected to realtime service");

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (command_tx, command_rx) = mpsc::channel(64);
        tokio::spawn(connection_loop(ws, event_tx, command_rx));

        let connection = AblyConnection {
            command_tx,
            http: self.http.clone(),
            rest_host: self.rest_host.clone(),
            token: details.token,
        };
        Ok((Box::new(connection), event_rx))
    }
}

/// Reads frames until the service accepts (CONNECTED) or refuses (ERROR) the token.
async fn await_connected(ws: &mut WsStream) -> Result<String, RealtimeError> {
    while let Some(frame) = ws.next().await {
        let text = match frame? {
            WsMessage::Text(text) => text,
            WsMessage::Close(_) => break,
            _ => continue,
        };
        let msg: ProtocolMessage = serde_json::from_str(&text)?;
        match msg.action {
            action::CONNECTED => return Ok(msg.connection_id.unwrap_or_default()),
            action::ERROR | action::DISCONNECTED => {
                let (code, message) = msg.error.unwrap_or_default().describe();
                return Err(RealtimeError::Rejected { code, message });
            }
            _ => {}
        }
    }
    Err(RealtimeError::Closed)
}

async fn rest_error(res: reqwest::Response) -> RealtimeError {
    let status = res.status();
    match res.json::<RestErrorBody>().await {
        Ok(body) => {
            let (code, message) = body.error.describe();
            RealtimeError::Rejected { code, message }
        }
        Err(_) => RealtimeError::Rejected {
            code: i64::from(status.as_u16()) * 100,
            message: format!("HTTP {status}"),
        },
    }
}

/// Handle to a live hosted-service connection.
pub struct AblyConnection {
    command_tx: mpsc::Sender<Command>,
    http: reqwest::Client,
    rest_host: String,
    token: String,
}

impl AblyConnection {
    async fn request(
        &self,
        build: impl FnOnce(oneshot::Sender<Result<(), RealtimeError>>) -> Command,
    ) -> Result<(), RealtimeError> {
        let (reply, rx) = oneshot::channel();
        self.command_tx
            .send(build(reply))
            .await
            .map_err(|_| RealtimeError::Closed)?;
        rx.await.map_err(|_| RealtimeError::Closed)?
    }
}

#[async_trait]
impl RealtimeConnection for AblyConnection {
    async fn subscribe(&self, channel: &str) -> Result<(), RealtimeError> {
        let channel = channel.to_string();
        self.request(|reply| Command::Attach { channel, reply }).await
    }

    /// Removes our listener only; the channel stays attached so a presence
    /// leave can still follow.
    async fn unsubscribe(&self, channel: &str) -> Result<(), RealtimeError> {
        let channel = channel.to_string();
        self.request(|reply| Command::Unsubscribe { channel, reply }).await
    }

    async fn publish(
        &self,
        channel: &str,
        name: &str,
        data: serde_json::Value,
    ) -> Result<(), RealtimeError> {
        let message = WireMessage::new(name, &data)?;
        let channel = channel.to_string();
        self.request(|reply| Command::Publish { channel, message, reply }).await
    }

    async fn presence_enter(
        &self,
        channel: &str,
        data: serde_json::Value,
    ) -> Result<(), RealtimeError> {
        let presence = WirePresence::new(presence_action::ENTER, Some(&data))?;
        let channel = channel.to_string();
        self.request(|reply| Command::Presence { channel, presence, reply }).await
    }

    async fn presence_leave(&self, channel: &str) -> Result<(), RealtimeError> {
        let presence = WirePresence::new(presence_action::LEAVE, None)?;
        let channel = channel.to_string();
        self.request(|reply| Command::Presence { channel, presence, reply }).await
    }

    async fn presence_get(&self, channel: &str) -> Result<Vec<PresenceMember>, RealtimeError> {
        let url = format!("https://{}/channels/{}/presence", self.rest_host, channel);
        let res = self
            .http
            .get(&url)
            .bearer_auth(BASE64.encode(&self.token))
            .send()
            .await?;
        if !res.status().is_success() {
            return Err(rest_error(res).await);
        }
        let members: Vec<WirePresence> = res.json().await?;
        Ok(members.into_iter().map(WirePresence::into_member).collect())
    }

    async fn close(&self) {
        let (reply, rx) = oneshot::channel();
        if self.command_tx.send(Command::Close { reply }).await.is_ok() {
            let _ = rx.await;
        }
    }
}
