//! Background task owning the realtime WebSocket.
//!
//! A single task reads frames and executes commands, so acknowledgement
//! bookkeeping needs no locking.

use std::collections::{HashMap, HashSet};

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use super::protocol::{action, presence_action, ProtocolMessage, WireMessage, WirePresence};
use super::RealtimeEvent;
use crate::error::RealtimeError;

pub(crate) type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
pub(crate) type Reply = oneshot::Sender<Result<(), RealtimeError>>;

/// Commands sent from an [`AblyConnection`](super::AblyConnection) handle.
#[derive(Debug)]
pub(crate) enum Command {
    Attach { channel: String, reply: Reply },
    /// Stop emitting events for a channel. The channel stays attached.
    Unsubscribe { channel: String, reply: Reply },
    Publish { channel: String, message: WireMessage, reply: Reply },
    Presence { channel: String, presence: WirePresence, reply: Reply },
    Close { reply: oneshot::Sender<()> },
}

/// Outstanding requests awaiting a reply from the service.
#[derive(Default)]
struct Pending {
    next_serial: i64,
    acks: HashMap<i64, Reply>,
    attaches: HashMap<String, Reply>,
}

impl Pending {
    fn take_serial(&mut self, reply: Reply) -> i64 {
        let serial = self.next_serial;
        self.next_serial += 1;
        self.acks.insert(serial, reply);
        serial
    }

    fn resolve_acks(&mut self, first: i64, count: i64, result: impl Fn() -> Result<(), RealtimeError>) {
        for serial in first..first.saturating_add(count.max(1)) {
            if let Some(reply) = self.acks.remove(&serial) {
                let _ = reply.send(result());
            }
        }
    }

    fn fail_all(&mut self) {
        for (_, reply) in self.acks.drain() {
            let _ = reply.send(Err(RealtimeError::Closed));
        }
        for (_, reply) in self.attaches.drain() {
            let _ = reply.send(Err(RealtimeError::Closed));
        }
    }
}

enum Flow {
    Continue,
    Stop(String),
}

pub(crate) async fn connection_loop(
    ws: WsStream,
    event_tx: mpsc::UnboundedSender<RealtimeEvent>,
    mut command_rx: mpsc::Receiver<Command>,
) {
    let (mut writer, mut reader) = ws.split();
    let mut pending = Pending::default();
    let mut muted = HashSet::new();

    let reason = loop {
        tokio::select! {
            cmd = command_rx.recv() => {
                let Some(cmd) = cmd else {
                    let _ = send_frame(&mut writer, &ProtocolMessage::new(action::CLOSE)).await;
                    break "connection handle dropped".to_string();
                };
                match cmd {
                    Command::Close { reply } => {
                        let _ = send_frame(&mut writer, &ProtocolMessage::new(action::CLOSE)).await;
                        let _ = writer.send(WsMessage::Close(None)).await;
                        let _ = reply.send(());
                        break "closed by client".to_string();
                    }
                    Command::Unsubscribe { channel, reply } => {
                        debug!(channel = %channel, "unsubscribed");
                        muted.insert(channel);
                        let _ = reply.send(Ok(()));
                        continue;
                    }
                    Command::Attach { ref channel, .. } => {
                        muted.remove(channel);
                    }
                    _ => {}
                }
                if let Err(e) = execute(cmd, &mut writer, &mut pending).await {
                    warn!(error = %e, "failed to write frame");
                    break format!("write failed: {e}");
                }
            }
            frame = reader.next() => {
                match frame {
                    Some(Ok(WsMessage::Text(text))) => {
                        match serde_json::from_str::<ProtocolMessage>(&text) {
                            Ok(msg) => {
                                if let Flow::Stop(reason) = dispatch(msg, &mut pending, &muted, &event_tx) {
                                    break reason;
                                }
                            }
                            Err(e) => debug!(error = %e, "unrecognized frame"),
                        }
                    }
                    Some(Ok(WsMessage::Close(_))) | None => break "server closed connection".to_string(),
                    Some(Err(e)) => {
                        warn!(error = %e, "WebSocket error");
                        break format!("WebSocket error: {e}");
                    }
                    Some(Ok(_)) => {}
                }
            }
        }
    };

    pending.fail_all();
    info!(reason = %reason, "realtime connection ended");
    let _ = event_tx.send(RealtimeEvent::Disconnected { reason });
}

async fn send_frame<S>(writer: &mut S, frame: &ProtocolMessage) -> Result<(), RealtimeError>
where
    S: futures::Sink<WsMessage, Error = tokio_tungstenite::tungstenite::Error> + Unpin,
{
    let json = serde_json::to_string(frame)?;
    writer.send(WsMessage::Text(json.into())).await?;
    Ok(())
}

async fn execute<S>(cmd: Command, writer: &mut S, pending: &mut Pending) -> Result<(), RealtimeError>
where
    S: futures::Sink<WsMessage, Error = tokio_tungstenite::tungstenite::Error> + Unpin,
{
    let frame = match cmd {
        Command::Attach { channel, reply } => {
            let frame = ProtocolMessage::for_channel(action::ATTACH, &channel);
            pending.attaches.insert(channel, reply);
            frame
        }
        Command::Publish { channel, message, reply } => ProtocolMessage {
            msg_serial: Some(pending.take_serial(reply)),
            messages: Some(vec![message]),
            ..ProtocolMessage::for_channel(action::MESSAGE, &channel)
        },
        Command::Presence { channel, presence, reply } => ProtocolMessage {
            msg_serial: Some(pending.take_serial(reply)),
            presence: Some(vec![presence]),
            ..ProtocolMessage::for_channel(action::PRESENCE, &channel)
        },
        Command::Unsubscribe { .. } | Command::Close { .. } => return Ok(()),
    };
    send_frame(writer, &frame).await
}

fn dispatch(
    msg: ProtocolMessage,
    pending: &mut Pending,
    muted: &HashSet<String>,
    event_tx: &mpsc::UnboundedSender<RealtimeEvent>,
) -> Flow {
    match msg.action {
        action::ACK => {
            pending.resolve_acks(msg.msg_serial.unwrap_or(0), msg.count.unwrap_or(1), || Ok(()));
        }
        action::NACK => {
            let (code, message) = msg.error.unwrap_or_default().describe();
            pending.resolve_acks(msg.msg_serial.unwrap_or(0), msg.count.unwrap_or(1), || {
                Err(RealtimeError::Rejected {
                    code,
                    message: message.clone(),
                })
            });
        }
        action::ATTACHED => {
            if let Some(reply) = msg.channel.as_ref().and_then(|ch| pending.attaches.remove(ch)) {
                let _ = reply.send(Ok(()));
            }
        }
        action::DETACHED => {
            let Some(channel) = msg.channel else {
                return Flow::Continue;
            };
            if let Some(reply) = pending.attaches.remove(&channel) {
                let (code, message) = msg.error.unwrap_or_default().describe();
                let _ = reply.send(Err(RealtimeError::Rejected { code, message }));
            }
        }
        action::ERROR => {
            let (code, message) = msg.error.unwrap_or_default().describe();
            match msg.channel {
                Some(channel) => {
                    warn!(channel = %channel, code, message = %message, "channel error");
                    if let Some(reply) = pending.attaches.remove(&channel) {
                        let _ = reply.send(Err(RealtimeError::Rejected { code, message }));
                    }
                }
                None => return Flow::Stop(format!("connection error ({code}): {message}")),
            }
        }
        action::MESSAGE | action::PRESENCE
            if msg.channel.as_ref().is_some_and(|ch| muted.contains(ch)) =>
        {
            debug!(channel = ?msg.channel, "dropping event for unsubscribed channel");
        }
        action::MESSAGE => {
            let channel = msg.channel.unwrap_or_default();
            for message in msg.messages.unwrap_or_default() {
                let data = message.decoded_data();
                let _ = event_tx.send(RealtimeEvent::Message {
                    channel: channel.clone(),
                    name: message.name.unwrap_or_default(),
                    data,
                });
            }
        }
        action::PRESENCE => {
            let channel = msg.channel.unwrap_or_default();
            for presence in msg.presence.unwrap_or_default() {
                let event = match presence.action {
                    presence_action::ENTER => RealtimeEvent::PresenceEnter {
                        channel: channel.clone(),
                        member: presence.into_member(),
                    },
                    presence_action::LEAVE => RealtimeEvent::PresenceLeave {
                        channel: channel.clone(),
                        member: presence.into_member(),
                    },
                    _ => continue,
                };
                let _ = event_tx.send(event);
            }
        }
        action::DISCONNECTED | action::CLOSED => {
            let reason = msg
                .error
                .and_then(|e| e.message)
                .unwrap_or_else(|| "disconnected by service".to_string());
            return Flow::Stop(reason);
        }
        // Presence snapshots come from the REST endpoint, so SYNC is not tracked.
        action::HEARTBEAT | action::CONNECTED | action::SYNC => {}
        other => debug!(action = other, "ignoring frame"),
    }
    Flow::Continue
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pending_with_serials(n: usize) -> (Pending, Vec<oneshot::Receiver<Result<(), RealtimeError>>>) {
        let mut pending = Pending::default();
        let mut receivers = Vec::new();
        for _ in 0..n {
            let (tx, rx) = oneshot::channel();
            pending.take_serial(tx);
            receivers.push(rx);
        }
        (pending, receivers)
    }

    #[tokio::test]
    async fn ack_resolves_range_of_serials() {
        let (mut pending, mut receivers) = pending_with_serials(3);
        let (event_tx, _event_rx) = mpsc::unbounded_channel();
        let ack = ProtocolMessage {
            msg_serial: Some(0),
            count: Some(2),
            ..ProtocolMessage::new(action::ACK)
        };
        assert!(matches!(dispatch(ack, &mut pending, &HashSet::new(), &event_tx), Flow::Continue));
        assert!(receivers.remove(0).await.unwrap().is_ok());
        assert!(receivers.remove(0).await.unwrap().is_ok());
        assert_eq!(pending.acks.len(), 1);
    }

    #[tokio::test]
    async fn nack_rejects_publish() {
        let (mut pending, mut receivers) = pending_with_serials(1);
        let (event_tx, _event_rx) = mpsc::unbounded_channel();
        let raw = r#"{"action":2,"msgSerial":0,"count":1,"error":{"code":40160,"message":"denied"}}"#;
        let nack: ProtocolMessage = serde_json::from_str(raw).unwrap();
        dispatch(nack, &mut pending, &HashSet::new(), &event_tx);
        assert!(matches!(
            receivers.remove(0).await.unwrap(),
            Err(RealtimeError::Rejected { code: 40160, .. })
        ));
    }

    #[tokio::test]
    async fn message_frame_emits_decoded_events() {
        let mut pending = Pending::default();
        let (event_tx, mut event_rx) = mpsc::unbounded_channel();
        let raw = r#"{"action":15,"channel":"chat-room","messages":[
            {"name":"chat-message","data":"{\"text\":\"hello\"}","encoding":"json"}
        ]}"#;
        dispatch(serde_json::from_str(raw).unwrap(), &mut pending, &HashSet::new(), &event_tx);
        assert_eq!(
            event_rx.try_recv().unwrap(),
            RealtimeEvent::Message {
                channel: "chat-room".to_string(),
                name: "chat-message".to_string(),
                data: serde_json::json!({ "text": "hello" }),
            }
        );
    }

    #[tokio::test]
    async fn channel_error_fails_pending_attach() {
        let mut pending = Pending::default();
        let (tx, rx) = oneshot::channel();
        pending.attaches.insert("chat-room".to_string(), tx);
        let (event_tx, _event_rx) = mpsc::unbounded_channel();
        let raw = r#"{"action":9,"channel":"chat-room","error":{"code":40160,"message":"no capability"}}"#;
        assert!(matches!(
            dispatch(serde_json::from_str(raw).unwrap(), &mut pending, &HashSet::new(), &event_tx),
            Flow::Continue
        ));
        assert!(rx.await.unwrap().is_err());
    }

    #[test]
    fn connection_error_stops_loop() {
        let mut pending = Pending::default();
        let (event_tx, _event_rx) = mpsc::unbounded_channel();
        let raw = r#"{"action":9,"error":{"code":40142,"message":"Token expired"}}"#;
        assert!(matches!(
            dispatch(serde_json::from_str(raw).unwrap(), &mut pending, &HashSet::new(), &event_tx),
            Flow::Stop(_)
        ));
    }

    #[tokio::test]
    async fn ack_near_serial_limit_does_not_overflow() {
        let mut pending = Pending::default();
        let (tx, rx) = oneshot::channel();
        pending.acks.insert(i64::MAX, tx);
        let (event_tx, _event_rx) = mpsc::unbounded_channel();
        let ack = ProtocolMessage {
            msg_serial: Some(i64::MAX),
            count: Some(5),
            ..ProtocolMessage::new(action::ACK)
        };
        dispatch(ack, &mut pending, &HashSet::new(), &event_tx);
        assert!(rx.await.unwrap().is_ok());
    }

    #[test]
    fn unsubscribed_channel_events_are_dropped() {
        let mut pending = Pending::default();
        let (event_tx, mut event_rx) = mpsc::unbounded_channel();
        let muted = HashSet::from(["chat-room".to_string()]);
        let raw = r#"{"action":14,"channel":"chat-room","presence":[{"action":3,"clientId":"Bob"}]}"#;
        dispatch(serde_json::from_str(raw).unwrap(), &mut pending, &muted, &event_tx);
        let raw = r#"{"action":15,"channel":"lobby","messages":[{"name":"x","data":"hi"}]}"#;
        dispatch(serde_json::from_str(raw).unwrap(), &mut pending, &muted, &event_tx);
        assert!(matches!(
            event_rx.try_recv(),
            Ok(RealtimeEvent::Message { ref channel, .. }) if channel == "lobby"
        ));
        assert!(event_rx.try_recv().is_err());
    }
}
