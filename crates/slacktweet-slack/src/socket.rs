//! Socket Mode reader: turns Slack envelopes into [`ChatEvent`]s.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use anyhow::Context;
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_util::sync::CancellationToken;

use slacktweet_core::{
    domain::ChannelId,
    messaging::types::{ChatEvent, InboundMessage},
};

/// What one Socket Mode frame asks of us.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Envelope {
    /// Envelope id to acknowledge, if any.
    pub ack: Option<String>,
    pub event: Option<ChatEvent>,
}

/// Decode one Socket Mode frame.
pub fn parse_envelope(payload: &Value) -> Envelope {
    let ack = payload
        .get("envelope_id")
        .and_then(Value::as_str)
        .map(str::to_string);

    let event = match payload.get("type").and_then(Value::as_str).unwrap_or("") {
        "hello" => Some(ChatEvent::Connected),
        "disconnect" => Some(ChatEvent::Disconnected {
            reason: payload
                .get("reason")
                .and_then(Value::as_str)
                .unwrap_or("unspecified")
                .to_string(),
        }),
        "events_api" => parse_message_event(&payload["payload"]["event"]),
        _ => None,
    };

    Envelope { ack, event }
}

fn parse_message_event(event: &Value) -> Option<ChatEvent> {
    if event.get("type").and_then(Value::as_str) != Some("message") {
        return None;
    }
    // Our own posts and edits/joins/etc. are not commands.
    if event.get("bot_id").is_some() || event.get("subtype").is_some() {
        return None;
    }
    let channel = event.get("channel").and_then(Value::as_str)?;

    Some(ChatEvent::Message(InboundMessage {
        channel: ChannelId(channel.to_string()),
        user: event.get("user").and_then(Value::as_str).map(str::to_string),
        text: event
            .get("text")
            .and_then(Value::as_str)
            .filter(|t| !t.is_empty())
            .map(str::to_string),
    }))
}

/// Open the WebSocket and spawn the reader task.
///
/// The task ends (dropping `tx`) on cancellation, socket error, or a
/// `disconnect` frame; `connected` tracks whether the socket is open.
pub async fn spawn_reader(
    url: String,
    tx: mpsc::Sender<ChatEvent>,
    cancel: CancellationToken,
    connected: Arc<AtomicBool>,
) -> anyhow::Result<JoinHandle<()>> {
    let (ws, _) = tokio_tungstenite::connect_async(url.as_str())
        .await
        .context("failed to connect to Slack Socket Mode")?;
    tracing::info!("connected to Slack Socket Mode");

    let (mut write, mut read) = ws.split();
    connected.store(true, Ordering::SeqCst);

    let task = tokio::spawn(async move {
        loop {
            let frame = tokio::select! {
                _ = cancel.cancelled() => {
                    let _ = write.send(WsMessage::Close(None)).await;
                    break;
                }
                frame = read.next() => frame,
            };

            let msg = match frame {
                Some(Ok(m)) => m,
                Some(Err(e)) => {
                    tracing::warn!("Slack WebSocket error: {e}");
                    break;
                }
                None => break,
            };

            let text = match &msg {
                WsMessage::Text(t) => t.as_str().to_string(),
                WsMessage::Ping(p) => {
                    let _ = write.send(WsMessage::Pong(p.clone())).await;
                    continue;
                }
                WsMessage::Close(_) => break,
                _ => continue,
            };

            let Ok(payload) = serde_json::from_str::<Value>(&text) else {
                tracing::debug!("ignoring non-JSON socket frame");
                continue;
            };

            let envelope = parse_envelope(&payload);
            if let Some(id) = envelope.ack {
                let ack = json!({ "envelope_id": id }).to_string();
                if let Err(e) = write.send(WsMessage::Text(ack.into())).await {
                    tracing::warn!("failed to ACK Slack envelope: {e}");
                }
            }

            let Some(event) = envelope.event else {
                continue;
            };
            let is_disconnect = matches!(event, ChatEvent::Disconnected { .. });
            if tx.send(event).await.is_err() {
                tracing::debug!("chat event receiver dropped");
                break;
            }
            if is_disconnect {
                break;
            }
        }

        connected.store(false, Ordering::SeqCst);
        tracing::info!("Slack Socket Mode connection ended");
    });

    Ok(task)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hello_means_connected() {
        let env = parse_envelope(&json!({"type": "hello", "num_connections": 1}));
        assert_eq!(env.event, Some(ChatEvent::Connected));
        assert_eq!(env.ack, None);
    }

    #[test]
    fn disconnect_carries_reason() {
        let env = parse_envelope(&json!({"type": "disconnect", "reason": "refresh_requested"}));
        assert_eq!(
            env.event,
            Some(ChatEvent::Disconnected {
                reason: "refresh_requested".into()
            })
        );
    }

    #[test]
    fn message_event_is_acked_and_decoded() {
        let env = parse_envelope(&json!({
            "type": "events_api",
            "envelope_id": "env-1",
            "payload": {"event": {
                "type": "message",
                "channel": "C1",
                "user": "U9",
                "text": "<@UBOT> list"
            }}
        }));
        assert_eq!(env.ack.as_deref(), Some("env-1"));
        assert_eq!(
            env.event,
            Some(ChatEvent::Message(InboundMessage {
                channel: ChannelId("C1".into()),
                user: Some("U9".into()),
                text: Some("<@UBOT> list".into()),
            }))
        );
    }

    #[test]
    fn message_without_text_has_no_payload() {
        let env = parse_envelope(&json!({
            "type": "events_api",
            "envelope_id": "env-2",
            "payload": {"event": {"type": "message", "channel": "C1", "user": "U9"}}
        }));
        assert!(matches!(
            env.event,
            Some(ChatEvent::Message(InboundMessage { text: None, .. }))
        ));
    }

    #[test]
    fn bot_and_subtype_messages_are_skipped_but_acked() {
        let bot = parse_envelope(&json!({
            "type": "events_api",
            "envelope_id": "env-3",
            "payload": {"event": {"type": "message", "channel": "C1", "bot_id": "B1", "text": "hi"}}
        }));
        assert_eq!(bot.ack.as_deref(), Some("env-3"));
        assert_eq!(bot.event, None);

        let edit = parse_envelope(&json!({
            "type": "events_api",
            "envelope_id": "env-4",
            "payload": {"event": {"type": "message", "subtype": "message_changed", "channel": "C1"}}
        }));
        assert_eq!(edit.event, None);
    }

    #[test]
    fn unrelated_frames_are_ignored() {
        let env = parse_envelope(&json!({
            "type": "slash_commands",
            "envelope_id": "env-5"
        }));
        assert_eq!(env.ack.as_deref(), Some("env-5"));
        assert_eq!(env.event, None);
    }
}
