//! Rendering of outbound messages as `chat.postMessage` bodies.

use serde_json::{json, Value};

use slacktweet_core::{domain::ChannelId, messaging::types::OutgoingMessage};

/// Slack caps `header` block text at 150 characters.
const HEADER_MAX_CHARS: usize = 150;

pub fn post_message_body(channel: &ChannelId, message: &OutgoingMessage) -> Value {
    let text = message.fallback_text();
    match message {
        OutgoingMessage::Text(_) => json!({ "channel": channel.0, "text": text }),
        OutgoingMessage::Block { header, body } => json!({
            "channel": channel.0,
            "text": text,
            "blocks": render_blocks(header, body),
        }),
    }
}

fn render_blocks(header: &str, body: &str) -> Vec<Value> {
    let header: String = header.chars().take(HEADER_MAX_CHARS).collect();
    let mut blocks = vec![json!({
        "type": "header",
        "text": { "type": "plain_text", "text": header, "emoji": true },
    })];
    if !body.is_empty() {
        blocks.push(json!({
            "type": "section",
            "text": { "type": "mrkdwn", "text": body },
        }));
    }
    blocks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_has_no_blocks() {
        let v = post_message_body(
            &ChannelId("C1".into()),
            &OutgoingMessage::Text("I'm alive and online!".into()),
        );
        assert_eq!(v["channel"], "C1");
        assert_eq!(v["text"], "I'm alive and online!");
        assert!(v.get("blocks").is_none());
    }

    #[test]
    fn block_renders_header_and_section_with_fallback() {
        let v = post_message_body(
            &ChannelId("C1".into()),
            &OutgoingMessage::block("Current filters", "rustlang\ngolang"),
        );
        assert_eq!(v["text"], "Current filters\nrustlang\ngolang");
        assert_eq!(v["blocks"][0]["type"], "header");
        assert_eq!(v["blocks"][0]["text"]["text"], "Current filters");
        assert_eq!(v["blocks"][1]["text"]["type"], "mrkdwn");
        assert_eq!(v["blocks"][1]["text"]["text"], "rustlang\ngolang");
    }

    #[test]
    fn long_header_is_truncated_and_empty_body_dropped() {
        let long = "x".repeat(400);
        let v = post_message_body(
            &ChannelId("C1".into()),
            &OutgoingMessage::block(long, ""),
        );
        let blocks = v["blocks"].as_array().unwrap();
        assert_eq!(blocks.len(), 1);
        assert_eq!(
            blocks[0]["text"]["text"].as_str().unwrap().chars().count(),
            HEADER_MAX_CHARS
        );
    }
}
