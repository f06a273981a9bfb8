//! Filtered-stream reader: newline-delimited JSON over a long-lived response.

use std::{sync::Arc, time::Duration};

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use slacktweet_core::relay::{port::StreamListener, types::StreamItem};

pub const STREAM_PATH: &str =
    "/2/tweets/search/stream?tweet.fields=referenced_tweets,author_id&expansions=author_id&user.fields=username";

/// Upstream sends a keep-alive newline every ~20s; silence past this is a stall.
const STALL_TIMEOUT: Duration = Duration::from_secs(90);
const MAX_BACKOFF: Duration = Duration::from_secs(320);

/// Statuses after which retrying cannot succeed.
const FATAL_STATUSES: [u16; 3] = [401, 403, 404];

/// Splits a byte stream into complete, non-blank lines.
#[derive(Debug, Default)]
pub struct LineDecoder {
    buf: Vec<u8>,
}

impl LineDecoder {
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(bytes);
        let mut lines = Vec::new();
        while let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            let text = String::from_utf8_lossy(&line);
            let text = text.trim();
            if !text.is_empty() {
                lines.push(text.to_string());
            }
        }
        lines
    }
}

/// Parse one stream payload. `None` for error payloads and anything malformed.
pub fn parse_item(line: &str) -> Option<StreamItem> {
    let v: Value = match serde_json::from_str(line) {
        Ok(v) => v,
        Err(e) => {
            tracing::debug!(error = %e, "unparseable stream line");
            return None;
        }
    };
    if let Some(errors) = v.get("errors") {
        tracing::warn!(errors = %errors, "stream delivered error payload");
        return None;
    }

    let data = v.get("data")?;
    let id = data.get("id")?.as_str()?.to_string();
    let text = data
        .get("text")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    let is_repost = data
        .get("referenced_tweets")
        .and_then(Value::as_array)
        .is_some_and(|refs| {
            refs.iter()
                .any(|r| r.get("type").and_then(Value::as_str) == Some("retweeted"))
        });

    let author = data
        .get("author_id")
        .and_then(Value::as_str)
        .and_then(|author_id| {
            v.pointer("/includes/users")?
                .as_array()?
                .iter()
                .find(|u| u.get("id").and_then(Value::as_str) == Some(author_id))?
                .get("username")?
                .as_str()
                .map(str::to_string)
        });

    Some(StreamItem {
        id,
        text,
        author,
        is_repost,
    })
}

fn backoff_delay(attempt: u32) -> Duration {
    Duration::from_secs(1u64 << attempt.min(9)).min(MAX_BACKOFF)
}

enum ReadOutcome {
    /// Listener or cancellation asked to stop.
    Stop,
    /// Upstream closed or stalled; reconnect.
    Reconnect,
}

async fn read_body(
    mut resp: reqwest::Response,
    listener: &Arc<dyn StreamListener>,
    cancel: &CancellationToken,
) -> ReadOutcome {
    let mut decoder = LineDecoder::default();
    loop {
        let chunk = tokio::select! {
            _ = cancel.cancelled() => return ReadOutcome::Stop,
            c = tokio::time::timeout(STALL_TIMEOUT, resp.chunk()) => c,
        };
        let bytes = match chunk {
            Ok(Ok(Some(bytes))) => bytes,
            Ok(Ok(None)) => {
                tracing::info!("stream closed by upstream");
                return ReadOutcome::Reconnect;
            }
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "stream read failed");
                return ReadOutcome::Reconnect;
            }
            Err(_) => {
                tracing::warn!(timeout = ?STALL_TIMEOUT, "stream stalled");
                return ReadOutcome::Reconnect;
            }
        };
        for line in decoder.push(&bytes) {
            let Some(item) = parse_item(&line) else {
                continue;
            };
            if !listener.on_status(&item) {
                tracing::debug!("listener stopped the stream");
                return ReadOutcome::Stop;
            }
        }
    }
}

/// Reader task: connect, deliver items, back off and reconnect until stopped.
pub async fn run_stream(
    http: reqwest::Client,
    url: String,
    bearer: String,
    listener: Arc<dyn StreamListener>,
    cancel: CancellationToken,
) {
    let mut attempt: u32 = 0;
    loop {
        let sent = tokio::select! {
            _ = cancel.cancelled() => break,
            r = http.get(&url).bearer_auth(&bearer).send() => r,
        };
        match sent {
            Err(e) => tracing::warn!(error = %e, "stream connect failed"),
            Ok(resp) if !resp.status().is_success() => {
                let code = resp.status().as_u16();
                tracing::warn!(status = code, "stream rejected");
                if !listener.on_error(code) {
                    break;
                }
                if FATAL_STATUSES.contains(&code) {
                    tracing::error!(status = code, "stream cannot be retried");
                    break;
                }
            }
            Ok(resp) => {
                tracing::info!("filtered stream connected");
                attempt = 0;
                match read_body(resp, &listener, &cancel).await {
                    ReadOutcome::Stop => break,
                    ReadOutcome::Reconnect => {}
                }
            }
        }

        let delay = backoff_delay(attempt);
        attempt = attempt.saturating_add(1);
        tracing::debug!(?delay, attempt, "stream reconnect scheduled");
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }
    }
    cancel.cancel();
    tracing::info!("filtered stream stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decoder_buffers_partial_lines_and_skips_keepalives() {
        let mut d = LineDecoder::default();
        assert!(d.push(b"{\"data\":").is_empty());
        assert_eq!(d.push(b"1}\r\n\r\n"), vec!["{\"data\":1}"]);
        assert!(d.push(b"\r\n").is_empty());
        assert_eq!(d.push(b"a\nb\nc"), vec!["a", "b"]);
        assert_eq!(d.push(b"\n"), vec!["c"]);
    }

    #[test]
    fn parses_tweet_with_expanded_author() {
        let line = r#"{"data":{"id":"42","text":"hello rust","author_id":"7"},
            "includes":{"users":[{"id":"7","username":"ferris","name":"Ferris"}]},
            "matching_rules":[{"id":"1","tag":"rust"}]}"#
            .replace('\n', "");
        let item = parse_item(&line).expect("item");
        assert_eq!(item.id, "42");
        assert_eq!(item.text, "hello rust");
        assert_eq!(item.author.as_deref(), Some("ferris"));
        assert!(!item.is_repost);
    }

    #[test]
    fn flags_retweets_as_reposts() {
        let line = r#"{"data":{"id":"1","text":"RT @x: hi","referenced_tweets":[{"type":"retweeted","id":"9"}]}}"#;
        let item = parse_item(line).expect("item");
        assert!(item.is_repost);
        assert_eq!(item.author, None);

        let quote = r#"{"data":{"id":"2","text":"look","referenced_tweets":[{"type":"quoted","id":"9"}]}}"#;
        assert!(!parse_item(quote).expect("item").is_repost);
    }

    #[test]
    fn error_and_garbage_lines_are_skipped() {
        assert!(parse_item(r#"{"errors":[{"title":"ConnectionException"}]}"#).is_none());
        assert!(parse_item("not json").is_none());
        assert!(parse_item(r#"{"data":{"text":"no id"}}"#).is_none());
    }

    #[test]
    fn backoff_grows_and_caps() {
        assert_eq!(backoff_delay(0), Duration::from_secs(1));
        assert_eq!(backoff_delay(3), Duration::from_secs(8));
        assert_eq!(backoff_delay(20), MAX_BACKOFF);
    }
}
