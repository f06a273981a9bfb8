//! Slack adapter.
//!
//! Implements the `slacktweet-core` ChatConnection port: Web API for identity
//! lookup and posting, Socket Mode (WebSocket) for inbound events.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use reqwest::{header::RETRY_AFTER, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::{mpsc, Mutex};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

pub mod blocks;
pub mod socket;

use slacktweet_core::{
    domain::{BotIdentity, ChannelId},
    errors::Error,
    messaging::{
        port::ChatConnection,
        types::{ChatEvent, OutgoingMessage},
    },
    Result,
};

const SLACK_API_BASE: &str = "https://slack.com/api";
const EVENT_BUFFER: usize = 256;

#[derive(Clone, Debug)]
pub struct SlackConfig {
    /// Bot User OAuth Token (xoxb-...)
    pub bot_token: String,
    /// App-Level Token for Socket Mode (xapp-...)
    pub app_token: String,
}

#[derive(Debug, Deserialize)]
struct AuthTestResponse {
    #[serde(default)]
    user_id: String,
}

#[derive(Debug, Deserialize)]
struct ConnectionsOpenResponse {
    url: String,
}

struct SocketSession {
    cancel: CancellationToken,
    task: tokio::task::JoinHandle<()>,
}

impl SocketSession {
    /// Cancel the reader and wait for it, so its final `connected = false`
    /// cannot land after a newer socket came up.
    async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            if e.is_panic() {
                tracing::warn!("Slack socket reader panicked: {e}");
            }
        }
    }
}

pub struct SlackConnection {
    cfg: SlackConfig,
    http: reqwest::Client,
    api_base: String,
    socket: Mutex<Option<SocketSession>>,
    connected: Arc<AtomicBool>,
}

impl SlackConnection {
    pub fn new(cfg: SlackConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .map_err(|e| Error::Client(format!("http client build failed: {e}")))?;
        Ok(Self {
            cfg,
            http,
            api_base: SLACK_API_BASE.to_string(),
            socket: Mutex::new(None),
            connected: Arc::new(AtomicBool::new(false)),
        })
    }

    fn map_err(e: reqwest::Error) -> Error {
        Error::Client(format!("slack request error: {e}"))
    }

    /// POST a Web API method, retrying once when Slack answers 429.
    async fn call(&self, method: &str, token: &str, body: Option<&Value>) -> Result<Value> {
        const MAX_RETRIES: usize = 1;
        let url = format!("{}/{method}", self.api_base);
        let mut attempts = 0usize;
        loop {
            let mut req = self.http.post(&url).bearer_auth(token);
            if let Some(b) = body {
                req = req.json(b);
            }
            let resp = req.send().await.map_err(Self::map_err)?;

            if resp.status() == StatusCode::TOO_MANY_REQUESTS {
                if attempts < MAX_RETRIES {
                    attempts += 1;
                    let wait = retry_after(&resp).unwrap_or(Duration::from_secs(1));
                    tracing::warn!(method, "slack rate limited; retrying in {wait:?}");
                    sleep(wait).await;
                    continue;
                }
                return Err(Error::ApiRejected("ratelimited".to_string()));
            }
            if !resp.status().is_success() {
                return Err(Error::Client(format!(
                    "slack {method} failed: {}",
                    resp.status()
                )));
            }

            let v: Value = resp.json().await.map_err(Self::map_err)?;
            return check_ok(v);
        }
    }
}

fn retry_after(resp: &reqwest::Response) -> Option<Duration> {
    resp.headers()
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

/// Web API envelope: `{"ok": false, "error": "..."}` becomes `ApiRejected`.
fn check_ok(v: Value) -> Result<Value> {
    if v.get("ok").and_then(Value::as_bool) == Some(true) {
        return Ok(v);
    }
    let err = v
        .get("error")
        .and_then(Value::as_str)
        .unwrap_or("unknown")
        .to_string();
    Err(Error::ApiRejected(err))
}

#[async_trait]
impl ChatConnection for SlackConnection {
    async fn lookup_self_identity(&self) -> Result<BotIdentity> {
        let v = self
            .call("auth.test", &self.cfg.bot_token, None)
            .await
            .map_err(|e| Error::IdentityLookupFailed(e.to_string()))?;
        let auth: AuthTestResponse = serde_json::from_value(v)
            .map_err(|e| Error::IdentityLookupFailed(format!("auth.test: {e}")))?;
        if auth.user_id.is_empty() {
            return Err(Error::IdentityLookupFailed(
                "auth.test returned no user_id".into(),
            ));
        }
        Ok(BotIdentity(auth.user_id))
    }

    async fn connect(&self) -> Result<mpsc::Receiver<ChatEvent>> {
        let mut socket = self.socket.lock().await;
        if let Some(old) = socket.take() {
            old.stop().await;
        }

        let v = self.call("apps.connections.open", &self.cfg.app_token, None).await?;
        let ConnectionsOpenResponse { url } = serde_json::from_value(v)
            .map_err(|e| Error::Client(format!("apps.connections.open: {e}")))?;

        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let cancel = CancellationToken::new();
        let task = socket::spawn_reader(url, tx, cancel.clone(), self.connected.clone())
            .await
            .map_err(|e| Error::Client(format!("{e:#}")))?;

        *socket = Some(SocketSession { cancel, task });
        Ok(rx)
    }

    async fn send_message(&self, channel: &ChannelId, message: &OutgoingMessage) -> Result<()> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(Error::NotConnected);
        }
        let body = blocks::post_message_body(channel, message);
        self.call("chat.postMessage", &self.cfg.bot_token, Some(&body))
            .await?;
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        let session = self.socket.lock().await.take();
        if let Some(s) = session {
            s.stop().await;
        }
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }
}
