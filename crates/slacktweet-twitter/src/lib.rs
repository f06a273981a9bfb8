//! Twitter adapter (content relay).
//!
//! Implements the `slacktweet-core` StreamTransport port over the v2 filtered
//! stream: app-only bearer auth, one stream rule per tracked term.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use tokio_util::sync::CancellationToken;

pub mod rules;
pub mod stream;

use slacktweet_core::{
    config::TwitterCredentials,
    errors::Error,
    relay::{
        port::{StreamHandle, StreamListener, StreamTransport},
        types::is_rate_limit,
    },
    Result,
};

const API_BASE: &str = "https://api.twitter.com";

#[derive(Clone, Debug)]
pub struct TwitterClient {
    bearer_token: String,
    http: reqwest::Client,
    stream_http: reqwest::Client,
}

impl TwitterClient {
    /// Exchange the consumer key/secret for an app-only bearer token.
    ///
    /// The filtered stream is app-only, so the user access token pair is only
    /// checked for presence.
    pub async fn authenticate(creds: &TwitterCredentials) -> Result<Self> {
        if creds.consumer_key.is_empty() || creds.consumer_secret.is_empty() {
            return Err(Error::Config("twitter consumer key/secret missing".into()));
        }
        if creds.access_token.is_empty() || creds.access_token_secret.is_empty() {
            tracing::warn!("twitter access token pair not set");
        }
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .map_err(|e| Error::Client(format!("http client build failed: {e}")))?;
        // No overall timeout: the stream response never "completes".
        let stream_http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(15))
            .build()
            .map_err(|e| Error::Client(format!("http client build failed: {e}")))?;

        let resp = http
            .post(format!("{API_BASE}/oauth2/token"))
            .header(
                reqwest::header::AUTHORIZATION,
                basic_auth_header(&creds.consumer_key, &creds.consumer_secret),
            )
            .header(
                reqwest::header::CONTENT_TYPE,
                "application/x-www-form-urlencoded;charset=UTF-8",
            )
            .body("grant_type=client_credentials")
            .send()
            .await
            .map_err(map_err)?;
        let v = json_or_error(resp, "oauth2/token").await?;

        let bearer_token = v
            .get("access_token")
            .and_then(|t| t.as_str())
            .filter(|t| !t.is_empty())
            .ok_or_else(|| Error::Client("twitter auth returned no access_token".into()))?
            .to_string();
        tracing::info!("twitter client authenticated");

        Ok(Self {
            bearer_token,
            http,
            stream_http,
        })
    }
}

fn basic_auth_header(key: &str, secret: &str) -> String {
    format!("Basic {}", STANDARD.encode(format!("{key}:{secret}")))
}

pub(crate) fn map_err(e: reqwest::Error) -> Error {
    Error::Client(format!("twitter request error: {e}"))
}

/// Decode a JSON body, turning non-2xx statuses into errors.
pub(crate) async fn json_or_error(
    resp: reqwest::Response,
    what: &str,
) -> Result<serde_json::Value> {
    let status = resp.status();
    if !status.is_success() {
        if is_rate_limit(status.as_u16()) {
            return Err(Error::UpstreamRateLimited(status.as_u16()));
        }
        let body = resp.text().await.unwrap_or_default();
        return Err(Error::External(format!(
            "twitter {what} failed: {status} {}",
            body.chars().take(200).collect::<String>()
        )));
    }
    resp.json()
        .await
        .map_err(|e| Error::External(format!("twitter json error: {e}")))
}

#[async_trait]
impl StreamTransport for TwitterClient {
    async fn open_filtered_stream(
        &self,
        terms: &[String],
        listener: Arc<dyn StreamListener>,
    ) -> Result<StreamHandle> {
        rules::sync_rules(&self.http, API_BASE, &self.bearer_token, terms).await?;

        let cancel = CancellationToken::new();
        let task = tokio::spawn(stream::run_stream(
            self.stream_http.clone(),
            format!("{API_BASE}{}", stream::STREAM_PATH),
            self.bearer_token.clone(),
            listener,
            cancel.clone(),
        ));
        Ok(StreamHandle::new(cancel, task))
    }
}
