use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::{
    domain::{BotIdentity, ChannelId},
    messaging::types::{ChatEvent, OutgoingMessage},
    Result,
};

/// Chat-service port.
///
/// Slack is the implementation in this workspace; the shape keeps transport
/// details (sockets, envelopes, HTTP) out of the session controller.
#[async_trait]
pub trait ChatConnection: Send + Sync {
    /// One-time directory lookup of the bot's own user id.
    async fn lookup_self_identity(&self) -> Result<BotIdentity>;

    /// Open the persistent connection. Events arrive on the returned
    /// receiver until the connection ends; the sender is dropped then.
    async fn connect(&self) -> Result<mpsc::Receiver<ChatEvent>>;

    async fn send_message(&self, channel: &ChannelId, message: &OutgoingMessage) -> Result<()>;

    /// Close the connection if one is open. Idempotent.
    async fn disconnect(&self) -> Result<()>;
}
