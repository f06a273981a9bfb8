use crate::domain::ChannelId;

/// Events a chat connection reports.
///
/// The set is fixed: the controller handles exactly these three hooks.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChatEvent {
    /// Handshake completed; outbound sends are possible.
    Connected,
    /// A user message in some channel.
    Message(InboundMessage),
    /// The server closed (or asked us to close) the connection.
    Disconnected { reason: String },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InboundMessage {
    pub channel: ChannelId,
    pub user: Option<String>,
    /// `None` for events without a text payload (file shares, joins...).
    pub text: Option<String>,
}

/// Outbound payload: plain text or a header + body block.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OutgoingMessage {
    Text(String),
    Block { header: String, body: String },
}

impl OutgoingMessage {
    pub fn block(header: impl Into<String>, body: impl Into<String>) -> Self {
        Self::Block {
            header: header.into(),
            body: body.into(),
        }
    }

    /// Plain-text rendering, used as notification fallback and in logs.
    pub fn fallback_text(&self) -> String {
        match self {
            Self::Text(t) => t.clone(),
            Self::Block { header, body } if body.is_empty() => header.clone(),
            Self::Block { header, body } => format!("{header}\n{body}"),
        }
    }
}
