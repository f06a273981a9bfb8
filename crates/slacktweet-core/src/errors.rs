/// Core error type for the bridge.
///
/// Adapter crates map their transport errors into this type so the session
/// controller can decide what is fatal (identity lookup), what is isolated to
/// a single message (API rejections, client errors) and what only affects the
/// relay subscription (upstream rate limiting).
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("identity lookup failed: {0}")]
    IdentityLookupFailed(String),

    #[error("request rejected by chat service: {0}")]
    ApiRejected(String),

    #[error("not connected")]
    NotConnected,

    #[error("client error: {0}")]
    Client(String),

    #[error("upstream rate limited (status {0})")]
    UpstreamRateLimited(u16),

    #[error("server closed the connection: {0}")]
    ServerDisconnect(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("external error: {0}")]
    External(String),
}

impl Error {
    /// Short label used when logging recovered failures.
    pub fn category(&self) -> &'static str {
        match self {
            Error::IdentityLookupFailed(_) => "identity_lookup_failed",
            Error::ApiRejected(_) => "api_rejected",
            Error::NotConnected => "not_connected",
            Error::Client(_) => "client_error",
            Error::UpstreamRateLimited(_) => "upstream_rate_limited",
            Error::ServerDisconnect(_) => "server_disconnect",
            Error::Config(_) => "config",
            Error::Io(_) => "io",
            Error::Json(_) => "json",
            Error::External(_) => "external",
        }
    }

    /// Startup failures (identity lookup, configuration) take the process down.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::IdentityLookupFailed(_) | Error::Config(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_startup_failures_are_fatal() {
        assert!(Error::IdentityLookupFailed("no auth".into()).is_fatal());
        assert!(Error::Config("missing token".into()).is_fatal());
        assert!(!Error::ApiRejected("channel_not_found".into()).is_fatal());
        assert!(!Error::NotConnected.is_fatal());
        assert!(!Error::Client("timeout".into()).is_fatal());
        assert!(!Error::UpstreamRateLimited(420).is_fatal());
    }

    #[test]
    fn categories_are_stable_labels() {
        assert_eq!(Error::NotConnected.category(), "not_connected");
        assert_eq!(
            Error::ApiRejected("x".into()).category(),
            "api_rejected"
        );
        assert_eq!(Error::Client("x".into()).category(), "client_error");
    }
}
