use std::time::Duration;

use tokio::time::Instant;

use crate::domain::{BotIdentity, ChannelId};

/// Connection lifecycle as seen by the controller. Sends are only attempted
/// while `Connected`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

/// Keyword filters: insertion-ordered, no duplicates (case-sensitive).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FilterSet {
    terms: Vec<String>,
}

impl FilterSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add every term not already present; returns exactly the newly added ones.
    pub fn add<I, S>(&mut self, terms: I) -> Vec<String>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut added = Vec::new();
        for term in terms {
            let term = term.into();
            if term.is_empty() || self.contains(&term) {
                continue;
            }
            self.terms.push(term.clone());
            added.push(term);
        }
        added
    }

    /// Remove every listed term that is present; returns exactly the removed ones.
    pub fn remove<I, S>(&mut self, terms: I) -> Vec<String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut removed = Vec::new();
        for term in terms {
            let term = term.as_ref();
            if let Some(pos) = self.terms.iter().position(|t| t == term) {
                removed.push(self.terms.remove(pos));
            }
        }
        removed
    }

    pub fn clear(&mut self) {
        self.terms.clear();
    }

    fn contains(&self, term: &str) -> bool {
        self.terms.iter().any(|t| t == term)
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.terms.iter().map(String::as_str)
    }

    pub fn to_vec(&self) -> Vec<String> {
        self.terms.clone()
    }
}

/// Run-time state of one bot process. Never persisted.
#[derive(Clone, Debug)]
pub struct Session {
    identity: BotIdentity,
    active_channel: ChannelId,
    pub filters: FilterSet,
    started_at: Instant,
    pub connection_state: ConnectionState,
}

impl Session {
    pub fn new(identity: BotIdentity) -> Self {
        Self::started_at(identity, Instant::now())
    }

    pub fn started_at(identity: BotIdentity, started_at: Instant) -> Self {
        Self {
            identity,
            active_channel: ChannelId::default(),
            filters: FilterSet::new(),
            started_at,
            connection_state: ConnectionState::Disconnected,
        }
    }

    pub fn identity(&self) -> &BotIdentity {
        &self.identity
    }

    pub fn active_channel(&self) -> &ChannelId {
        &self.active_channel
    }

    /// Last-writer-wins update of the reply channel. Returns `true` when it changed.
    pub fn check_channel_change(&mut self, channel: &ChannelId) -> bool {
        if &self.active_channel == channel {
            return false;
        }
        tracing::info!(
            from = %self.active_channel,
            to = %channel,
            "active channel changed"
        );
        self.active_channel = channel.clone();
        true
    }

    /// Monotonic; never negative.
    pub fn uptime_at(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.started_at)
    }

    pub fn uptime(&self) -> Duration {
        self.uptime_at(Instant::now())
    }
}
