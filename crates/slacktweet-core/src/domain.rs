/// Bot user id as reported by the chat service (e.g. `U024BE7LH`).
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct BotIdentity(pub String);

/// Chat channel id. Empty means "not set yet".
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct ChannelId(pub String);

impl ChannelId {
    pub fn is_unset(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Display for ChannelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_channel_is_unset() {
        assert!(ChannelId::default().is_unset());
        assert!(!ChannelId("C1".into()).is_unset());
    }
}
