/// One item delivered by the upstream filtered stream.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StreamItem {
    pub id: String,
    pub text: String,
    /// Author handle, without the leading `@`.
    pub author: Option<String>,
    /// Forwarded copy of another item (retweet).
    pub is_repost: bool,
}

impl StreamItem {
    pub fn permalink(&self) -> Option<String> {
        let author = self.author.as_deref()?;
        if self.id.is_empty() {
            return None;
        }
        Some(format!("https://twitter.com/{author}/status/{}", self.id))
    }
}

/// HTTP statuses the upstream uses for "slow down / too many connections".
pub const RATE_LIMIT_CODES: [u16; 2] = [420, 429];

pub fn is_rate_limit(status_code: u16) -> bool {
    RATE_LIMIT_CODES.contains(&status_code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permalink_needs_author_and_id() {
        let item = StreamItem {
            id: "123".into(),
            text: "hello".into(),
            author: Some("rustlang".into()),
            is_repost: false,
        };
        assert_eq!(
            item.permalink().as_deref(),
            Some("https://twitter.com/rustlang/status/123")
        );
        assert_eq!(StreamItem::default().permalink(), None);
    }

    #[test]
    fn enhance_your_calm_and_too_many_requests_are_rate_limits() {
        assert!(is_rate_limit(420));
        assert!(is_rate_limit(429));
        assert!(!is_rate_limit(401));
        assert!(!is_rate_limit(503));
    }
}
