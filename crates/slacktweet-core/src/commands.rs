//! Command parsing: mention detection, word splitting and filter-term parsing.
//!
//! Parsing is pure; side effects live in the controller's dispatch.

use regex::Regex;

use crate::{domain::BotIdentity, errors::Error, Result};

/// A command addressed to the bot.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    Help,
    Ping,
    /// `exit` or `quit`.
    Exit,
    List,
    Clear,
    Add(Vec<String>),
    Del(Vec<String>),
    /// Anything else, kept verbatim for logging.
    Unknown(String),
}

/// Matches the bot's mention token `<@ID>` (Slack may append `|label`).
#[derive(Clone, Debug)]
pub struct MentionMatcher {
    re: Regex,
}

impl MentionMatcher {
    pub fn new(identity: &BotIdentity) -> Result<Self> {
        let pattern = format!(r"<@{}(?:\|[^>]*)?>", regex::escape(&identity.0));
        let re = Regex::new(&pattern)
            .map_err(|e| Error::External(format!("invalid mention pattern: {e}")))?;
        Ok(Self { re })
    }

    pub fn is_mentioned(&self, text: &str) -> bool {
        self.re.is_match(text)
    }

    /// Remove every mention token and trim. `None` when the bot is not mentioned.
    pub fn strip(&self, text: &str) -> Option<String> {
        if !self.is_mentioned(text) {
            return None;
        }
        Some(self.re.replace_all(text, " ").trim().to_string())
    }
}

/// Parse the text that follows the mention token.
///
/// Matching is case-sensitive and exact on the first word. `add`/`del` need
/// at least one term; without one they fall through to `Unknown`.
pub fn parse_command(text: &str) -> Command {
    let words: Vec<&str> = text.split_whitespace().collect();
    match words.as_slice() {
        ["help"] => Command::Help,
        ["ping"] => Command::Ping,
        ["exit"] | ["quit"] => Command::Exit,
        ["list"] => Command::List,
        ["clear"] => Command::Clear,
        ["add", rest @ ..] if !rest.is_empty() => match parse_filter_terms(rest) {
            terms if terms.is_empty() => Command::Unknown(text.trim().to_string()),
            terms => Command::Add(terms),
        },
        ["del", rest @ ..] if !rest.is_empty() => match parse_filter_terms(rest) {
            terms if terms.is_empty() => Command::Unknown(text.trim().to_string()),
            terms => Command::Del(terms),
        },
        _ => Command::Unknown(text.trim().to_string()),
    }
}

/// Rejoin words with single spaces, split on commas, trim each piece.
///
/// `["climate", "change,", "rust", "lang"]` -> `["climate change", "rust lang"]`.
pub fn parse_filter_terms(words: &[&str]) -> Vec<String> {
    words
        .join(" ")
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matcher() -> MentionMatcher {
        MentionMatcher::new(&BotIdentity("UBOT".into())).unwrap()
    }

    #[test]
    fn detects_and_strips_mention() {
        let m = matcher();
        assert_eq!(m.strip("<@UBOT> help").as_deref(), Some("help"));
        assert_eq!(m.strip("<@UBOT|slacktweet>   list ").as_deref(), Some("list"));
        assert_eq!(m.strip("help"), None);
        assert_eq!(m.strip("<@UOTHER> help"), None);
    }

    #[test]
    fn identity_is_escaped_in_pattern() {
        let m = MentionMatcher::new(&BotIdentity("U.1".into())).unwrap();
        assert!(m.is_mentioned("<@U.1> ping"));
        assert!(!m.is_mentioned("<@UX1> ping"));
    }

    #[test]
    fn single_word_commands() {
        assert_eq!(parse_command("help"), Command::Help);
        assert_eq!(parse_command("ping"), Command::Ping);
        assert_eq!(parse_command("exit"), Command::Exit);
        assert_eq!(parse_command("quit"), Command::Exit);
        assert_eq!(parse_command("list"), Command::List);
        assert_eq!(parse_command(" clear "), Command::Clear);
    }

    #[test]
    fn matching_is_case_sensitive() {
        assert_eq!(parse_command("Help"), Command::Unknown("Help".into()));
        assert_eq!(parse_command("LIST"), Command::Unknown("LIST".into()));
    }

    #[test]
    fn extra_words_make_simple_commands_unknown() {
        assert_eq!(
            parse_command("ping me"),
            Command::Unknown("ping me".into())
        );
        assert_eq!(parse_command(""), Command::Unknown(String::new()));
    }

    #[test]
    fn add_and_del_need_terms() {
        assert_eq!(parse_command("add"), Command::Unknown("add".into()));
        assert_eq!(parse_command("del"), Command::Unknown("del".into()));
        assert_eq!(parse_command("add , ,"), Command::Unknown("add , ,".into()));
    }

    #[test]
    fn irregular_comma_spacing_is_trimmed() {
        assert_eq!(
            parse_command("add a,b , c"),
            Command::Add(vec!["a".into(), "b".into(), "c".into()])
        );
    }

    #[test]
    fn multi_word_terms_split_on_commas() {
        assert_eq!(
            parse_command("add climate change, rust lang"),
            Command::Add(vec!["climate change".into(), "rust lang".into()])
        );
        assert_eq!(
            parse_command("del   golang"),
            Command::Del(vec!["golang".into()])
        );
    }
}
