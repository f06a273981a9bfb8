use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{errors::Error, Result};

/// Channel the "I'm alive" announcement goes to when nothing else is set.
pub const DEFAULT_ANNOUNCE_CHANNEL: &str = "general";

/// Credentials for the content relay (Twitter).
#[derive(Clone, Debug)]
pub struct TwitterCredentials {
    pub consumer_key: String,
    pub consumer_secret: String,
    pub access_token: String,
    pub access_token_secret: String,
}

/// Reconnect behavior after a server-initiated disconnect.
///
/// `max_attempts == 0` retries forever.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(60),
        }
    }
}

impl ReconnectPolicy {
    /// Delay before connect attempt number `attempt` (0-based).
    ///
    /// The first attempt after a disconnect is immediate.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let factor = 1u32.checked_shl(attempt - 1).unwrap_or(u32::MAX);
        self.initial_backoff
            .checked_mul(factor)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }

    pub fn exhausted(&self, failures: u32) -> bool {
        self.max_attempts != 0 && failures >= self.max_attempts
    }
}

/// Typed configuration, loaded once at startup from the environment.
#[derive(Clone, Debug)]
pub struct Config {
    // Slack
    pub slack_bot_token: String,
    pub slack_app_token: String,
    pub default_channel: String,

    // Twitter
    pub twitter: TwitterCredentials,

    // Runtime
    pub log_file: PathBuf,
    pub reconnect: ReconnectPolicy,
}

impl Config {
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));

        let slack_bot_token = required("SLACK_BOT_TOKEN")?;
        let slack_app_token = required("SLACK_APP_TOKEN")?;
        let default_channel = env_str("SLACK_DEFAULT_CHANNEL")
            .and_then(non_empty)
            .unwrap_or_else(|| DEFAULT_ANNOUNCE_CHANNEL.to_string());

        let twitter = TwitterCredentials {
            consumer_key: required("CONSUMER_KEY")?,
            consumer_secret: required("CONSUMER_SECRET")?,
            access_token: required("ACCESS_TOKEN")?,
            access_token_secret: required("ACCESS_TOKEN_SECRET")?,
        };

        let log_file = PathBuf::from(env_str("LOG_FILE").unwrap_or("slacktweet.log".to_string()));

        let defaults = ReconnectPolicy::default();
        let reconnect = ReconnectPolicy {
            max_attempts: env_u32("RECONNECT_MAX_ATTEMPTS").unwrap_or(defaults.max_attempts),
            initial_backoff: env_u64("RECONNECT_INITIAL_BACKOFF_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.initial_backoff),
            max_backoff: env_u64("RECONNECT_MAX_BACKOFF_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.max_backoff),
        };

        Ok(Self {
            slack_bot_token,
            slack_app_token,
            default_channel,
            twitter,
            log_file,
            reconnect,
        })
    }
}

fn required(key: &str) -> Result<String> {
    env_str(key)
        .and_then(non_empty)
        .ok_or_else(|| Error::Config(format!("{key} environment variable is required")))
}

fn env_str(key: &str) -> Option<String> {
    env::var(key).ok()
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for (key, val) in parse_dotenv(&contents) {
        if env::var_os(&key).is_some() {
            continue; // do not override existing env
        }
        env::set_var(key, val);
    }
}

fn parse_dotenv(contents: &str) -> Vec<(String, String)> {
    let mut out = Vec::new();
    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let line = line.strip_prefix("export ").unwrap_or(line);

        let Some((k, v)) = line.split_once('=') else {
            continue;
        };

        let key = k.trim();
        if key.is_empty() {
            continue;
        }

        let mut val = v.trim().to_string();
        // Strip optional surrounding quotes.
        if val.len() >= 2
            && ((val.starts_with('"') && val.ends_with('"'))
                || (val.starts_with('\'') && val.ends_with('\'')))
        {
            val = val[1..val.len() - 1].to_string();
        }

        out.push((key.to_string(), val));
    }
    out
}

fn env_u64(key: &str) -> Option<u64> {
    env_str(key).and_then(|s| s.trim().parse::<u64>().ok())
}

fn env_u32(key: &str) -> Option<u32> {
    env_str(key).and_then(|s| s.trim().parse::<u32>().ok())
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dotenv_parsing_strips_quotes_and_comments() {
        let parsed = parse_dotenv(
            "# creds\nSLACK_BOT_TOKEN=\"xoxb-1\"\nexport CONSUMER_KEY='abc'\n\nBROKEN\n=nokey\n",
        );
        assert_eq!(
            parsed,
            vec![
                ("SLACK_BOT_TOKEN".to_string(), "xoxb-1".to_string()),
                ("CONSUMER_KEY".to_string(), "abc".to_string()),
            ]
        );
    }

    #[test]
    fn reconnect_backoff_doubles_and_caps() {
        let p = ReconnectPolicy {
            max_attempts: 5,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(10),
        };
        assert_eq!(p.delay_for(0), Duration::ZERO);
        assert_eq!(p.delay_for(1), Duration::from_secs(1));
        assert_eq!(p.delay_for(2), Duration::from_secs(2));
        assert_eq!(p.delay_for(4), Duration::from_secs(8));
        assert_eq!(p.delay_for(5), Duration::from_secs(10));
        assert_eq!(p.delay_for(40), Duration::from_secs(10));
    }

    #[test]
    fn zero_max_attempts_never_exhausts() {
        let unbounded = ReconnectPolicy {
            max_attempts: 0,
            ..ReconnectPolicy::default()
        };
        assert!(!unbounded.exhausted(1_000));

        let bounded = ReconnectPolicy::default();
        assert!(!bounded.exhausted(9));
        assert!(bounded.exhausted(10));
    }
}
