use std::{path::Path, str::FromStr};

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::{errors::Error, Result};

/// Five-level selector exposed on the command line (`-l 0..4`).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warning,
    Error,
    Critical,
}

impl LogLevel {
    pub fn from_index(idx: u8) -> Option<Self> {
        match idx {
            0 => Some(Self::Debug),
            1 => Some(Self::Info),
            2 => Some(Self::Warning),
            3 => Some(Self::Error),
            4 => Some(Self::Critical),
            _ => None,
        }
    }

    /// tracing has no level above ERROR, so CRITICAL collapses into it.
    pub fn as_directive(self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warning => "warn",
            Self::Error | Self::Critical => "error",
        }
    }
}

impl FromStr for LogLevel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if let Ok(idx) = s.trim().parse::<u8>() {
            return Self::from_index(idx)
                .ok_or_else(|| Error::Config(format!("log level out of range: {idx}")));
        }
        match s.trim().to_ascii_uppercase().as_str() {
            "DEBUG" => Ok(Self::Debug),
            "INFO" => Ok(Self::Info),
            "WARNING" | "WARN" => Ok(Self::Warning),
            "ERROR" => Ok(Self::Error),
            "CRITICAL" => Ok(Self::Critical),
            other => Err(Error::Config(format!("unknown log level: {other}"))),
        }
    }
}

/// Logging handle. Created once at startup; dropping or calling
/// [`LogGuard::shutdown`] flushes the file writer.
pub struct LogGuard {
    service_name: String,
    file_guard: Option<WorkerGuard>,
}

impl LogGuard {
    pub fn shutdown(mut self) {
        tracing::debug!(service = %self.service_name, "flushing logs");
        self.file_guard.take();
    }
}

/// Initialize tracing for the bot: stderr plus an optional log file.
///
/// `RUST_LOG` overrides the selected level.
pub fn init(service_name: &str, level: LogLevel, log_file: Option<&Path>) -> Result<LogGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let lvl = level.as_directive();
        EnvFilter::new(format!(
            "warn,{service_name}={lvl},slacktweet_core={lvl},slacktweet_slack={lvl},slacktweet_twitter={lvl}"
        ))
    });

    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_ansi(true);

    let (file_layer, file_guard) = match log_file {
        Some(path) => {
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            let name = path
                .file_name()
                .ok_or_else(|| Error::Config(format!("invalid log file: {}", path.display())))?;
            let appender = tracing_appender::rolling::never(dir, name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_line_number(true);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| Error::External(format!("logging init failed: {e}")))?;

    Ok(LogGuard {
        service_name: service_name.to_string(),
        file_guard,
    })
}
