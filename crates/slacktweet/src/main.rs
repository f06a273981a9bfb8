use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;

use slacktweet_core::{
    config::Config,
    controller::{
        ControllerConfig, SessionController, ShutdownReason, DEFAULT_RELAY_BACKLOG,
        DEFAULT_RELAY_INTERVAL,
    },
    domain::ChannelId,
    logging::{self, LogLevel},
    messaging::port::ChatConnection,
    relay::StreamRelay,
    replies::RandomPicker,
    utils::{format_duration, iso_timestamp_utc},
};
use slacktweet_slack::{SlackConfig, SlackConnection};
use slacktweet_twitter::TwitterClient;

/// Slack bot that relays a filtered Twitter stream into the channel it was last addressed in.
#[derive(Parser, Debug)]
#[command(name = "slacktweet", version, about)]
struct Args {
    /// Log level: 0=DEBUG 1=INFO 2=WARNING 3=ERROR 4=CRITICAL
    #[arg(short = 'l', long = "log", default_value_t = 1,
          value_parser = clap::value_parser!(u8).range(0..=4))]
    log: u8,
}

#[tokio::main]
async fn main() -> Result<(), slacktweet_core::Error> {
    let args = Args::parse();
    let cfg = Config::load()?;

    let level = LogLevel::from_index(args.log).unwrap_or_default();
    let guard = logging::init("slacktweet", level, Some(&cfg.log_file))?;
    tracing::info!(
        pid = std::process::id(),
        level = ?level,
        started_at = %iso_timestamp_utc(),
        "slacktweet starting"
    );

    let slack = SlackConnection::new(SlackConfig {
        bot_token: cfg.slack_bot_token.clone(),
        app_token: cfg.slack_app_token.clone(),
    })?;
    let connection: Arc<dyn ChatConnection> = Arc::new(slack);

    let controller = SessionController::start(
        connection,
        ControllerConfig {
            default_channel: ChannelId(cfg.default_channel.clone()),
            reconnect: cfg.reconnect,
            relay_backlog: DEFAULT_RELAY_BACKLOG,
            relay_interval: DEFAULT_RELAY_INTERVAL,
        },
        Arc::new(RandomPicker),
    )
    .await?;

    let twitter = TwitterClient::authenticate(&cfg.twitter).await?;
    controller.register_relay(Arc::new(StreamRelay::new(Arc::new(twitter))));

    tokio::spawn(forward_signals(controller.shutdown_token()));

    let reason = controller.run().await;
    let uptime = controller.session().await.uptime();
    match &reason {
        Ok(ShutdownReason::Requested) => {
            tracing::info!(uptime = %format_duration(uptime), "slacktweet stopped")
        }
        Ok(ShutdownReason::ReconnectAbandoned) => {
            tracing::error!(uptime = %format_duration(uptime), "gave up reconnecting to slack")
        }
        Err(e) => tracing::error!(error = %e, fatal = e.is_fatal(), "slacktweet failed"),
    }
    guard.shutdown();

    reason.map(|_| ())
}

/// Turn SIGINT/SIGTERM/SIGHUP into a cooperative shutdown.
async fn forward_signals(shutdown: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let (mut term, mut hup) = match (
            signal(SignalKind::terminate()),
            signal(SignalKind::hangup()),
        ) {
            (Ok(term), Ok(hup)) => (term, hup),
            (Err(e), _) | (_, Err(e)) => {
                tracing::warn!(error = %e, "signal handlers unavailable; ctrl-c only");
                let _ = tokio::signal::ctrl_c().await;
                shutdown.cancel();
                return;
            }
        };

        tokio::select! {
            _ = tokio::signal::ctrl_c() => tracing::info!("SIGINT received"),
            _ = term.recv() => tracing::info!("SIGTERM received"),
            _ = hup.recv() => tracing::info!("SIGHUP received"),
            _ = shutdown.cancelled() => return,
        }
    }

    #[cfg(not(unix))]
    {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => tracing::info!("interrupt received"),
            _ = shutdown.cancelled() => return,
        }
    }

    shutdown.cancel();
}
