use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex as StdMutex,
    },
    time::Duration,
};

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tokio::time::{sleep, sleep_until, timeout, Instant};
use tokio_util::sync::CancellationToken;

use crate::{
    commands::{parse_command, Command, MentionMatcher},
    config::ReconnectPolicy,
    domain::{BotIdentity, ChannelId},
    errors::Error,
    messaging::{
        port::ChatConnection,
        types::{ChatEvent, InboundMessage, OutgoingMessage},
    },
    relay::{types::StreamItem, StreamRelay},
    replies::{self, ReplyPicker},
    session::{ConnectionState, Session},
    utils::format_duration,
    Result,
};

const TASK_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Relayed items waiting to be posted; further items are dropped.
pub const DEFAULT_RELAY_BACKLOG: usize = 16;
/// Spacing between relayed posts (Slack allows ~1 post/sec per channel).
pub const DEFAULT_RELAY_INTERVAL: Duration = Duration::from_millis(1050);

#[derive(Clone, Debug)]
pub struct ControllerConfig {
    /// Where the "I'm alive" announcement goes (and relayed items, until a
    /// user has talked to the bot somewhere).
    pub default_channel: ChannelId,
    pub reconnect: ReconnectPolicy,
    /// Capacity of the relayed-item queue. Command replies never wait on it.
    pub relay_backlog: usize,
    pub relay_interval: Duration,
}

/// Side effect requested by a command, performed after the state transition.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Effect {
    None,
    /// Filters changed; the relay must track the new set.
    FiltersChanged(Vec<String>),
    /// Send the reply, then stop the event loop.
    Shutdown,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Dispatch {
    pub reply: OutgoingMessage,
    pub effect: Effect,
}

/// Apply `command` to `session` and compute the reply. No I/O.
pub fn dispatch(
    session: &mut Session,
    command: Command,
    picker: &dyn ReplyPicker,
    now: Instant,
) -> Dispatch {
    match command {
        Command::Help => Dispatch {
            reply: replies::help(),
            effect: Effect::None,
        },
        Command::Ping => Dispatch {
            reply: replies::uptime(session.uptime_at(now)),
            effect: Effect::None,
        },
        Command::Exit => Dispatch {
            reply: replies::farewell(picker),
            effect: Effect::Shutdown,
        },
        Command::List => Dispatch {
            reply: replies::filter_list(session.filters.iter()),
            effect: Effect::None,
        },
        Command::Clear => {
            let changed = !session.filters.is_empty();
            session.filters.clear();
            Dispatch {
                reply: replies::filters_cleared(),
                effect: filters_effect(session, changed),
            }
        }
        Command::Add(terms) => {
            let added = session.filters.add(terms);
            Dispatch {
                reply: replies::filters_added(&added),
                effect: filters_effect(session, !added.is_empty()),
            }
        }
        Command::Del(terms) => {
            let removed = session.filters.remove(&terms);
            Dispatch {
                reply: replies::filters_deleted(&removed),
                effect: filters_effect(session, !removed.is_empty()),
            }
        }
        Command::Unknown(raw) => {
            tracing::debug!(command = %raw, "unrecognized command");
            Dispatch {
                reply: replies::unknown(picker),
                effect: Effect::None,
            }
        }
    }
}

fn filters_effect(session: &Session, changed: bool) -> Effect {
    if changed {
        Effect::FiltersChanged(session.filters.to_vec())
    } else {
        Effect::None
    }
}

/// Why [`SessionController::run`] returned.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShutdownReason {
    /// `exit`/`quit` or an OS signal triggered the cancellation token.
    Requested,
    /// Reconnect attempts ran out.
    ReconnectAbandoned,
}

struct Inner {
    connection: Arc<dyn ChatConnection>,
    picker: Arc<dyn ReplyPicker>,
    cfg: ControllerConfig,
    mention: MentionMatcher,
    session: Mutex<Session>,
    relay: StdMutex<Option<Arc<StreamRelay>>>,
    relayed_tx: mpsc::Sender<StreamItem>,
    relayed_rx: Mutex<Option<mpsc::Receiver<StreamItem>>>,
    // Held from dispatch until the relay tracks the resulting filters.
    filters_sync: Mutex<()>,
    cancel: CancellationToken,
    cleaned_up: AtomicBool,
}

/// Chat-side state machine: owns the session, interprets mentions, keeps the
/// relay's filters in sync and drives the connection lifecycle.
#[derive(Clone)]
pub struct SessionController {
    inner: Arc<Inner>,
}

impl SessionController {
    /// Resolve the bot identity and build the controller.
    ///
    /// A failed lookup is fatal: without an identity no mention can be matched.
    pub async fn start(
        connection: Arc<dyn ChatConnection>,
        cfg: ControllerConfig,
        picker: Arc<dyn ReplyPicker>,
    ) -> Result<Self> {
        let identity = connection
            .lookup_self_identity()
            .await
            .map_err(|e| match e {
                Error::IdentityLookupFailed(msg) => Error::IdentityLookupFailed(msg),
                other => Error::IdentityLookupFailed(other.to_string()),
            })?;
        tracing::info!(identity = %identity.0, "bot identity resolved");
        Self::with_identity(connection, cfg, picker, identity)
    }

    fn with_identity(
        connection: Arc<dyn ChatConnection>,
        cfg: ControllerConfig,
        picker: Arc<dyn ReplyPicker>,
        identity: BotIdentity,
    ) -> Result<Self> {
        let mention = MentionMatcher::new(&identity)?;
        let (relayed_tx, relayed_rx) = mpsc::channel(cfg.relay_backlog.max(1));
        Ok(Self {
            inner: Arc::new(Inner {
                connection,
                picker,
                cfg,
                mention,
                session: Mutex::new(Session::new(identity)),
                relay: StdMutex::new(None),
                relayed_tx,
                relayed_rx: Mutex::new(Some(relayed_rx)),
                filters_sync: Mutex::new(()),
                cancel: CancellationToken::new(),
                cleaned_up: AtomicBool::new(false),
            }),
        })
    }

    /// Token that stops [`run`](Self::run). Signal handlers cancel it.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.inner.cancel.clone()
    }

    /// Bind the relay: filter commands notify it and its matched items are
    /// posted to the active channel.
    ///
    /// Items arriving while the backlog is full are dropped.
    pub fn register_relay(&self, relay: Arc<StreamRelay>) {
        let tx = self.inner.relayed_tx.clone();
        let cancel = self.inner.cancel.clone();
        relay.register_stream_handler(Arc::new(move |item: &StreamItem| {
            if cancel.is_cancelled() {
                return false;
            }
            match tx.try_send(item.clone()) {
                Ok(()) => true,
                Err(mpsc::error::TrySendError::Full(dropped)) => {
                    tracing::debug!(id = %dropped.id, "relay backlog full; dropping item");
                    true
                }
                Err(mpsc::error::TrySendError::Closed(_)) => false,
            }
        }));
        *self
            .inner
            .relay
            .lock()
            .unwrap_or_else(|p| p.into_inner()) = Some(relay);
    }

    pub async fn session(&self) -> Session {
        self.inner.session.lock().await.clone()
    }

    /// Handle one inbound message (also used directly by tests).
    pub async fn handle_message(&self, msg: InboundMessage) {
        self.inner.handle_message(msg).await;
    }

    /// Run the event loop until shutdown. Cleanup runs exactly once.
    pub async fn run(&self) -> Result<ShutdownReason> {
        let relayed_rx = self
            .inner
            .relayed_rx
            .lock()
            .await
            .take()
            .ok_or_else(|| Error::External("controller is already running".to_string()))?;

        let mut tasks: JoinSet<()> = JoinSet::new();
        let mut attempts: u32 = 0;
        let cancel = self.inner.cancel.clone();

        let poster = self.inner.clone();
        tasks.spawn(async move { poster.relay_poster(relayed_rx).await });

        let reason = 'outer: loop {
            let mut events = match self.inner.connect_with_retry(&mut attempts).await {
                Ok(Some(rx)) => rx,
                Ok(None) => break ShutdownReason::Requested,
                Err(e) => {
                    tracing::error!(
                        category = e.category(),
                        attempts,
                        "giving up on reconnect: {e}"
                    );
                    break ShutdownReason::ReconnectAbandoned;
                }
            };

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break 'outer ShutdownReason::Requested,

                    ev = events.recv() => match ev {
                        Some(ChatEvent::Connected) => {
                            attempts = 0;
                            self.inner.set_state(ConnectionState::Connected).await;
                            tracing::info!("chat connection established");
                            let inner = self.inner.clone();
                            tasks.spawn(async move { inner.announce().await });
                        }
                        Some(ChatEvent::Message(msg)) => {
                            let inner = self.inner.clone();
                            tasks.spawn(async move { inner.handle_message(msg).await });
                        }
                        Some(ChatEvent::Disconnected { reason }) => {
                            let err = Error::ServerDisconnect(reason);
                            tracing::warn!(category = err.category(), "{err}; reconnecting");
                            self.inner.set_state(ConnectionState::Disconnected).await;
                            continue 'outer;
                        }
                        None => {
                            tracing::warn!("chat event stream ended; reconnecting");
                            self.inner.set_state(ConnectionState::Disconnected).await;
                            continue 'outer;
                        }
                    },

                    Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                        if let Err(e) = joined {
                            tracing::error!("event task failed: {e}");
                        }
                    }
                }
            }
        };

        self.inner.cleanup(tasks).await;
        Ok(reason)
    }
}

impl Inner {
    async fn set_state(&self, state: ConnectionState) {
        self.session.lock().await.connection_state = state;
    }

    /// Returns `Ok(None)` when cancelled while (re)connecting.
    async fn connect_with_retry(
        &self,
        attempts: &mut u32,
    ) -> Result<Option<mpsc::Receiver<ChatEvent>>> {
        let policy = self.cfg.reconnect;
        let mut last_err: Option<Error> = None;
        loop {
            if policy.exhausted(*attempts) {
                return Err(last_err.unwrap_or_else(|| {
                    Error::ServerDisconnect(format!(
                        "no successful handshake after {} attempts",
                        *attempts
                    ))
                }));
            }

            let delay = policy.delay_for(*attempts);
            *attempts += 1;
            if !delay.is_zero() {
                tracing::info!(attempt = *attempts, "reconnecting in {delay:?}");
                tokio::select! {
                    _ = self.cancel.cancelled() => return Ok(None),
                    _ = sleep(delay) => {}
                }
            }
            if self.cancel.is_cancelled() {
                return Ok(None);
            }

            self.set_state(ConnectionState::Connecting).await;
            let res = tokio::select! {
                _ = self.cancel.cancelled() => return Ok(None),
                res = self.connection.connect() => res,
            };
            match res {
                Ok(rx) => return Ok(Some(rx)),
                Err(e) => {
                    tracing::warn!(
                        category = e.category(),
                        attempt = *attempts,
                        "connect failed: {e}"
                    );
                    self.set_state(ConnectionState::Disconnected).await;
                    last_err = Some(e);
                }
            }
        }
    }

    async fn send(&self, channel: &ChannelId, message: &OutgoingMessage) -> Result<()> {
        if self.session.lock().await.connection_state != ConnectionState::Connected {
            return Err(Error::NotConnected);
        }
        self.connection.send_message(channel, message).await
    }

    async fn announce(&self) {
        let msg = OutgoingMessage::Text(replies::ALIVE_ANNOUNCEMENT.to_string());
        if let Err(e) = self.send(&self.cfg.default_channel, &msg).await {
            log_send_failure("announce", &e);
        }
    }

    async fn handle_message(&self, msg: InboundMessage) {
        let Some(text) = msg.text.as_deref() else {
            return;
        };
        let Some(stripped) = self.mention.strip(text) else {
            return;
        };
        let command = parse_command(&stripped);
        tracing::info!(channel = %msg.channel, command = ?command, "command received");

        let filters_guard = self.filters_sync.lock().await;
        let (result, channel) = {
            let mut session = self.session.lock().await;
            session.check_channel_change(&msg.channel);
            let result = dispatch(&mut session, command, self.picker.as_ref(), Instant::now());
            (result, session.active_channel().clone())
        };

        if let Effect::FiltersChanged(filters) = &result.effect {
            self.notify_relay(filters).await;
        }
        drop(filters_guard);

        if let Err(e) = self.send(&channel, &result.reply).await {
            log_send_failure("reply", &e);
        }

        if result.effect == Effect::Shutdown {
            tracing::warn!("exit requested from chat");
            self.cancel.cancel();
        }
    }

    async fn notify_relay(&self, filters: &[String]) {
        let relay = self
            .relay
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone();
        let Some(relay) = relay else {
            tracing::debug!("no relay registered; filters kept locally");
            return;
        };
        if let Err(e) = relay.replace_filters(filters).await {
            tracing::error!(category = e.category(), "relay filter update failed: {e}");
        }
    }

    /// Posts queued relay items one at a time, `relay_interval` apart.
    async fn relay_poster(&self, mut items: mpsc::Receiver<StreamItem>) {
        let mut next_slot = Instant::now();
        loop {
            let item = tokio::select! {
                _ = self.cancel.cancelled() => break,
                item = items.recv() => match item {
                    Some(item) => item,
                    None => break,
                },
            };
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = sleep_until(next_slot) => {}
            }
            self.post_relayed(item).await;
            next_slot = Instant::now() + self.cfg.relay_interval;
        }
        tracing::debug!("relay poster stopped");
    }

    async fn post_relayed(&self, item: StreamItem) {
        let channel = {
            let session = self.session.lock().await;
            if session.active_channel().is_unset() {
                self.cfg.default_channel.clone()
            } else {
                session.active_channel().clone()
            }
        };
        let msg = OutgoingMessage::Text(format_relayed(&item));
        if let Err(e) = self.send(&channel, &msg).await {
            log_send_failure("relay", &e);
        }
    }

    async fn cleanup(&self, mut tasks: JoinSet<()>) {
        if self.cleaned_up.swap(true, Ordering::SeqCst) {
            return;
        }
        self.cancel.cancel();

        // Let in-flight replies (the farewell among them) finish.
        let drained = timeout(TASK_DRAIN_TIMEOUT, async {
            while tasks.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            tracing::warn!("aborting {} unfinished event tasks", tasks.len());
            tasks.abort_all();
        }

        self.set_state(ConnectionState::Disconnecting).await;

        let relay = self
            .relay
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone();
        if let Some(relay) = relay {
            relay.disconnect().await;
        }
        if let Err(e) = self.connection.disconnect().await {
            tracing::warn!(category = e.category(), "disconnect failed: {e}");
        }

        let uptime = {
            let mut session = self.session.lock().await;
            session.connection_state = ConnectionState::Disconnected;
            session.uptime()
        };
        tracing::info!(uptime = %format_duration(uptime), "chat client stopped");
    }
}

fn log_send_failure(context: &str, e: &Error) {
    match e {
        Error::ApiRejected(_) => tracing::error!(category = e.category(), context, "{e}"),
        Error::NotConnected => tracing::warn!(category = e.category(), context, "{e}"),
        _ => tracing::error!(category = e.category(), context, "send failed: {e}"),
    }
}

/// Chat rendering of a relayed item.
pub fn format_relayed(item: &StreamItem) -> String {
    let mut out = match item.author.as_deref() {
        Some(author) => format!("*@{author}*: {}", item.text),
        None => item.text.clone(),
    };
    if let Some(link) = item.permalink() {
        out.push('\n');
        out.push_str(&link);
    }
    out
}
