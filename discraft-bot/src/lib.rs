//! Discraft - Discord bot that links Discord accounts to Minecraft accounts.
//!
//! ## Architecture
//!
//! Chat messages arrive over the Discord gateway, are queued and dispatched
//! one task per message through the command router. The Minecraft side
//! finishes account links through the HTTP callback. A sweep task writes
//! cached user settings back to the store and evicts idle sessions.
//!
//! ```text
//! Discord → gateway listener → queue → CommandRouter → SessionCache / LinkBroker
//!    ↑                                       ↓
//!    └────────────── replies ←───────────────┘
//! Minecraft → GET /link → LinkBroker → DM notice
//! ```

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod cached;
pub mod commands;
pub mod discord;
pub mod lang;
pub mod link;
pub mod message;
pub mod routes;
pub mod session;
pub mod store;
pub mod traits;

// Re-export commonly used types
pub use cached::Cached;
pub use commands::{Command, CommandRouter, Dispatch, DispatchOutcome, Location, Sender};
pub use discord::DiscordChannel;
pub use lang::{BotTexts, LanguageRegistry};
pub use link::{LinkBroker, LinkTicket};
pub use message::{ChannelKind, ChannelMessage, Identity, OutgoingMessage, Recipient};
pub use routes::{build_router, create_state, BotState};
pub use session::{SessionCache, SessionGuard, SweepReport};
pub use store::{GuardedStore, MemoryStore, SqliteStore, UserStore};
pub use traits::{Channel, ChannelError, ChannelResult};

use anyhow::Context;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinHandle, JoinSet};

use commands::{HelpCommand, LangCommand, LinkCommand, RegisterCommand};
use discraft_common::config::Config;

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// A listener session that lasted this long resets the backoff.
const STABLE_CONNECTION: Duration = Duration::from_secs(60);

/// How long shutdown waits for messages that are still being handled.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Everything that answers chat messages, shared between tasks.
pub struct Bot {
    pub sessions: Arc<SessionCache>,
    pub links: Arc<LinkBroker>,
    pub router: Arc<CommandRouter>,
    pub texts: BotTexts,
}

impl Bot {
    /// Wire the bot over `store`, which is wrapped with the configured
    /// timeout and retry policy.
    pub fn new(
        config: &Config,
        registry: Arc<LanguageRegistry>,
        store: Arc<dyn UserStore>,
    ) -> discraft_common::Result<Self> {
        let store: Arc<dyn UserStore> = Arc::new(GuardedStore::from_config(store, &config.store));
        let texts = BotTexts::new(registry, &config.lang.bot_lang)?;

        let sessions = Arc::new(SessionCache::from_config(store.clone(), &config.session));
        let links = Arc::new(LinkBroker::new(store, config.link.ttl()));

        let mut router = CommandRouter::new(&config.discord.command_prefix, texts.clone())?;
        router.register(Arc::new(HelpCommand))?;
        router.register(Arc::new(RegisterCommand::new(sessions.clone())))?;
        router.register(Arc::new(LangCommand::new(sessions.clone())))?;
        router.register(Arc::new(LinkCommand::new(links.clone())))?;

        Ok(Self {
            sessions,
            links,
            router: Arc::new(router),
            texts,
        })
    }

    /// Open the SQLite store and language files named by `config`.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let lang_dir = config.lang.dir_path();
        let registry = LanguageRegistry::load_dir(&lang_dir)
            .with_context(|| format!("Failed to load languages from {}", lang_dir.display()))?;
        tracing::info!(
            languages = registry.languages().count(),
            bot_lang = %config.lang.bot_lang,
            "Loaded languages"
        );

        let db_path = config.store.db_path();
        let store = SqliteStore::open(&db_path)
            .with_context(|| format!("Failed to open store at {}", db_path.display()))?;
        tracing::info!(path = %db_path.display(), "Opened store");

        Ok(Self::new(config, Arc::new(registry), Arc::new(store))?)
    }

    /// Dispatch one chat message and deliver its replies through `channel`.
    pub async fn handle_message(
        &self,
        channel: &dyn Channel,
        message: &ChannelMessage,
    ) -> DispatchOutcome {
        let sender = Sender::from(message);
        let dispatch = self.router.dispatch(&sender, &message.text).await;

        for reply in dispatch.replies {
            let outgoing = reply.into_outgoing(&sender);
            if let Err(e) = channel.send(outgoing).await {
                tracing::warn!(
                    channel = channel.name(),
                    user = %sender.identity,
                    error = %e,
                    "Failed to deliver reply"
                );
            }
        }
        dispatch.outcome
    }

    /// One maintenance pass: session write-back and eviction, then expired
    /// link tickets.
    pub async fn sweep(&self) -> SweepReport {
        let report = self.sessions.sweep(session::now_millis()).await;
        self.links.purge_expired(chrono::Utc::now());
        report
    }

    /// Write every cached session back to the store and evict what is idle.
    pub async fn flush_all(&self) -> SweepReport {
        self.sessions.sweep(i64::MAX).await
    }
}

/// Keep `channel` listening, reconnecting with exponential backoff.
///
/// Stops once the message queue is closed.
pub fn spawn_listener(
    channel: Arc<dyn Channel>,
    tx: mpsc::Sender<ChannelMessage>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut backoff = INITIAL_BACKOFF;
        let mut retries: u32 = 0;

        loop {
            let started = Instant::now();
            match channel.listen(tx.clone()).await {
                Ok(()) => break,
                Err(e) => {
                    if started.elapsed() >= STABLE_CONNECTION {
                        backoff = INITIAL_BACKOFF;
                        retries = 0;
                    }
                    retries += 1;
                    tracing::warn!(
                        channel = channel.name(),
                        error = %e,
                        retry = retries,
                        backoff_secs = backoff.as_secs(),
                        "Listener stopped, reconnecting"
                    );
                    tokio::time::sleep(backoff).await;
                    backoff = std::cmp::min(backoff * 2, MAX_BACKOFF);
                }
            }
            if tx.is_closed() {
                break;
            }
        }
        tracing::info!(channel = channel.name(), "Listener finished");
    })
}

/// Drain the message queue, handling each message in its own task.
///
/// Once `shutdown` fires (or its sender is dropped) the queue is closed,
/// messages already queued are still handled, and the dispatcher waits up to
/// [`SHUTDOWN_GRACE`] for every handler to finish before returning.
pub fn spawn_dispatcher(
    bot: Arc<Bot>,
    channel: Arc<dyn Channel>,
    mut rx: mpsc::Receiver<ChannelMessage>,
    mut shutdown: oneshot::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut in_flight = JoinSet::new();
        let dispatch = |in_flight: &mut JoinSet<()>, message: ChannelMessage| {
            let bot = bot.clone();
            let channel = channel.clone();
            in_flight.spawn(async move {
                bot.handle_message(channel.as_ref(), &message).await;
            });
        };

        loop {
            tokio::select! {
                message = rx.recv() => match message {
                    Some(message) => dispatch(&mut in_flight, message),
                    None => break,
                },
                _ = &mut shutdown => break,
                Some(finished) = in_flight.join_next(), if !in_flight.is_empty() => {
                    if let Err(e) = finished {
                        tracing::error!(error = %e, "Message task failed");
                    }
                }
            }
        }

        rx.close();
        while let Some(message) = rx.recv().await {
            dispatch(&mut in_flight, message);
        }

        let pending = in_flight.len();
        let drained = tokio::time::timeout(SHUTDOWN_GRACE, async {
            while let Some(finished) = in_flight.join_next().await {
                if let Err(e) = finished {
                    tracing::error!(error = %e, "Message task failed");
                }
            }
        })
        .await;
        if drained.is_err() {
            tracing::warn!(
                remaining = in_flight.len(),
                "Gave up waiting for message handlers"
            );
            in_flight.abort_all();
        }
        tracing::info!(pending, "Message queue closed, dispatcher finished");
    })
}

/// Run [`Bot::sweep`] every `interval`.
pub fn spawn_sweeper(bot: Arc<Bot>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            interval.tick().await;
            bot.sweep().await;
        }
    })
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown requested");
}

/// Start the bot: Discord listener, dispatcher, sweep task and the HTTP
/// callback server. Returns after a shutdown signal, once cached settings
/// have been written back.
pub async fn start_server(config: &Config) -> anyhow::Result<()> {
    let addr = SocketAddr::from((
        config.web.host.parse::<std::net::IpAddr>()?,
        config.web.port,
    ));

    let bot = Arc::new(Bot::from_config(config)?);
    let channel: Arc<dyn Channel> =
        Arc::new(DiscordChannel::new(config.discord.bot_token.clone()));

    if let Err(e) = channel.health_check().await {
        tracing::warn!(error = %e, "Discord health check failed");
    }

    let (state, rx) = create_state(bot.links.clone(), channel.clone(), bot.texts.clone());
    let (stop_tx, stop_rx) = oneshot::channel();
    let listener_handle = spawn_listener(channel.clone(), state.message_tx.clone());
    let dispatcher_handle = spawn_dispatcher(bot.clone(), channel.clone(), rx, stop_rx);
    let sweeper_handle = spawn_sweeper(bot.clone(), config.session.sweep_interval());

    let router = build_router(state);

    tracing::info!("Starting Discraft on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Clean up on shutdown
    listener_handle.abort();
    sweeper_handle.abort();

    // Handlers still running may change settings; let them finish first.
    let _ = stop_tx.send(());
    if let Err(e) = dispatcher_handle.await {
        tracing::error!(error = %e, "Dispatcher failed");
    }

    let report = bot.flush_all().await;
    tracing::info!(
        flushed = report.flushed,
        failed = report.failed,
        "Wrote back cached sessions"
    );

    Ok(())
}
