//! COC Relay - relays monitoring alerts into a triage chat and tracks their
//! resolution.
//!
//! ## Architecture
//!
//! ```text
//! source chat → source feed ─┐
//!                            ├→ Dispatcher ─→ Relay ──────────→ triage chat (+ buttons)
//! triage chat → triage feed ─┘      │                              │
//!                                   └──→ ResolutionEngine ←── button press
//!                                             ↓
//!                              edit relay + reply in source chat
//! ```
//!
//! The correlation table and the statistics aggregator are the only shared
//! mutable state; both are injected into handlers as `Arc`s.

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod correlation;
pub mod dispatch;
pub mod link;
pub mod message;
pub mod relay;
pub mod resolution;
pub mod routes;
pub mod stats;
pub mod telegram;
pub mod traits;
pub mod trigger;

pub use correlation::CorrelationTable;
pub use dispatch::{route, Dispatcher, Route};
pub use link::message_link;
pub use message::{
    CallbackQuery, ChatId, Feed, FeedEvent, IncomingMessage, InlineButton, Keyboard, MessageId,
    Update, UserId, UserIdentity,
};
pub use relay::{alert_keyboard, Relay, RelayError, RelayOutcome};
pub use resolution::{Resolution, ResolutionEngine, ResolutionKind, ResolveError, ResolveStage};
pub use routes::{build_router, spawn_metrics_server, MetricsState};
pub use stats::{Statistics, StatsSnapshot};
pub use telegram::TelegramClient;
pub use traits::{ChatTransport, TransportError, TransportResult};
pub use trigger::TriggerMatcher;

use anyhow::Context;
use coc_common::config::Config;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Capacity of the feed → dispatcher channel.
const EVENT_BUFFER: usize = 256;

/// Validated runtime settings derived from [`Config`].
#[derive(Debug, Clone)]
pub struct RelaySettings {
    pub bot_token: String,
    pub source_token: String,
    pub source_chat_id: ChatId,
    pub target_chat_id: ChatId,
    pub ignore_sender_id: UserId,
    pub triggers: Vec<String>,
    pub timezone: chrono_tz::Tz,
    pub poll_timeout_secs: u64,
}

impl RelaySettings {
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        config.validate().context("Invalid configuration")?;

        let telegram = &config.telegram;
        let missing = |field: &str| anyhow::anyhow!("Missing required field: {field}");

        Ok(Self {
            bot_token: telegram
                .bot_token
                .clone()
                .ok_or_else(|| missing("telegram.bot_token"))?,
            source_token: telegram
                .source_token()
                .map(String::from)
                .ok_or_else(|| missing("telegram.bot_token"))?,
            source_chat_id: telegram
                .source_chat_id
                .ok_or_else(|| missing("telegram.source_chat_id"))?,
            target_chat_id: telegram
                .target_chat_id
                .ok_or_else(|| missing("telegram.target_chat_id"))?,
            ignore_sender_id: telegram
                .ignore_sender_id
                .ok_or_else(|| missing("telegram.ignore_sender_id"))?,
            triggers: config.alerts.triggers.clone(),
            timezone: config.alerts.tz()?,
            poll_timeout_secs: telegram.poll_timeout_secs,
        })
    }
}

/// Start both feeds, the dispatcher and the metrics endpoint, and run until
/// Ctrl-C or until both feeds end.
pub async fn run(config: &Config) -> anyhow::Result<()> {
    let settings = RelaySettings::from_config(config)?;

    tracing::info!("------ SUMMARY ------");
    tracing::info!(
        triggers = settings.triggers.len(),
        source_chat_id = settings.source_chat_id,
        target_chat_id = settings.target_chat_id,
        timezone = %settings.timezone,
        "Loaded triggers from config"
    );
    if settings.triggers.is_empty() {
        tracing::warn!("No triggers configured, no message will be relayed");
    }

    let stats = Arc::new(Statistics::new(settings.timezone).context("Failed to create metrics")?);
    let correlation = Arc::new(CorrelationTable::new());

    if config.metrics.enabled {
        match format!("{}:{}", config.metrics.host, config.metrics.port).parse::<SocketAddr>() {
            Ok(addr) => {
                let router = build_router(Arc::new(MetricsState {
                    stats: stats.clone(),
                    correlation: correlation.clone(),
                }));
                spawn_metrics_server(addr, router);
            }
            Err(e) => tracing::error!(error = %e, "Invalid metrics address, metrics disabled"),
        }
    }

    tracing::info!("------ BOTS INITIALIZATION ------");
    let triage = Arc::new(TelegramClient::new(
        settings.bot_token.clone(),
        settings.poll_timeout_secs,
    ));
    let bot = triage.get_me().await.context("Triage bot token rejected")?;
    tracing::info!(bot = %bot.describe(), "Triage bot client started successfully");

    let source = if settings.source_token == settings.bot_token {
        triage.clone()
    } else {
        let source = Arc::new(TelegramClient::new(
            settings.source_token.clone(),
            settings.poll_timeout_secs,
        ));
        let me = source.get_me().await.context("Source bot token rejected")?;
        tracing::info!(bot = %me.describe(), "Source client started successfully");
        source
    };
    let shared_connection = Arc::ptr_eq(&source, &triage);

    let relay = Arc::new(Relay::new(
        TriggerMatcher::new(&settings.triggers, settings.ignore_sender_id),
        triage.clone(),
        settings.target_chat_id,
        correlation.clone(),
        stats.clone(),
    ));
    let engine = Arc::new(ResolutionEngine::new(
        correlation.clone(),
        stats.clone(),
        triage.clone(),
        source.clone(),
        settings.source_chat_id,
        settings.target_chat_id,
    ));
    let dispatcher = Arc::new(Dispatcher::new(
        relay,
        engine,
        stats.clone(),
        source.clone(),
        triage.clone(),
        settings.source_chat_id,
        settings.target_chat_id,
    ));

    let (tx, rx) = mpsc::channel(EVENT_BUFFER);
    let dispatch_handle = Dispatcher::spawn(dispatcher, rx);

    tracing::info!("|------ APPLICATION LOGS ------|");

    // getUpdates allows one poller per token, so a shared token polls once
    // and splits updates by chat.
    let feeds = if shared_connection {
        let client = triage.clone();
        let tx = tx.clone();
        let source_chat = settings.source_chat_id;
        vec![tokio::spawn(async move {
            listen_shared(client, source_chat, tx).await;
        })]
    } else {
        let triage_feed = {
            let client = triage.clone();
            let tx = tx.clone();
            tokio::spawn(async move {
                if let Err(e) = client.listen(Feed::Triage, tx).await {
                    tracing::error!(error = %e, "Triage feed stopped");
                }
            })
        };
        let source_feed = {
            let client = source.clone();
            let tx = tx.clone();
            tokio::spawn(async move {
                if let Err(e) = client.listen(Feed::Source, tx).await {
                    tracing::error!(error = %e, "Source feed stopped");
                }
            })
        };
        vec![triage_feed, source_feed]
    };
    drop(tx);

    let feeds_done = async {
        for feed in feeds {
            let _ = feed.await;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Bot stopped by user");
        }
        _ = feeds_done => {
            tracing::warn!("All feeds disconnected");
        }
    }

    dispatch_handle.abort();
    tracing::info!("Bot application stopped");
    Ok(())
}

/// Poll one connection and fan each update out to both feeds' routes.
async fn listen_shared(client: Arc<TelegramClient>, source_chat: ChatId, tx: mpsc::Sender<FeedEvent>) {
    let (inner_tx, mut inner_rx) = mpsc::channel::<FeedEvent>(EVENT_BUFFER);

    let poller = {
        let client = client.clone();
        tokio::spawn(async move {
            if let Err(e) = client.listen(Feed::Triage, inner_tx).await {
                tracing::error!(error = %e, "Shared feed stopped");
            }
        })
    };

    while let Some(event) = inner_rx.recv().await {
        let feed = match &event.update {
            Update::Message(msg) if msg.chat_id == source_chat => Feed::Source,
            _ => Feed::Triage,
        };
        if tx
            .send(FeedEvent {
                feed,
                update: event.update,
            })
            .await
            .is_err()
        {
            break;
        }
    }

    poller.abort();
}
