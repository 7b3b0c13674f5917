//! Event dispatch: routes feed updates to the relay, the resolution engine
//! or the statistics command, one task per event.

use crate::message::{CallbackQuery, ChatId, Feed, FeedEvent, IncomingMessage, MessageId, Update};
use crate::relay::Relay;
use crate::resolution::ResolutionEngine;
use crate::stats::Statistics;
use crate::traits::ChatTransport;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Error counter label for `/stats` failures.
pub const STATS_HANDLER: &str = "stats";

const STATS_COMMAND: &str = "/stats";

/// Where an update should go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    Alert(IncomingMessage),
    Callback(CallbackQuery),
    Stats {
        feed: Feed,
        chat_id: ChatId,
        message_id: MessageId,
    },
    /// Button press on a message outside the target chat
    StrayCallback(CallbackQuery),
    Ignore,
}

/// True for `/stats` and `/stats@some_bot`.
fn is_stats_command(text: &str) -> bool {
    let command = text.split_whitespace().next().unwrap_or_default();
    match command.strip_prefix(STATS_COMMAND) {
        Some("") => true,
        Some(rest) => rest.starts_with('@'),
        None => false,
    }
}

/// Classify an update from `feed`.
///
/// Message ids are only unique per chat, so only presses in the target chat
/// may reach the correlation table.
pub fn route(feed: Feed, update: Update, source_chat: ChatId, target_chat: ChatId) -> Route {
    match (feed, update) {
        (_, Update::Message(msg)) if msg.text().is_some_and(is_stats_command) => Route::Stats {
            feed,
            chat_id: msg.chat_id,
            message_id: msg.message_id,
        },
        (Feed::Source, Update::Message(msg)) if msg.chat_id == source_chat => Route::Alert(msg),
        (Feed::Triage, Update::Callback(query)) if query.chat_id == target_chat => {
            Route::Callback(query)
        }
        (Feed::Triage, Update::Callback(query)) => Route::StrayCallback(query),
        _ => Route::Ignore,
    }
}

/// Composition root for event handling.
pub struct Dispatcher {
    relay: Arc<Relay>,
    engine: Arc<ResolutionEngine>,
    stats: Arc<Statistics>,
    source: Arc<dyn ChatTransport>,
    triage: Arc<dyn ChatTransport>,
    source_chat: ChatId,
    target_chat: ChatId,
}

impl Dispatcher {
    pub fn new(
        relay: Arc<Relay>,
        engine: Arc<ResolutionEngine>,
        stats: Arc<Statistics>,
        source: Arc<dyn ChatTransport>,
        triage: Arc<dyn ChatTransport>,
        source_chat: ChatId,
        target_chat: ChatId,
    ) -> Self {
        Self {
            relay,
            engine,
            stats,
            source,
            triage,
            source_chat,
            target_chat,
        }
    }

    /// Receive events until every sender is dropped, handling each in its
    /// own task.
    pub fn spawn(dispatcher: Arc<Self>, mut rx: mpsc::Receiver<FeedEvent>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            tracing::info!("Event handlers registered");

            while let Some(event) = rx.recv().await {
                let dispatcher = dispatcher.clone();
                tokio::spawn(async move {
                    dispatcher.handle(event).await;
                });
            }

            tracing::info!("Dispatcher stopped");
        })
    }

    /// Handle one event to completion. Failures are logged and counted by
    /// the handlers; nothing propagates.
    pub async fn handle(&self, event: FeedEvent) {
        match route(event.feed, event.update, self.source_chat, self.target_chat) {
            Route::Alert(msg) => {
                let _ = self.relay.on_inbound_message(&msg).await;
            }
            Route::Callback(query) => {
                if let Err(e) = self.triage.acknowledge_callback(&query.id).await {
                    tracing::debug!(error = %e, "Failed to acknowledge callback");
                }
                let _ = self.engine.resolve(&query).await;
            }
            Route::StrayCallback(query) => {
                tracing::warn!(
                    chat_id = query.chat_id,
                    message_id = query.message_id,
                    data = %query.data,
                    "Ignoring button press outside the target chat"
                );
                let _ = self.triage.acknowledge_callback(&query.id).await;
                self.triage
                    .discard_message(query.chat_id, query.message_id)
                    .await;
            }
            Route::Stats {
                feed,
                chat_id,
                message_id,
            } => self.handle_stats(feed, chat_id, message_id).await,
            Route::Ignore => {}
        }
    }

    async fn handle_stats(&self, feed: Feed, chat_id: ChatId, message_id: MessageId) {
        tracing::debug!(feed = %feed, chat_id, "Received statistics request");

        let transport = match feed {
            Feed::Source => &self.source,
            Feed::Triage => &self.triage,
        };

        let text = self.stats.render();
        if let Err(e) = transport.reply(chat_id, message_id, &text).await {
            self.stats.record_error(STATS_HANDLER);
            tracing::error!(feed = %feed, chat_id, error = %e, "Error sending statistics");
        }
    }
}
