//! Telegram Bot API transport.
//!
//! Provides [`TelegramClient`], a long-polling feed and a [`ChatTransport`]
//! implementation over the Bot API.
//!
//! The Bot API cannot fetch an arbitrary message or look up an arbitrary
//! user. Callback updates carry both the pressed message and the presser, so
//! the client snapshots them while polling and serves `fetch_message_text`
//! and `resolve_user` from those snapshots.

use crate::message::{
    CallbackQuery, ChatId, Feed, FeedEvent, IncomingMessage, Keyboard, MessageId, Update, UserId,
    UserIdentity,
};
use crate::traits::{ChatTransport, TransportError, TransportResult};
use async_trait::async_trait;
use dashmap::DashMap;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tokio::sync::mpsc;

/// Pause after a failed poll.
const POLL_BACKOFF: Duration = Duration::from_secs(5);

/// Bot API response envelope.
#[derive(Debug, Deserialize)]
struct ApiResponse {
    ok: bool,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    description: Option<String>,
}

// ============================================================================
// Telegram Client
// ============================================================================

/// One Bot API connection.
pub struct TelegramClient {
    bot_token: String,
    client: reqwest::Client,
    poll_timeout_secs: u64,
    /// Text of messages whose buttons were pressed, keyed by (chat, message)
    message_snapshots: DashMap<(ChatId, MessageId), String>,
    /// Users seen pressing buttons
    users: DashMap<UserId, UserIdentity>,
}

impl TelegramClient {
    pub fn new(bot_token: impl Into<String>, poll_timeout_secs: u64) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(poll_timeout_secs + 15))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            bot_token: bot_token.into(),
            client,
            poll_timeout_secs,
            message_snapshots: DashMap::new(),
            users: DashMap::new(),
        }
    }

    fn api_url(&self, method: &str) -> String {
        format!("https://api.telegram.org/bot{}/{method}", self.bot_token)
    }

    /// Call a Bot API method and return its `result`.
    async fn call(&self, method: &str, body: &Value) -> TransportResult<Value> {
        let resp = self
            .client
            .post(self.api_url(method))
            .json(body)
            .send()
            .await?;

        let envelope: ApiResponse = resp
            .json()
            .await
            .map_err(|e| TransportError::InvalidResponse(format!("{method}: {e}")))?;

        if !envelope.ok {
            return Err(TransportError::Api {
                method: method.to_string(),
                description: envelope
                    .description
                    .unwrap_or_else(|| "no description".to_string()),
            });
        }

        envelope
            .result
            .ok_or_else(|| TransportError::InvalidResponse(format!("{method}: missing result")))
    }

    /// Verify the token and return the bot's own identity.
    pub async fn get_me(&self) -> TransportResult<UserIdentity> {
        let me = self.call("getMe", &serde_json::json!({})).await?;
        serde_json::from_value(me).map_err(|e| TransportError::InvalidResponse(e.to_string()))
    }

    /// Long-poll updates and forward them until the receiver goes away.
    pub async fn listen(&self, feed: Feed, tx: mpsc::Sender<FeedEvent>) -> TransportResult<()> {
        let mut offset: i64 = 0;

        tracing::info!(feed = %feed, "Telegram feed listening for updates");

        loop {
            let body = serde_json::json!({
                "offset": offset,
                "timeout": self.poll_timeout_secs,
                "allowed_updates": ["message", "channel_post", "callback_query"]
            });

            let updates = match self.call("getUpdates", &body).await {
                Ok(v) => v,
                Err(e) => {
                    tracing::warn!(feed = %feed, error = %e, "Telegram poll error");
                    tokio::time::sleep(POLL_BACKOFF).await;
                    continue;
                }
            };

            let Some(results) = updates.as_array() else {
                continue;
            };

            for raw in results {
                if let Some(uid) = raw.get("update_id").and_then(Value::as_i64) {
                    offset = uid + 1;
                }

                let Some(update) = self.ingest(raw) else {
                    continue;
                };

                if tx.send(FeedEvent { feed, update }).await.is_err() {
                    tracing::info!(feed = %feed, "Dispatcher closed, feed stopping");
                    return Ok(());
                }
            }
        }
    }

    /// Parse an update, snapshotting callback context on the way.
    fn ingest(&self, raw: &Value) -> Option<Update> {
        if let Some(cb) = raw.get("callback_query") {
            let parsed = parse_callback(cb)?;
            if let Some(text) = parsed.message_text {
                self.message_snapshots
                    .insert((parsed.query.chat_id, parsed.query.message_id), text);
            }
            self.users.insert(parsed.actor.id, parsed.actor);
            return Some(Update::Callback(parsed.query));
        }

        raw.get("message")
            .or_else(|| raw.get("channel_post"))
            .and_then(parse_message)
            .map(Update::Message)
    }
}

/// A callback update with the context the Bot API attaches to it.
#[derive(Debug)]
struct ParsedCallback {
    query: CallbackQuery,
    actor: UserIdentity,
    message_text: Option<String>,
}

fn parse_callback(callback: &Value) -> Option<ParsedCallback> {
    let id = callback.get("id")?.as_str()?.to_string();
    let data = callback.get("data")?.as_str()?.to_string();

    let actor: UserIdentity = serde_json::from_value(callback.get("from")?.clone()).ok()?;

    let message = callback.get("message")?;
    let chat_id = message.get("chat")?.get("id")?.as_i64()?;
    let message_id = message.get("message_id")?.as_i64()?;
    let message_text = message
        .get("text")
        .and_then(Value::as_str)
        .map(String::from);

    Some(ParsedCallback {
        query: CallbackQuery {
            id,
            data,
            chat_id,
            message_id,
            actor_id: actor.id,
        },
        actor,
        message_text,
    })
}

fn parse_message(message: &Value) -> Option<IncomingMessage> {
    let chat_id = message.get("chat")?.get("id")?.as_i64()?;
    let message_id = message.get("message_id")?.as_i64()?;

    let sender_id = message
        .get("from")
        .or_else(|| message.get("sender_chat"))
        .and_then(|f| f.get("id"))
        .and_then(Value::as_i64);

    let text = message
        .get("text")
        .or_else(|| message.get("caption"))
        .and_then(Value::as_str)
        .map(String::from);

    Some(IncomingMessage {
        chat_id,
        message_id,
        sender_id,
        text,
    })
}

fn keyboard_markup(keyboard: &Keyboard) -> Value {
    let rows: Vec<Vec<Value>> = keyboard
        .iter()
        .map(|row| {
            row.iter()
                .map(|btn| {
                    serde_json::json!({
                        "text": btn.text,
                        "callback_data": btn.callback_data
                    })
                })
                .collect()
        })
        .collect();

    serde_json::json!({ "inline_keyboard": rows })
}

fn message_id_of(result: &Value) -> TransportResult<MessageId> {
    result
        .get("message_id")
        .and_then(Value::as_i64)
        .ok_or_else(|| TransportError::InvalidResponse("missing message_id".into()))
}

#[async_trait]
impl ChatTransport for TelegramClient {
    fn name(&self) -> &'static str {
        "telegram"
    }

    async fn send_with_buttons(
        &self,
        chat_id: ChatId,
        text: &str,
        keyboard: &Keyboard,
    ) -> TransportResult<MessageId> {
        let body = serde_json::json!({
            "chat_id": chat_id,
            "text": text,
            "parse_mode": "HTML",
            "reply_markup": keyboard_markup(keyboard)
        });

        let result = self.call("sendMessage", &body).await?;
        message_id_of(&result)
    }

    async fn edit_message(
        &self,
        chat_id: ChatId,
        message_id: MessageId,
        text: &str,
    ) -> TransportResult<()> {
        let body = serde_json::json!({
            "chat_id": chat_id,
            "message_id": message_id,
            "text": text,
            "parse_mode": "HTML",
            "reply_markup": { "inline_keyboard": [] }
        });

        self.call("editMessageText", &body).await?;
        Ok(())
    }

    async fn reply(
        &self,
        chat_id: ChatId,
        reply_to: MessageId,
        text: &str,
    ) -> TransportResult<MessageId> {
        let body = serde_json::json!({
            "chat_id": chat_id,
            "text": text,
            "parse_mode": "HTML",
            "reply_parameters": { "message_id": reply_to }
        });

        let result = self.call("sendMessage", &body).await?;
        message_id_of(&result)
    }

    async fn fetch_message_text(
        &self,
        chat_id: ChatId,
        message_id: MessageId,
    ) -> TransportResult<String> {
        self.message_snapshots
            .remove(&(chat_id, message_id))
            .map(|(_, text)| text)
            .ok_or(TransportError::MessageUnavailable {
                chat_id,
                message_id,
            })
    }

    async fn discard_message(&self, chat_id: ChatId, message_id: MessageId) {
        self.message_snapshots.remove(&(chat_id, message_id));
    }

    async fn resolve_user(&self, user_id: UserId) -> TransportResult<UserIdentity> {
        if let Some(user) = self.users.get(&user_id) {
            return Ok(user.clone());
        }

        let chat = self
            .call("getChat", &serde_json::json!({ "chat_id": user_id }))
            .await
            .map_err(|e| {
                tracing::debug!(user_id, error = %e, "getChat failed");
                TransportError::UserUnavailable(user_id)
            })?;

        serde_json::from_value(chat).map_err(|_| TransportError::UserUnavailable(user_id))
    }

    async fn acknowledge_callback(&self, callback_id: &str) -> TransportResult<()> {
        self.call(
            "answerCallbackQuery",
            &serde_json::json!({ "callback_query_id": callback_id }),
        )
        .await?;
        Ok(())
    }
}
