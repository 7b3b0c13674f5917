//! Transport-neutral chat types exchanged between feeds, handlers and transports.

use serde::{Deserialize, Serialize};

/// Chat identifier (negative for groups, `-100` prefixed for supergroups).
pub type ChatId = i64;

/// Message identifier, unique within a chat.
pub type MessageId = i64;

/// User identifier.
pub type UserId = i64;

/// Which live connection an update arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Feed {
    /// Connection reading the monitoring (alert-source) chat
    Source,
    /// Triage bot connection (relays, buttons, callbacks)
    Triage,
}

impl Feed {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Source => "source",
            Self::Triage => "triage",
        }
    }
}

impl std::fmt::Display for Feed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A plain chat message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingMessage {
    pub chat_id: ChatId,
    pub message_id: MessageId,
    /// Absent for anonymous posts the transport cannot attribute
    pub sender_id: Option<UserId>,
    /// Absent for media-only messages
    pub text: Option<String>,
}

impl IncomingMessage {
    pub fn text(&self) -> Option<&str> {
        self.text.as_deref()
    }
}

/// An inline-button press.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackQuery {
    /// Transport id used to acknowledge the press
    pub id: String,
    /// Raw callback tag attached to the pressed button
    pub data: String,
    pub chat_id: ChatId,
    /// The relayed message carrying the button
    pub message_id: MessageId,
    pub actor_id: UserId,
}

/// Anything a feed can deliver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Update {
    Message(IncomingMessage),
    Callback(CallbackQuery),
}

/// An update tagged with its feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedEvent {
    pub feed: Feed,
    pub update: Update,
}

/// Display identity of a chat user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserIdentity {
    pub id: UserId,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
}

impl UserIdentity {
    /// `"First Last (@handle)"`, skipping absent parts.
    pub fn describe(&self) -> String {
        let mut name = self.first_name.trim().to_string();
        if let Some(last) = self.last_name.as_deref().map(str::trim).filter(|l| !l.is_empty()) {
            if !name.is_empty() {
                name.push(' ');
            }
            name.push_str(last);
        }

        match self.handle() {
            Some(handle) if name.is_empty() => format!("@{handle}"),
            Some(handle) => format!("{name} (@{handle})"),
            None if name.is_empty() => format!("id{}", self.id),
            None => name,
        }
    }

    /// The user's handle without the leading `@`.
    pub fn handle(&self) -> Option<&str> {
        self.username
            .as_deref()
            .map(|u| u.trim_start_matches('@'))
            .filter(|u| !u.is_empty())
    }
}

/// A single inline keyboard button.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlineButton {
    pub text: String,
    pub callback_data: String,
}

impl InlineButton {
    pub fn new(text: impl Into<String>, callback_data: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            callback_data: callback_data.into(),
        }
    }
}

/// Rows of inline buttons.
pub type Keyboard = Vec<Vec<InlineButton>>;
