//! Chat transport seam used by the relay and the resolution engine.

use crate::message::{ChatId, Keyboard, MessageId, UserId, UserIdentity};
use async_trait::async_trait;

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

/// Transport error type.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("{method} failed: {description}")]
    Api { method: String, description: String },

    #[error("Message {message_id} in chat {chat_id} is not available")]
    MessageUnavailable {
        chat_id: ChatId,
        message_id: MessageId,
    },

    #[error("User {0} could not be resolved")]
    UserUnavailable(UserId),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        Self::Connection(e.to_string())
    }
}

/// Operations the relay needs from a chat backend.
///
/// Implementations must be cheap to share across tasks; every call is a
/// potential suspension point and no call is retried by the caller.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Transport name for logs.
    fn name(&self) -> &'static str;

    /// Post `text` with an inline keyboard and return the new message id.
    async fn send_with_buttons(
        &self,
        chat_id: ChatId,
        text: &str,
        keyboard: &Keyboard,
    ) -> TransportResult<MessageId>;

    /// Replace a message's text and remove its inline keyboard.
    async fn edit_message(
        &self,
        chat_id: ChatId,
        message_id: MessageId,
        text: &str,
    ) -> TransportResult<()>;

    /// Post `text` as a threaded reply to `reply_to`.
    async fn reply(
        &self,
        chat_id: ChatId,
        reply_to: MessageId,
        text: &str,
    ) -> TransportResult<MessageId>;

    /// Current plain text of a message.
    async fn fetch_message_text(
        &self,
        chat_id: ChatId,
        message_id: MessageId,
    ) -> TransportResult<String>;

    /// Display identity of a user.
    async fn resolve_user(&self, user_id: UserId) -> TransportResult<UserIdentity>;

    /// Drop anything cached for a message once its button press is settled.
    async fn discard_message(&self, _chat_id: ChatId, _message_id: MessageId) {}

    /// Acknowledge a button press so the client stops its progress indicator.
    async fn acknowledge_callback(&self, _callback_id: &str) -> TransportResult<()> {
        Ok(())
    }
}
