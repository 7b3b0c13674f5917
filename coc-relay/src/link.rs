//! Deep links to messages in private groups.

use crate::message::{ChatId, MessageId};

/// Supergroup ids are exposed as `-100<internal id>`.
const SUPERGROUP_PREFIX: &str = "-100";

/// Build `https://t.me/c/{chat}/{message}` for a chat message.
pub fn message_link(chat_id: ChatId, message_id: MessageId) -> String {
    let raw = chat_id.to_string();
    let cleaned = raw
        .strip_prefix(SUPERGROUP_PREFIX)
        .or_else(|| raw.strip_prefix('-'))
        .unwrap_or(&raw);

    format!("https://t.me/c/{cleaned}/{message_id}")
}
