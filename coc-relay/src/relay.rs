//! Alert ingestion: source chat message → relayed triage message.

use crate::correlation::CorrelationTable;
use crate::link::message_link;
use crate::message::{ChatId, IncomingMessage, InlineButton, Keyboard, MessageId};
use crate::resolution::ResolutionKind;
use crate::stats::Statistics;
use crate::traits::{ChatTransport, TransportError};
use crate::trigger::TriggerMatcher;
use chrono::Utc;
use std::sync::Arc;

/// Error counter label for relay failures.
pub const RELAY_HANDLER: &str = "relay";

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("Failed to relay message {source_id}: {source}")]
    Send {
        source_id: MessageId,
        #[source]
        source: TransportError,
    },
}

/// What happened to an inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayOutcome {
    /// Not an alert
    Ignored,
    Relayed {
        source_id: MessageId,
        relayed_id: MessageId,
    },
}

/// Triage controls: accept / flap + not critical / manual.
pub fn alert_keyboard() -> Keyboard {
    let button = |kind: ResolutionKind| InlineButton::new(kind.button_text(), kind.tag());
    vec![
        vec![button(ResolutionKind::Received)],
        vec![
            button(ResolutionKind::Flapping),
            button(ResolutionKind::NotCritical),
        ],
        vec![button(ResolutionKind::Other)],
    ]
}

/// Relay body: escaped original text followed by the deep link.
pub fn relay_text(text: &str, link: &str) -> String {
    format!(
        "{}\n\nСсылка: {}",
        html_escape::encode_text(text),
        html_escape::encode_text(link)
    )
}

/// Relays matching source-chat messages into the triage chat.
pub struct Relay {
    matcher: TriggerMatcher,
    triage: Arc<dyn ChatTransport>,
    target_chat: ChatId,
    correlation: Arc<CorrelationTable>,
    stats: Arc<Statistics>,
}

impl Relay {
    pub fn new(
        matcher: TriggerMatcher,
        triage: Arc<dyn ChatTransport>,
        target_chat: ChatId,
        correlation: Arc<CorrelationTable>,
        stats: Arc<Statistics>,
    ) -> Self {
        Self {
            matcher,
            triage,
            target_chat,
            correlation,
            stats,
        }
    }

    pub fn matcher(&self) -> &TriggerMatcher {
        &self.matcher
    }

    /// Relay `message` if it is an alert.
    ///
    /// The correlation entry is only written after the send succeeded.
    pub async fn on_inbound_message(
        &self,
        message: &IncomingMessage,
    ) -> Result<RelayOutcome, RelayError> {
        let link = message_link(message.chat_id, message.message_id);

        if !self.matcher.is_alert(message.text(), message.sender_id) {
            tracing::trace!(link = %link, "Message is not an alert");
            return Ok(RelayOutcome::Ignored);
        }

        tracing::info!(link = %link, source_id = message.message_id, "Processing triggered message");
        self.stats.record_alert(Utc::now());

        let body = relay_text(message.text().unwrap_or_default(), &link);
        let relayed_id = match self
            .triage
            .send_with_buttons(self.target_chat, &body, &alert_keyboard())
            .await
        {
            Ok(id) => id,
            Err(source) => {
                self.stats.record_error(RELAY_HANDLER);
                let err = RelayError::Send {
                    source_id: message.message_id,
                    source,
                };
                tracing::error!(error = %err, link = %link, "Error handling new message");
                return Err(err);
            }
        };

        self.correlation.insert(relayed_id, message.message_id);
        tracing::info!(
            source_id = message.message_id,
            relayed_id,
            pending = self.correlation.pending(),
            "Forwarded message to target chat"
        );

        Ok(RelayOutcome::Relayed {
            source_id: message.message_id,
            relayed_id,
        })
    }
}
