//! Resolution of relayed alerts from triage button presses.
//!
//! A relayed alert is resolved at most once. The correlation entry is taken
//! before any transport call, so a failure after that point loses the
//! correlation for that alert instead of allowing a second resolution.

use crate::correlation::CorrelationTable;
use crate::message::{CallbackQuery, ChatId, MessageId, UserIdentity};
use crate::stats::Statistics;
use crate::traits::{ChatTransport, TransportError};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::fmt;
use std::sync::{Arc, Mutex};

/// Error counter label for resolution failures.
pub const RESOLUTION_HANDLER: &str = "resolution";

// ============================================================================
// Resolution kinds
// ============================================================================

/// Operator disposition of a relayed alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResolutionKind {
    Received,
    Flapping,
    NotCritical,
    Other,
}

const RECEIVED_PHRASES: &[&str] = &[
    "Принято, спасибо",
    "Приняли в работу",
    "Ок, смотрю",
    "Щас гляну, спасибо большое",
    "Угу, принято, спасибо",
];

const FLAPPING_PHRASES: &[&str] = &[
    "Ага, похоже на флап",
    "Принято, скорее всего флап",
    "Пока не актуально",
    "Флапает, да - скоро перестанет",
];

const NOT_CRITICAL_PHRASES: &[&str] = &[
    "Не критично, починим попозже",
    "Принято, не срочно",
    "Это не страшно, спасибо",
    "Ага, спасибо! Принято, но обработаем чуть позже - критики нет",
];

/// Tag used by buttons posted before the spelling was fixed.
const LEGACY_RECEIVED_TAG: &str = "alert_recieved";

impl ResolutionKind {
    pub const ALL: [ResolutionKind; 4] = [
        Self::Received,
        Self::Flapping,
        Self::NotCritical,
        Self::Other,
    ];

    /// Parse a callback tag.
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "alert_received" | LEGACY_RECEIVED_TAG => Some(Self::Received),
            "alert_flapping" => Some(Self::Flapping),
            "alert_not_critical" => Some(Self::NotCritical),
            "alert_other" => Some(Self::Other),
            _ => None,
        }
    }

    /// Callback tag carried by this kind's button.
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Received => "alert_received",
            Self::Flapping => "alert_flapping",
            Self::NotCritical => "alert_not_critical",
            Self::Other => "alert_other",
        }
    }

    /// Metric label value.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Received => "received",
            Self::Flapping => "flapping",
            Self::NotCritical => "not_critical",
            Self::Other => "other",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.label() == label)
    }

    /// Button caption.
    pub fn button_text(&self) -> &'static str {
        match self {
            Self::Received => "Принять",
            Self::Flapping => "Это флап",
            Self::NotCritical => "Не критично",
            Self::Other => "Вручную / другое",
        }
    }

    /// Line used in the `/stats` breakdown.
    pub fn summary_label(&self) -> &'static str {
        match self {
            Self::Received => "Принято",
            Self::Flapping => "Флапы",
            Self::NotCritical => "Не критичны",
            Self::Other => "Обработаны вручную",
        }
    }

    fn headline(&self) -> &'static str {
        match self {
            Self::Received => "Алерт принят в работу, отправлено сообщение в COC!",
            Self::Flapping => "Алерт принят как флапающий, отправлено сообщение в COC!",
            Self::NotCritical => "Алерт принят как некритический, отправлено сообщение в COC!",
            Self::Other => "Алерт проигнорирован или обработан вручную.",
        }
    }

    /// Canned acknowledgements posted to the source chat. Empty for `Other`.
    pub fn phrases(&self) -> &'static [&'static str] {
        match self {
            Self::Received => RECEIVED_PHRASES,
            Self::Flapping => FLAPPING_PHRASES,
            Self::NotCritical => NOT_CRITICAL_PHRASES,
            Self::Other => &[],
        }
    }

    pub fn acknowledges_source(&self) -> bool {
        !self.phrases().is_empty()
    }
}

impl fmt::Display for ResolutionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Render the edited relay: struck-through original, headline, responsible.
pub fn render_template(kind: ResolutionKind, original: &str, responsible: &str) -> String {
    format!(
        "<s>{}</s>\n\n<b>{}</b>\n\nОтветственный - {}",
        html_escape::encode_text(original),
        kind.headline(),
        html_escape::encode_text(responsible),
    )
}

/// Pick one phrase uniformly at random.
pub fn pick_phrase<R: Rng + ?Sized>(
    phrases: &'static [&'static str],
    rng: &mut R,
) -> Option<&'static str> {
    phrases.choose(rng).copied()
}

// ============================================================================
// Errors
// ============================================================================

/// Transport step a resolution failed at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveStage {
    Identity,
    Fetch,
    Edit,
    Reply,
}

impl ResolveStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Identity => "identity",
            Self::Fetch => "fetch",
            Self::Edit => "edit",
            Self::Reply => "reply",
        }
    }
}

impl fmt::Display for ResolveStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("Unknown callback action: {0}")]
    UnknownAction(String),

    #[error("No pending alert for relayed message {0}")]
    StaleCorrelation(MessageId),

    #[error("Resolution failed at {stage}: {source}")]
    Transport {
        stage: ResolveStage,
        #[source]
        source: TransportError,
    },
}

impl ResolveError {
    fn at(stage: ResolveStage) -> impl FnOnce(TransportError) -> Self {
        move |source| Self::Transport { stage, source }
    }
}

// ============================================================================
// Engine
// ============================================================================

/// Outcome of a successful resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub kind: ResolutionKind,
    pub relayed_id: MessageId,
    pub source_id: MessageId,
    pub responsible: UserIdentity,
    /// Acknowledgement posted to the source chat, if any
    pub acknowledgement: Option<&'static str>,
}

/// Applies button presses to relayed alerts.
pub struct ResolutionEngine {
    correlation: Arc<CorrelationTable>,
    stats: Arc<Statistics>,
    triage: Arc<dyn ChatTransport>,
    source: Arc<dyn ChatTransport>,
    source_chat: ChatId,
    target_chat: ChatId,
    rng: Mutex<StdRng>,
}

impl ResolutionEngine {
    pub fn new(
        correlation: Arc<CorrelationTable>,
        stats: Arc<Statistics>,
        triage: Arc<dyn ChatTransport>,
        source: Arc<dyn ChatTransport>,
        source_chat: ChatId,
        target_chat: ChatId,
    ) -> Self {
        Self {
            correlation,
            stats,
            triage,
            source,
            source_chat,
            target_chat,
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Replace the phrase randomness source.
    pub fn with_rng(mut self, rng: StdRng) -> Self {
        self.rng = Mutex::new(rng);
        self
    }

    /// Resolve the relayed alert a button press belongs to.
    ///
    /// Whatever the outcome, the transport is told to drop its cached copy
    /// of the pressed message.
    pub async fn resolve(&self, query: &CallbackQuery) -> Result<Resolution, ResolveError> {
        let result = self.settle(query).await;
        self.triage
            .discard_message(query.chat_id, query.message_id)
            .await;
        result
    }

    async fn settle(&self, query: &CallbackQuery) -> Result<Resolution, ResolveError> {
        let Some(kind) = ResolutionKind::from_tag(&query.data) else {
            tracing::warn!(
                data = %query.data,
                relayed_id = query.message_id,
                "Unknown callback data"
            );
            return Err(ResolveError::UnknownAction(query.data.clone()));
        };

        let relayed_id = query.message_id;
        let Some(source_id) = self.correlation.take(relayed_id) else {
            tracing::warn!(
                resolution = %kind,
                relayed_id,
                actor_id = query.actor_id,
                "Original message not found for callback, already resolved or unknown"
            );
            return Err(ResolveError::StaleCorrelation(relayed_id));
        };

        tracing::info!(resolution = %kind, relayed_id, source_id, "Processing callback");

        match self.apply(kind, relayed_id, source_id, query).await {
            Ok(resolution) => {
                self.stats
                    .record_resolution(kind, resolution.responsible.handle());
                tracing::info!(
                    resolution = %kind,
                    relayed_id,
                    source_id,
                    responsible = %resolution.responsible.describe(),
                    "Successfully processed callback"
                );
                Ok(resolution)
            }
            Err(e) => {
                self.stats.record_error(RESOLUTION_HANDLER);
                tracing::error!(
                    resolution = %kind,
                    relayed_id,
                    source_id,
                    error = %e,
                    "Error handling callback"
                );
                Err(e)
            }
        }
    }

    async fn apply(
        &self,
        kind: ResolutionKind,
        relayed_id: MessageId,
        source_id: MessageId,
        query: &CallbackQuery,
    ) -> Result<Resolution, ResolveError> {
        let responsible = self
            .triage
            .resolve_user(query.actor_id)
            .await
            .map_err(ResolveError::at(ResolveStage::Identity))?;

        let original = self
            .triage
            .fetch_message_text(self.target_chat, relayed_id)
            .await
            .map_err(ResolveError::at(ResolveStage::Fetch))?;

        let text = render_template(kind, &original, &responsible.describe());

        let acknowledgement = self.pick(kind);
        match acknowledgement {
            None => {
                self.triage
                    .edit_message(self.target_chat, relayed_id, &text)
                    .await
                    .map_err(ResolveError::at(ResolveStage::Edit))?;
            }
            Some(phrase) => {
                let (edited, replied) = tokio::join!(
                    self.triage.edit_message(self.target_chat, relayed_id, &text),
                    self.source.reply(self.source_chat, source_id, phrase),
                );
                if let (Err(e), Ok(_)) | (Ok(_), Err(e)) = (&edited, &replied) {
                    tracing::warn!(relayed_id, source_id, error = %e, "Resolution partially applied");
                }
                edited.map_err(ResolveError::at(ResolveStage::Edit))?;
                replied.map_err(ResolveError::at(ResolveStage::Reply))?;
            }
        }

        Ok(Resolution {
            kind,
            relayed_id,
            source_id,
            responsible,
            acknowledgement,
        })
    }

    fn pick(&self, kind: ResolutionKind) -> Option<&'static str> {
        let mut rng = self
            .rng
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        pick_phrase(kind.phrases(), &mut *rng)
    }
}
