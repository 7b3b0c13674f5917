//! Relayed message → source message correlation.
//!
//! Entries are volatile and consumed exactly once: the first resolution
//! against a relayed message removes its entry, so any later press on the
//! same message finds nothing.

use crate::message::MessageId;
use dashmap::DashMap;

/// Thread-safe take-once mapping from relayed to source message ids.
#[derive(Debug, Default)]
pub struct CorrelationTable {
    entries: DashMap<MessageId, MessageId>,
}

impl CorrelationTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remember that `relayed_id` relays `source_id`. Overwrites an existing entry.
    pub fn insert(&self, relayed_id: MessageId, source_id: MessageId) {
        if let Some(previous) = self.entries.insert(relayed_id, source_id) {
            tracing::warn!(
                relayed_id,
                previous_source_id = previous,
                source_id,
                "Correlation entry overwritten"
            );
        }
    }

    /// Atomically look up and delete the entry for `relayed_id`.
    pub fn take(&self, relayed_id: MessageId) -> Option<MessageId> {
        self.entries.remove(&relayed_id).map(|(_, source_id)| source_id)
    }

    /// Number of relayed alerts still awaiting resolution.
    pub fn pending(&self) -> usize {
        self.entries.len()
    }
}
