//! Decides whether an inbound message is an alert worth relaying.

use crate::message::UserId;

/// Case-insensitive substring trigger matcher.
#[derive(Debug, Clone)]
pub struct TriggerMatcher {
    /// Lower-cased triggers
    triggers: Vec<String>,
    ignore_sender: UserId,
}

impl TriggerMatcher {
    pub fn new<I, S>(triggers: I, ignore_sender: UserId) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut folded: Vec<String> = Vec::new();
        for trigger in triggers {
            let trigger = trigger.as_ref().to_lowercase();
            if !trigger.is_empty() && !folded.contains(&trigger) {
                folded.push(trigger);
            }
        }

        Self {
            triggers: folded,
            ignore_sender,
        }
    }

    pub fn trigger_count(&self) -> usize {
        self.triggers.len()
    }

    /// True when the message comes from a non-ignored sender and contains
    /// at least one trigger.
    ///
    /// An empty trigger set matches nothing.
    pub fn is_alert(&self, text: Option<&str>, sender: Option<UserId>) -> bool {
        if sender == Some(self.ignore_sender) {
            return false;
        }

        let haystack = text.unwrap_or_default().to_lowercase();
        self.triggers.iter().any(|t| haystack.contains(t.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const IGNORED: UserId = 777;

    fn matcher(triggers: &[&str]) -> TriggerMatcher {
        TriggerMatcher::new(triggers.iter().copied(), IGNORED)
    }

    #[test]
    fn matches_case_insensitively() {
        let m = matcher(&["cpu", "Disk"]);
        assert!(m.is_alert(Some("prod-db CPU 95%"), Some(1)));
        assert!(m.is_alert(Some("DISK full on node-3"), Some(1)));
        assert!(!m.is_alert(Some("memory pressure"), Some(1)));
    }

    #[test]
    fn substring_not_token() {
        let m = matcher(&["cpu"]);
        assert!(m.is_alert(Some("high-cpuload"), Some(1)));
    }

    #[test]
    fn ignored_sender_always_rejected() {
        let m = matcher(&["cpu"]);
        assert!(!m.is_alert(Some("CPU 100%"), Some(IGNORED)));
        assert!(!m.is_alert(None, Some(IGNORED)));
    }

    #[test]
    fn empty_trigger_set_matches_nothing() {
        let m = matcher(&[]);
        assert_eq!(m.trigger_count(), 0);
        assert!(!m.is_alert(Some("CPU 100%"), Some(1)));
        assert!(!m.is_alert(Some(""), Some(1)));
    }

    #[test]
    fn missing_text_never_matches() {
        let m = matcher(&["cpu"]);
        assert!(!m.is_alert(None, Some(1)));
    }

    #[test]
    fn unknown_sender_is_not_ignored() {
        let m = matcher(&["cpu"]);
        assert!(m.is_alert(Some("cpu"), None));
    }

    #[test]
    fn blank_triggers_dropped() {
        let m = matcher(&["", "cpu", "CPU"]);
        assert_eq!(m.trigger_count(), 1);
    }
}
