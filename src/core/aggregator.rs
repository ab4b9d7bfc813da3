//! Collapses the raw log stream into a deduplicated phase timeline.
//!
//! Each `log` event is mapped to at most one phase: the producer's `phase`
//! tag when it carries one, otherwise the first matching keyword rule.
//! Messages that map to nothing are dropped. A candidate is emitted only
//! when its phase differs from the last emitted one.

use tracing::debug;

use crate::domain::{Phase, PhaseEvent, RawEvent};

/// Keyword rule mapping log text to a phase
#[derive(Debug, Clone)]
pub struct PhaseRule {
    pub phase: Phase,

    /// Case-insensitive substrings; any one matches
    pub keywords: Vec<String>,

    /// Sentence shown in the timeline
    pub text: String,
}

impl PhaseRule {
    pub fn new(phase: Phase, keywords: &[&str], text: impl Into<String>) -> Self {
        Self {
            phase,
            keywords: keywords.iter().map(|k| k.to_lowercase()).collect(),
            text: text.into(),
        }
    }

    fn matches(&self, message_lower: &str) -> bool {
        self.keywords.iter().any(|k| message_lower.contains(k.as_str()))
    }
}

/// Ordered rule set; the first matching rule wins
#[derive(Debug, Clone)]
pub struct PhaseRules {
    rules: Vec<PhaseRule>,
}

impl Default for PhaseRules {
    fn default() -> Self {
        Self::new(vec![
            PhaseRule::new(
                Phase::Init,
                &["starting orchestration"],
                Phase::Init.default_text(),
            ),
            PhaseRule::new(
                Phase::Plan,
                &["execution plan", "planning"],
                Phase::Plan.default_text(),
            ),
            PhaseRule::new(
                Phase::Ingest,
                &["ingesting", "analyzing source", "fetching source"],
                Phase::Ingest.default_text(),
            ),
            PhaseRule::new(
                Phase::Generate,
                &["generating"],
                Phase::Generate.default_text(),
            ),
            PhaseRule::new(
                Phase::Review,
                &["reviewing", "quality check", "scoring"],
                Phase::Review.default_text(),
            ),
            // "published" must be tested before "publishing"
            PhaseRule::new(
                Phase::Published,
                &["published"],
                Phase::Published.default_text(),
            ),
            PhaseRule::new(
                Phase::Publish,
                &["publishing", "scheduling"],
                Phase::Publish.default_text(),
            ),
        ])
    }
}

impl PhaseRules {
    /// Build a rule set; terminal phases are not classifiable and are dropped
    pub fn new(rules: Vec<PhaseRule>) -> Self {
        Self {
            rules: rules.into_iter().filter(|r| !r.phase.is_terminal()).collect(),
        }
    }

    /// Classify a free-text message
    pub fn classify(&self, message: &str) -> Option<(Phase, &str)> {
        let lower = message.to_lowercase();
        self.rules
            .iter()
            .find(|r| r.matches(&lower))
            .map(|r| (r.phase, r.text.as_str()))
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// Per-job aggregation state
#[derive(Debug, Clone, Default)]
pub struct PhaseAggregator {
    rules: PhaseRules,
    last_emitted: Option<Phase>,
}

impl PhaseAggregator {
    pub fn new(rules: PhaseRules) -> Self {
        Self {
            rules,
            last_emitted: None,
        }
    }

    pub fn last_emitted(&self) -> Option<Phase> {
        self.last_emitted
    }

    /// Forget the previous job's state
    pub fn reset(&mut self) {
        self.last_emitted = None;
    }

    /// Map a `log` event to a candidate without touching state
    pub fn candidate(&self, event: &RawEvent) -> Option<(Phase, String)> {
        if let Some(tag) = event.phase.as_deref() {
            return match tag.parse::<Phase>() {
                Ok(phase) if !phase.is_terminal() => {
                    let text = event
                        .message
                        .clone()
                        .unwrap_or_else(|| phase.default_text().to_string());
                    Some((phase, text))
                }
                _ => {
                    debug!(tag, "Dropping event with unusable phase tag");
                    None
                }
            };
        }

        let message = event.message.as_deref()?;
        self.rules
            .classify(message)
            .map(|(phase, text)| (phase, text.to_string()))
    }

    /// Feed a `log` event; returns the timeline entry to append, if any
    pub fn observe(&mut self, event: &RawEvent) -> Option<PhaseEvent> {
        let (phase, text) = self.candidate(event)?;

        if self.last_emitted == Some(phase) {
            debug!(%phase, "Suppressing repeated phase");
            return None;
        }

        self.last_emitted = Some(phase);
        Some(PhaseEvent::new(phase, text))
    }

    /// Completion entry; always emitted, bypassing dedup
    pub fn complete(&mut self) -> PhaseEvent {
        self.last_emitted = Some(Phase::Complete);
        PhaseEvent::new(Phase::Complete, Phase::Complete.default_text())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_rules_cover_vocabulary() {
        let rules = PhaseRules::default();
        assert_eq!(rules.len(), 7);

        let cases = [
            ("Starting orchestration...", Phase::Init),
            ("Execution plan ready", Phase::Plan),
            ("Ingesting source document", Phase::Ingest),
            ("Generating variant for twitter", Phase::Generate),
            ("Reviewing drafts", Phase::Review),
            ("Publishing to linkedin", Phase::Publish),
            ("Published 2 posts", Phase::Published),
        ];
        for (message, expected) in cases {
            assert_eq!(rules.classify(message).map(|(p, _)| p), Some(expected), "{message}");
        }
    }

    #[test]
    fn test_classification_is_case_insensitive() {
        let rules = PhaseRules::default();
        assert_eq!(
            rules.classify("EXECUTION PLAN READY").map(|(p, _)| p),
            Some(Phase::Plan)
        );
    }

    #[test]
    fn test_terminal_rules_are_rejected() {
        let rules = PhaseRules::new(vec![
            PhaseRule::new(Phase::Complete, &["done"], "Done"),
            PhaseRule::new(Phase::Plan, &["plan"], "Plan"),
        ]);
        assert_eq!(rules.len(), 1);
        assert!(rules.classify("done").is_none());
    }

    #[test]
    fn test_unmatched_message_leaves_state_alone() {
        let mut agg = PhaseAggregator::default();
        agg.observe(&RawEvent::log("Execution plan ready")).unwrap();

        assert!(agg.observe(&RawEvent::log("tokenizer warmed up")).is_none());
        assert_eq!(agg.last_emitted(), Some(Phase::Plan));
    }

    #[test]
    fn test_phase_tag_takes_precedence() {
        let mut agg = PhaseAggregator::default();
        let event = RawEvent::log("Starting orchestration...").with_phase("review");

        let emitted = agg.observe(&event).unwrap();
        assert_eq!(emitted.phase, Phase::Review);
        assert_eq!(emitted.text, "Starting orchestration...");
    }

    #[test]
    fn test_phase_tag_without_message_uses_default_text() {
        let mut agg = PhaseAggregator::default();
        let mut event = RawEvent::new(crate::domain::EventKind::Log);
        event.phase = Some("ingest".to_string());

        let emitted = agg.observe(&event).unwrap();
        assert_eq!(emitted.text, Phase::Ingest.default_text());
    }

    #[test]
    fn test_unknown_or_terminal_tag_is_dropped() {
        let mut agg = PhaseAggregator::default();
        assert!(agg
            .observe(&RawEvent::log("Execution plan ready").with_phase("deploy"))
            .is_none());
        assert!(agg
            .observe(&RawEvent::log("Execution plan ready").with_phase("complete"))
            .is_none());
        assert_eq!(agg.last_emitted(), None);
    }

    #[test]
    fn test_complete_bypasses_dedup() {
        let mut agg = PhaseAggregator::default();
        assert_eq!(agg.complete().phase, Phase::Complete);
        assert_eq!(agg.complete().phase, Phase::Complete);
    }

    #[test]
    fn test_reset_forgets_last_phase() {
        let mut agg = PhaseAggregator::default();
        agg.observe(&RawEvent::log("Starting orchestration")).unwrap();
        agg.reset();

        assert!(agg.observe(&RawEvent::log("Starting orchestration")).is_some());
    }
}
