//! Causal/"why" detector: mines explanations out of free text.
//!
//! Twenty-odd prioritized regex groups, each tagged with the kind of content
//! they extract (reasoning, wisdom, constraint, preference). The first match
//! wins; the captured clause is rejected when too short or generic, and the
//! tag picks the human-readable statement template.

use crate::event::{EventKind, InteractionEvent};
use crate::signal::{DetectedSignal, SignalType};
use crate::text::truncate;
use crate::HindsightError;
use super::Detector;

use regex::Regex;

use std::sync::LazyLock;

const MIN_EXTRACTION_LEN: usize = 15;

/// Generic clauses not worth keeping.
const FILLER_EXTRACTIONS: &[&str] = &[
    "of course",
    "it works",
    "it just does",
    "that is how it is",
    "that's how it is",
    "i said so",
    "reasons",
];

/// What kind of content a causal pattern extracts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CausalTag {
    Reasoning,
    Wisdom,
    Constraint,
    Preference,
}

impl CausalTag {
    fn label(&self) -> &'static str {
        match self {
            Self::Reasoning => "reasoning",
            Self::Wisdom => "wisdom",
            Self::Constraint => "constraint",
            Self::Preference => "preference",
        }
    }

    fn confidence(&self) -> f64 {
        match self {
            Self::Reasoning => 0.65,
            Self::Wisdom => 0.7,
            Self::Constraint => 0.7,
            Self::Preference => 0.6,
        }
    }

    /// Statement template. Reasoning extracted from a failure event reads as
    /// a failure reason rather than generic reasoning.
    fn template(&self, extraction: &str, from_failure: bool) -> String {
        match self {
            Self::Reasoning if from_failure => format!("Failure reason: {extraction}"),
            Self::Reasoning => format!("Reasoning: {extraction}"),
            Self::Wisdom => format!("Principle: {extraction}"),
            Self::Constraint => format!("Constraint: {extraction}"),
            Self::Preference => format!("Preference: {extraction}"),
        }
    }
}

static CAUSAL_PATTERNS: LazyLock<Vec<(Regex, CausalTag)>> = LazyLock::new(|| {
    [
        (r"(?i)\bit (?:failed|broke|didn'?t work) because\s+(.{5,200})", CausalTag::Reasoning),
        (r"(?i)\bthat happened because\s+(.{5,200})", CausalTag::Reasoning),
        (r"(?i)\bthe reason (?:is|was)\s+(.{5,200})", CausalTag::Reasoning),
        (r"(?i)\bthis works because\s+(.{5,200})", CausalTag::Reasoning),
        (r"(?i)\broot cause (?:is|was)\s+(.{5,200})", CausalTag::Reasoning),
        (r"(?i)\bturns out\s+(.{5,200})", CausalTag::Wisdom),
        (r"(?i)\bthe trick (?:is|was)\s+(.{5,200})", CausalTag::Wisdom),
        (r"(?i)\blesson(?: learned)?[:,]\s*(.{5,200})", CausalTag::Wisdom),
        (r"(?i)\bnext time,?\s+(.{5,200})", CausalTag::Wisdom),
        (r"(?i)\balways\s+(.{5,120}?\s+(?:before|after|when)\s+.{3,80})", CausalTag::Wisdom),
        (r"(?i)\bnever\s+(.{5,120}?\s+(?:unless|when|without)\s+.{3,80})", CausalTag::Wisdom),
        (r"(?i)\bremember that\s+(.{5,200})", CausalTag::Wisdom),
        (r"(?i)\bwe (?:can'?t|cannot)\s+(.{5,120}?\s+because\s+.{5,120})", CausalTag::Constraint),
        (r"(?i)\bonly works (?:if|when)\s+(.{5,200})", CausalTag::Constraint),
        (r"(?i)\b(?:must|has to|needs to)\s+(.{5,120}?\s+(?:before|or else|otherwise)\s+.{3,80})", CausalTag::Constraint),
        (r"(?i)\brequires\s+(.{5,200})", CausalTag::Constraint),
        (r"(?i)\bso that\s+(.{5,200})", CausalTag::Constraint),
        (r"(?i)\bin order to\s+(.{5,200})", CausalTag::Constraint),
        (r"(?i)\bi (?:prefer|like|want)\s+(.{2,80}?\s+because\s+.{5,120})", CausalTag::Preference),
        (r"(?i)\bbecause\s+(.{5,200})", CausalTag::Reasoning),
    ]
    .into_iter()
    .map(|(pattern, tag)| (Regex::new(pattern).expect("causal pattern compiles"), tag))
    .collect()
});

/// Extracts causal clauses from user messages and failure reports.
pub struct CausalDetector;

impl CausalDetector {
    pub fn new() -> Self {
        Self
    }

    fn detect(&self, event: &InteractionEvent) -> Option<DetectedSignal> {
        let text = event.text.trim();
        if text.is_empty() {
            return None;
        }

        let (captures, tag) = CAUSAL_PATTERNS
            .iter()
            .find_map(|(regex, tag)| regex.captures(text).map(|captures| (captures, *tag)))?;

        let extraction = captures
            .get(1)?
            .as_str()
            .trim()
            .trim_end_matches(['.', '!', '?'])
            .to_owned();

        if extraction.len() < MIN_EXTRACTION_LEN {
            return None;
        }
        let lowered = extraction.to_lowercase();
        if FILLER_EXTRACTIONS.iter().any(|filler| lowered == *filler) {
            return None;
        }

        let from_failure = event.kind == EventKind::Failure;
        let statement = tag.template(&extraction, from_failure);

        Some(
            DetectedSignal::new(SignalType::Style, tag.confidence(), &event.session_id)
                .with_evidence(format!("extracted from: {}", truncate(text, 160)))
                .with_statement(statement)
                .with_category(tag.label()),
        )
    }
}

impl Default for CausalDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl Detector for CausalDetector {
    fn name(&self) -> &'static str {
        "causal"
    }

    fn process_event(
        &mut self,
        event: &InteractionEvent,
    ) -> Result<Vec<DetectedSignal>, HindsightError> {
        match event.kind {
            EventKind::UserMessage | EventKind::UserFeedback | EventKind::Failure => {
                Ok(self.detect(event).into_iter().collect())
            }
            _ => Ok(Vec::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn send(detector: &mut CausalDetector, kind: EventKind, text: &str) -> Vec<DetectedSignal> {
        detector
            .process_event(&InteractionEvent::new(kind, "s1", text))
            .unwrap()
    }

    #[test]
    fn test_failure_reason_template() {
        let mut detector = CausalDetector::new();
        let signals = send(
            &mut detector,
            EventKind::Failure,
            "it failed because the migration ran against the wrong schema",
        );
        assert_eq!(signals.len(), 1);
        let statement = signals[0].suggested_statement.as_deref().unwrap();
        assert!(statement.starts_with("Failure reason:"));
        assert!(statement.contains("wrong schema"));
        assert_eq!(signals[0].suggested_category.as_deref(), Some("reasoning"));
    }

    #[test]
    fn test_wisdom_template() {
        let mut detector = CausalDetector::new();
        let signals = send(
            &mut detector,
            EventKind::UserMessage,
            "turns out the cache key includes the locale",
        );
        assert!(signals[0]
            .suggested_statement
            .as_deref()
            .unwrap()
            .starts_with("Principle:"));
        assert_eq!(signals[0].suggested_category.as_deref(), Some("wisdom"));
    }

    #[test]
    fn test_short_extraction_rejected() {
        let mut detector = CausalDetector::new();
        let signals = send(&mut detector, EventKind::UserMessage, "because it broke");
        assert!(signals.is_empty());
    }

    #[test]
    fn test_filler_extraction_rejected() {
        let mut detector = CausalDetector::new();
        let signals = send(
            &mut detector,
            EventKind::UserMessage,
            "why? because that is how it is",
        );
        assert!(signals.is_empty());
    }

    #[test]
    fn test_no_causal_language_yields_nothing() {
        let mut detector = CausalDetector::new();
        let signals = send(&mut detector, EventKind::UserMessage, "add retries to the client");
        assert!(signals.is_empty());
    }

    #[test]
    fn test_constraint_template() {
        let mut detector = CausalDetector::new();
        let signals = send(
            &mut detector,
            EventKind::UserMessage,
            "this only works if the daemon is already running",
        );
        assert!(signals[0]
            .suggested_statement
            .as_deref()
            .unwrap()
            .starts_with("Constraint:"));
    }
}
