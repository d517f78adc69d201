//! Semantic-intent detector: soft redirects and stated preferences.
//!
//! Lower-confidence than the correction detector ("what about", "let's go
//! with"). A per-key repeat counter boosts confidence when the user keeps
//! steering the same way: +0.15 on the second occurrence, +0.10 more on the
//! third, capped at 0.95. The counter map is cleared once it grows past 50
//! keys.

use crate::event::{EventKind, InteractionEvent};
use crate::signal::{DetectedSignal, SignalType};
use crate::text::truncate;
use crate::HindsightError;
use super::Detector;

use regex::Regex;
use serde_json::json;

use std::collections::HashMap;
use std::sync::LazyLock;

const SECOND_OCCURRENCE_BOOST: f64 = 0.15;
const THIRD_OCCURRENCE_BOOST: f64 = 0.10;
const CONFIDENCE_CAP: f64 = 0.95;
const MAX_TRACKED_KEYS: usize = 50;

struct IntentPattern {
    regex: Regex,
    label: &'static str,
    confidence: f64,
}

static INTENT_PATTERNS: LazyLock<Vec<IntentPattern>> = LazyLock::new(|| {
    [
        (
            r"(?i)\buse\s+(?P<wanted>.{2,40}?)\s+instead of\s+(?P<rejected>.{2,40})",
            "redirect",
            0.6,
        ),
        (
            r"(?i)\bi'?d (?:prefer|rather)\s+(?P<wanted>.{2,60})",
            "preference",
            0.6,
        ),
        (
            r"(?i)\blet'?s (?:go with|use|try)\s+(?P<wanted>.{2,60})",
            "preference",
            0.55,
        ),
        (
            r"(?i)\bswitch to\s+(?P<wanted>.{2,60})",
            "redirect",
            0.55,
        ),
        (
            r"(?i)\bwhat about\s+(?P<wanted>.{2,60})",
            "redirect",
            0.5,
        ),
        (
            r"(?i)\bcan we (?:use|try)\s+(?P<wanted>.{2,60})",
            "redirect",
            0.5,
        ),
        (
            r"(?i)\bgo back to\s+(?P<wanted>.{2,60})",
            "redirect",
            0.5,
        ),
    ]
    .into_iter()
    .map(|(pattern, label, confidence)| IntentPattern {
        regex: Regex::new(pattern).expect("intent pattern compiles"),
        label,
        confidence,
    })
    .collect()
});

/// Detects soft redirects and preferences, boosting repeated ones.
pub struct IntentDetector {
    repeat_counts: HashMap<String, u32>,
}

impl IntentDetector {
    pub fn new() -> Self {
        Self {
            repeat_counts: HashMap::new(),
        }
    }

    fn detect(&mut self, event: &InteractionEvent) -> Option<DetectedSignal> {
        let text = event.text.trim();
        if text.is_empty() {
            return None;
        }

        let (pattern, captures) = INTENT_PATTERNS
            .iter()
            .find_map(|pattern| pattern.regex.captures(text).map(|captures| (pattern, captures)))?;

        let wanted = captures
            .name("wanted")
            .map(|capture| capture.as_str().trim().trim_end_matches(['.', '!', '?']).to_owned())
            .unwrap_or_default();
        let rejected = captures
            .name("rejected")
            .map(|capture| capture.as_str().trim().trim_end_matches(['.', '!', '?']).to_owned());

        // Repeat tracking: same (wanted, rejected, label) seen again raises
        // confidence. Bounded by wholesale reset, matching the cheap original
        // policy rather than LRU bookkeeping.
        if self.repeat_counts.len() > MAX_TRACKED_KEYS {
            self.repeat_counts.clear();
        }
        let key = format!(
            "{}|{}|{}",
            wanted.to_lowercase(),
            rejected.as_deref().unwrap_or("").to_lowercase(),
            pattern.label
        );
        let count = self.repeat_counts.entry(key).or_insert(0);
        *count += 1;

        let mut confidence = pattern.confidence;
        if *count >= 2 {
            confidence += SECOND_OCCURRENCE_BOOST;
        }
        if *count >= 3 {
            confidence += THIRD_OCCURRENCE_BOOST;
        }
        confidence = confidence.min(CONFIDENCE_CAP);

        let statement = match &rejected {
            Some(rejected) => format!("User prefers \"{wanted}\" over \"{rejected}\""),
            None => format!("User steered toward \"{wanted}\""),
        };

        let mut signal = DetectedSignal::new(SignalType::Style, confidence, &event.session_id)
            .with_evidence(format!("matched {} in: {}", pattern.label, truncate(text, 160)))
            .with_statement(statement)
            .with_category(pattern.label)
            .with_context("wanted", json!(wanted))
            .with_context("occurrence", json!(*count));
        if let Some(rejected) = rejected {
            signal = signal.with_context("rejected", json!(rejected));
        }

        Some(signal)
    }
}

impl Default for IntentDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl Detector for IntentDetector {
    fn name(&self) -> &'static str {
        "intent"
    }

    fn process_event(
        &mut self,
        event: &InteractionEvent,
    ) -> Result<Vec<DetectedSignal>, HindsightError> {
        match event.kind {
            EventKind::UserMessage | EventKind::UserFeedback => {
                Ok(self.detect(event).into_iter().collect())
            }
            _ => Ok(Vec::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn send(detector: &mut IntentDetector, text: &str) -> Vec<DetectedSignal> {
        detector
            .process_event(&InteractionEvent::new(EventKind::UserMessage, "s1", text))
            .unwrap()
    }

    #[test]
    fn test_preference_is_detected_with_low_confidence() {
        let mut detector = IntentDetector::new();
        let signals = send(&mut detector, "let's go with sqlite for now");
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].signal_type, SignalType::Style);
        assert!(signals[0].confidence < 0.7);
        assert_eq!(signals[0].suggested_category.as_deref(), Some("preference"));
    }

    #[test]
    fn test_repeat_occurrences_boost_confidence() {
        let mut detector = IntentDetector::new();
        let first = send(&mut detector, "let's go with sqlite for now")[0].confidence;
        let second = send(&mut detector, "let's go with sqlite for now")[0].confidence;
        let third = send(&mut detector, "let's go with sqlite for now")[0].confidence;
        assert!((second - (first + 0.15)).abs() < 1e-9);
        assert!((third - (first + 0.25)).abs() < 1e-9);
    }

    #[test]
    fn test_boost_is_capped() {
        let mut detector = IntentDetector::new();
        for _ in 0..10 {
            let signals = send(&mut detector, "I'd prefer tabs over spaces here");
            assert!(signals[0].confidence <= 0.95);
        }
    }

    #[test]
    fn test_counter_map_resets_past_key_limit() {
        let mut detector = IntentDetector::new();
        for index in 0..=MAX_TRACKED_KEYS {
            send(&mut detector, &format!("let's go with option{index}"));
        }
        // Map was cleared during the loop; re-sending an early key starts over.
        let signals = send(&mut detector, "let's go with option0");
        assert_eq!(
            signals[0].context.get("occurrence").and_then(|value| value.as_u64()),
            Some(1)
        );
    }

    #[test]
    fn test_plain_statement_yields_nothing() {
        let mut detector = IntentDetector::new();
        assert!(send(&mut detector, "the tests all pass locally").is_empty());
    }
}
