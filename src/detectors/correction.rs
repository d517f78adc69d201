//! Correction detector: catches the user pushing back on what was done.
//!
//! An ordered table of (regex, confidence) pairs runs from strongest
//! ("no, I meant…") to weakest ("to be clear"); the single highest-confidence
//! match wins per message. Secondary regexes try to split the message into a
//! rejected/wanted pair, and the most recent tool action from a small
//! per-session buffer is attached as corroborating context.

use crate::config::PipelineConfig;
use crate::event::{EventKind, InteractionEvent};
use crate::session::BoundedSessionMap;
use crate::signal::{DetectedSignal, SignalType};
use crate::text::truncate;
use crate::HindsightError;
use super::Detector;

use regex::Regex;
use serde_json::json;

use std::collections::VecDeque;
use std::sync::LazyLock;

/// Ordered strongest-first; the first match is the highest-confidence one.
static CORRECTION_PATTERNS: LazyLock<Vec<(Regex, f64)>> = LazyLock::new(|| {
    [
        (r"(?i)\bno,?\s+i meant\b", 0.95),
        (r"(?i)\bthat'?s not what i (?:meant|asked|wanted)\b", 0.9),
        (r"(?i)\bactually,?\s+i (?:meant|wanted|need)\b", 0.85),
        (r"(?i)\bno,?\s+(?:not|use|the)\b", 0.8),
        (r"(?i)\bi said\b", 0.75),
        (r"(?i)\bthat'?s wrong\b", 0.75),
        (r"(?i)\binstead of\b", 0.7),
        (r"(?i)\bnot\s+\S.*?,\s*but\b", 0.7),
        (r"(?i)\brather than\b", 0.65),
        (r"(?i)\bto be clear\b", 0.6),
    ]
    .into_iter()
    .map(|(pattern, confidence)| {
        (
            Regex::new(pattern).expect("correction pattern compiles"),
            confidence,
        )
    })
    .collect()
});

/// Secondary split: tease the rejected/wanted pair out of the message.
static REJECTED_WANTED: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)\bnot\s+(?P<rejected>[^,]{2,60}),\s*but\s+(?P<wanted>.{2,60})",
        r"(?i)\binstead of\s+(?P<rejected>.{2,60}?),\s*(?P<wanted>.{2,60})",
        r"(?i)\bi meant\s+(?P<wanted>.{2,80})",
        r"(?i)\buse\s+(?P<wanted>.{2,40})\s+instead of\s+(?P<rejected>.{2,40})",
    ]
    .into_iter()
    .map(|pattern| Regex::new(pattern).expect("split pattern compiles"))
    .collect()
});

#[derive(Debug, Clone)]
struct ActionRecord {
    tool: String,
    summary: String,
}

/// Detects explicit user corrections.
pub struct CorrectionDetector {
    recent_actions: BoundedSessionMap<VecDeque<ActionRecord>>,
    action_history: usize,
}

impl CorrectionDetector {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            recent_actions: BoundedSessionMap::new(config.max_tracked_sessions),
            action_history: config.action_history,
        }
    }

    fn record_action(&mut self, event: &InteractionEvent) {
        let Some(tool) = event.tool_name.as_deref() else {
            return;
        };
        let buffer = self
            .recent_actions
            .get_or_insert_with(&event.session_id, VecDeque::new);
        buffer.push_back(ActionRecord {
            tool: tool.to_owned(),
            summary: truncate(&event.text, 120).to_owned(),
        });
        while buffer.len() > self.action_history {
            buffer.pop_front();
        }
    }

    fn detect(&self, event: &InteractionEvent) -> Option<DetectedSignal> {
        let text = event.text.trim();
        if text.is_empty() {
            return None;
        }

        // Ordered strongest-first, so the first hit is the winner.
        let (matched, confidence) = CORRECTION_PATTERNS
            .iter()
            .find_map(|(regex, confidence)| {
                regex
                    .find(text)
                    .map(|found| (found.as_str().to_owned(), *confidence))
            })?;

        let mut rejected: Option<String> = None;
        let mut wanted: Option<String> = None;
        for splitter in REJECTED_WANTED.iter() {
            if let Some(captures) = splitter.captures(text) {
                rejected = captures
                    .name("rejected")
                    .map(|capture| capture.as_str().trim().to_owned());
                wanted = captures
                    .name("wanted")
                    .map(|capture| capture.as_str().trim().to_owned());
                break;
            }
        }

        let statement = match (&wanted, &rejected) {
            (Some(wanted), Some(rejected)) => {
                format!("User wanted \"{wanted}\", not \"{rejected}\"")
            }
            (Some(wanted), None) => format!("User wanted \"{wanted}\""),
            _ => format!("User corrected: {}", truncate(text, 120)),
        };

        let mut signal = DetectedSignal::new(SignalType::Correction, confidence, &event.session_id)
            .with_evidence(format!("matched \"{matched}\" in: {}", truncate(text, 160)))
            .with_statement(statement)
            .with_category("correction");

        if let Some(rejected) = rejected {
            signal = signal.with_context("rejected", json!(rejected));
        }
        if let Some(wanted) = wanted {
            signal = signal.with_context("wanted", json!(wanted));
        }
        if let Some(buffer) = self.recent_actions.get(&event.session_id) {
            if let Some(action) = buffer.back() {
                signal = signal.with_context(
                    "last_action",
                    json!({ "tool": action.tool, "summary": action.summary }),
                );
            }
        }

        Some(signal)
    }
}

impl Detector for CorrectionDetector {
    fn name(&self) -> &'static str {
        "correction"
    }

    fn process_event(
        &mut self,
        event: &InteractionEvent,
    ) -> Result<Vec<DetectedSignal>, HindsightError> {
        match event.kind {
            EventKind::ActionComplete => {
                self.record_action(event);
                Ok(Vec::new())
            }
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

    fn user_message(text: &str) -> InteractionEvent {
        InteractionEvent::new(EventKind::UserMessage, "s1", text)
    }

    #[test]
    fn test_no_i_meant_is_high_confidence() {
        let mut detector = CorrectionDetector::new(&PipelineConfig::default());
        let signals = detector
            .process_event(&user_message("no, I meant the other file"))
            .unwrap();
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].signal_type, SignalType::Correction);
        assert!(signals[0].confidence >= 0.9);
    }

    #[test]
    fn test_neutral_message_yields_nothing() {
        let mut detector = CorrectionDetector::new(&PipelineConfig::default());
        let signals = detector
            .process_event(&user_message("please add a unit test for the parser"))
            .unwrap();
        assert!(signals.is_empty());
    }

    #[test]
    fn test_rejected_wanted_split() {
        let mut detector = CorrectionDetector::new(&PipelineConfig::default());
        let signals = detector
            .process_event(&user_message("not the staging config, but the production one"))
            .unwrap();
        assert_eq!(signals.len(), 1);
        let context = &signals[0].context;
        assert_eq!(
            context.get("rejected").and_then(|value| value.as_str()),
            Some("the staging config")
        );
        assert_eq!(
            context.get("wanted").and_then(|value| value.as_str()),
            Some("the production one")
        );
    }

    #[test]
    fn test_attaches_most_recent_action() {
        let mut detector = CorrectionDetector::new(&PipelineConfig::default());
        let action = InteractionEvent::new(EventKind::ActionComplete, "s1", "edited config.toml")
            .with_tool("file", json!({"path": "config.toml"}));
        detector.process_event(&action).unwrap();

        let signals = detector
            .process_event(&user_message("no, I meant the other file"))
            .unwrap();
        let last_action = signals[0].context.get("last_action").unwrap();
        assert_eq!(last_action.get("tool").and_then(|value| value.as_str()), Some("file"));
    }

    #[test]
    fn test_action_buffer_is_bounded() {
        let config = PipelineConfig::default();
        let mut detector = CorrectionDetector::new(&config);
        for index in 0..10 {
            let action =
                InteractionEvent::new(EventKind::ActionComplete, "s1", format!("action {index}"))
                    .with_tool("shell", json!({}));
            detector.process_event(&action).unwrap();
        }
        let buffer = detector.recent_actions.get("s1").unwrap();
        assert_eq!(buffer.len(), config.action_history);
        assert_eq!(buffer.back().unwrap().summary, "action 9");
    }

    #[test]
    fn test_non_text_event_kinds_are_ignored() {
        let mut detector = CorrectionDetector::new(&PipelineConfig::default());
        let event = InteractionEvent::new(EventKind::Success, "s1", "no, I meant something");
        assert!(detector.process_event(&event).unwrap().is_empty());
    }
}
