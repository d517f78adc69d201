//! Sentiment detector: satisfaction vs frustration.
//!
//! Two independent weighted pattern tables compete per message; the stronger
//! side wins, ties emit nothing, and the winner only surfaces above a 0.6
//! floor. Amplifier patterns (intensifiers, repeated punctuation) add bounded
//! boosts, and a rolling per-session polarity history upgrades confidence
//! when frustration is escalating.

use crate::config::PipelineConfig;
use crate::event::{EventKind, InteractionEvent};
use crate::session::BoundedSessionMap;
use crate::signal::{DetectedSignal, SignalType};
use crate::text::truncate;
use crate::HindsightError;
use super::Detector;

use regex::Regex;

use std::collections::VecDeque;
use std::sync::LazyLock;

const EMISSION_FLOOR: f64 = 0.6;
const CONFIDENCE_CAP: f64 = 0.99;
const AMPLIFIER_BOOST: f64 = 0.05;
const ESCALATION_BOOST: f64 = 0.1;

fn compile(table: &[(&str, f64)]) -> Vec<(Regex, f64)> {
    table
        .iter()
        .map(|(pattern, weight)| {
            (
                Regex::new(pattern).expect("sentiment pattern compiles"),
                *weight,
            )
        })
        .collect()
}

static SATISFACTION_PATTERNS: LazyLock<Vec<(Regex, f64)>> = LazyLock::new(|| {
    compile(&[
        (r"(?i)\bexactly what i (?:needed|wanted|meant)\b", 0.95),
        (r"(?i)\bperfect\b", 0.9),
        (r"(?i)\bworks (?:now|great|perfectly)\b", 0.85),
        (r"(?i)\blove it\b", 0.85),
        (r"(?i)\bwell done\b", 0.8),
        (r"(?i)\bawesome\b", 0.8),
        (r"(?i)\bthat (?:works|did it|fixed it)\b", 0.8),
        (r"(?i)\bthank(?:s| you)\b", 0.65),
        (r"(?i)\bgreat\b", 0.65),
        (r"(?i)\bnice\b", 0.6),
    ])
});

static FRUSTRATION_PATTERNS: LazyLock<Vec<(Regex, f64)>> = LazyLock::new(|| {
    compile(&[
        (r"(?i)\bstill (?:not working|broken|failing|doesn'?t work)\b", 0.9),
        (r"(?i)\bgive up\b", 0.9),
        (r"(?i)frustrat", 0.9),
        (r"(?i)\bugh+\b", 0.85),
        (r"(?i)\bthis is (?:annoying|ridiculous|hopeless)\b", 0.85),
        (r"(?i)\bwaste of time\b", 0.85),
        (r"(?i)\bnot working\b", 0.8),
        (r"(?i)\bwhy (?:isn'?t|doesn'?t|won'?t|is(?:n'?t)? this)\b", 0.75),
        (r"(?i)\bbroken again\b", 0.75),
        (r"(?i)\bcome on\b", 0.65),
    ])
});

static AMPLIFIERS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)\b(?:so|really|extremely|completely|totally|absolutely)\b",
        r"!{2,}",
        r"\?{2,}",
    ]
    .into_iter()
    .map(|pattern| Regex::new(pattern).expect("amplifier pattern compiles"))
    .collect()
});

/// Polarity of one observed message: +1 satisfied, -1 frustrated, 0 neutral.
type Polarity = i8;

/// Detects satisfaction and frustration in user messages.
pub struct SentimentDetector {
    history: BoundedSessionMap<VecDeque<Polarity>>,
    history_len: usize,
}

impl SentimentDetector {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            history: BoundedSessionMap::new(config.max_tracked_sessions),
            history_len: config.sentiment_history,
        }
    }

    fn best_weight(table: &[(Regex, f64)], text: &str) -> f64 {
        table
            .iter()
            .filter(|(regex, _)| regex.is_match(text))
            .map(|(_, weight)| *weight)
            .fold(0.0, f64::max)
    }

    fn push_polarity(&mut self, session_id: &str, polarity: Polarity) {
        let buffer = self.history.get_or_insert_with(session_id, VecDeque::new);
        buffer.push_back(polarity);
        while buffer.len() > self.history_len {
            buffer.pop_front();
        }
    }

    /// True when at least 3 of the last 5 polarity entries are negative.
    fn frustration_escalating(&self, session_id: &str) -> bool {
        let Some(buffer) = self.history.get(session_id) else {
            return false;
        };
        let negatives = buffer
            .iter()
            .rev()
            .take(5)
            .filter(|polarity| **polarity < 0)
            .count();
        negatives >= 3
    }

    fn detect(&mut self, event: &InteractionEvent) -> Option<DetectedSignal> {
        let text = event.text.trim();
        if text.is_empty() {
            return None;
        }

        let satisfaction = Self::best_weight(&SATISFACTION_PATTERNS, text);
        let frustration = Self::best_weight(&FRUSTRATION_PATTERNS, text);

        // Ties are ambivalent messages; emit nothing.
        let (signal_type, base, polarity): (SignalType, f64, Polarity) =
            if satisfaction > frustration {
                (SignalType::Satisfaction, satisfaction, 1)
            } else if frustration > satisfaction {
                (SignalType::Frustration, frustration, -1)
            } else {
                self.push_polarity(&event.session_id, 0);
                return None;
            };

        self.push_polarity(&event.session_id, polarity);

        if base < EMISSION_FLOOR {
            return None;
        }

        let amplifier_hits = AMPLIFIERS
            .iter()
            .filter(|regex| regex.is_match(text))
            .count();
        let mut confidence = (base + amplifier_hits as f64 * AMPLIFIER_BOOST).min(CONFIDENCE_CAP);

        let mut signal = DetectedSignal::new(signal_type, confidence, &event.session_id)
            .with_evidence(format!("message: {}", truncate(text, 160)))
            .with_category("sentiment");

        if signal_type == SignalType::Frustration && self.frustration_escalating(&event.session_id)
        {
            confidence = (confidence + ESCALATION_BOOST).min(CONFIDENCE_CAP);
            signal = signal.with_evidence("escalating frustration over recent messages");
        }
        signal.confidence = confidence;

        if signal_type == SignalType::Frustration {
            signal = signal.with_statement(format!(
                "User is frustrated: {}",
                truncate(text, 120)
            ));
        } else {
            signal = signal.with_statement(format!(
                "User confirmed the approach worked: {}",
                truncate(text, 120)
            ));
        }

        Some(signal)
    }
}

impl Detector for SentimentDetector {
    fn name(&self) -> &'static str {
        "sentiment"
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
