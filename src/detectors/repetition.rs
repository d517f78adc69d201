//! Repetition detector: the user asking for the same thing over and over.
//!
//! Each user message is normalized into a keyword set, kept in a 20-deep
//! per-session window. Messages are grouped by single-pass greedy clustering
//! on pairwise Jaccard similarity; a group of three or more fires one
//! REPETITION signal, and a fired group (or any group containing it) never
//! fires again within the session.

use crate::config::PipelineConfig;
use crate::event::{EventKind, InteractionEvent};
use crate::session::BoundedSessionMap;
use crate::signal::{DetectedSignal, SignalType};
use crate::text::{jaccard, keyword_set, truncate};
use crate::HindsightError;
use super::Detector;

use std::collections::{BTreeSet, HashSet, VecDeque};

const SIMILARITY_THRESHOLD: f64 = 0.5;
const MIN_GROUP_SIZE: usize = 3;

#[derive(Debug)]
struct MessageEntry {
    /// Monotonic per-session message number; survives window eviction so
    /// fired-group signatures stay stable.
    ordinal: u64,
    text: String,
    keywords: HashSet<String>,
}

#[derive(Debug, Default)]
struct SessionHistory {
    messages: VecDeque<MessageEntry>,
    next_ordinal: u64,
    /// Frozen ordinal sets of groups that already fired.
    fired: Vec<BTreeSet<u64>>,
}

/// Detects repeated similar requests within a session.
pub struct RepetitionDetector {
    histories: BoundedSessionMap<SessionHistory>,
    window: usize,
}

impl RepetitionDetector {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            histories: BoundedSessionMap::new(config.max_tracked_sessions),
            window: config.message_history,
        }
    }

    fn detect(&mut self, event: &InteractionEvent) -> Option<DetectedSignal> {
        let text = event.text.trim();
        if text.is_empty() {
            return None;
        }

        let window = self.window;
        let history = self
            .histories
            .get_or_insert_with(&event.session_id, SessionHistory::default);

        let keywords = keyword_set(text);
        let ordinal = history.next_ordinal;
        history.next_ordinal += 1;
        history.messages.push_back(MessageEntry {
            ordinal,
            text: text.to_owned(),
            keywords,
        });
        while history.messages.len() > window {
            history.messages.pop_front();
        }

        // Single-pass greedy clustering: the first unclustered message seeds
        // a group; later messages join the first group whose seed they match.
        let entries: Vec<&MessageEntry> = history.messages.iter().collect();
        let mut groups: Vec<Vec<usize>> = Vec::new();
        for (index, entry) in entries.iter().enumerate() {
            let joined = groups.iter_mut().find(|group| {
                let seed = entries[group[0]];
                jaccard(&seed.keywords, &entry.keywords) >= SIMILARITY_THRESHOLD
            });
            match joined {
                Some(group) => group.push(index),
                None => groups.push(vec![index]),
            }
        }

        for group in &groups {
            if group.len() < MIN_GROUP_SIZE {
                continue;
            }
            let signature: BTreeSet<u64> =
                group.iter().map(|index| entries[*index].ordinal).collect();
            // A previously fired group that is a subset of this one means the
            // same cluster simply grew; don't re-fire.
            if history
                .fired
                .iter()
                .any(|previous| previous.is_subset(&signature))
            {
                continue;
            }

            let size = group.len();
            let latest = entries[*group.last().expect("non-empty group")];
            let confidence = (0.5 + 0.1 * size as f64).min(0.9);
            let mut signal =
                DetectedSignal::new(SignalType::Repetition, confidence, &event.session_id)
                    .with_statement(format!(
                        "User repeated a similar request {size} times: \"{}\"",
                        truncate(&latest.text, 100)
                    ))
                    .with_category("repetition");
            for index in group {
                signal = signal.with_evidence(truncate(&entries[*index].text, 100).to_owned());
            }

            history.fired.push(signature);
            return Some(signal);
        }

        None
    }
}

impl Detector for RepetitionDetector {
    fn name(&self) -> &'static str {
        "repetition"
    }

    fn process_event(
        &mut self,
        event: &InteractionEvent,
    ) -> Result<Vec<DetectedSignal>, HindsightError> {
        match event.kind {
            EventKind::UserMessage => Ok(self.detect(event).into_iter().collect()),
            _ => Ok(Vec::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn send(detector: &mut RepetitionDetector, text: &str) -> Vec<DetectedSignal> {
        detector
            .process_event(&InteractionEvent::new(EventKind::UserMessage, "s1", text))
            .unwrap()
    }

    #[test]
    fn test_three_similar_messages_fire_once_on_third() {
        let mut detector = RepetitionDetector::new(&PipelineConfig::default());
        assert!(send(&mut detector, "fix the login bug in auth").is_empty());
        assert!(send(&mut detector, "please fix the login bug auth module").is_empty());
        let signals = send(&mut detector, "the login bug in auth still needs a fix");
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].signal_type, SignalType::Repetition);
        assert_eq!(signals[0].evidence.len(), 3);
    }

    #[test]
    fn test_two_similar_messages_fire_nothing() {
        let mut detector = RepetitionDetector::new(&PipelineConfig::default());
        assert!(send(&mut detector, "fix the login bug in auth").is_empty());
        assert!(send(&mut detector, "please fix the login bug auth module").is_empty());
    }

    #[test]
    fn test_group_does_not_refire_when_it_grows() {
        let mut detector = RepetitionDetector::new(&PipelineConfig::default());
        send(&mut detector, "fix the login bug in auth");
        send(&mut detector, "please fix the login bug auth module");
        assert_eq!(send(&mut detector, "the login bug in auth still needs a fix").len(), 1);
        // Fourth similar message grows the same cluster: no new signal.
        assert!(send(&mut detector, "fix that login bug in the auth module").is_empty());
    }

    #[test]
    fn test_dissimilar_messages_never_fire() {
        let mut detector = RepetitionDetector::new(&PipelineConfig::default());
        assert!(send(&mut detector, "fix the login bug").is_empty());
        assert!(send(&mut detector, "deploy the staging cluster tonight").is_empty());
        assert!(send(&mut detector, "write docs for the billing api").is_empty());
    }

    #[test]
    fn test_window_is_bounded() {
        let config = PipelineConfig::default();
        let mut detector = RepetitionDetector::new(&config);
        for index in 0..(config.message_history + 10) {
            send(&mut detector, &format!("unique message number {index} topic{index}"));
        }
        let history = detector.histories.get("s1").unwrap();
        assert_eq!(history.messages.len(), config.message_history);
    }
}
