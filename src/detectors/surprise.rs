//! Engagement-surprise detector: prediction-vs-outcome mismatches.
//!
//! The surprise metrics themselves come from the host domain; this module
//! only defines the collaborator seam ([`SurpriseScorer`]) and adapts it to
//! the common detector contract. The default [`PayloadScorer`] reads metrics
//! the ingestion layer embeds in the event payload.

use crate::event::{EventKind, InteractionEvent};
use crate::signal::{DetectedSignal, SignalType};
use crate::HindsightError;
use super::Detector;

use serde_json::json;

const SURPRISE_THRESHOLD: f64 = 0.5;

/// Domain-supplied prediction/outcome reading for one event.
#[derive(Debug, Clone)]
pub struct SurpriseReading {
    pub prediction: String,
    pub observed: String,
    /// Mismatch magnitude in [0, 1].
    pub surprise: f64,
}

/// External collaborator supplying surprise metrics.
pub trait SurpriseScorer: Send {
    fn assess(&self, event: &InteractionEvent) -> Option<SurpriseReading>;
}

/// Default scorer: reads `prediction` / `observed` / `surprise` fields the
/// ingestion layer embeds in the event payload.
pub struct PayloadScorer;

impl SurpriseScorer for PayloadScorer {
    fn assess(&self, event: &InteractionEvent) -> Option<SurpriseReading> {
        let payload = event.tool_input.as_ref()?.as_object()?;
        let surprise = payload.get("surprise")?.as_f64()?;
        Some(SurpriseReading {
            prediction: payload
                .get("prediction")
                .and_then(|value| value.as_str())
                .unwrap_or_default()
                .to_owned(),
            observed: payload
                .get("observed")
                .and_then(|value| value.as_str())
                .unwrap_or_default()
                .to_owned(),
            surprise: surprise.clamp(0.0, 1.0),
        })
    }
}

/// Adapts a [`SurpriseScorer`] to the detector contract.
pub struct EngagementDetector {
    scorer: Box<dyn SurpriseScorer>,
}

impl EngagementDetector {
    pub fn new(scorer: Box<dyn SurpriseScorer>) -> Self {
        Self { scorer }
    }
}

impl Detector for EngagementDetector {
    fn name(&self) -> &'static str {
        "surprise"
    }

    fn process_event(
        &mut self,
        event: &InteractionEvent,
    ) -> Result<Vec<DetectedSignal>, HindsightError> {
        if !matches!(
            event.kind,
            EventKind::ActionComplete | EventKind::Success | EventKind::Failure
        ) {
            return Ok(Vec::new());
        }

        let Some(reading) = self.scorer.assess(event) else {
            return Ok(Vec::new());
        };
        if reading.surprise < SURPRISE_THRESHOLD {
            return Ok(Vec::new());
        }

        let signal = DetectedSignal::new(SignalType::Style, reading.surprise, &event.session_id)
            .with_evidence(format!(
                "predicted \"{}\", observed \"{}\"",
                reading.prediction, reading.observed
            ))
            .with_statement(format!(
                "Expectation mismatch: predicted \"{}\" but observed \"{}\"",
                reading.prediction, reading.observed
            ))
            .with_category("surprise")
            .with_context("surprise_level", json!(reading.surprise));

        Ok(vec![signal])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome_event(surprise: f64) -> InteractionEvent {
        InteractionEvent::new(EventKind::Failure, "s1", "deploy failed").with_tool(
            "deploy",
            json!({
                "prediction": "clean rollout",
                "observed": "rollback triggered",
                "surprise": surprise,
            }),
        )
    }

    #[test]
    fn test_high_surprise_emits_signal() {
        let mut detector = EngagementDetector::new(Box::new(PayloadScorer));
        let signals = detector.process_event(&outcome_event(0.8)).unwrap();
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].signal_type, SignalType::Style);
        assert_eq!(signals[0].suggested_category.as_deref(), Some("surprise"));
    }

    #[test]
    fn test_low_surprise_is_ignored() {
        let mut detector = EngagementDetector::new(Box::new(PayloadScorer));
        assert!(detector.process_event(&outcome_event(0.2)).unwrap().is_empty());
    }

    #[test]
    fn test_event_without_metrics_is_ignored() {
        let mut detector = EngagementDetector::new(Box::new(PayloadScorer));
        let event = InteractionEvent::new(EventKind::Failure, "s1", "deploy failed");
        assert!(detector.process_event(&event).unwrap().is_empty());
    }
}
