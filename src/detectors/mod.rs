//! The detector set: six independent weak-signal extractors.
//!
//! Each detector consumes one event at a time, maintains a bounded
//! per-session history, and reacts only to the event kinds it understands —
//! on anything else it returns an empty list. Detectors share no state with
//! one another; corroboration across detectors is the aggregator's job.

pub mod causal;
pub mod correction;
pub mod intent;
pub mod repetition;
pub mod sentiment;
pub mod surprise;

pub use causal::CausalDetector;
pub use correction::CorrectionDetector;
pub use intent::IntentDetector;
pub use repetition::RepetitionDetector;
pub use sentiment::SentimentDetector;
pub use surprise::{EngagementDetector, PayloadScorer, SurpriseReading, SurpriseScorer};

use crate::config::PipelineConfig;
use crate::event::InteractionEvent;
use crate::signal::DetectedSignal;
use crate::HindsightError;

/// One weak-signal detector.
///
/// `process_event` is pure given the detector's internal per-session buffer.
/// Errors are caught by the aggregator and treated as an empty signal list,
/// so a broken detector can never fail the whole event.
pub trait Detector: Send {
    fn name(&self) -> &'static str;

    fn process_event(
        &mut self,
        event: &InteractionEvent,
    ) -> Result<Vec<DetectedSignal>, HindsightError>;
}

/// Construct the standard detector set.
pub fn default_detectors(config: &PipelineConfig) -> Vec<Box<dyn Detector>> {
    vec![
        Box::new(CorrectionDetector::new(config)),
        Box::new(SentimentDetector::new(config)),
        Box::new(RepetitionDetector::new(config)),
        Box::new(IntentDetector::new()),
        Box::new(CausalDetector::new()),
        Box::new(EngagementDetector::new(Box::new(PayloadScorer))),
    ]
}
