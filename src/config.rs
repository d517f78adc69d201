//! Pipeline configuration.

use serde::{Deserialize, Serialize};

/// Configuration for the learning pipeline.
///
/// All fields have tuned defaults for single-agent use; hosts typically only
/// override `step_max_age_secs` and `max_tracked_sessions`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct PipelineConfig {
    /// Seconds a signal dedupe key suppresses identical signals per session.
    pub dedupe_ttl_secs: u64,
    /// Number of processed events between distillation passes.
    pub distill_every_events: u64,
    /// Minimum resolved steps in the pool before distillation runs.
    pub min_resolved_steps: usize,
    /// Minimum occurrences a grouping needs before a strategy mines it.
    pub min_occurrences: usize,
    /// Memory gate acceptance threshold.
    pub gate_threshold: f64,
    /// Seconds after which an open step with no outcome resolves as a timeout.
    pub step_max_age_secs: u64,
    /// Maximum sessions tracked concurrently; oldest evicted first.
    pub max_tracked_sessions: usize,
    /// Maximum resolved steps retained for distillation.
    pub resolved_retention: usize,
    /// User messages kept per session for repetition clustering.
    pub message_history: usize,
    /// Sentiment polarity entries kept per session.
    pub sentiment_history: usize,
    /// Recent tool actions kept per session as correction context.
    pub action_history: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            dedupe_ttl_secs: 600,
            distill_every_events: 20,
            min_resolved_steps: 3,
            min_occurrences: 2,
            gate_threshold: 0.5,
            step_max_age_secs: 1800,
            max_tracked_sessions: 200,
            resolved_retention: 200,
            message_history: 20,
            sentiment_history: 10,
            action_history: 5,
        }
    }
}
