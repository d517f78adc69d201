//! Pipeline counters for the operational statistics surface.
//!
//! Plain counters owned by the aggregator; [`StatsSnapshot`] is the
//! serializable view handed to dashboards.

use serde::Serialize;

use std::collections::BTreeMap;

/// Per-detector activity counters.
#[derive(Debug, Default, Clone, Serialize)]
pub struct DetectorStats {
    pub events_processed: u64,
    pub signals_emitted: u64,
    pub errors: u64,
}

/// All pipeline counters. Mutated inline by the aggregator.
#[derive(Debug, Default)]
pub struct PipelineStats {
    pub events_processed: u64,
    pub signals_detected: u64,
    pub signals_corroborated: u64,
    pub signals_deduplicated: u64,
    pub signals_filtered: u64,
    pub signals_emitted: u64,
    pub detectors: BTreeMap<&'static str, DetectorStats>,
    pub steps_created: u64,
    pub steps_completed: u64,
    pub steps_persisted: u64,
    pub step_persist_failures: u64,
    pub distiller_runs: u64,
    pub steps_analyzed: u64,
    pub candidates_generated: u64,
    pub distillations_created: u64,
    pub distillations_merged: u64,
    pub gate_rejections: u64,
}

impl PipelineStats {
    pub fn detector(&mut self, name: &'static str) -> &mut DetectorStats {
        self.detectors.entry(name).or_default()
    }

    pub fn snapshot(&self, active_sessions: usize) -> StatsSnapshot {
        StatsSnapshot {
            events_processed: self.events_processed,
            signals_detected: self.signals_detected,
            signals_corroborated: self.signals_corroborated,
            signals_deduplicated: self.signals_deduplicated,
            signals_filtered: self.signals_filtered,
            signals_emitted: self.signals_emitted,
            detectors: self
                .detectors
                .iter()
                .map(|(name, stats)| ((*name).to_owned(), stats.clone()))
                .collect(),
            steps_created: self.steps_created,
            steps_completed: self.steps_completed,
            steps_persisted: self.steps_persisted,
            step_persist_failures: self.step_persist_failures,
            distiller_runs: self.distiller_runs,
            steps_analyzed: self.steps_analyzed,
            candidates_generated: self.candidates_generated,
            distillations_created: self.distillations_created,
            distillations_merged: self.distillations_merged,
            gate_rejections: self.gate_rejections,
            active_sessions,
        }
    }
}

/// Point-in-time view of the pipeline counters.
#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    pub events_processed: u64,
    pub signals_detected: u64,
    pub signals_corroborated: u64,
    pub signals_deduplicated: u64,
    pub signals_filtered: u64,
    pub signals_emitted: u64,
    pub detectors: BTreeMap<String, DetectorStats>,
    pub steps_created: u64,
    pub steps_completed: u64,
    pub steps_persisted: u64,
    pub step_persist_failures: u64,
    pub distiller_runs: u64,
    pub steps_analyzed: u64,
    pub candidates_generated: u64,
    pub distillations_created: u64,
    pub distillations_merged: u64,
    pub gate_rejections: u64,
    pub active_sessions: usize,
}
