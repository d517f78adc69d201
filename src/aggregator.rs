//! Aggregator: the pipeline's single entry point for events.
//!
//! Fans each event out to the detector set, corroborates and deduplicates the
//! resulting signals, and drives the step lifecycle (open on user intent,
//! update on action, resolve on outcome or timeout). Every K processed events
//! it runs the distiller over the resolved-step pool and routes candidates
//! through the memory gate.
//!
//! All processing is fail-open: a broken detector or store is logged and
//! skipped, never surfaced to the caller.

use crate::config::PipelineConfig;
use crate::detectors::{default_detectors, Detector};
use crate::distiller::{Candidate, Distiller};
use crate::event::{EventKind, InteractionEvent};
use crate::gate::MemoryGate;
use crate::session::BoundedSessionMap;
use crate::signal::{DetectedSignal, SignalType};
use crate::stats::{PipelineStats, StatsSnapshot};
use crate::step::{Evaluation, Step};
use crate::store::{Distillation, DistillationType, Store};

use chrono::{DateTime, Utc};

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

const CORRECTION_FRUSTRATION_BOOST: f64 = 0.15;
const REPETITION_FRUSTRATION_BOOST: f64 = 0.10;
const BOOST_CAP: f64 = 0.99;

// ---------------------------------------------------------------------------
// Statement filter
// ---------------------------------------------------------------------------

/// Classifier dropping low-value suggested statements before emission.
pub trait StatementFilter: Send {
    fn is_boilerplate(&self, statement: &str) -> bool;
}

/// Tautologies and vague phrasings not worth feeding downstream.
const BOILERPLATE_PHRASES: &[&str] = &[
    "it works",
    "it is what it is",
    "things should work",
    "do it right",
    "be careful",
    "try harder",
    "code should be good",
    "avoid bugs",
    "do the thing",
];

/// Default filter: rejects very short statements and known filler phrasings.
pub struct KeywordFilter;

impl StatementFilter for KeywordFilter {
    fn is_boilerplate(&self, statement: &str) -> bool {
        let trimmed = statement.trim();
        if trimmed.len() < 10 {
            return true;
        }
        let lowered = trimmed.to_lowercase();
        BOILERPLATE_PHRASES
            .iter()
            .any(|phrase| lowered.contains(phrase))
    }
}

// ---------------------------------------------------------------------------
// Aggregator
// ---------------------------------------------------------------------------

/// Coordinates detectors, step lifecycle, deduplication, and distillation.
///
/// Owned by exactly one task; all state is internal and unlocked.
pub struct Aggregator {
    config: PipelineConfig,
    detectors: Vec<Box<dyn Detector>>,
    store: Arc<dyn Store>,
    filter: Box<dyn StatementFilter>,
    distiller: Distiller,
    gate: MemoryGate,
    /// One open step per session at most.
    open_steps: BoundedSessionMap<Step>,
    /// Per-session map of recently fired signal keys to fire time.
    recent_signals: BoundedSessionMap<HashMap<String, DateTime<Utc>>>,
    /// Resolved steps awaiting distillation, oldest dropped past retention.
    resolved_steps: VecDeque<Step>,
    events_since_distill: u64,
    stats: PipelineStats,
}

impl Aggregator {
    pub fn new(config: PipelineConfig, store: Arc<dyn Store>) -> Self {
        let detectors = default_detectors(&config);
        Self::with_detectors(config, store, detectors, Box::new(KeywordFilter))
    }

    /// Construct with a custom detector set and statement filter.
    pub fn with_detectors(
        config: PipelineConfig,
        store: Arc<dyn Store>,
        detectors: Vec<Box<dyn Detector>>,
        filter: Box<dyn StatementFilter>,
    ) -> Self {
        Self {
            distiller: Distiller::new(config.min_occurrences),
            gate: MemoryGate::new(config.gate_threshold, config.min_occurrences),
            open_steps: BoundedSessionMap::new(config.max_tracked_sessions),
            recent_signals: BoundedSessionMap::new(config.max_tracked_sessions),
            resolved_steps: VecDeque::new(),
            events_since_distill: 0,
            stats: PipelineStats::default(),
            detectors,
            filter,
            config,
            store,
        }
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        self.stats.snapshot(self.recent_signals.len())
    }

    /// Process one event through the full pipeline.
    ///
    /// Returns the surviving signals for the external learning trigger. Never
    /// fails: detector and store errors are logged and absorbed.
    pub async fn process_event(&mut self, event: &InteractionEvent) -> Vec<DetectedSignal> {
        self.stats.events_processed += 1;

        self.update_step_lifecycle(event).await;
        self.sweep_timed_out_steps().await;

        let mut signals = self.run_detectors(event);
        self.stats.signals_detected += signals.len() as u64;

        self.corroborate(&mut signals);
        let signals = self.deduplicate(event, signals);
        let signals = self.filter_boilerplate(signals);
        self.stats.signals_emitted += signals.len() as u64;

        self.events_since_distill += 1;
        if self.events_since_distill >= self.config.distill_every_events {
            self.events_since_distill = 0;
            if self.resolved_steps.len() >= self.config.min_resolved_steps {
                self.run_distillation().await;
            }
        }

        signals
    }

    // ------- step lifecycle -------

    async fn update_step_lifecycle(&mut self, event: &InteractionEvent) {
        match event.kind {
            EventKind::UserMessage => {
                if event.text.trim().is_empty() {
                    return;
                }
                // A new intent implicitly resolves whatever the session was
                // doing: the user moved on.
                if let Some(mut previous) = self.open_steps.remove(&event.session_id) {
                    previous.resolve_implicit();
                    self.retire_step(previous).await;
                }
                let step = Step::open(&event.session_id, &event.episode_id, &event.text);
                self.stats.steps_created += 1;
                if let Some((evicted_session, mut evicted)) =
                    self.open_steps.insert(event.session_id.clone(), step)
                {
                    // Session cap reached; the evicted session's step resolves
                    // as a timeout rather than vanishing.
                    tracing::debug!(session_id = %evicted_session, "evicted open step at session cap");
                    evicted.resolve_timeout();
                    self.retire_step(evicted).await;
                }
            }
            EventKind::ActionComplete => {
                if let Some(step) = self.open_steps.get_mut(&event.session_id) {
                    step.record_action(
                        &event.text,
                        event.tool_name.as_deref(),
                        event.tool_input.as_ref(),
                    );
                }
            }
            EventKind::Success | EventKind::Failure => {
                if let Some(mut step) = self.open_steps.remove(&event.session_id) {
                    let evaluation = if event.kind == EventKind::Success {
                        Evaluation::Pass
                    } else {
                        Evaluation::Fail
                    };
                    let lesson = (!event.text.trim().is_empty()).then_some(event.text.as_str());
                    step.resolve(evaluation, &event.text, lesson);
                    self.retire_step(step).await;
                }
            }
            EventKind::UserFeedback | EventKind::Other => {}
        }
    }

    /// Force-resolve open steps older than the configured max age.
    ///
    /// Runs on every processed event, and periodically from the engine
    /// heartbeat so a quiet session's step still times out when no further
    /// events arrive.
    pub async fn sweep_timed_out_steps(&mut self) {
        let now = Utc::now();
        let max_age = self.config.step_max_age_secs as i64;
        let expired: Vec<String> = self
            .open_steps
            .iter()
            .filter(|(_, step)| step.age_secs(now) > max_age)
            .map(|(session_id, _)| session_id.clone())
            .collect();
        for session_id in expired {
            if let Some(mut step) = self.open_steps.remove(&session_id) {
                tracing::debug!(session_id = %session_id, step_id = %step.step_id, "step timed out");
                step.resolve_timeout();
                self.retire_step(step).await;
            }
        }
    }

    /// Persist a resolved step and add it to the distillation pool.
    async fn retire_step(&mut self, step: Step) {
        self.stats.steps_completed += 1;
        match self.store.save_step(&step).await {
            Ok(()) => self.stats.steps_persisted += 1,
            Err(error) => {
                self.stats.step_persist_failures += 1;
                tracing::warn!(%error, step_id = %step.step_id, "failed to persist step");
            }
        }
        self.resolved_steps.push_back(step);
        while self.resolved_steps.len() > self.config.resolved_retention {
            self.resolved_steps.pop_front();
        }
    }

    // ------- signal pipeline -------

    fn run_detectors(&mut self, event: &InteractionEvent) -> Vec<DetectedSignal> {
        let mut signals = Vec::new();
        for detector in &mut self.detectors {
            let name = detector.name();
            let detector_stats = self.stats.detector(name);
            detector_stats.events_processed += 1;
            match detector.process_event(event) {
                Ok(mut found) => {
                    detector_stats.signals_emitted += found.len() as u64;
                    signals.append(&mut found);
                }
                Err(error) => {
                    detector_stats.errors += 1;
                    tracing::warn!(%error, detector = name, "detector failed, skipping");
                }
            }
        }
        signals
    }

    /// Boost signals that independently support each other within one batch.
    fn corroborate(&mut self, signals: &mut [DetectedSignal]) {
        if signals.len() < 2 {
            return;
        }
        let has = |signal_type: SignalType| {
            signals
                .iter()
                .any(|signal| signal.signal_type == signal_type)
        };
        let frustration = has(SignalType::Frustration);
        let correction_pair = frustration && has(SignalType::Correction);
        let repetition_pair = frustration && has(SignalType::Repetition);

        for signal in signals.iter_mut() {
            let boost = match signal.signal_type {
                SignalType::Correction | SignalType::Frustration if correction_pair => {
                    Some((CORRECTION_FRUSTRATION_BOOST, "correction+frustration"))
                }
                SignalType::Repetition if repetition_pair => {
                    Some((REPETITION_FRUSTRATION_BOOST, "repetition+frustration"))
                }
                _ => None,
            };
            if let Some((boost, pair)) = boost {
                signal.confidence = (signal.confidence + boost).min(BOOST_CAP);
                signal
                    .evidence
                    .push(format!("corroborated by {pair} in the same batch"));
                self.stats.signals_corroborated += 1;
            }
        }
        // Frustration corroborated by repetition alone (no correction present).
        if repetition_pair && !correction_pair {
            for signal in signals.iter_mut() {
                if signal.signal_type == SignalType::Frustration {
                    signal.confidence =
                        (signal.confidence + REPETITION_FRUSTRATION_BOOST).min(BOOST_CAP);
                    signal
                        .evidence
                        .push("corroborated by repetition+frustration in the same batch".to_owned());
                    self.stats.signals_corroborated += 1;
                }
            }
        }
    }

    /// Suppress signals whose key fired for this session within the TTL.
    fn deduplicate(
        &mut self,
        event: &InteractionEvent,
        signals: Vec<DetectedSignal>,
    ) -> Vec<DetectedSignal> {
        if signals.is_empty() {
            return signals;
        }
        let now = Utc::now();
        let ttl = chrono::Duration::seconds(self.config.dedupe_ttl_secs as i64);
        let recent = self
            .recent_signals
            .get_or_insert_with(&event.session_id, HashMap::new);
        recent.retain(|_, fired_at| now - *fired_at < ttl);

        let mut surviving = Vec::with_capacity(signals.len());
        for signal in signals {
            let key = signal.dedupe_key();
            if recent.contains_key(&key) {
                self.stats.signals_deduplicated += 1;
                continue;
            }
            recent.insert(key, now);
            surviving.push(signal);
        }
        surviving
    }

    fn filter_boilerplate(&mut self, signals: Vec<DetectedSignal>) -> Vec<DetectedSignal> {
        let mut surviving = Vec::with_capacity(signals.len());
        for signal in signals {
            let boilerplate = signal
                .suggested_statement
                .as_deref()
                .is_some_and(|statement| self.filter.is_boilerplate(statement));
            if boilerplate {
                self.stats.signals_filtered += 1;
                tracing::debug!(key = %signal.dedupe_key(), "dropped boilerplate statement");
            } else {
                surviving.push(signal);
            }
        }
        surviving
    }

    // ------- distillation -------

    async fn run_distillation(&mut self) {
        self.stats.distiller_runs += 1;
        let pool: Vec<Step> = self.resolved_steps.iter().cloned().collect();
        self.stats.steps_analyzed += pool.len() as u64;

        let candidates = self.distiller.distill_from_steps(&pool);
        self.stats.candidates_generated += candidates.len() as u64;
        if candidates.is_empty() {
            return;
        }

        // Existing distillations per type, fetched once per run. New records
        // created in this run join the cache so a later candidate merges
        // instead of duplicating.
        let mut existing_by_type: HashMap<DistillationType, Vec<Distillation>> = HashMap::new();
        for candidate in candidates {
            let distillation_type = candidate.distillation_type;
            if !existing_by_type.contains_key(&distillation_type) {
                match self.store.get_distillations_by_type(distillation_type).await {
                    Ok(existing) => {
                        existing_by_type.insert(distillation_type, existing);
                    }
                    Err(error) => {
                        tracing::warn!(%error, %distillation_type, "failed to load existing distillations");
                        continue;
                    }
                }
            }
            let existing = existing_by_type
                .entry(distillation_type)
                .or_default();
            self.gate_and_persist(candidate, existing).await;
        }
    }

    async fn gate_and_persist(&mut self, candidate: Candidate, existing: &mut Vec<Distillation>) {
        let decision = self.gate.score(&candidate, existing);
        if !decision.passes {
            self.stats.gate_rejections += 1;
            tracing::debug!(
                score = decision.score,
                statement = %candidate.statement,
                "gate rejected candidate"
            );
            return;
        }

        match decision.merge_into {
            Some(merge_id) => {
                let Some(target) = existing
                    .iter_mut()
                    .find(|distillation| distillation.distillation_id == merge_id)
                else {
                    return;
                };
                target.absorb(candidate.confidence, &candidate.source_step_ids);
                match self.store.update_distillation(target).await {
                    Ok(()) => {
                        self.stats.distillations_merged += 1;
                        tracing::debug!(distillation_id = %merge_id, "merged candidate into existing distillation");
                    }
                    Err(error) => {
                        tracing::warn!(%error, distillation_id = %merge_id, "failed to update distillation");
                    }
                }
            }
            None => {
                let distillation = candidate.into_distillation();
                match self.store.save_distillation(&distillation).await {
                    Ok(()) => {
                        self.stats.distillations_created += 1;
                        tracing::info!(
                            distillation_id = %distillation.distillation_id,
                            distillation_type = %distillation.distillation_type,
                            statement = %distillation.statement,
                            reasons = ?decision.reasons,
                            "created distillation"
                        );
                        existing.push(distillation);
                    }
                    Err(error) => {
                        tracing::warn!(%error, "failed to save distillation");
                    }
                }
            }
        }
    }
}
