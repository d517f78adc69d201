//! Memory gate: decides which distillation candidates are worth keeping.
//!
//! Additive scoring against a threshold. Each contributing factor appends a
//! human-readable reason so gate decisions can be audited from logs. The
//! novelty check doubles as the merge decision: a similar existing
//! distillation means the candidate absorbs into it instead of creating a
//! near-duplicate record.

use crate::distiller::Candidate;
use crate::store::Distillation;
use crate::text::word_overlap;

const SIMILARITY_OVERLAP: f64 = 0.6;

/// Statements touching these areas are kept even with thin evidence.
const HIGH_STAKES_KEYWORDS: &[&str] = &[
    "deploy",
    "delete",
    "security",
    "auth",
    "payment",
    "production",
];

/// Outcome of scoring one candidate.
#[derive(Debug, Clone)]
pub struct GateDecision {
    pub passes: bool,
    pub score: f64,
    pub reasons: Vec<String>,
    /// When set, the candidate merges into this existing distillation
    /// instead of being inserted as a new record.
    pub merge_into: Option<String>,
}

/// Scores distillation candidates before persistence.
pub struct MemoryGate {
    threshold: f64,
    min_occurrences: usize,
}

impl MemoryGate {
    pub fn new(threshold: f64, min_occurrences: usize) -> Self {
        Self {
            threshold,
            min_occurrences,
        }
    }

    /// Score a candidate against the existing distillation population.
    ///
    /// `existing` should hold the already-persisted distillations of the
    /// candidate's own type; other types never count as similar.
    pub fn score(&self, candidate: &Candidate, existing: &[Distillation]) -> GateDecision {
        let mut score = 0.0;
        let mut reasons = Vec::new();

        if candidate.progress_fraction > 0.5 {
            score += 0.3;
            reasons.push(format!(
                "majority of source steps made progress ({:.0}%)",
                candidate.progress_fraction * 100.0
            ));
        }

        let similar = self.find_similar(candidate, existing);
        match &similar {
            None => {
                score += 0.2;
                reasons.push("novel: no similar existing distillation".to_owned());
            }
            Some(distillation) => {
                score += 0.1;
                reasons.push(format!(
                    "similar to existing distillation {}",
                    distillation.distillation_id
                ));
            }
        }

        if candidate.surprise_fraction > 0.3 {
            score += 0.3;
            reasons.push(format!(
                "surprising outcomes in {:.0}% of source steps",
                candidate.surprise_fraction * 100.0
            ));
        }

        if candidate.source_count >= self.min_occurrences {
            score += 0.2;
            reasons.push(format!("{} supporting steps", candidate.source_count));
        }

        let lowered = candidate.statement.to_lowercase();
        if let Some(keyword) = HIGH_STAKES_KEYWORDS
            .iter()
            .find(|keyword| lowered.contains(*keyword))
        {
            score += 0.4;
            reasons.push(format!("high-stakes keyword \"{keyword}\""));
        }

        if candidate.validated_fraction > 0.5 {
            score += 0.1;
            reasons.push(format!(
                "validated in {:.0}% of source steps",
                candidate.validated_fraction * 100.0
            ));
        }

        GateDecision {
            passes: score >= self.threshold,
            score,
            reasons,
            merge_into: similar.map(|distillation| distillation.distillation_id.clone()),
        }
    }

    /// Similarity: same type (guaranteed by the caller's slice) plus either a
    /// trigger-set intersection or strong statement word overlap.
    fn find_similar<'existing>(
        &self,
        candidate: &Candidate,
        existing: &'existing [Distillation],
    ) -> Option<&'existing Distillation> {
        existing.iter().find(|distillation| {
            let triggers_intersect = distillation.triggers.iter().any(|trigger| {
                candidate
                    .triggers
                    .iter()
                    .any(|candidate_trigger| candidate_trigger.eq_ignore_ascii_case(trigger))
            });
            triggers_intersect
                || word_overlap(&candidate.statement, &distillation.statement)
                    >= SIMILARITY_OVERLAP
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::DistillationType;

    fn candidate(statement: &str) -> Candidate {
        Candidate {
            distillation_type: DistillationType::Heuristic,
            statement: statement.to_owned(),
            domains: vec!["bug_fixing".to_owned()],
            triggers: vec!["fix".to_owned(), "bug".to_owned()],
            source_step_ids: vec!["step-1".to_owned(), "step-2".to_owned()],
            confidence: 0.7,
            source_count: 2,
            progress_fraction: 1.0,
            surprise_fraction: 0.0,
            validated_fraction: 1.0,
        }
    }

    #[test]
    fn test_strong_candidate_passes() {
        let gate = MemoryGate::new(0.5, 2);
        let decision = gate.score(&candidate("Reproduce the failure before patching"), &[]);
        // progress 0.3 + novel 0.2 + sources 0.2 + validated 0.1
        assert!(decision.passes);
        assert!((decision.score - 0.8).abs() < 1e-9);
        assert!(decision.merge_into.is_none());
    }

    #[test]
    fn test_weak_candidate_is_rejected() {
        let gate = MemoryGate::new(0.5, 2);
        let mut weak = candidate("Try the simple thing first");
        weak.progress_fraction = 0.0;
        weak.validated_fraction = 0.0;
        weak.source_count = 1;
        // novel 0.2 only
        let decision = gate.score(&weak, &[]);
        assert!(!decision.passes);
        assert!(decision.score < 0.5);
    }

    #[test]
    fn test_high_stakes_keyword_rescues_thin_evidence() {
        let gate = MemoryGate::new(0.5, 2);
        let mut thin = candidate("Always run migrations before production deploys");
        thin.progress_fraction = 0.0;
        thin.validated_fraction = 0.0;
        thin.source_count = 1;
        // novel 0.2 + high-stakes 0.4
        let decision = gate.score(&thin, &[]);
        assert!(decision.passes);
        assert!(decision
            .reasons
            .iter()
            .any(|reason| reason.contains("high-stakes")));
    }

    #[test]
    fn test_similar_existing_yields_merge_target() {
        let gate = MemoryGate::new(0.5, 2);
        let mut existing = Distillation::new(
            DistillationType::Heuristic,
            "Reproduce the failure before patching anything",
        );
        existing.triggers = vec!["fix".to_owned()];

        let decision = gate.score(
            &candidate("Reproduce the failure before patching"),
            std::slice::from_ref(&existing),
        );
        assert!(decision.passes);
        assert_eq!(decision.merge_into.as_deref(), Some(existing.distillation_id.as_str()));
        // similar scores 0.1 where novel would have scored 0.2
        assert!((decision.score - 0.7).abs() < 1e-9);
    }

    #[test]
    fn test_statement_overlap_counts_as_similar() {
        let gate = MemoryGate::new(0.5, 2);
        let mut existing = Distillation::new(
            DistillationType::Heuristic,
            "Policy: run the failing test before changing code",
        );
        existing.triggers = vec!["unrelated".to_owned()];

        let mut near_duplicate = candidate("Policy: run the failing test before changing any code");
        near_duplicate.triggers = vec!["different".to_owned()];
        let decision = gate.score(&near_duplicate, std::slice::from_ref(&existing));
        assert!(decision.merge_into.is_some());
    }
}
