//! Distiller: mines resolved steps into distillation candidates.
//!
//! Runs periodically over the resolved-step pool, applying four independent
//! strategies: intent-grouped heuristics/anti-patterns, tool effectiveness,
//! surprise mining, and lesson consolidation. Each strategy is isolated — a
//! failure in one is logged and skipped, the others still run — and every
//! candidate goes through the memory gate before persistence.

use crate::step::{Evaluation, Step};
use crate::store::{Distillation, DistillationType, MAX_SOURCE_STEPS};
use crate::text::keywords_ordered;

use std::collections::HashMap;

// ---------------------------------------------------------------------------
// Intent buckets
// ---------------------------------------------------------------------------

const INTENT_BUCKETS: &[(&str, &[&str])] = &[
    ("bug_fixing", &["fix", "bug", "error", "broken", "crash", "failing"]),
    ("feature_building", &["add", "implement", "create", "build"]),
    ("refactoring", &["refactor", "clean", "rename", "reorganize", "simplify"]),
    ("testing", &["test", "verify", "check", "validate"]),
    ("deployment", &["deploy", "release", "ship", "rollout"]),
    ("investigation", &["why", "investigate", "debug", "understand", "explain"]),
];

/// Normalize an intent into a grouping key: a verb-keyword bucket when one
/// matches, otherwise a slugged prefix of the raw intent.
fn intent_bucket(intent: &str) -> String {
    let keywords = keywords_ordered(intent);
    for (bucket, bucket_keywords) in INTENT_BUCKETS {
        if keywords
            .iter()
            .any(|keyword| bucket_keywords.contains(&keyword.as_str()))
        {
            return (*bucket).to_owned();
        }
    }
    let slug: Vec<String> = keywords.into_iter().take(3).collect();
    if slug.is_empty() {
        "general".to_owned()
    } else {
        slug.join("_")
    }
}

fn bucket_label(bucket: &str) -> String {
    bucket.replace('_', " ")
}

fn bucket_triggers(bucket: &str) -> Vec<String> {
    INTENT_BUCKETS
        .iter()
        .find(|(name, _)| *name == bucket)
        .map(|(_, keywords)| keywords.iter().map(|keyword| (*keyword).to_owned()).collect())
        .unwrap_or_else(|| bucket.split('_').map(String::from).collect())
}

// ---------------------------------------------------------------------------
// Candidate
// ---------------------------------------------------------------------------

/// A distillation candidate plus the source-population fractions the memory
/// gate scores against.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub distillation_type: DistillationType,
    pub statement: String,
    pub domains: Vec<String>,
    pub triggers: Vec<String>,
    pub source_step_ids: Vec<String>,
    pub confidence: f64,
    pub source_count: usize,
    /// Fraction of source steps marked `progress_made`.
    pub progress_fraction: f64,
    /// Fraction of source steps with surprise_level above 0.3.
    pub surprise_fraction: f64,
    /// Fraction of source steps marked `validated`.
    pub validated_fraction: f64,
}

impl Candidate {
    fn from_group(
        distillation_type: DistillationType,
        statement: String,
        domains: Vec<String>,
        triggers: Vec<String>,
        group: &[&Step],
        confidence: f64,
    ) -> Self {
        let count = group.len().max(1);
        let progress = group.iter().filter(|step| step.progress_made).count();
        let surprising = group
            .iter()
            .filter(|step| step.surprise_level > 0.3)
            .count();
        let validated = group.iter().filter(|step| step.validated).count();
        Self {
            distillation_type,
            statement,
            domains,
            triggers,
            source_step_ids: group
                .iter()
                .take(MAX_SOURCE_STEPS)
                .map(|step| step.step_id.clone())
                .collect(),
            confidence: confidence.clamp(0.0, 1.0),
            source_count: group.len(),
            progress_fraction: progress as f64 / count as f64,
            surprise_fraction: surprising as f64 / count as f64,
            validated_fraction: validated as f64 / count as f64,
        }
    }

    /// Materialize into a persistable record.
    pub fn into_distillation(self) -> Distillation {
        let mut distillation = Distillation::new(self.distillation_type, self.statement);
        distillation.domains = self.domains;
        distillation.triggers = self.triggers;
        distillation.source_step_ids = self.source_step_ids;
        distillation.confidence = self.confidence;
        distillation
    }
}

// ---------------------------------------------------------------------------
// Distiller
// ---------------------------------------------------------------------------

/// Mines terminal steps into distillation candidates.
pub struct Distiller {
    min_occurrences: usize,
}

impl Distiller {
    pub fn new(min_occurrences: usize) -> Self {
        Self {
            min_occurrences: min_occurrences.max(1),
        }
    }

    /// Run all four strategies over the given steps.
    ///
    /// Only steps with a terminal evaluation participate; fewer than
    /// `min_occurrences` of them means no strategy runs at all.
    pub fn distill_from_steps(&self, steps: &[Step]) -> Vec<Candidate> {
        let terminal: Vec<&Step> = steps
            .iter()
            .filter(|step| step.evaluation.is_terminal())
            .collect();
        if terminal.len() < self.min_occurrences {
            return Vec::new();
        }

        let strategies: [(&str, fn(&Self, &[&Step]) -> anyhow::Result<Vec<Candidate>>); 4] = [
            ("intent_heuristics", Self::mine_intent_groups),
            ("tool_effectiveness", Self::mine_tool_effectiveness),
            ("surprise", Self::mine_surprises),
            ("lesson_consolidation", Self::consolidate_lessons),
        ];

        let mut candidates = Vec::new();
        for (strategy_name, strategy) in strategies {
            match strategy(self, &terminal) {
                Ok(mut found) => candidates.append(&mut found),
                Err(error) => {
                    tracing::warn!(%error, strategy = strategy_name, "distillation strategy failed");
                }
            }
        }
        candidates
    }

    /// Strategy 1: per-intent-bucket success rates.
    ///
    /// Success rate at or above 0.6 produces a HEURISTIC from the most
    /// frequent successful decision; at or below 0.4 an ANTI_PATTERN from the
    /// most frequent failing one. The band in between carries no clear signal.
    fn mine_intent_groups(&self, steps: &[&Step]) -> anyhow::Result<Vec<Candidate>> {
        let mut candidates = Vec::new();
        for (bucket, group) in group_by(steps.iter().copied(), |step| intent_bucket(&step.intent)) {
            if group.len() < self.min_occurrences {
                continue;
            }
            let successes: Vec<&Step> = group
                .iter()
                .copied()
                .filter(|step| step.evaluation == Evaluation::Pass)
                .collect();
            let failures: Vec<&Step> = group
                .iter()
                .copied()
                .filter(|step| step.evaluation == Evaluation::Fail)
                .collect();
            let total = successes.len() + failures.len();
            if total == 0 {
                continue;
            }
            let success_rate = successes.len() as f64 / total as f64;
            let label = bucket_label(&bucket);

            if success_rate >= 0.6 {
                let Some(decision) = majority_decision(successes.iter().copied()) else {
                    continue;
                };
                let statement = format!(
                    "When {label}, \"{decision}\" tends to succeed ({}/{total} steps)",
                    successes.len()
                );
                candidates.push(Candidate::from_group(
                    DistillationType::Heuristic,
                    statement,
                    vec![bucket.clone()],
                    bucket_triggers(&bucket),
                    &group,
                    success_rate,
                ));
            } else if success_rate <= 0.4 {
                let Some(decision) = majority_decision(failures.iter().copied()) else {
                    continue;
                };
                let statement = format!(
                    "Avoid \"{decision}\" when {label}; it failed {} of {total} times",
                    failures.len()
                );
                candidates.push(Candidate::from_group(
                    DistillationType::AntiPattern,
                    statement,
                    vec![bucket.clone()],
                    bucket_triggers(&bucket),
                    &group,
                    1.0 - success_rate,
                ));
            }
        }
        Ok(candidates)
    }

    /// Strategy 2: which tools work, and for what.
    fn mine_tool_effectiveness(&self, steps: &[&Step]) -> anyhow::Result<Vec<Candidate>> {
        let mut candidates = Vec::new();
        let with_tool = steps.iter().copied().filter(|step| step.tool_used.is_some());
        for (tool, group) in group_by(with_tool, |step| {
            step.tool_used.clone().unwrap_or_default()
        }) {
            if group.len() < self.min_occurrences {
                continue;
            }
            let successes: Vec<&Step> = group
                .iter()
                .copied()
                .filter(|step| step.evaluation == Evaluation::Pass)
                .collect();
            if successes.len() < 2 {
                continue;
            }

            // Intent bucket with the most successful uses of this tool.
            let mut bucket_counts: HashMap<String, usize> = HashMap::new();
            for step in &successes {
                *bucket_counts.entry(intent_bucket(&step.intent)).or_insert(0) += 1;
            }
            let Some((best_bucket, _)) =
                bucket_counts.into_iter().max_by_key(|(_, count)| *count)
            else {
                continue;
            };

            // Ratio is overall successes over overall uses, matching the
            // candidate confidence; the bucket only names what the tool is
            // good for.
            let statement = format!(
                "Tool \"{tool}\" is effective for {} ({}/{} uses succeeded)",
                bucket_label(&best_bucket),
                successes.len(),
                group.len()
            );
            let mut triggers = bucket_triggers(&best_bucket);
            triggers.insert(0, tool.clone());
            candidates.push(Candidate::from_group(
                DistillationType::Heuristic,
                statement,
                vec![best_bucket],
                triggers,
                &group,
                successes.len() as f64 / group.len() as f64,
            ));
        }
        Ok(candidates)
    }

    /// Strategy 3: surprising outcomes become sharp edges.
    fn mine_surprises(&self, steps: &[&Step]) -> anyhow::Result<Vec<Candidate>> {
        let mut candidates = Vec::new();
        let surprising = steps.iter().copied().filter(|step| step.surprise_level >= 0.5);
        for (bucket, group) in group_by(surprising, |step| intent_bucket(&step.intent)) {
            if group.len() < 2 {
                continue;
            }
            let lesson = most_common_text(group.iter().filter_map(|step| step.lesson.as_deref()))
                .or_else(|| {
                    most_common_text(
                        group
                            .iter()
                            .map(|step| step.result.as_str())
                            .filter(|result| !result.is_empty()),
                    )
                })
                .unwrap_or_else(|| "outcomes diverged from predictions".to_owned());

            let mean_surprise = group
                .iter()
                .map(|step| step.surprise_level)
                .sum::<f64>()
                / group.len() as f64;

            let statement = format!("Watch out when {}: {lesson}", bucket_label(&bucket));
            candidates.push(Candidate::from_group(
                DistillationType::SharpEdge,
                statement,
                vec![bucket.clone()],
                bucket_triggers(&bucket),
                &group,
                mean_surprise,
            ));
        }
        Ok(candidates)
    }

    /// Strategy 4: consolidate recurring lessons into policies.
    ///
    /// Clusters non-trivial lessons by their leading keywords and keeps the
    /// shortest lesson per cluster — the shortest phrasing is usually the
    /// most general one.
    fn consolidate_lessons(&self, steps: &[&Step]) -> anyhow::Result<Vec<Candidate>> {
        let total_steps = steps.len().max(1);
        let with_lesson = steps
            .iter()
            .copied()
            .filter(|step| step.lesson.as_deref().is_some_and(|lesson| lesson.len() > 20));

        let mut candidates = Vec::new();
        for (cluster_key, group) in group_by(with_lesson, |step| {
            let keywords: Vec<String> = keywords_ordered(step.lesson.as_deref().unwrap_or(""))
                .into_iter()
                .take(3)
                .collect();
            keywords.join("|")
        }) {
            if cluster_key.is_empty() || group.len() < self.min_occurrences {
                continue;
            }
            let Some(shortest) = group
                .iter()
                .filter_map(|step| step.lesson.as_deref())
                .min_by_key(|lesson| lesson.len())
            else {
                continue;
            };

            let statement = format!("Policy: {}", shortest.trim_end_matches(['.', '!']));
            let triggers: Vec<String> = cluster_key.split('|').map(String::from).collect();
            let domains: Vec<String> = {
                let mut buckets: Vec<String> =
                    group.iter().map(|step| intent_bucket(&step.intent)).collect();
                buckets.sort();
                buckets.dedup();
                buckets
            };
            candidates.push(Candidate::from_group(
                DistillationType::Policy,
                statement,
                domains,
                triggers,
                &group,
                group.len() as f64 / total_steps as f64,
            ));
        }
        Ok(candidates)
    }
}

// ---------------------------------------------------------------------------
// Grouping helpers
// ---------------------------------------------------------------------------

/// Group steps by a key, preserving first-seen group order.
fn group_by<'steps>(
    steps: impl IntoIterator<Item = &'steps Step>,
    key_fn: impl Fn(&Step) -> String,
) -> Vec<(String, Vec<&'steps Step>)> {
    let mut order: Vec<String> = Vec::new();
    let mut groups: HashMap<String, Vec<&Step>> = HashMap::new();
    for step in steps {
        let key = key_fn(step);
        if !groups.contains_key(&key) {
            order.push(key.clone());
        }
        groups.entry(key).or_default().push(step);
    }
    order
        .into_iter()
        .map(|key| {
            let group = groups.remove(&key).unwrap_or_default();
            (key, group)
        })
        .collect()
}

/// Most frequent non-empty decision among the given steps.
fn majority_decision<'steps>(steps: impl Iterator<Item = &'steps Step>) -> Option<String> {
    most_common_text(
        steps
            .map(|step| step.decision.as_str())
            .filter(|decision| !decision.is_empty()),
    )
}

fn most_common_text<'texts>(texts: impl Iterator<Item = &'texts str>) -> Option<String> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for text in texts {
        *counts.entry(text).or_insert(0) += 1;
    }
    counts
        .into_iter()
        .max_by_key(|(text, count)| (*count, text.len()))
        .map(|(text, _)| text.to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolved_step(
        intent: &str,
        decision: &str,
        tool: Option<&str>,
        evaluation: Evaluation,
        lesson: Option<&str>,
    ) -> Step {
        let mut step = Step::open("s1", "e1", intent);
        step.record_action(decision, tool, None);
        step.resolve(evaluation, "outcome", lesson);
        step
    }

    #[test]
    fn test_success_rate_at_boundary_produces_heuristic() {
        // 3 of 5 is 0.6 exactly: still a heuristic.
        let steps: Vec<Step> = (0..5)
            .map(|index| {
                let evaluation = if index < 3 { Evaluation::Pass } else { Evaluation::Fail };
                resolved_step("fix the login bug", "patch the auth handler", None, evaluation, None)
            })
            .collect();
        let candidates = Distiller::new(2).distill_from_steps(&steps);
        let heuristic = candidates
            .iter()
            .find(|candidate| candidate.distillation_type == DistillationType::Heuristic)
            .expect("heuristic at 0.6 boundary");
        assert!(heuristic.statement.contains("patch the auth handler"));
        assert!((heuristic.confidence - 0.6).abs() < 1e-9);
    }

    #[test]
    fn test_failure_rate_at_boundary_produces_anti_pattern() {
        // 2 of 5 is 0.4 exactly: still an anti-pattern.
        let steps: Vec<Step> = (0..5)
            .map(|index| {
                let evaluation = if index < 2 { Evaluation::Pass } else { Evaluation::Fail };
                resolved_step("fix the login bug", "retry blindly", None, evaluation, None)
            })
            .collect();
        let candidates = Distiller::new(2).distill_from_steps(&steps);
        let anti = candidates
            .iter()
            .find(|candidate| candidate.distillation_type == DistillationType::AntiPattern)
            .expect("anti-pattern at 0.4 boundary");
        assert!(anti.statement.starts_with("Avoid"));
    }

    #[test]
    fn test_mid_band_produces_neither() {
        // 1 of 2 is 0.5: no clear signal.
        let steps = vec![
            resolved_step("fix the login bug", "patch it", None, Evaluation::Pass, None),
            resolved_step("fix the login bug", "patch it", None, Evaluation::Fail, None),
        ];
        let candidates = Distiller::new(2).distill_from_steps(&steps);
        assert!(candidates.iter().all(|candidate| {
            candidate.distillation_type != DistillationType::Heuristic
                && candidate.distillation_type != DistillationType::AntiPattern
        }));
    }

    #[test]
    fn test_tool_effectiveness_emits_heuristic() {
        let steps: Vec<Step> = (0..3)
            .map(|_| {
                resolved_step(
                    "fix the parser bug",
                    "run the failing test",
                    Some("shell"),
                    Evaluation::Pass,
                    None,
                )
            })
            .collect();
        let candidates = Distiller::new(2).distill_from_steps(&steps);
        let tool_heuristic = candidates
            .iter()
            .find(|candidate| candidate.statement.contains("Tool \"shell\""))
            .expect("tool heuristic");
        assert!(tool_heuristic.statement.contains("bug fixing"));
        assert!(tool_heuristic.triggers.contains(&"shell".to_owned()));
    }

    #[test]
    fn test_tool_ratio_counts_all_uses() {
        // Successes span two buckets and one use fails; the stated ratio
        // must be overall successes over overall uses, not best-bucket
        // successes over overall uses.
        let steps = vec![
            resolved_step("fix the parser bug", "run test", Some("shell"), Evaluation::Pass, None),
            resolved_step("fix the parser bug", "run test", Some("shell"), Evaluation::Pass, None),
            resolved_step("test the new parser", "run test", Some("shell"), Evaluation::Pass, None),
            resolved_step("fix the parser bug", "run test", Some("shell"), Evaluation::Fail, None),
        ];
        let candidates = Distiller::new(2).distill_from_steps(&steps);
        let tool_heuristic = candidates
            .iter()
            .find(|candidate| candidate.statement.contains("Tool \"shell\""))
            .expect("tool heuristic");
        assert!(tool_heuristic.statement.contains("bug fixing"));
        assert!(tool_heuristic.statement.contains("3/4 uses succeeded"));
        assert!((tool_heuristic.confidence - 0.75).abs() < 1e-9);
    }

    #[test]
    fn test_surprise_mining_produces_sharp_edge() {
        let steps: Vec<Step> = (0..2)
            .map(|_| {
                let mut step = Step::open("s1", "e1", "deploy the release");
                step.confidence_before = 0.9;
                step.resolve(Evaluation::Fail, "rollback", Some("canary caught a regression"));
                step
            })
            .collect();
        let candidates = Distiller::new(2).distill_from_steps(&steps);
        let sharp_edge = candidates
            .iter()
            .find(|candidate| candidate.distillation_type == DistillationType::SharpEdge)
            .expect("sharp edge");
        assert!(sharp_edge.statement.contains("canary caught a regression"));
        assert!(sharp_edge.surprise_fraction > 0.9);
    }

    #[test]
    fn test_lesson_consolidation_produces_policy() {
        let steps = vec![
            resolved_step(
                "migrate the users table",
                "run migration",
                None,
                Evaluation::Fail,
                Some("migration ordering matters, run them sequentially"),
            ),
            resolved_step(
                "migrate the billing table",
                "run migration",
                None,
                Evaluation::Fail,
                Some("migration ordering matters in production"),
            ),
        ];
        let candidates = Distiller::new(2).distill_from_steps(&steps);
        let policy = candidates
            .iter()
            .find(|candidate| candidate.distillation_type == DistillationType::Policy)
            .expect("policy");
        assert!(policy.statement.starts_with("Policy: "));
        assert_eq!(policy.source_count, 2);
        assert!((policy.confidence - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_non_terminal_steps_are_ignored() {
        let mut timed_out = Step::open("s1", "e1", "fix the login bug");
        timed_out.resolve_timeout();
        let steps = vec![timed_out.clone(), timed_out];
        assert!(Distiller::new(2).distill_from_steps(&steps).is_empty());
    }

    #[test]
    fn test_below_min_occurrences_runs_nothing() {
        let steps = vec![resolved_step(
            "fix the login bug",
            "patch it",
            None,
            Evaluation::Pass,
            None,
        )];
        assert!(Distiller::new(2).distill_from_steps(&steps).is_empty());
    }

    #[test]
    fn test_intent_bucket_slug_fallback() {
        assert_eq!(intent_bucket("fix the login bug"), "bug_fixing");
        assert_eq!(
            intent_bucket("summarize quarterly revenue numbers"),
            "summarize_quarterly_revenue"
        );
        assert_eq!(intent_bucket(""), "general");
    }
}
