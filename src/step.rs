//! Step: the decision-record state machine.
//!
//! One Step tracks a single user intent from creation to resolution: intent →
//! action → outcome. A session holds at most one open Step; opening a new one
//! implicitly resolves the prior as a success ("the user moved on"), and
//! steps with no outcome within the configured max age resolve as timeouts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Value as JsonValue};
use uuid::Uuid;

/// Confidence assigned to a freshly opened step. Mildly success-biased, so a
/// failure registers as more surprising than a success.
const DEFAULT_CONFIDENCE_BEFORE: f64 = 0.6;

/// Terminal-or-not outcome of a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Evaluation {
    Pass,
    Fail,
    Unknown,
}

impl Evaluation {
    /// PASS and FAIL are terminal; a step never transitions out of them.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Pass | Self::Fail)
    }

    pub fn from_str_lossy(value: &str) -> Self {
        match value {
            "PASS" => Self::Pass,
            "FAIL" => Self::Fail,
            _ => Self::Unknown,
        }
    }
}

impl std::fmt::Display for Evaluation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pass => write!(f, "PASS"),
            Self::Fail => write!(f, "FAIL"),
            Self::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

/// How a step reached resolution. Implicit and timeout resolutions are
/// heuristic: no outcome event confirmed them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    Explicit,
    ImplicitSuccess,
    Timeout,
}

/// A tracked decision record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub step_id: String,
    pub session_id: String,
    pub episode_id: String,
    /// The user's stated intent that opened this step.
    pub intent: String,
    /// The decision/approach taken (most recent action summary).
    pub decision: String,
    pub action_details: JsonMap<String, JsonValue>,
    pub tool_used: Option<String>,
    /// What outcome was predicted when the step opened.
    pub prediction: String,
    /// What actually happened.
    pub result: String,
    pub evaluation: Evaluation,
    pub lesson: Option<String>,
    pub confidence_before: f64,
    pub confidence_after: f64,
    /// Prediction-vs-outcome mismatch in [0, 1].
    pub surprise_level: f64,
    pub progress_made: bool,
    /// True only when an explicit outcome event confirmed the resolution.
    pub validated: bool,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub resolution: Option<Resolution>,
}

impl Step {
    /// Open a new step for a user intent.
    pub fn open(
        session_id: impl Into<String>,
        episode_id: impl Into<String>,
        intent: impl Into<String>,
    ) -> Self {
        Self {
            step_id: Uuid::new_v4().to_string(),
            session_id: session_id.into(),
            episode_id: episode_id.into(),
            intent: intent.into(),
            decision: String::new(),
            action_details: JsonMap::new(),
            tool_used: None,
            prediction: "success".to_owned(),
            result: String::new(),
            evaluation: Evaluation::Unknown,
            lesson: None,
            confidence_before: DEFAULT_CONFIDENCE_BEFORE,
            confidence_after: DEFAULT_CONFIDENCE_BEFORE,
            surprise_level: 0.0,
            progress_made: false,
            validated: false,
            created_at: Utc::now(),
            resolved_at: None,
            resolution: None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.resolved_at.is_some()
    }

    /// Seconds since the step opened.
    pub fn age_secs(&self, now: DateTime<Utc>) -> i64 {
        (now - self.created_at).num_seconds()
    }

    /// Record an action taken on this step. Later actions overwrite the
    /// decision and tool fields; details accumulate.
    pub fn record_action(
        &mut self,
        decision: impl Into<String>,
        tool_name: Option<&str>,
        details: Option<&JsonValue>,
    ) {
        if self.is_resolved() {
            return;
        }
        self.decision = decision.into();
        if let Some(name) = tool_name {
            self.tool_used = Some(name.to_owned());
        }
        if let Some(JsonValue::Object(map)) = details {
            for (key, value) in map {
                self.action_details.insert(key.clone(), value.clone());
            }
        }
    }

    /// Resolve from an explicit outcome event. Terminal; later calls are
    /// ignored so PASS/FAIL never transitions backward.
    pub fn resolve(&mut self, evaluation: Evaluation, result: &str, lesson: Option<&str>) {
        if self.is_resolved() {
            return;
        }
        self.evaluation = evaluation;
        self.result = result.to_owned();
        self.lesson = lesson.map(String::from);
        self.validated = true;
        self.progress_made = evaluation == Evaluation::Pass;
        self.finish(Resolution::Explicit);
    }

    /// Resolve as an implicit success: the user moved on to a new intent
    /// without reporting an outcome. Heuristic, so `validated` stays false.
    pub fn resolve_implicit(&mut self) {
        if self.is_resolved() {
            return;
        }
        self.evaluation = Evaluation::Pass;
        self.result = "implicit: user moved on".to_owned();
        self.progress_made = true;
        self.finish(Resolution::ImplicitSuccess);
    }

    /// Resolve as a timeout: no outcome arrived within the max age. Counted
    /// as completed but left non-terminal so distillation skips it.
    pub fn resolve_timeout(&mut self) {
        if self.is_resolved() {
            return;
        }
        self.evaluation = Evaluation::Unknown;
        self.result = "timeout: no outcome observed".to_owned();
        self.finish(Resolution::Timeout);
    }

    fn finish(&mut self, resolution: Resolution) {
        self.resolved_at = Some(Utc::now());
        self.resolution = Some(resolution);
        // Surprise is the gap between predicted and actual outcome; the
        // confidence update nudges toward what happened.
        match self.evaluation {
            Evaluation::Pass => {
                self.surprise_level = 1.0 - self.confidence_before;
                self.confidence_after = (self.confidence_before + 0.2).min(1.0);
            }
            Evaluation::Fail => {
                self.surprise_level = self.confidence_before;
                self.confidence_after = self.confidence_before * 0.5;
            }
            Evaluation::Unknown => {
                self.surprise_level = 0.0;
                self.confidence_after = self.confidence_before;
            }
        }
    }
}
