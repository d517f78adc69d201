//! Detected signals: weakly-confident, evidence-backed hints extracted from
//! single events by individual detectors.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Value as JsonValue};

/// Category of a detected signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignalType {
    Correction,
    Satisfaction,
    Frustration,
    Repetition,
    Style,
}

impl std::fmt::Display for SignalType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Correction => write!(f, "CORRECTION"),
            Self::Satisfaction => write!(f, "SATISFACTION"),
            Self::Frustration => write!(f, "FRUSTRATION"),
            Self::Repetition => write!(f, "REPETITION"),
            Self::Style => write!(f, "STYLE"),
        }
    }
}

/// A single detected signal. Immutable once created; owned by the aggregator
/// until handed to the external learning-trigger collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectedSignal {
    pub signal_type: SignalType,
    /// Detection confidence in [0, 1].
    pub confidence: f64,
    /// Ordered human-readable evidence lines.
    pub evidence: Vec<String>,
    /// Detector-specific structured context.
    pub context: JsonMap<String, JsonValue>,
    pub timestamp: DateTime<Utc>,
    pub session_id: String,
    /// Candidate insight statement, if the detector could phrase one.
    pub suggested_statement: Option<String>,
    /// Fine-grained category label (e.g. "reasoning", "preference").
    pub suggested_category: Option<String>,
}

impl DetectedSignal {
    pub fn new(signal_type: SignalType, confidence: f64, session_id: impl Into<String>) -> Self {
        Self {
            signal_type,
            confidence: confidence.clamp(0.0, 1.0),
            evidence: Vec::new(),
            context: JsonMap::new(),
            timestamp: Utc::now(),
            session_id: session_id.into(),
            suggested_statement: None,
            suggested_category: None,
        }
    }

    pub fn with_evidence(mut self, line: impl Into<String>) -> Self {
        self.evidence.push(line.into());
        self
    }

    pub fn with_statement(mut self, statement: impl Into<String>) -> Self {
        self.suggested_statement = Some(statement.into());
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.suggested_category = Some(category.into());
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: JsonValue) -> Self {
        self.context.insert(key.into(), value);
        self
    }

    /// Stable dedupe key: signal type plus the normalized suggested statement,
    /// falling back to the first evidence line.
    pub fn dedupe_key(&self) -> String {
        let basis = self
            .suggested_statement
            .as_deref()
            .or_else(|| self.evidence.first().map(String::as_str))
            .unwrap_or("");
        format!("{}:{}", self.signal_type, normalize_for_key(basis))
    }
}

/// Lowercase, collapse whitespace, and strip non-alphanumeric characters so
/// trivially rephrased statements share a key.
fn normalize_for_key(text: &str) -> String {
    let mut key = String::with_capacity(text.len());
    let mut last_was_space = true;
    for character in text.chars() {
        if character.is_alphanumeric() {
            key.extend(character.to_lowercase());
            last_was_space = false;
        } else if !last_was_space {
            key.push(' ');
            last_was_space = true;
        }
    }
    key.trim_end().to_string()
}
