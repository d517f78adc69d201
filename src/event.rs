//! Input events consumed from the external ingestion collaborator.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Kind of interaction event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    UserMessage,
    ActionComplete,
    Success,
    Failure,
    UserFeedback,
    Other,
}

impl EventKind {
    /// Parse from a string, defaulting to Other.
    pub fn from_str_lossy(value: &str) -> Self {
        match value {
            "user_message" => Self::UserMessage,
            "action_complete" => Self::ActionComplete,
            "success" => Self::Success,
            "failure" => Self::Failure,
            "user_feedback" => Self::UserFeedback,
            _ => Self::Other,
        }
    }

    /// Whether this kind carries a terminal outcome for the open step.
    pub fn is_outcome(&self) -> bool {
        matches!(self, Self::Success | Self::Failure)
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UserMessage => write!(f, "user_message"),
            Self::ActionComplete => write!(f, "action_complete"),
            Self::Success => write!(f, "success"),
            Self::Failure => write!(f, "failure"),
            Self::UserFeedback => write!(f, "user_feedback"),
            Self::Other => write!(f, "other"),
        }
    }
}

/// One raw interaction event.
///
/// Optional fields default to empty so a sparse or malformed event never
/// fails the pipeline; detectors treat missing text as "nothing to match".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InteractionEvent {
    pub kind: EventKind,
    #[serde(default)]
    pub session_id: String,
    #[serde(default)]
    pub episode_id: String,
    #[serde(default)]
    pub trace_id: String,
    /// Free text: user message content, or tool/outcome summary.
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub tool_name: Option<String>,
    #[serde(default)]
    pub tool_input: Option<JsonValue>,
    /// Summaries of recent actions supplied by the ingestion layer.
    #[serde(default)]
    pub prior_actions: Vec<String>,
    /// Back-filled by session tracking once a step owns this event.
    #[serde(default)]
    pub step_id: Option<String>,
}

impl InteractionEvent {
    /// Minimal constructor used by hosts and tests.
    pub fn new(kind: EventKind, session_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            kind,
            session_id: session_id.into(),
            episode_id: String::new(),
            trace_id: String::new(),
            text: text.into(),
            tool_name: None,
            tool_input: None,
            prior_actions: Vec::new(),
            step_id: None,
        }
    }

    pub fn with_tool(mut self, tool_name: impl Into<String>, tool_input: JsonValue) -> Self {
        self.tool_name = Some(tool_name.into());
        self.tool_input = Some(tool_input);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_round_trip() {
        for kind in [
            EventKind::UserMessage,
            EventKind::ActionComplete,
            EventKind::Success,
            EventKind::Failure,
            EventKind::UserFeedback,
        ] {
            assert_eq!(EventKind::from_str_lossy(&kind.to_string()), kind);
        }
        assert_eq!(EventKind::from_str_lossy("garbage"), EventKind::Other);
    }

    #[test]
    fn test_sparse_event_deserializes() {
        let event: InteractionEvent =
            serde_json::from_str(r#"{"kind": "user_message"}"#).expect("sparse event");
        assert_eq!(event.kind, EventKind::UserMessage);
        assert!(event.session_id.is_empty());
        assert!(event.tool_name.is_none());
    }
}
