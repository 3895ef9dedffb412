//! Persisted agent loop steps.
//!
//! Each committed iteration of an agent loop becomes one [`Step`]. Steps are
//! append-only and single-writer: only the owning agent's loop appends to its
//! history. Storage backends implement [`HistoryStore`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::HistoryError;
use crate::message::Message;

/// Which kind of action a step dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepAction {
    ToolCall,
    SendMessage,
    FinalAnswer,
}

impl StepAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ToolCall => "tool_call",
            Self::SendMessage => "send_message",
            Self::FinalAnswer => "final_answer",
        }
    }
}

impl std::fmt::Display for StepAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One committed iteration of an agent loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    /// 1-based iteration number
    pub iteration: u32,

    pub thought: String,

    pub action: StepAction,

    /// The decoded action payload (tool name and params, recipient, answer).
    #[serde(default)]
    pub action_input: Value,

    /// What the agent observed as a result of the action.
    #[serde(default)]
    pub observation: String,

    /// Messages drained from the inbox before this step's model call.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub received: Vec<Message>,

    pub timestamp: DateTime<Utc>,
}

impl Step {
    pub fn new(iteration: u32, thought: impl Into<String>, action: StepAction, action_input: Value) -> Self {
        Self {
            iteration,
            thought: thought.into(),
            action,
            action_input,
            observation: String::new(),
            received: Vec::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn with_observation(mut self, observation: impl Into<String>) -> Self {
        self.observation = observation.into();
        self
    }

    pub fn with_received(mut self, received: Vec<Message>) -> Self {
        self.received = received;
        self
    }
}

/// Append-only, per-agent step storage.
///
/// Keyed by agent identity. `load` returns steps in append order; an agent
/// with no history yields an empty list.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// The name of this backend (e.g., "file", "memory").
    fn name(&self) -> &str;

    async fn append(&self, identity: &str, step: &Step) -> Result<(), HistoryError>;

    async fn load(&self, identity: &str) -> Result<Vec<Step>, HistoryError>;

    /// Remove an agent's history entirely.
    async fn clear(&self, identity: &str) -> Result<(), HistoryError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn step_serializes_action_snake_case() {
        let step = Step::new(1, "add them", StepAction::ToolCall, json!({"name": "calculator"}))
            .with_observation("15");
        let json = serde_json::to_value(&step).unwrap();
        assert_eq!(json["action"], "tool_call");
        assert_eq!(json["observation"], "15");
        assert!(json.get("received").is_none());
    }

    #[test]
    fn step_roundtrip_with_messages() {
        let step = Step::new(2, "ask", StepAction::SendMessage, json!({"recipient": "b"}))
            .with_received(vec![Message::new("b", "a", "ready")]);
        let text = serde_json::to_string(&step).unwrap();
        let back: Step = serde_json::from_str(&text).unwrap();
        assert_eq!(back, step);
    }
}
