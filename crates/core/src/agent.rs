//! Agent profile and loop configuration types.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::ClanError;
use crate::message::AgentId;

/// Who an agent is: the identity other agents address it by, a description
/// of its role, and an optional standing task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentProfile {
    pub identity: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task: Option<String>,
}

impl AgentProfile {
    /// Build a profile; identity and description are trimmed and must not be empty.
    pub fn new(identity: impl Into<String>, description: impl Into<String>) -> Result<Self, ClanError> {
        let identity = identity.into().trim().to_string();
        let description = description.into().trim().to_string();
        if identity.is_empty() {
            return Err(ClanError::InvalidProfile("identity must not be empty".into()));
        }
        if description.is_empty() {
            return Err(ClanError::InvalidProfile(format!(
                "description for '{identity}' must not be empty"
            )));
        }
        Ok(Self { identity, description, task: None })
    }

    pub fn with_task(mut self, task: impl Into<String>) -> Self {
        let task = task.into();
        self.task = if task.trim().is_empty() { None } else { Some(task.trim().to_string()) };
        self
    }

    pub fn id(&self) -> AgentId {
        AgentId::new(self.identity.clone())
    }
}

/// Knobs for one agent's execution loop.
#[derive(Debug, Clone, PartialEq)]
pub struct LoopConfig {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: Option<u32>,

    /// Committed iterations before the loop fails with `iteration_limit_exceeded`.
    pub max_iterations: u32,

    /// Consecutive re-prompts allowed for an unparseable response.
    pub max_parse_retries: u32,

    /// Per-call limit applied to tools that carry none of their own.
    pub tool_timeout: Option<Duration>,

    /// After `send_message`, block until a reply arrives (or `reply_timeout`).
    pub await_reply: bool,
    pub reply_timeout: Duration,

    /// Most steps of an unfinished earlier run replayed into a new run's context.
    pub history_window: usize,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".into(),
            temperature: 0.7,
            max_tokens: None,
            max_iterations: 10,
            max_parse_retries: 2,
            tool_timeout: Some(Duration::from_secs(30)),
            await_reply: false,
            reply_timeout: Duration::from_secs(30),
            history_window: 20,
        }
    }
}

impl LoopConfig {
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_max_parse_retries(mut self, retries: u32) -> Self {
        self.max_parse_retries = retries;
        self
    }

    pub fn with_history_window(mut self, steps: usize) -> Self {
        self.history_window = steps;
        self
    }

    pub fn with_await_reply(mut self, timeout: Duration) -> Self {
        self.await_reply = true;
        self.reply_timeout = timeout;
        self
    }
}
