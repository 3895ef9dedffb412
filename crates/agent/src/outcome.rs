//! Terminal results of agent loops.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Machine-readable reason a loop or clan ended in FAILED.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    IterationLimitExceeded,
    UnparseableResponse,
    BackendUnavailable,
    HistoryUnavailable,
    Timeout,
    Cancelled,
    CommunicationError,
    CoordinationError,
    EmptyPlan,
    AllMembersFailed,
    PlanningFailed,
    SynthesisFailed,
}

impl FailureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::IterationLimitExceeded => "iteration_limit_exceeded",
            Self::UnparseableResponse => "unparseable_response",
            Self::BackendUnavailable => "backend_unavailable",
            Self::HistoryUnavailable => "history_unavailable",
            Self::Timeout => "timeout",
            Self::Cancelled => "cancelled",
            Self::CommunicationError => "communication_error",
            Self::CoordinationError => "coordination_error",
            Self::EmptyPlan => "empty_plan",
            Self::AllMembersFailed => "all_members_failed",
            Self::PlanningFailed => "planning_failed",
            Self::SynthesisFailed => "synthesis_failed",
        }
    }
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Diagnosis attached to every FAILED terminal state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Failure {
    pub reason: FailureReason,
    pub detail: String,
    pub last_thought: Option<String>,
    pub last_action: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Status {
    Succeeded { answer: String },
    Failed(Failure),
}

/// What one agent loop run produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentOutcome {
    pub agent: String,
    #[serde(flatten)]
    pub status: Status,
    /// Committed iterations in this run
    pub iterations: u32,
    pub tool_calls: u32,
    pub execution_time: Duration,
}

impl AgentOutcome {
    /// A failure that happened outside the loop itself (timeouts, aborts).
    pub fn synthetic_failure(agent: impl Into<String>, reason: FailureReason, detail: impl Into<String>, elapsed: Duration) -> Self {
        Self {
            agent: agent.into(),
            status: Status::Failed(Failure {
                reason,
                detail: detail.into(),
                last_thought: None,
                last_action: None,
            }),
            iterations: 0,
            tool_calls: 0,
            execution_time: elapsed,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.status, Status::Succeeded { .. })
    }

    pub fn answer(&self) -> Option<&str> {
        match &self.status {
            Status::Succeeded { answer } => Some(answer),
            Status::Failed(_) => None,
        }
    }

    pub fn failure(&self) -> Option<&Failure> {
        match &self.status {
            Status::Failed(failure) => Some(failure),
            Status::Succeeded { .. } => None,
        }
    }

    pub fn reason(&self) -> Option<FailureReason> {
        self.failure().map(|f| f.reason)
    }
}
