//! Clan coordination: one manager, one or more members.
//!
//! ```text
//!   goal
//!    │
//!    ▼
//! PLANNING ──► DELEGATING ──► EXECUTING ──► COLLECTING ──► SYNTHESIZING ──► DONE
//!  manager      bus messages    member loops    results in        manager
//!  (no tools)   depth 1         (concurrent)    roster order      (tools ok)
//!                                                                 any phase ──► FAILED
//! ```
//!
//! The manager plans with a `final_answer` listing one `@<member>: <sub-task>`
//! assignment per line. Every assignment is checked against the bus before
//! anything is sent, so a bad recipient aborts delegation with no partial
//! side effects.
//!
//! `clan_timeout` bounds planning through collection. Synthesis has its own
//! `synthesis_timeout`, so results collected before the deadline still reach
//! the manager.

use chrono::Utc;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tracing::{info, warn};
use unison_core::agent::{AgentProfile, LoopConfig};
use unison_core::error::{ClanError, Error, Result};
use unison_core::event::{DomainEvent, EventBus};
use unison_core::history::HistoryStore;
use unison_core::message::Message;
use unison_core::provider::Provider;
use unison_core::tool::ToolRegistry;

use crate::bus::MessageBus;
use crate::loop_runner::{AgentLoop, Turn};
use crate::outcome::{AgentOutcome, FailureReason};

/// Coordinator state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Planning,
    Delegating,
    Executing,
    Collecting,
    Synthesizing,
    Done,
    Failed,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Planning => "planning",
            Self::Delegating => "delegating",
            Self::Executing => "executing",
            Self::Collecting => "collecting",
            Self::Synthesizing => "synthesizing",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Time and depth bounds for one clan run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClanLimits {
    /// Longest allowed delegation chain
    pub max_depth: u32,
    pub member_timeout: Duration,
    /// Bound on planning, delegation, execution and collection
    pub clan_timeout: Duration,
    /// Bound on the manager's synthesis run
    pub synthesis_timeout: Duration,
}

impl Default for ClanLimits {
    fn default() -> Self {
        Self {
            max_depth: 3,
            member_timeout: Duration::from_secs(300),
            clan_timeout: Duration::from_secs(900),
            synthesis_timeout: Duration::from_secs(120),
        }
    }
}

/// One planned sub-task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignment {
    pub member: String,
    pub task: String,
}

/// A delegated member's result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberReport {
    pub identity: String,
    pub task: String,
    pub outcome: AgentOutcome,
}

/// What a clan run produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClanOutcome {
    pub clan: String,
    pub goal: String,
    /// `Done` or `Failed`
    pub phase: Phase,
    pub answer: Option<String>,
    pub reason: Option<FailureReason>,
    pub detail: Option<String>,
    pub plan: Vec<Assignment>,
    /// Delegated members, in declaration order
    pub members: Vec<MemberReport>,
    pub execution_time: Duration,
}

impl ClanOutcome {
    pub fn is_success(&self) -> bool {
        self.phase == Phase::Done
    }
}

/// Parse a delegation plan.
///
/// An assignment is a line `@<identity>: <sub-task>`, or `<identity>: <sub-task>`
/// when the identity names a member. Identities match case-insensitively and
/// may contain spaces. Bullets, numbering and bold markers are ignored; any
/// other line is commentary. A marked identity that names no member is kept
/// as written so that delegation rejects it. Repeated assignments to one
/// member are joined in plan order.
pub fn parse_plan(text: &str, members: &[&str]) -> Vec<Assignment> {
    let mut plan: Vec<Assignment> = Vec::new();
    for line in text.lines() {
        let line = line
            .trim()
            .trim_start_matches(|c: char| c.is_ascii_digit())
            .trim_start_matches(['-', '*', '•', '.', ')', ' ']);
        let (marked, line) = match line.strip_prefix('@') {
            Some(rest) => (true, rest),
            None => (false, line),
        };
        let Some((prefix, task)) = line.split_once(':') else {
            continue;
        };
        let prefix = prefix.trim().trim_matches(['*', '`', '"', '\'']).trim();
        let task = task.trim().trim_start_matches('*').trim();
        if prefix.is_empty() || task.is_empty() {
            continue;
        }

        let member = match members.iter().find(|m| m.eq_ignore_ascii_case(prefix)) {
            Some(member) => member.to_string(),
            None if marked => prefix.to_string(),
            None => continue,
        };
        match plan.iter_mut().find(|a| a.member == member) {
            Some(existing) => {
                existing.task.push('\n');
                existing.task.push_str(task);
            }
            None => plan.push(Assignment { member, task: task.to_string() }),
        }
    }
    plan
}

/// Builder for [`Clan`].
pub struct ClanBuilder {
    name: String,
    provider: Arc<dyn Provider>,
    history: Arc<dyn HistoryStore>,
    shared_instruction: Option<String>,
    manager: Option<AgentProfile>,
    members: Vec<(AgentProfile, Option<Vec<String>>)>,
    tools: Arc<ToolRegistry>,
    config: LoopConfig,
    limits: ClanLimits,
    events: Arc<EventBus>,
    output_file: Option<PathBuf>,
}

impl ClanBuilder {
    pub fn shared_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.shared_instruction = Some(instruction.into());
        self
    }

    pub fn manager(mut self, profile: AgentProfile) -> Self {
        self.manager = Some(profile);
        self
    }

    /// Add a member with access to every registered tool.
    pub fn member(mut self, profile: AgentProfile) -> Self {
        self.members.push((profile, None));
        self
    }

    /// Add a member restricted to the named tools.
    pub fn member_with_tools<S: AsRef<str>>(mut self, profile: AgentProfile, tools: &[S]) -> Self {
        let names = tools.iter().map(|t| t.as_ref().to_string()).collect();
        self.members.push((profile, Some(names)));
        self
    }

    pub fn tools(mut self, tools: Arc<ToolRegistry>) -> Self {
        self.tools = tools;
        self
    }

    pub fn loop_config(mut self, config: LoopConfig) -> Self {
        self.config = config;
        self
    }

    pub fn limits(mut self, limits: ClanLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn events(mut self, events: Arc<EventBus>) -> Self {
        self.events = events;
        self
    }

    pub fn output_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.output_file = Some(path.into());
        self
    }

    /// Validate the roster and wire every agent to a fresh bus.
    pub fn build(self) -> Result<Clan> {
        let manager = self.manager.ok_or(ClanError::MissingManager)?;
        if self.members.is_empty() {
            return Err(ClanError::NoMembers.into());
        }
        let mut seen = HashSet::from([manager.identity.clone()]);
        for (member, _) in &self.members {
            if !seen.insert(member.identity.clone()) {
                return Err(ClanError::DuplicateIdentity(member.identity.clone()).into());
            }
        }

        let bus = Arc::new(MessageBus::new(self.limits.max_depth).with_events(self.events.clone()));
        let roster: Vec<AgentProfile> = std::iter::once(manager.clone())
            .chain(self.members.iter().map(|(p, _)| p.clone()))
            .collect();

        let agent = |profile: AgentProfile, tools: Arc<ToolRegistry>| {
            let mut agent = AgentLoop::new(profile, self.provider.clone(), self.history.clone())
                .with_tools(tools)
                .with_bus(bus.clone())
                .with_peers(roster.clone())
                .with_config(self.config.clone())
                .with_events(self.events.clone());
            if let Some(instruction) = &self.shared_instruction {
                agent = agent.with_shared_instruction(instruction.clone());
            }
            agent
        };

        let manager = agent(manager, self.tools.clone());
        let mut members = Vec::with_capacity(self.members.len());
        for (profile, tool_names) in self.members {
            let tools = match tool_names {
                Some(names) => Arc::new(self.tools.subset(&names)?),
                None => self.tools.clone(),
            };
            members.push(Arc::new(agent(profile, tools)));
        }

        info!(clan = %self.name, manager = %manager.identity(), members = members.len(), "Clan assembled");
        Ok(Clan {
            name: self.name,
            manager,
            members,
            bus,
            limits: self.limits,
            events: self.events,
            output_file: self.output_file,
        })
    }
}

/// A manager and its members, ready to run goals.
pub struct Clan {
    name: String,
    manager: AgentLoop,
    /// In declaration order
    members: Vec<Arc<AgentLoop>>,
    bus: Arc<MessageBus>,
    limits: ClanLimits,
    events: Arc<EventBus>,
    output_file: Option<PathBuf>,
}

impl std::fmt::Debug for Clan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Clan")
            .field("name", &self.name)
            .field("manager", &self.manager.identity())
            .field("members", &self.member_identities())
            .field("limits", &self.limits)
            .finish()
    }
}

/// Early exit from a clan run.
struct Abort {
    phase: Phase,
    reason: FailureReason,
    detail: String,
}

impl Abort {
    fn new(phase: Phase, reason: FailureReason, detail: impl Into<String>) -> Self {
        Self { phase, reason, detail: detail.into() }
    }
}

impl Clan {
    pub fn builder(name: impl Into<String>, provider: Arc<dyn Provider>, history: Arc<dyn HistoryStore>) -> ClanBuilder {
        ClanBuilder {
            name: name.into(),
            provider,
            history,
            shared_instruction: None,
            manager: None,
            members: Vec::new(),
            tools: Arc::new(ToolRegistry::new()),
            config: LoopConfig::default(),
            limits: ClanLimits::default(),
            events: Arc::new(EventBus::default()),
            output_file: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn manager(&self) -> &AgentProfile {
        self.manager.profile()
    }

    pub fn member_identities(&self) -> Vec<&str> {
        self.members.iter().map(|m| m.identity()).collect()
    }

    pub fn bus(&self) -> &Arc<MessageBus> {
        &self.bus
    }

    /// Run `goal` through planning, delegation, execution, collection and synthesis.
    pub async fn run(&self, goal: &str) -> ClanOutcome {
        let started = Instant::now();
        let deadline = tokio::time::Instant::now() + self.limits.clan_timeout;
        info!(clan = %self.name, goal = %goal, "Clan run started");

        let mut plan = Vec::new();
        let mut reports = Vec::new();
        let result = self.drive(goal, deadline, &mut plan, &mut reports).await;

        let mut outcome = ClanOutcome {
            clan: self.name.clone(),
            goal: goal.to_string(),
            phase: Phase::Done,
            answer: None,
            reason: None,
            detail: None,
            plan,
            members: reports,
            execution_time: Duration::ZERO,
        };
        match result {
            Ok(answer) => {
                self.enter(Phase::Done);
                self.write_output(goal, &answer).await;
                outcome.answer = Some(answer);
            }
            Err(abort) => {
                warn!(clan = %self.name, phase = %abort.phase, reason = %abort.reason, detail = %abort.detail, "Clan run failed");
                self.enter(Phase::Failed);
                outcome.phase = Phase::Failed;
                outcome.reason = Some(abort.reason);
                outcome.detail = Some(abort.detail);
            }
        }
        outcome.execution_time = started.elapsed();
        info!(clan = %self.name, phase = %outcome.phase, elapsed_ms = outcome.execution_time.as_millis() as u64, "Clan run finished");
        outcome
    }

    async fn drive(
        &self,
        goal: &str,
        deadline: tokio::time::Instant,
        plan_out: &mut Vec<Assignment>,
        reports_out: &mut Vec<MemberReport>,
    ) -> std::result::Result<String, Abort> {
        self.enter(Phase::Planning);
        let plan = self.plan(goal, deadline).await?;
        *plan_out = plan.clone();

        self.enter(Phase::Delegating);
        self.delegate(&plan).map_err(|e| {
            let reason = match &e {
                Error::Coordination(_) => FailureReason::CoordinationError,
                _ => FailureReason::CommunicationError,
            };
            Abort::new(Phase::Delegating, reason, e.to_string())
        })?;

        self.enter(Phase::Executing);
        let reports = self.execute(goal, &plan, deadline).await;
        *reports_out = reports.clone();

        if reports.iter().all(|r| !r.outcome.is_success()) {
            return Err(Abort::new(
                Phase::Collecting,
                FailureReason::AllMembersFailed,
                format!("all {} delegated members failed", reports.len()),
            ));
        }

        self.enter(Phase::Synthesizing);
        self.synthesize(goal, &reports).await
    }

    /// Ask the manager for a delegation plan.
    async fn plan(&self, goal: &str, deadline: tokio::time::Instant) -> std::result::Result<Vec<Assignment>, Abort> {
        let mut briefing = String::from("Plan the work for your team. Members:\n");
        for member in &self.members {
            let profile = member.profile();
            briefing.push_str(&format!("- {}: {}\n", profile.identity, profile.description));
        }
        briefing.push_str(
            "\nReply with final_answer. Its content lists one assignment per line \
             in the form `@<member identity>: <sub-task>`. Lines without the `@` \
             marker are treated as notes and are not delegated.",
        );
        let turn = Turn::new(goal).with_briefing(briefing).without_tools().without_messaging();

        let outcome = tokio::time::timeout_at(deadline, self.manager.run(&turn))
            .await
            .map_err(|_| Abort::new(Phase::Planning, FailureReason::Timeout, "clan timeout elapsed during planning"))?;
        let answer = match (outcome.answer(), outcome.failure()) {
            (Some(answer), _) => answer.to_string(),
            (None, failure) => {
                let detail = failure.map_or_else(String::new, |f| format!("{}: {}", f.reason, f.detail));
                return Err(Abort::new(Phase::Planning, FailureReason::PlanningFailed, detail));
            }
        };

        let plan = parse_plan(&answer, &self.member_identities());
        if plan.is_empty() {
            return Err(Abort::new(Phase::Planning, FailureReason::EmptyPlan, ClanError::EmptyPlan.to_string()));
        }
        info!(clan = %self.name, assignments = plan.len(), "Delegation plan ready");
        Ok(plan)
    }

    /// Send one depth-1 message per assignment, in plan order. Every message
    /// is checked first; on any error nothing is sent.
    pub fn delegate(&self, plan: &[Assignment]) -> Result<()> {
        let manager = self.manager.identity();
        let messages: Vec<Message> = plan
            .iter()
            .map(|a| Message::new(manager, a.member.as_str(), a.task.as_str()).with_depth(1))
            .collect();
        for message in &messages {
            self.bus.check(message)?;
        }
        for message in messages {
            self.bus.send(message)?;
        }
        Ok(())
    }

    /// Run every delegated member concurrently and collect results in
    /// declaration order.
    async fn execute(&self, goal: &str, plan: &[Assignment], deadline: tokio::time::Instant) -> Vec<MemberReport> {
        let delegated: Vec<(&Arc<AgentLoop>, &Assignment)> = self
            .members
            .iter()
            .filter_map(|m| plan.iter().find(|a| a.member == m.identity()).map(|a| (m, a)))
            .collect();

        let mut tasks = JoinSet::new();
        for (slot, (member, _)) in delegated.iter().enumerate() {
            let member = Arc::clone(member);
            let member_timeout = self.limits.member_timeout;
            let turn = Turn::new(format!(
                "Your team's goal: {goal}\nCarry out the assignment {} sends you and finish with final_answer.",
                self.manager.identity()
            ));
            tasks.spawn(async move {
                let started = Instant::now();
                let identity = member.identity().to_string();
                let run = AssertUnwindSafe(member.run(&turn)).catch_unwind();
                let outcome = match tokio::time::timeout(member_timeout, run).await {
                    Ok(Ok(outcome)) => outcome,
                    Ok(Err(_)) => AgentOutcome::synthetic_failure(
                        identity,
                        FailureReason::Cancelled,
                        "member task panicked",
                        started.elapsed(),
                    ),
                    Err(_) => {
                        warn!(agent = %identity, timeout_secs = member_timeout.as_secs(), "Member timed out");
                        AgentOutcome::synthetic_failure(
                            identity,
                            FailureReason::Timeout,
                            format!("no result within {}s", member_timeout.as_secs()),
                            started.elapsed(),
                        )
                    }
                };
                (slot, outcome)
            });
        }

        self.enter(Phase::Collecting);
        let mut results: Vec<Option<AgentOutcome>> = vec![None; delegated.len()];
        loop {
            match tokio::time::timeout_at(deadline, tasks.join_next()).await {
                Ok(Some(Ok((slot, outcome)))) => results[slot] = Some(outcome),
                Ok(Some(Err(e))) => warn!(clan = %self.name, error = %e, "Member task ended abnormally"),
                Ok(None) => break,
                Err(_) => {
                    warn!(clan = %self.name, "Clan timeout elapsed, cancelling running members");
                    tasks.abort_all();
                    break;
                }
            }
        }

        delegated
            .into_iter()
            .zip(results)
            .map(|((member, assignment), outcome)| {
                let outcome = outcome.unwrap_or_else(|| {
                    AgentOutcome::synthetic_failure(
                        member.identity(),
                        FailureReason::Timeout,
                        "cancelled when the clan timeout elapsed",
                        self.limits.clan_timeout,
                    )
                });
                MemberReport { identity: member.identity().to_string(), task: assignment.task.clone(), outcome }
            })
            .collect()
    }

    async fn synthesize(&self, goal: &str, reports: &[MemberReport]) -> std::result::Result<String, Abort> {
        let turn = Turn::new(goal).with_briefing(synthesis_briefing(reports)).without_messaging();
        let bound = self.limits.synthesis_timeout;
        let outcome = tokio::time::timeout(bound, self.manager.run(&turn)).await.map_err(|_| {
            Abort::new(
                Phase::Synthesizing,
                FailureReason::Timeout,
                format!("no synthesis within {}s", bound.as_secs()),
            )
        })?;

        match (outcome.answer(), outcome.failure()) {
            (Some(answer), _) => Ok(answer.to_string()),
            (None, failure) => {
                let detail = failure.map_or_else(String::new, |f| format!("{}: {}", f.reason, f.detail));
                Err(Abort::new(Phase::Synthesizing, FailureReason::SynthesisFailed, detail))
            }
        }
    }

    fn enter(&self, phase: Phase) {
        info!(clan = %self.name, phase = %phase, "Clan phase changed");
        self.events.publish(DomainEvent::ClanPhaseChanged {
            clan: self.name.clone(),
            phase: phase.to_string(),
            timestamp: Utc::now(),
        });
    }

    async fn write_output(&self, goal: &str, answer: &str) {
        let Some(path) = &self.output_file else {
            return;
        };
        let body = format!("Agent: {}\nGoal: {goal}\n\nResult:\n{answer}\n", self.manager.identity());
        match tokio::fs::write(path, body).await {
            Ok(()) => info!(path = %path.display(), "Clan answer written"),
            Err(e) => warn!(path = %path.display(), error = %e, "Failed to write clan answer"),
        }
    }
}

/// Member results for the manager, in declaration order, with failures
/// annotated rather than dropped.
fn synthesis_briefing(reports: &[MemberReport]) -> String {
    let mut out = String::from("Results from your team:\n");
    for report in reports {
        match (report.outcome.answer(), report.outcome.failure()) {
            (Some(answer), _) => {
                out.push_str(&format!("\n## {} (succeeded)\nAssignment: {}\nResult: {answer}\n", report.identity, report.task));
            }
            (None, failure) => {
                let (reason, detail) = failure.map_or(("unknown", ""), |f| (f.reason.as_str(), f.detail.as_str()));
                out.push_str(&format!(
                    "\n## {} (FAILED: {reason})\nAssignment: {}\nDetail: {detail}\n",
                    report.identity, report.task
                ));
            }
        }
    }
    out.push_str("\nCombine these into the final answer for the goal with final_answer. Say which members failed, if any.");
    out
}
