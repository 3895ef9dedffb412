//! The agent execution loop.
//!
//! One run drives a single agent from its task to a terminal outcome:
//! assemble context, ask the backend, decode one action, dispatch it,
//! persist the step, repeat. The run ends with a `final_answer` or with a
//! failure carrying a machine-readable reason.

use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};
use unison_core::agent::{AgentProfile, LoopConfig};
use unison_core::event::{DomainEvent, EventBus};
use unison_core::history::{HistoryStore, Step, StepAction};
use unison_core::message::Message;
use unison_core::provider::{ChatMessage, Provider, ProviderRequest};
use unison_core::tool::ToolRegistry;

use crate::bus::MessageBus;
use crate::context::{self, ContextInput};
use crate::outcome::{AgentOutcome, Failure, FailureReason, Status};
use crate::response::{Action, ModelResponse, parse_response};

/// What the agent is asked to do in one run.
#[derive(Debug, Clone)]
pub struct Turn {
    pub task: String,
    /// Extra context appended to the task (clan plans, member results).
    pub briefing: Option<String>,
    pub tools_enabled: bool,
    pub messaging_enabled: bool,
}

impl Turn {
    pub fn new(task: impl Into<String>) -> Self {
        Self { task: task.into(), briefing: None, tools_enabled: true, messaging_enabled: true }
    }

    pub fn with_briefing(mut self, briefing: impl Into<String>) -> Self {
        self.briefing = Some(briefing.into());
        self
    }

    pub fn without_tools(mut self) -> Self {
        self.tools_enabled = false;
        self
    }

    pub fn without_messaging(mut self) -> Self {
        self.messaging_enabled = false;
        self
    }
}

/// The core agent loop that orchestrates backend calls, tools and messaging.
pub struct AgentLoop {
    profile: AgentProfile,

    provider: Arc<dyn Provider>,

    /// Read-only tool registry, possibly shared with other agents
    tools: Arc<ToolRegistry>,

    /// Single-writer step history for this agent
    history: Arc<dyn HistoryStore>,

    bus: Option<Arc<MessageBus>>,

    /// Agents this one may message
    peers: Vec<AgentProfile>,

    shared_instruction: Option<String>,

    config: LoopConfig,

    event_bus: Arc<EventBus>,
}

/// Why a run stopped early, before the last step is attached.
struct Stop {
    reason: FailureReason,
    detail: String,
}

impl Stop {
    fn new(reason: FailureReason, detail: impl Into<String>) -> Self {
        Self { reason, detail: detail.into() }
    }
}

/// Counters for one run.
struct RunState {
    started: Instant,
    steps: Vec<Step>,
    tool_calls: u32,
    /// Deepest delegation depth among messages received in this run
    deepest: u32,
}

impl AgentLoop {
    pub fn new(profile: AgentProfile, provider: Arc<dyn Provider>, history: Arc<dyn HistoryStore>) -> Self {
        Self {
            profile,
            provider,
            tools: Arc::new(ToolRegistry::new()),
            history,
            bus: None,
            peers: Vec::new(),
            shared_instruction: None,
            config: LoopConfig::default(),
            event_bus: Arc::new(EventBus::default()),
        }
    }

    pub fn with_tools(mut self, tools: Arc<ToolRegistry>) -> Self {
        self.tools = tools;
        self
    }

    /// Connect to a message bus. The agent registers its own mailbox.
    pub fn with_bus(mut self, bus: Arc<MessageBus>) -> Self {
        bus.register(self.profile.id());
        self.bus = Some(bus);
        self
    }

    pub fn with_peers(mut self, peers: Vec<AgentProfile>) -> Self {
        self.peers = peers.into_iter().filter(|p| p.identity != self.profile.identity).collect();
        self
    }

    pub fn with_shared_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.shared_instruction = Some(instruction.into());
        self
    }

    pub fn with_config(mut self, config: LoopConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_events(mut self, event_bus: Arc<EventBus>) -> Self {
        self.event_bus = event_bus;
        self
    }

    pub fn profile(&self) -> &AgentProfile {
        &self.profile
    }

    pub fn identity(&self) -> &str {
        &self.profile.identity
    }

    pub fn config(&self) -> &LoopConfig {
        &self.config
    }

    /// Run the loop until a terminal outcome. Never panics on backend,
    /// tool or history failures; those become a failed outcome.
    pub async fn run(&self, turn: &Turn) -> AgentOutcome {
        let mut state = RunState { started: Instant::now(), steps: Vec::new(), tool_calls: 0, deepest: 0 };
        info!(agent = %self.identity(), max_iterations = self.config.max_iterations, "Agent loop started");

        let result = self.drive(turn, &mut state).await;
        self.finish(result, state)
    }

    async fn drive(&self, turn: &Turn, state: &mut RunState) -> Result<String, Stop> {
        let history = self
            .history
            .load(self.identity())
            .await
            .map_err(|e| Stop::new(FailureReason::HistoryUnavailable, e.to_string()))?;
        let persisted = history.len() as u32;
        let resumed = unfinished_tail(&history, self.config.history_window);
        if !resumed.is_empty() {
            info!(agent = %self.identity(), steps = resumed.len(), "Resuming unfinished run");
        }

        for iteration in 1..=self.config.max_iterations {
            let inbox = self.drain_inbox();
            state.deepest = inbox.iter().map(|m| m.depth).fold(state.deepest, u32::max);
            debug!(agent = %self.identity(), iteration, inbox = inbox.len(), "Agent loop iteration");

            let messages = self.assemble(turn, resumed, &state.steps, &inbox);
            let response = match self.decide(messages, iteration).await {
                Ok(response) => response,
                Err(stop) => {
                    self.requeue(inbox);
                    return Err(stop);
                }
            };

            let ModelResponse { thought, action } = response;
            let (step, answer) = match action {
                Action::ToolCall { name, params } => {
                    let observation = self.call_tool(turn, &name, &params, state).await;
                    let step = Step::new(
                        persisted + iteration,
                        thought,
                        StepAction::ToolCall,
                        json!({ "name": name, "params": params }),
                    )
                    .with_observation(observation);
                    (step, None)
                }
                Action::SendMessage { recipient, content, resource } => {
                    let observation = self.send_message(turn, &recipient, &content, resource.as_deref(), state).await;
                    let step = Step::new(
                        persisted + iteration,
                        thought,
                        StepAction::SendMessage,
                        json!({ "recipient": recipient, "content": content, "resource": resource }),
                    )
                    .with_observation(observation);
                    (step, None)
                }
                Action::FinalAnswer { content } => {
                    let step = Step::new(
                        persisted + iteration,
                        thought,
                        StepAction::FinalAnswer,
                        json!({ "content": content }),
                    );
                    (step, Some(content))
                }
            };

            let step = step.with_received(inbox.clone());
            if let Err(e) = self.history.append(self.identity(), &step).await {
                self.requeue(inbox);
                return Err(Stop::new(FailureReason::HistoryUnavailable, e.to_string()));
            }
            self.event_bus.publish(DomainEvent::StepCommitted {
                agent: self.identity().to_string(),
                iteration: step.iteration,
                action: step.action.to_string(),
                timestamp: Utc::now(),
            });
            state.steps.push(step);

            if let Some(answer) = answer {
                return Ok(answer);
            }
        }

        Err(Stop::new(
            FailureReason::IterationLimitExceeded,
            format!("no final_answer within {} iterations", self.config.max_iterations),
        ))
    }

    fn drain_inbox(&self) -> Vec<Message> {
        self.bus.as_ref().map(|bus| bus.receive(self.identity())).unwrap_or_default()
    }

    /// Put messages drained for an uncommitted step back in the mailbox.
    fn requeue(&self, inbox: Vec<Message>) {
        if inbox.is_empty() {
            return;
        }
        if let Some(bus) = &self.bus {
            warn!(agent = %self.identity(), messages = inbox.len(), "Step not committed, returning messages to the mailbox");
            bus.requeue(self.identity(), inbox);
        }
    }

    fn assemble(&self, turn: &Turn, resumed: &[Step], steps: &[Step], inbox: &[Message]) -> Vec<ChatMessage> {
        let peers: &[AgentProfile] =
            if turn.messaging_enabled && self.bus.is_some() { &self.peers } else { &[] };
        context::build_messages(&ContextInput {
            profile: &self.profile,
            shared_instruction: self.shared_instruction.as_deref(),
            tools: turn.tools_enabled.then_some(self.tools.as_ref()),
            peers,
            task: &turn.task,
            briefing: turn.briefing.as_deref(),
            resumed,
            steps,
            inbox,
        })
    }

    /// Ask the backend for one decodable action, re-prompting on parse errors.
    /// Re-prompt exchanges stay out of history.
    async fn decide(&self, mut messages: Vec<ChatMessage>, iteration: u32) -> Result<ModelResponse, Stop> {
        let mut retries = 0;
        loop {
            let mut request = ProviderRequest::new(self.config.model.clone(), messages.clone());
            request.temperature = self.config.temperature;
            request.max_tokens = self.config.max_tokens;
            request.user = Some(self.identity().to_string());

            let raw = match self.provider.complete(request).await {
                Ok(response) => response.content,
                Err(e) => {
                    warn!(agent = %self.identity(), iteration, error = %e, "Backend unavailable");
                    return Err(Stop::new(FailureReason::BackendUnavailable, e.to_string()));
                }
            };

            match parse_response(&raw) {
                Ok(response) => return Ok(response),
                Err(e) if retries < self.config.max_parse_retries => {
                    retries += 1;
                    warn!(agent = %self.identity(), iteration, retry = retries, error = %e, "Unparseable response, re-prompting");
                    messages.push(ChatMessage::assistant(raw));
                    messages.push(ChatMessage::user(context::reprompt(&e)));
                }
                Err(e) => {
                    return Err(Stop::new(
                        FailureReason::UnparseableResponse,
                        format!("{e} (after {retries} re-prompts)"),
                    ));
                }
            }
        }
    }

    async fn call_tool(&self, turn: &Turn, name: &str, params: &serde_json::Value, state: &mut RunState) -> String {
        if !turn.tools_enabled {
            return "Error: tools are not available for this task.".into();
        }
        let contract = match self.tools.lookup(name) {
            Ok(contract) => contract,
            Err(e) => {
                warn!(agent = %self.identity(), tool = %name, "Unknown tool requested");
                return format!("Error: {e}. Available tools: {}", self.tools.names().join(", "));
            }
        };

        let timeout = contract.timeout().or(self.config.tool_timeout);
        let result = contract.run_with_timeout(params, timeout).await;
        state.tool_calls += 1;

        debug!(agent = %self.identity(), tool = %name, success = result.success, "Tool executed");
        self.event_bus.publish(DomainEvent::ToolExecuted {
            agent: self.identity().to_string(),
            tool_name: name.to_string(),
            success: result.success,
            duration_ms: result.execution_time.as_millis() as u64,
            timestamp: Utc::now(),
        });
        result.observation()
    }

    async fn send_message(
        &self,
        turn: &Turn,
        recipient: &str,
        content: &str,
        resource: Option<&str>,
        state: &mut RunState,
    ) -> String {
        let Some(bus) = self.bus.as_ref().filter(|_| turn.messaging_enabled) else {
            return "Error: messaging is not available for this task.".into();
        };

        let mut message = Message::new(self.identity(), recipient, content).with_depth(state.deepest + 1);
        if let Some(resource) = resource {
            message = message.with_resource(resource);
        }
        if let Err(e) = bus.send(message) {
            return format!("Error: message not delivered: {e}");
        }

        let mut observation = format!("Message delivered to {recipient}.");
        if self.config.await_reply {
            let replies = bus.wait(self.identity(), self.config.reply_timeout).await;
            if replies.is_empty() {
                observation.push_str(&format!(
                    " No reply within {}s.",
                    self.config.reply_timeout.as_secs()
                ));
            } else {
                state.deepest = replies.iter().map(|m| m.depth).fold(state.deepest, u32::max);
                for reply in &replies {
                    observation.push_str(&format!("\nReply from {}: {}", reply.sender, reply.content));
                }
            }
        }
        observation
    }

    fn finish(&self, result: Result<String, Stop>, state: RunState) -> AgentOutcome {
        let iterations = state.steps.len() as u32;
        let status = match result {
            Ok(answer) => {
                info!(agent = %self.identity(), iterations, tool_calls = state.tool_calls, "Agent loop finished");
                Status::Succeeded { answer }
            }
            Err(stop) => {
                warn!(agent = %self.identity(), iterations, reason = %stop.reason, detail = %stop.detail, "Agent loop failed");
                let last = state.steps.last();
                Status::Failed(Failure {
                    reason: stop.reason,
                    detail: stop.detail,
                    last_thought: last.map(|s| s.thought.clone()),
                    last_action: last.map(describe_action),
                })
            }
        };

        let outcome = AgentOutcome {
            agent: self.identity().to_string(),
            status,
            iterations,
            tool_calls: state.tool_calls,
            execution_time: state.started.elapsed(),
        };
        self.event_bus.publish(DomainEvent::AgentTerminated {
            agent: outcome.agent.clone(),
            success: outcome.is_success(),
            reason: outcome.reason().map(|r| r.to_string()),
            iterations,
            timestamp: Utc::now(),
        });
        outcome
    }
}

/// Steps after the last `final_answer`, newest `window` only.
fn unfinished_tail(steps: &[Step], window: usize) -> &[Step] {
    let start = steps
        .iter()
        .rposition(|s| s.action == StepAction::FinalAnswer)
        .map_or(0, |i| i + 1);
    let tail = &steps[start..];
    &tail[tail.len().saturating_sub(window)..]
}

fn describe_action(step: &Step) -> String {
    let target = match step.action {
        StepAction::ToolCall => step.action_input.get("name"),
        StepAction::SendMessage => step.action_input.get("recipient"),
        StepAction::FinalAnswer => None,
    };
    match target.and_then(|t| t.as_str()) {
        Some(target) => format!("{} {target}", step.action),
        None => step.action.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{ScriptedProvider, answer, send, tool_call};
    use async_trait::async_trait;
    use serde_json::Value;
    use std::time::Duration;
    use unison_core::error::{HistoryError, ProviderError, SchemaError, ToolError};
    use unison_core::provider::Role;
    use unison_core::schema::{Field, FieldType, Schema, ValidatedParams};
    use unison_core::tool::Tool;
    use unison_history::InMemoryHistory;

    struct AddTool;

    #[async_trait]
    impl Tool for AddTool {
        fn name(&self) -> &str {
            "add"
        }
        fn description(&self) -> &str {
            "Add two integers"
        }
        fn schema(&self) -> Result<Schema, SchemaError> {
            Schema::new(vec![
                Field::new("x", "first", FieldType::Integer),
                Field::new("y", "second", FieldType::Integer),
            ])
        }
        async fn execute(&self, params: ValidatedParams) -> Result<Value, ToolError> {
            let x = params.get_i64("x")?;
            let y = params.get_i64("y")?;
            Ok(json!(x + y))
        }
    }

    fn profile(identity: &str) -> AgentProfile {
        AgentProfile::new(identity, "test agent").unwrap()
    }

    fn agent(provider: ScriptedProvider, history: Arc<InMemoryHistory>) -> AgentLoop {
        let tools = ToolRegistry::new().with_tool(AddTool).unwrap();
        AgentLoop::new(profile("solo"), Arc::new(provider), history).with_tools(Arc::new(tools))
    }

    #[tokio::test]
    async fn final_answer_terminates_successfully() {
        let history = Arc::new(InMemoryHistory::new());
        let provider = ScriptedProvider::new().script("solo", [answer("42")]);
        let outcome = agent(provider, history.clone()).run(&Turn::new("answer")).await;

        assert_eq!(outcome.answer(), Some("42"));
        assert_eq!(outcome.iterations, 1);
        let steps = history.load("solo").await.unwrap();
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].action, StepAction::FinalAnswer);
    }

    #[tokio::test]
    async fn tool_observation_feeds_the_next_request() {
        let history = Arc::new(InMemoryHistory::new());
        let provider = Arc::new(
            ScriptedProvider::new().script("solo", [tool_call("add", json!({"x": 2, "y": 3})), answer("5")]),
        );
        let tools = ToolRegistry::new().with_tool(AddTool).unwrap();
        let agent = AgentLoop::new(profile("solo"), provider.clone(), history.clone()).with_tools(Arc::new(tools));

        let outcome = agent.run(&Turn::new("add 2 and 3")).await;
        assert!(outcome.is_success());
        assert_eq!(outcome.tool_calls, 1);

        let requests = provider.requests_for("solo");
        let last = requests[1].messages.last().unwrap();
        assert_eq!(last.role, Role::User);
        assert_eq!(last.content, "Observation: 5");

        let steps = history.load("solo").await.unwrap();
        assert_eq!(steps[0].observation, "5");
        assert_eq!(steps[0].action_input["params"]["x"], 2);
    }

    #[tokio::test]
    async fn unknown_tool_is_a_recoverable_observation() {
        let history = Arc::new(InMemoryHistory::new());
        let provider = ScriptedProvider::new().script("solo", [tool_call("nope", json!({})), answer("ok")]);
        let outcome = agent(provider, history.clone()).run(&Turn::new("t")).await;

        assert!(outcome.is_success());
        assert_eq!(outcome.tool_calls, 0);
        let steps = history.load("solo").await.unwrap();
        assert!(steps[0].observation.contains("Tool not found: nope"));
        assert!(steps[0].observation.contains("add"));
    }

    #[tokio::test]
    async fn iteration_limit_exceeded() {
        let history = Arc::new(InMemoryHistory::new());
        let provider = ScriptedProvider::new().repeat("solo", tool_call("add", json!({"x": 1, "y": 1})));
        let agent = agent(provider, history.clone()).with_config(LoopConfig::default().with_max_iterations(5));

        let outcome = agent.run(&Turn::new("loop forever")).await;
        assert_eq!(outcome.reason(), Some(FailureReason::IterationLimitExceeded));
        assert_eq!(outcome.iterations, 5);
        let failure = outcome.failure().unwrap();
        assert_eq!(failure.last_thought.as_deref(), Some("use add"));
        assert_eq!(failure.last_action.as_deref(), Some("tool_call add"));
        assert_eq!(history.load("solo").await.unwrap().len(), 5);
    }

    #[tokio::test]
    async fn parse_errors_are_retried_then_fail() {
        let history = Arc::new(InMemoryHistory::new());
        let provider = Arc::new(ScriptedProvider::new().repeat("solo", "I refuse to use the format"));
        let agent = AgentLoop::new(profile("solo"), provider.clone(), history.clone())
            .with_config(LoopConfig::default().with_max_parse_retries(2));

        let outcome = agent.run(&Turn::new("t")).await;
        assert_eq!(outcome.reason(), Some(FailureReason::UnparseableResponse));
        assert_eq!(provider.call_count(), 3);
        // Re-prompts are transient and never persisted.
        assert!(history.load("solo").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn reprompt_recovers_without_consuming_iterations() {
        let history = Arc::new(InMemoryHistory::new());
        let provider = Arc::new(
            ScriptedProvider::new().script("solo", ["action: dance", &answer("fine")]),
        );
        let agent = AgentLoop::new(profile("solo"), provider.clone(), history.clone())
            .with_config(LoopConfig::default().with_max_iterations(1));

        let outcome = agent.run(&Turn::new("t")).await;
        assert_eq!(outcome.answer(), Some("fine"));
        let second = &provider.requests_for("solo")[1];
        assert!(second.messages.last().unwrap().content.contains("unrecognized action 'dance'"));
    }

    #[tokio::test]
    async fn backend_failure_is_terminal() {
        let history = Arc::new(InMemoryHistory::new());
        let provider = ScriptedProvider::new().fail(
            "solo",
            ProviderError::AuthenticationFailed("bad key".into()),
        );
        let outcome = agent(provider, history).run(&Turn::new("t")).await;
        assert_eq!(outcome.reason(), Some(FailureReason::BackendUnavailable));
        assert!(outcome.failure().unwrap().detail.contains("bad key"));
    }

    struct BrokenHistory;

    #[async_trait]
    impl HistoryStore for BrokenHistory {
        fn name(&self) -> &str {
            "broken"
        }
        async fn append(&self, _identity: &str, _step: &Step) -> Result<(), HistoryError> {
            Err(HistoryError::Storage("disk full".into()))
        }
        async fn load(&self, _identity: &str) -> Result<Vec<Step>, HistoryError> {
            Ok(Vec::new())
        }
        async fn clear(&self, _identity: &str) -> Result<(), HistoryError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn history_failure_is_terminal() {
        let provider = Arc::new(ScriptedProvider::new().script("solo", [answer("x")]));
        let agent = AgentLoop::new(profile("solo"), provider, Arc::new(BrokenHistory));
        let outcome = agent.run(&Turn::new("t")).await;
        assert_eq!(outcome.reason(), Some(FailureReason::HistoryUnavailable));
    }

    #[tokio::test]
    async fn iterations_continue_from_persisted_history() {
        let history = Arc::new(InMemoryHistory::new());
        let provider = Arc::new(ScriptedProvider::new().script("solo", [answer("one"), answer("two")]));
        let agent = AgentLoop::new(profile("solo"), provider, history.clone());

        agent.run(&Turn::new("first")).await;
        agent.run(&Turn::new("second")).await;
        let steps = history.load("solo").await.unwrap();
        let numbers: Vec<u32> = steps.iter().map(|s| s.iteration).collect();
        assert_eq!(numbers, vec![1, 2]);
    }

    #[tokio::test]
    async fn finished_runs_are_not_replayed() {
        let history = Arc::new(InMemoryHistory::new());
        let provider = Arc::new(ScriptedProvider::new().script("solo", [answer("one"), answer("two")]));
        let agent = AgentLoop::new(profile("solo"), provider.clone(), history);

        agent.run(&Turn::new("first")).await;
        agent.run(&Turn::new("second")).await;
        assert_eq!(provider.requests_for("solo")[1].messages.len(), 2);
    }

    #[tokio::test]
    async fn unfinished_run_is_replayed_on_resume() {
        let history = Arc::new(InMemoryHistory::new());
        let provider = Arc::new(
            ScriptedProvider::new().script("solo", [tool_call("add", json!({"x": 1, "y": 1})), answer("2")]),
        );
        let tools = ToolRegistry::new().with_tool(AddTool).unwrap();
        let agent = AgentLoop::new(profile("solo"), provider.clone(), history.clone())
            .with_tools(Arc::new(tools))
            .with_config(LoopConfig::default().with_max_iterations(1));

        let first = agent.run(&Turn::new("add 1 and 1")).await;
        assert_eq!(first.reason(), Some(FailureReason::IterationLimitExceeded));

        let second = agent.run(&Turn::new("add 1 and 1")).await;
        assert_eq!(second.answer(), Some("2"));
        assert_eq!(second.iterations, 1);

        let resumed = &provider.requests_for("solo")[1];
        let roles: Vec<Role> = resumed.messages.iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::System, Role::User, Role::User, Role::Assistant, Role::User]);
        assert!(resumed.messages[3].content.contains("name: add"));
        assert_eq!(resumed.messages[4].content, "Observation: 2");

        let numbers: Vec<u32> = history.load("solo").await.unwrap().iter().map(|s| s.iteration).collect();
        assert_eq!(numbers, vec![1, 2]);
    }

    #[test]
    fn replay_window_keeps_the_newest_unfinished_steps() {
        let step = |i, action| Step::new(i, "t", action, json!({}));
        let steps = vec![
            step(1, StepAction::ToolCall),
            step(2, StepAction::FinalAnswer),
            step(3, StepAction::ToolCall),
            step(4, StepAction::SendMessage),
            step(5, StepAction::ToolCall),
        ];
        let tail: Vec<u32> = unfinished_tail(&steps, 2).iter().map(|s| s.iteration).collect();
        assert_eq!(tail, vec![4, 5]);
        assert_eq!(unfinished_tail(&steps, 10).len(), 3);
        assert!(unfinished_tail(&steps[..2], 10).is_empty());
    }

    #[tokio::test]
    async fn inbox_survives_a_failed_step() {
        let history = Arc::new(InMemoryHistory::new());
        let bus = Arc::new(MessageBus::new(3));
        bus.register("boss");
        let provider = ScriptedProvider::new().fail("solo", ProviderError::Network("connection reset".into()));
        let agent = AgentLoop::new(profile("solo"), Arc::new(provider), history.clone()).with_bus(bus.clone());
        bus.send(Message::new("boss", "solo", "first")).unwrap();
        bus.send(Message::new("boss", "solo", "second")).unwrap();

        let outcome = agent.run(&Turn::new("t")).await;
        assert_eq!(outcome.reason(), Some(FailureReason::BackendUnavailable));
        let kept: Vec<String> = bus.receive("solo").into_iter().map(|m| m.content).collect();
        assert_eq!(kept, vec!["first", "second"]);
    }

    #[tokio::test]
    async fn send_message_failures_become_observations() {
        let history = Arc::new(InMemoryHistory::new());
        let bus = Arc::new(MessageBus::new(3));
        bus.register("peer");
        let provider = ScriptedProvider::new().script("solo", [send("ghost", "hello?"), send("peer", "hi"), answer("done")]);
        let agent = AgentLoop::new(profile("solo"), Arc::new(provider), history.clone())
            .with_bus(bus.clone())
            .with_peers(vec![profile("peer")]);

        let outcome = agent.run(&Turn::new("t")).await;
        assert!(outcome.is_success());
        let steps = history.load("solo").await.unwrap();
        assert!(steps[0].observation.contains("unknown agent 'ghost'"));
        assert_eq!(steps[1].observation, "Message delivered to peer.");

        let delivered = bus.receive("peer");
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].depth, 1);
    }

    #[tokio::test]
    async fn received_messages_are_recorded_and_raise_depth() {
        let history = Arc::new(InMemoryHistory::new());
        let bus = Arc::new(MessageBus::new(3));
        bus.register("boss");
        let provider = ScriptedProvider::new().script("solo", [send("boss", "on it"), answer("done")]);
        let agent = AgentLoop::new(profile("solo"), Arc::new(provider), history.clone())
            .with_bus(bus.clone())
            .with_peers(vec![profile("boss")]);
        bus.send(Message::new("boss", "solo", "do the thing").with_depth(2)).unwrap();

        agent.run(&Turn::new("t")).await;
        let steps = history.load("solo").await.unwrap();
        assert_eq!(steps[0].received.len(), 1);
        assert_eq!(bus.receive("boss")[0].depth, 3);
    }

    #[tokio::test]
    async fn disabled_tools_are_refused() {
        let history = Arc::new(InMemoryHistory::new());
        let provider = ScriptedProvider::new().script("solo", [tool_call("add", json!({"x": 1, "y": 2})), answer("no")]);
        let outcome = agent(provider, history.clone()).run(&Turn::new("plan").without_tools()).await;
        assert_eq!(outcome.tool_calls, 0);
        let steps = history.load("solo").await.unwrap();
        assert!(steps[0].observation.starts_with("Error: tools are not available"));
    }

    #[tokio::test]
    async fn terminal_event_is_published() {
        let events = Arc::new(EventBus::new(16));
        let mut rx = events.subscribe();
        let provider = ScriptedProvider::new().script("solo", [answer("x")]);
        let agent = agent(provider, Arc::new(InMemoryHistory::new())).with_events(events);
        agent.run(&Turn::new("t")).await;

        let mut saw_terminated = false;
        while let Ok(event) = rx.try_recv() {
            if let DomainEvent::AgentTerminated { success, .. } = event.as_ref() {
                saw_terminated = *success;
            }
        }
        assert!(saw_terminated);
    }

    #[tokio::test(start_paused = true)]
    async fn await_reply_blocks_until_reply() {
        let history = Arc::new(InMemoryHistory::new());
        let bus = Arc::new(MessageBus::new(3));
        bus.register("peer");
        let provider = ScriptedProvider::new().script("solo", [send("peer", "ping"), answer("done")]);
        let agent = AgentLoop::new(profile("solo"), Arc::new(provider), history.clone())
            .with_bus(bus.clone())
            .with_peers(vec![profile("peer")])
            .with_config(LoopConfig::default().with_await_reply(Duration::from_secs(10)));

        let replier = bus.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            replier.send(Message::new("peer", "solo", "pong").with_depth(2)).unwrap();
        });

        agent.run(&Turn::new("t")).await;
        let steps = history.load("solo").await.unwrap();
        assert!(steps[0].observation.contains("Reply from peer: pong"));
    }
}
