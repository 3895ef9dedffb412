//! Context assembly: turns an agent's profile, committed steps and inbox
//! into the ordered chat messages sent to the model backend.
//!
//! Layout:
//! 1. system: identity, shared instruction, tool catalog, roster, response format
//! 2. user: the task for this run (plus any phase briefing)
//! 3. steps of an unfinished earlier run, after a resume note
//! 4. per committed step: received messages, the agent's response, its observation
//! 5. user: messages delivered since the last step

use serde_json::Value;
use unison_core::agent::AgentProfile;
use unison_core::history::{Step, StepAction};
use unison_core::message::Message;
use unison_core::provider::ChatMessage;
use unison_core::tool::ToolRegistry;

/// Everything needed to render one model request.
#[derive(Debug, Clone, Copy)]
pub struct ContextInput<'a> {
    pub profile: &'a AgentProfile,
    pub shared_instruction: Option<&'a str>,
    /// Tools the agent may call in this run; `None` disables tool calls.
    pub tools: Option<&'a ToolRegistry>,
    /// Agents this one may message; empty disables messaging.
    pub peers: &'a [AgentProfile],
    pub task: &'a str,
    pub briefing: Option<&'a str>,
    /// Persisted steps of an earlier run that never reached `final_answer`
    pub resumed: &'a [Step],
    pub steps: &'a [Step],
    pub inbox: &'a [Message],
}

pub fn build_messages(input: &ContextInput<'_>) -> Vec<ChatMessage> {
    let mut messages = vec![ChatMessage::system(system_instructions(input))];

    let mut opening = format!("Task: {}", input.task);
    if let Some(briefing) = input.briefing {
        opening.push_str("\n\n");
        opening.push_str(briefing);
    }
    messages.push(ChatMessage::user(opening));

    if !input.resumed.is_empty() {
        messages.push(ChatMessage::user(
            "An earlier run ended before final_answer. Its steps follow; continue from them.",
        ));
    }
    for step in input.resumed.iter().chain(input.steps) {
        if !step.received.is_empty() {
            messages.push(ChatMessage::user(render_inbox(&step.received)));
        }
        messages.push(ChatMessage::assistant(render_step(step)));
        messages.push(ChatMessage::user(format!("Observation: {}", step.observation)));
    }

    if !input.inbox.is_empty() {
        messages.push(ChatMessage::user(render_inbox(input.inbox)));
    }
    messages
}

/// The system prompt for an agent.
pub fn system_instructions(input: &ContextInput<'_>) -> String {
    let profile = input.profile;
    let mut out = format!("You are {}. {}\n", profile.identity, profile.description);
    if let Some(task) = &profile.task {
        out.push_str(&format!("Your standing responsibility: {task}\n"));
    }
    if let Some(shared) = input.shared_instruction.filter(|s| !s.trim().is_empty()) {
        out.push_str(&format!("\nInstruction shared by your whole team:\n{shared}\n"));
    }

    out.push_str("\n## Tools\n");
    match input.tools {
        Some(tools) => out.push_str(&tools.catalog()),
        None => out.push_str("Tools are not available for this task.\n"),
    }

    if !input.peers.is_empty() {
        out.push_str("\n## Agents you can message\n");
        for peer in input.peers {
            out.push_str(&format!("- {}: {}\n", peer.identity, peer.description));
        }
    }

    out.push_str(&response_format(input.tools.is_some(), !input.peers.is_empty()));
    out
}

fn response_format(tools: bool, messaging: bool) -> String {
    let mut actions = Vec::new();
    if tools {
        actions.push("tool_call");
    }
    if messaging {
        actions.push("send_message");
    }
    actions.push("final_answer");

    let mut out = String::from(
        "\n## Response format\nReply with exactly one action using these keys, one per line:\n",
    );
    out.push_str("thought: <your reasoning>\n");
    out.push_str(&format!("action: {}\n", actions.join(" | ")));
    if tools {
        out.push_str("name: <tool name>            (tool_call only)\n");
        out.push_str("params: <JSON object>        (tool_call only)\n");
    }
    if messaging {
        out.push_str("recipient: <agent identity>  (send_message only)\n");
        out.push_str("resource: <optional pointer> (send_message only, optional)\n");
    }
    out.push_str("content: <text>              (");
    out.push_str(if messaging { "send_message and final_answer" } else { "final_answer" });
    out.push_str(", always the last key)\n");
    out
}

/// Re-render a committed step in the response format.
pub fn render_step(step: &Step) -> String {
    let mut out = format!("thought: {}\naction: {}\n", step.thought, step.action);
    let input = &step.action_input;
    match step.action {
        StepAction::ToolCall => {
            out.push_str(&format!("name: {}\n", text(input, "name")));
            let params = input.get("params").cloned().unwrap_or(Value::Object(Default::default()));
            out.push_str(&format!("params: {params}\n"));
        }
        StepAction::SendMessage => {
            out.push_str(&format!("recipient: {}\n", text(input, "recipient")));
            if let Some(resource) = input.get("resource").and_then(Value::as_str) {
                out.push_str(&format!("resource: {resource}\n"));
            }
            out.push_str(&format!("content: {}\n", text(input, "content")));
        }
        StepAction::FinalAnswer => {
            out.push_str(&format!("content: {}\n", text(input, "content")));
        }
    }
    out
}

fn text<'a>(value: &'a Value, key: &str) -> &'a str {
    value.get(key).and_then(Value::as_str).unwrap_or_default()
}

fn render_inbox(messages: &[Message]) -> String {
    let mut out = String::from("New messages:\n");
    for m in messages {
        out.push_str(&format!("- from {} [{} priority]: {}", m.sender, m.priority, m.content));
        if let Some(resource) = &m.resource {
            out.push_str(&format!(" (resource: {resource})"));
        }
        out.push('\n');
    }
    out
}

/// Follow-up sent after an unparseable response.
pub fn reprompt(error: &impl std::fmt::Display) -> String {
    format!(
        "Your last response could not be understood ({error}). \
         Reply again using exactly the keys from the response format."
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use unison_core::provider::Role;

    fn profile() -> AgentProfile {
        AgentProfile::new("analyst", "Crunches numbers").unwrap().with_task("Own all statistics")
    }

    #[test]
    fn first_request_is_system_then_task() {
        let profile = profile();
        let input = ContextInput {
            profile: &profile,
            shared_instruction: Some("Be concise."),
            tools: None,
            peers: &[],
            task: "Average 1, 2, 3",
            briefing: None,
            resumed: &[],
            steps: &[],
            inbox: &[],
        };
        let messages = build_messages(&input);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::System);
        assert!(messages[0].content.contains("You are analyst. Crunches numbers"));
        assert!(messages[0].content.contains("Own all statistics"));
        assert!(messages[0].content.contains("Be concise."));
        assert!(messages[0].content.contains("action: final_answer\n"));
        assert!(!messages[0].content.contains("recipient:"));
        assert_eq!(messages[1].content, "Task: Average 1, 2, 3");
    }

    #[test]
    fn steps_and_inbox_are_replayed_in_order() {
        let profile = profile();
        let peers = vec![AgentProfile::new("writer", "Writes").unwrap()];
        let registry = ToolRegistry::new();
        let steps = vec![
            Step::new(1, "compute", StepAction::ToolCall, json!({"name": "calculator", "params": {"x": 1}}))
                .with_observation("2")
                .with_received(vec![Message::new("manager", "analyst", "please compute")]),
        ];
        let inbox = vec![Message::new("writer", "analyst", "need numbers").with_resource("draft.md")];
        let input = ContextInput {
            profile: &profile,
            shared_instruction: None,
            tools: Some(&registry),
            peers: &peers,
            task: "t",
            briefing: Some("extra"),
            resumed: &[],
            steps: &steps,
            inbox: &inbox,
        };
        let messages = build_messages(&input);
        let roles: Vec<Role> = messages.iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            vec![Role::System, Role::User, Role::User, Role::Assistant, Role::User, Role::User]
        );
        assert!(messages[0].content.contains("- writer: Writes"));
        assert!(messages[0].content.contains("tool_call | send_message | final_answer"));
        assert!(messages[1].content.ends_with("extra"));
        assert!(messages[2].content.contains("from manager"));
        assert!(messages[3].content.contains("name: calculator"));
        assert_eq!(messages[4].content, "Observation: 2");
        assert!(messages[5].content.contains("(resource: draft.md)"));
    }

    #[test]
    fn render_send_message_step() {
        let step = Step::new(
            1,
            "delegate",
            StepAction::SendMessage,
            json!({"recipient": "writer", "content": "draft it", "resource": null}),
        );
        let rendered = render_step(&step);
        assert!(rendered.contains("recipient: writer\n"));
        assert!(!rendered.contains("resource"));
        assert!(rendered.ends_with("content: draft it\n"));
    }
}
