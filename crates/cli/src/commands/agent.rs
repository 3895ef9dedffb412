//! `unison agent`: run one agent on a task.

use std::path::PathBuf;
use std::sync::Arc;
use unison_agent::{AgentLoop, Turn};
use unison_core::{AgentProfile, EventBus};

use super::{CliResult, history_store, load_config, require_api_key};

const DESCRIPTION: &str = "A capable assistant that solves tasks step by step, using tools when they help";

pub async fn run(message: &str, identity: &str, tools: Option<Vec<String>>, output: Option<PathBuf>) -> CliResult {
    let config = load_config()?;
    require_api_key(&config)?;

    let events = Arc::new(EventBus::default());
    let provider = unison_providers::from_config(&config, Some(events.clone()))?;

    let registry = unison_tools::default_registry()?;
    let registry = match tools {
        Some(names) => registry.subset(&names)?,
        None => registry,
    };

    let profile = AgentProfile::new(identity, DESCRIPTION)?;
    let agent = AgentLoop::new(profile, provider, history_store(&config))
        .with_tools(Arc::new(registry))
        .with_config(config.loop_config())
        .with_events(events);

    eprint!("  Thinking...");
    let outcome = agent.run(&Turn::new(message)).await;
    eprint!("\r              \r");

    match (outcome.answer(), outcome.failure()) {
        (Some(answer), _) => {
            println!("{answer}");
            eprintln!(
                "  ({} iterations, {} tool calls, {:.1}s)",
                outcome.iterations,
                outcome.tool_calls,
                outcome.execution_time.as_secs_f64()
            );
            if let Some(path) = output {
                let body = format!("Agent: {identity}\nGoal: {message}\n\nResult:\n{answer}\n");
                std::fs::write(&path, body)?;
                eprintln!("  Answer written to {}", path.display());
            }
            Ok(())
        }
        (None, failure) => {
            if let Some(failure) = failure {
                eprintln!("  Agent failed: {} ({})", failure.reason, failure.detail);
                if let Some(thought) = &failure.last_thought {
                    eprintln!("  Last thought: {thought}");
                }
                if let Some(action) = &failure.last_action {
                    eprintln!("  Last action:  {action}");
                }
            }
            Err(format!("agent '{identity}' did not finish").into())
        }
    }
}
