//! Shared test helpers for loop and clan tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;
use unison_core::error::ProviderError;
use unison_core::provider::{Provider, ProviderRequest, ProviderResponse, Usage};

enum Reply {
    Text(String),
    Fail(ProviderError),
}

/// A mock provider with one response script per agent.
///
/// Requests are routed by `ProviderRequest::user`, which the agent loop sets
/// to the calling agent's identity. Each call pops the next scripted reply;
/// once a script is exhausted the agent's `repeat` text is returned, or a
/// non-transient error if none was set.
#[derive(Default)]
pub struct ScriptedProvider {
    scripts: Mutex<HashMap<String, VecDeque<Reply>>>,
    repeats: HashMap<String, String>,
    delays: HashMap<String, Duration>,
    requests: Mutex<Vec<ProviderRequest>>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append text responses to `agent`'s script.
    pub fn script<I, S>(self, agent: &str, responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        {
            let mut scripts = self.scripts.lock().unwrap();
            let queue = scripts.entry(agent.to_string()).or_default();
            queue.extend(responses.into_iter().map(|r| Reply::Text(r.into())));
        }
        self
    }

    /// Append a backend failure to `agent`'s script.
    pub fn fail(self, agent: &str, error: ProviderError) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .entry(agent.to_string())
            .or_default()
            .push_back(Reply::Fail(error));
        self
    }

    /// Response returned forever once `agent`'s script runs out.
    pub fn repeat(mut self, agent: &str, response: impl Into<String>) -> Self {
        self.repeats.insert(agent.to_string(), response.into());
        self
    }

    /// Sleep before answering `agent`.
    pub fn delay(mut self, agent: &str, delay: Duration) -> Self {
        self.delays.insert(agent.to_string(), delay);
        self
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    /// Every request made on behalf of `agent`, oldest first.
    pub fn requests_for(&self, agent: &str) -> Vec<ProviderRequest> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.user.as_deref() == Some(agent))
            .cloned()
            .collect()
    }
}

#[async_trait::async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted_mock"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let agent = request.user.clone().unwrap_or_default();
        self.requests.lock().unwrap().push(request);

        if let Some(delay) = self.delays.get(&agent) {
            tokio::time::sleep(*delay).await;
        }

        let next = self.scripts.lock().unwrap().get_mut(&agent).and_then(VecDeque::pop_front);
        match next {
            Some(Reply::Text(text)) => Ok(make_text_response(&text)),
            Some(Reply::Fail(error)) => Err(error),
            None => match self.repeats.get(&agent) {
                Some(text) => Ok(make_text_response(text)),
                None => Err(ProviderError::ApiError {
                    status_code: 400,
                    message: format!("script for '{agent}' is exhausted"),
                }),
            },
        }
    }
}

pub fn make_text_response(text: &str) -> ProviderResponse {
    ProviderResponse {
        content: text.to_string(),
        usage: Some(Usage { prompt_tokens: 10, completion_tokens: 5, total_tokens: 15 }),
        model: "mock-model".into(),
    }
}

/// A `final_answer` response.
pub fn answer(content: &str) -> String {
    format!("thought: done\naction: final_answer\ncontent: {content}")
}

/// A `tool_call` response with JSON params.
pub fn tool_call(name: &str, params: serde_json::Value) -> String {
    format!("thought: use {name}\naction: tool_call\nname: {name}\nparams: {params}")
}

/// A `send_message` response.
pub fn send(recipient: &str, content: &str) -> String {
    format!("thought: tell {recipient}\naction: send_message\nrecipient: {recipient}\ncontent: {content}")
}
