//! OpenAI-compatible provider implementation.
//!
//! Works with: OpenAI, OpenRouter, Ollama, vLLM, Together AI, and any endpoint
//! exposing `/chat/completions`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};
use unison_config::ProviderSettings;
use unison_core::error::ProviderError;
use unison_core::provider::*;

/// An OpenAI-compatible LLM provider.
pub struct OpenAiCompatProvider {
    name: String,
    base_url: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl std::fmt::Debug for OpenAiCompatProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiCompatProvider")
            .field("name", &self.name)
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

impl OpenAiCompatProvider {
    /// Create a new OpenAI-compatible provider.
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: Option<String>,
        request_timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| ProviderError::NotConfigured(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            client,
        })
    }

    /// Build from the `[provider]` configuration section.
    pub fn from_config(settings: &ProviderSettings) -> Result<Self, ProviderError> {
        Self::new(
            settings.name.clone(),
            settings.api_url.clone(),
            settings.api_key.clone(),
            Duration::from_secs(settings.request_timeout_secs),
        )
    }

    /// Create an OpenAI provider (convenience constructor).
    pub fn openai(api_key: impl Into<String>) -> Result<Self, ProviderError> {
        Self::new("openai", "https://api.openai.com/v1", Some(api_key.into()), Duration::from_secs(120))
    }

    /// Create an Ollama provider (convenience constructor).
    pub fn ollama(base_url: Option<&str>) -> Result<Self, ProviderError> {
        Self::new(
            "ollama",
            base_url.unwrap_or("http://localhost:11434/v1"),
            None,
            Duration::from_secs(300),
        )
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request_body(request: &ProviderRequest) -> serde_json::Value {
        let messages: Vec<ApiMessage> = request
            .messages
            .iter()
            .map(|m| ApiMessage {
                role: match m.role {
                    Role::System => "system".into(),
                    Role::User => "user".into(),
                    Role::Assistant => "assistant".into(),
                },
                content: Some(m.content.clone()),
            })
            .collect();

        let mut body = serde_json::json!({
            "model": request.model,
            "messages": messages,
            "temperature": request.temperature,
            "stream": false,
        });
        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }
        if !request.stop.is_empty() {
            body["stop"] = serde_json::json!(request.stop);
        }
        if let Some(user) = &request.user {
            body["user"] = serde_json::json!(user);
        }
        body
    }

    fn into_response(api_response: ApiResponse) -> Result<ProviderResponse, ProviderError> {
        let choice = api_response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::ApiError {
                status_code: 200,
                message: "No choices in response".into(),
            })?;

        Ok(ProviderResponse {
            content: choice.message.content.unwrap_or_default(),
            usage: api_response.usage.map(|u| Usage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
                total_tokens: u.total_tokens,
            }),
            model: api_response.model,
        })
    }
}

/// Map a non-success HTTP status to a backend error.
pub fn classify_status(status: u16, body: String, retry_after_secs: Option<u64>) -> ProviderError {
    match status {
        429 => ProviderError::RateLimited {
            retry_after_secs: retry_after_secs.unwrap_or(5),
        },
        401 | 403 => ProviderError::AuthenticationFailed(
            "Invalid API key or insufficient permissions".into(),
        ),
        408 => ProviderError::Timeout(format!("backend returned 408: {body}")),
        _ => ProviderError::ApiError { status_code: status, message: body },
    }
}

fn classify_transport(e: reqwest::Error) -> ProviderError {
    if e.is_timeout() {
        ProviderError::Timeout(e.to_string())
    } else {
        ProviderError::Network(e.to_string())
    }
}

#[async_trait]
impl unison_core::Provider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = Self::request_body(&request);

        debug!(provider = %self.name, model = %request.model, messages = request.messages.len(), "Sending completion request");

        let mut builder = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .json(&body);
        if let Some(key) = &self.api_key {
            builder = builder.header("Authorization", format!("Bearer {key}"));
        }
        let response = builder.send().await.map_err(classify_transport)?;

        let status = response.status().as_u16();
        if !response.status().is_success() {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok());
            let error_body = response.text().await.unwrap_or_default();
            warn!(provider = %self.name, status, body = %error_body, "Provider returned error");
            return Err(classify_status(status, error_body, retry_after));
        }

        let api_response: ApiResponse = response.json().await.map_err(|e| ProviderError::ApiError {
            status_code: status,
            message: format!("Failed to parse response: {e}"),
        })?;

        Self::into_response(api_response)
    }
}

// --- OpenAI API types (internal) ---

#[derive(Debug, Serialize, Deserialize)]
struct ApiMessage {
    role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    model: String,
    choices: Vec<ApiChoice>,
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiMessage,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ollama_constructor() {
        let p = OpenAiCompatProvider::ollama(None).unwrap();
        assert_eq!(unison_core::Provider::name(&p), "ollama");
        assert_eq!(p.base_url(), "http://localhost:11434/v1");
        assert!(p.api_key.is_none());
    }

    #[test]
    fn from_config_trims_url_and_drops_blank_key() {
        let settings = ProviderSettings {
            api_url: "http://localhost:8000/v1/".into(),
            api_key: Some("  ".into()),
            ..ProviderSettings::default()
        };
        let p = OpenAiCompatProvider::from_config(&settings).unwrap();
        assert_eq!(p.base_url(), "http://localhost:8000/v1");
        assert!(p.api_key.is_none());
    }

    #[test]
    fn debug_redacts_key() {
        let p = OpenAiCompatProvider::openai("sk-very-secret").unwrap();
        assert!(!format!("{p:?}").contains("sk-very-secret"));
    }

    #[test]
    fn request_body_shape() {
        let mut request = ProviderRequest::new(
            "gpt-4o-mini",
            vec![ChatMessage::system("rules"), ChatMessage::user("hi")],
        );
        request.max_tokens = Some(256);
        request.user = Some("analyst".into());
        let body = OpenAiCompatProvider::request_body(&request);
        assert_eq!(body["model"], "gpt-4o-mini");
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "hi");
        assert_eq!(body["max_tokens"], 256);
        assert!(body.get("stop").is_none());
        assert_eq!(body["user"], "analyst");
    }

    #[test]
    fn response_parsing() {
        let api: ApiResponse = serde_json::from_str(
            r#"{"model":"gpt-4o-mini","choices":[{"message":{"role":"assistant","content":"action: final_answer"}}],
                "usage":{"prompt_tokens":10,"completion_tokens":4,"total_tokens":14}}"#,
        )
        .unwrap();
        let response = OpenAiCompatProvider::into_response(api).unwrap();
        assert_eq!(response.content, "action: final_answer");
        assert_eq!(response.usage.unwrap().total_tokens, 14);
    }

    #[test]
    fn empty_choices_is_error() {
        let api: ApiResponse = serde_json::from_str(r#"{"model":"m","choices":[]}"#).unwrap();
        assert!(OpenAiCompatProvider::into_response(api).is_err());
    }

    #[test]
    fn status_mapping() {
        assert!(matches!(
            classify_status(429, String::new(), Some(12)),
            ProviderError::RateLimited { retry_after_secs: 12 }
        ));
        assert!(matches!(
            classify_status(401, String::new(), None),
            ProviderError::AuthenticationFailed(_)
        ));
        let server = classify_status(503, "overloaded".into(), None);
        assert!(server.is_transient());
        let client = classify_status(400, "bad request".into(), None);
        assert!(!client.is_transient());
    }
}
