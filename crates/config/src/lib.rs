//! Configuration loading, validation, and management for Unison.
//!
//! Loads configuration from `~/.unison/config.toml` with environment
//! variable overrides, and clan definitions from standalone TOML files.
//! Everything is validated at load time.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use unison_core::agent::LoopConfig;

/// The root configuration structure.
///
/// Maps directly to `~/.unison/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Model backend connection
    #[serde(default)]
    pub provider: ProviderSettings,

    /// Per-agent loop limits
    #[serde(default)]
    pub agent: AgentSettings,

    /// Backend retry policy
    #[serde(default)]
    pub retry: RetrySettings,

    /// Coordinator bounds
    #[serde(default)]
    pub clan: ClanSettings,

    #[serde(default)]
    pub history: HistorySettings,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct ProviderSettings {
    /// Label used in logs and events
    #[serde(default = "default_provider_name")]
    pub name: String,

    /// Base URL of an OpenAI-compatible API
    #[serde(default = "default_api_url")]
    pub api_url: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_provider_name() -> String {
    "openai".into()
}
fn default_api_url() -> String {
    "https://api.openai.com/v1".into()
}
fn default_model() -> String {
    "gpt-4o-mini".into()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_request_timeout() -> u64 {
    120
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            name: default_provider_name(),
            api_url: default_api_url(),
            api_key: None,
            model: default_model(),
            temperature: default_temperature(),
            max_tokens: None,
            request_timeout_secs: default_request_timeout(),
        }
    }
}

/// Redact a secret for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for ProviderSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderSettings")
            .field("name", &self.name)
            .field("api_url", &self.api_url)
            .field("api_key", &redact(&self.api_key))
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSettings {
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    #[serde(default = "default_max_parse_retries")]
    pub max_parse_retries: u32,

    #[serde(default = "default_tool_timeout")]
    pub tool_timeout_secs: u64,

    /// Block after `send_message` until a reply arrives
    #[serde(default)]
    pub await_reply: bool,

    #[serde(default = "default_reply_timeout")]
    pub reply_timeout_secs: u64,

    /// Steps of an unfinished earlier run replayed on the next run
    #[serde(default = "default_history_window")]
    pub history_window: usize,
}

fn default_max_iterations() -> u32 {
    10
}
fn default_max_parse_retries() -> u32 {
    2
}
fn default_tool_timeout() -> u64 {
    30
}
fn default_reply_timeout() -> u64 {
    30
}
fn default_history_window() -> usize {
    20
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            max_parse_retries: default_max_parse_retries(),
            tool_timeout_secs: default_tool_timeout(),
            await_reply: false,
            reply_timeout_secs: default_reply_timeout(),
            history_window: default_history_window(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_base_delay")]
    pub base_delay_ms: u64,

    #[serde(default = "default_multiplier")]
    pub multiplier: f64,

    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,
}

fn default_max_retries() -> u32 {
    3
}
fn default_base_delay() -> u64 {
    500
}
fn default_multiplier() -> f64 {
    2.0
}
fn default_max_delay() -> u64 {
    10_000
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay(),
            multiplier: default_multiplier(),
            max_delay_ms: default_max_delay(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClanSettings {
    /// Longest delegation chain a message may extend
    #[serde(default = "default_max_depth")]
    pub max_delegation_depth: u32,

    #[serde(default = "default_member_timeout")]
    pub member_timeout_secs: u64,

    /// Bound on planning through collection
    #[serde(default = "default_clan_timeout")]
    pub clan_timeout_secs: u64,

    #[serde(default = "default_synthesis_timeout")]
    pub synthesis_timeout_secs: u64,
}

fn default_max_depth() -> u32 {
    3
}
fn default_member_timeout() -> u64 {
    300
}
fn default_clan_timeout() -> u64 {
    900
}
fn default_synthesis_timeout() -> u64 {
    120
}

impl Default for ClanSettings {
    fn default() -> Self {
        Self {
            max_delegation_depth: default_max_depth(),
            member_timeout_secs: default_member_timeout(),
            clan_timeout_secs: default_clan_timeout(),
            synthesis_timeout_secs: default_synthesis_timeout(),
        }
    }
}

impl ClanSettings {
    pub fn member_timeout(&self) -> Duration {
        Duration::from_secs(self.member_timeout_secs)
    }

    pub fn clan_timeout(&self) -> Duration {
        Duration::from_secs(self.clan_timeout_secs)
    }

    pub fn synthesis_timeout(&self) -> Duration {
        Duration::from_secs(self.synthesis_timeout_secs)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryBackend {
    #[default]
    File,
    Memory,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HistorySettings {
    #[serde(default)]
    pub backend: HistoryBackend,

    /// Directory for file-backed history (default `~/.unison/history`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,
}

impl AppConfig {
    /// Load configuration from the default path (~/.unison/config.toml).
    ///
    /// Environment overrides:
    /// - `UNISON_API_KEY` (falls back to `OPENAI_API_KEY`) when no key is configured
    /// - `UNISON_API_URL`
    /// - `UNISON_MODEL`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply environment overrides through `lookup`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if self.provider.api_key.is_none() {
            self.provider.api_key = lookup("UNISON_API_KEY").or_else(|| lookup("OPENAI_API_KEY"));
        }
        if let Some(url) = lookup("UNISON_API_URL") {
            self.provider.api_url = url;
        }
        if let Some(model) = lookup("UNISON_MODEL") {
            self.provider.model = model;
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".unison")
    }

    /// Directory for file-backed history.
    pub fn history_dir(&self) -> PathBuf {
        self.history
            .dir
            .clone()
            .unwrap_or_else(|| Self::config_dir().join("history"))
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let t = self.provider.temperature;
        if !(0.0..=2.0).contains(&t) {
            return Err(ConfigError::ValidationError(
                "provider.temperature must be between 0.0 and 2.0".into(),
            ));
        }
        if self.agent.max_iterations == 0 {
            return Err(ConfigError::ValidationError(
                "agent.max_iterations must be at least 1".into(),
            ));
        }
        if self.retry.multiplier < 1.0 {
            return Err(ConfigError::ValidationError(
                "retry.multiplier must be >= 1.0".into(),
            ));
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return Err(ConfigError::ValidationError(
                "retry.base_delay_ms must not exceed retry.max_delay_ms".into(),
            ));
        }
        if self.clan.max_delegation_depth == 0 {
            return Err(ConfigError::ValidationError(
                "clan.max_delegation_depth must be at least 1".into(),
            ));
        }
        if self.clan.member_timeout_secs == 0
            || self.clan.clan_timeout_secs == 0
            || self.clan.synthesis_timeout_secs == 0
        {
            return Err(ConfigError::ValidationError(
                "clan timeouts must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    /// Check if an API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.provider.api_key.is_some()
    }

    /// Loop configuration for agents built from this config.
    pub fn loop_config(&self) -> LoopConfig {
        LoopConfig {
            model: self.provider.model.clone(),
            temperature: self.provider.temperature,
            max_tokens: self.provider.max_tokens,
            max_iterations: self.agent.max_iterations,
            max_parse_retries: self.agent.max_parse_retries,
            tool_timeout: (self.agent.tool_timeout_secs > 0)
                .then(|| Duration::from_secs(self.agent.tool_timeout_secs)),
            await_reply: self.agent.await_reply,
            reply_timeout: Duration::from_secs(self.agent.reply_timeout_secs),
            history_window: self.agent.history_window,
        }
    }
}

/// A clan definition file.
///
/// ```toml
/// name = "research"
/// goal = "Compare three sorting algorithms"
/// shared_instruction = "Be concise."
/// output_file = "report.txt"
///
/// [manager]
/// identity = "lead"
/// description = "Plans and merges the work"
///
/// [[members]]
/// identity = "analyst"
/// description = "Runs the numbers"
/// tools = ["calculator", "data_analyzer"]
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClanFile {
    pub name: String,
    pub goal: String,

    #[serde(default)]
    pub shared_instruction: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_file: Option<PathBuf>,

    pub manager: MemberFile,

    #[serde(default)]
    pub members: Vec<MemberFile>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemberFile {
    pub identity: String,
    pub description: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task: Option<String>,

    /// Built-in tool names this agent may call
    #[serde(default)]
    pub tools: Vec<String>,
}

impl ClanFile {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// Check identities and tool names against the available tools.
    pub fn validate(&self, known_tools: &[&str]) -> Result<(), ConfigError> {
        if self.goal.trim().is_empty() {
            return Err(ConfigError::ValidationError("clan goal must not be empty".into()));
        }
        if self.members.is_empty() {
            return Err(ConfigError::ValidationError(
                "clan must declare at least one member".into(),
            ));
        }

        let mut seen = HashSet::new();
        for agent in std::iter::once(&self.manager).chain(&self.members) {
            let identity = agent.identity.trim();
            if identity.is_empty() {
                return Err(ConfigError::ValidationError(
                    "agent identity must not be empty".into(),
                ));
            }
            if !seen.insert(identity.to_string()) {
                return Err(ConfigError::ValidationError(format!(
                    "duplicate agent identity '{identity}'"
                )));
            }
            if let Some(unknown) = agent.tools.iter().find(|t| !known_tools.contains(&t.as_str())) {
                return Err(ConfigError::ValidationError(format!(
                    "agent '{identity}' lists unknown tool '{unknown}'"
                )));
            }
        }
        Ok(())
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

impl From<ConfigError> for unison_core::Error {
    fn from(e: ConfigError) -> Self {
        unison_core::Error::Config { message: e.to_string() }
    }
}
