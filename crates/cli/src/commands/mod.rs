//! CLI subcommands.

pub mod agent;
pub mod clan;
pub mod history;
pub mod tools;

use std::sync::Arc;
use unison_config::{AppConfig, HistoryBackend};
use unison_core::HistoryStore;
use unison_history::{FileHistory, InMemoryHistory};

pub type CliResult<T = ()> = Result<T, Box<dyn std::error::Error>>;

/// Load the configuration, failing with a readable message.
pub fn load_config() -> CliResult<AppConfig> {
    Ok(AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?)
}

/// The configured history store.
pub fn history_store(config: &AppConfig) -> Arc<dyn HistoryStore> {
    match config.history.backend {
        HistoryBackend::File => Arc::new(FileHistory::new(config.history_dir())),
        HistoryBackend::Memory => Arc::new(InMemoryHistory::new()),
    }
}

/// Refuse to call the hosted OpenAI endpoint without a key.
pub fn require_api_key(config: &AppConfig) -> CliResult {
    if config.has_api_key() || !config.provider.api_url.contains("api.openai.com") {
        return Ok(());
    }
    eprintln!();
    eprintln!("  ERROR: No API key configured!");
    eprintln!();
    eprintln!("  Set one of these environment variables:");
    eprintln!("    UNISON_API_KEY=sk-...");
    eprintln!("    OPENAI_API_KEY=sk-...");
    eprintln!();
    eprintln!("  Or add it to your config file:");
    eprintln!("    {}", AppConfig::config_dir().join("config.toml").display());
    eprintln!();
    eprintln!("  For a local backend, point UNISON_API_URL at it instead.");
    eprintln!();
    Err("No API key found. See above for setup instructions.".into())
}
