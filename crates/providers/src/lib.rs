//! Model backend implementations for Unison.
//!
//! All providers implement the `unison_core::Provider` trait. Transient
//! failures are retried by wrapping a provider in [`RetryProvider`].

pub mod openai_compat;
pub mod retry;

pub use openai_compat::OpenAiCompatProvider;
pub use retry::{ExponentialBackoff, NoRetry, RetryPolicy, RetryProvider};

use std::sync::Arc;
use unison_config::AppConfig;
use unison_core::error::ProviderError;
use unison_core::event::EventBus;
use unison_core::Provider;

/// The configured backend, wrapped with the configured retry policy.
pub fn from_config(
    config: &AppConfig,
    events: Option<Arc<EventBus>>,
) -> Result<Arc<dyn Provider>, ProviderError> {
    let backend: Arc<dyn Provider> = Arc::new(OpenAiCompatProvider::from_config(&config.provider)?);
    let mut provider = RetryProvider::new(backend, ExponentialBackoff::from_settings(&config.retry));
    if let Some(events) = events {
        provider = provider.with_events(events);
    }
    Ok(Arc::new(provider))
}
