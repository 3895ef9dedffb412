//! Bounded retry for transient backend failures.
//!
//! [`RetryProvider`] wraps any provider and re-issues a request after a
//! transient failure (rate limit, timeout, network, 5xx) according to a
//! [`RetryPolicy`]. Non-transient failures are returned immediately.

use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use unison_config::RetrySettings;
use unison_core::error::ProviderError;
use unison_core::event::{DomainEvent, EventBus};
use unison_core::provider::*;

/// Decides whether and when to retry a failed backend call.
pub trait RetryPolicy: Send + Sync {
    /// Delay before retry number `attempt` (1-based), or `None` to give up.
    fn next_delay(&self, attempt: u32, error: &ProviderError) -> Option<Duration>;
}

/// Never retry.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRetry;

impl RetryPolicy for NoRetry {
    fn next_delay(&self, _attempt: u32, _error: &ProviderError) -> Option<Duration> {
        None
    }
}

/// Exponential backoff: `base * multiplier^(attempt-1)`, capped at `max_delay`.
///
/// A rate limit's `retry_after` is honored when it is longer than the
/// computed backoff, still within `max_delay`.
#[derive(Debug, Clone, PartialEq)]
pub struct ExponentialBackoff {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::from_settings(&RetrySettings::default())
    }
}

impl ExponentialBackoff {
    pub fn from_settings(settings: &RetrySettings) -> Self {
        Self {
            max_retries: settings.max_retries,
            base_delay: Duration::from_millis(settings.base_delay_ms),
            multiplier: settings.multiplier,
            max_delay: Duration::from_millis(settings.max_delay_ms),
        }
    }

    /// Backoff before retry number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let secs = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);
        let capped = secs.min(self.max_delay.as_secs_f64());
        if capped.is_finite() && capped >= 0.0 {
            Duration::from_secs_f64(capped)
        } else {
            self.max_delay
        }
    }
}

impl RetryPolicy for ExponentialBackoff {
    fn next_delay(&self, attempt: u32, error: &ProviderError) -> Option<Duration> {
        if attempt == 0 || attempt > self.max_retries || !error.is_transient() {
            return None;
        }
        let backoff = self.delay_for(attempt);
        Some(match error {
            ProviderError::RateLimited { retry_after_secs } => {
                Duration::from_secs(*retry_after_secs).max(backoff).min(self.max_delay)
            }
            _ => backoff,
        })
    }
}

/// A provider that retries its inner provider per a [`RetryPolicy`].
pub struct RetryProvider {
    inner: Arc<dyn Provider>,
    policy: Arc<dyn RetryPolicy>,
    events: Option<Arc<EventBus>>,
}

impl RetryProvider {
    pub fn new(inner: Arc<dyn Provider>, policy: impl RetryPolicy + 'static) -> Self {
        Self { inner, policy: Arc::new(policy), events: None }
    }

    /// Publish a `BackendRetry` event before each retry.
    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }
}

#[async_trait]
impl Provider for RetryProvider {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let mut attempt = 0u32;
        loop {
            let error = match self.inner.complete(request.clone()).await {
                Ok(response) => {
                    if attempt > 0 {
                        debug!(provider = %self.inner.name(), retries = attempt, "Backend recovered");
                    }
                    return Ok(response);
                }
                Err(e) => e,
            };

            attempt += 1;
            let Some(delay) = self.policy.next_delay(attempt, &error) else {
                if error.is_transient() {
                    warn!(provider = %self.inner.name(), attempts = attempt, error = %error, "Backend retries exhausted");
                }
                return Err(error);
            };

            warn!(
                provider = %self.inner.name(),
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Transient backend failure, retrying"
            );
            if let Some(events) = &self.events {
                events.publish(DomainEvent::BackendRetry {
                    provider: self.inner.name().to_string(),
                    attempt,
                    delay_ms: delay.as_millis() as u64,
                    error_message: error.to_string(),
                    timestamp: Utc::now(),
                });
            }
            tokio::time::sleep(delay).await;
        }
    }
}
