//! In-memory history: useful for testing and ephemeral sessions.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use unison_core::error::HistoryError;
use unison_core::history::{HistoryStore, Step};

/// Keeps every agent's steps in a map keyed by identity.
#[derive(Debug, Clone, Default)]
pub struct InMemoryHistory {
    steps: Arc<RwLock<HashMap<String, Vec<Step>>>>,
}

impl InMemoryHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Identities that have at least one step.
    pub async fn identities(&self) -> Vec<String> {
        let mut names: Vec<String> = self.steps.read().await.keys().cloned().collect();
        names.sort();
        names
    }
}

#[async_trait]
impl HistoryStore for InMemoryHistory {
    fn name(&self) -> &str {
        "memory"
    }

    async fn append(&self, identity: &str, step: &Step) -> Result<(), HistoryError> {
        self.steps
            .write()
            .await
            .entry(identity.to_string())
            .or_default()
            .push(step.clone());
        Ok(())
    }

    async fn load(&self, identity: &str) -> Result<Vec<Step>, HistoryError> {
        Ok(self.steps.read().await.get(identity).cloned().unwrap_or_default())
    }

    async fn clear(&self, identity: &str) -> Result<(), HistoryError> {
        self.steps.write().await.remove(identity);
        Ok(())
    }
}
