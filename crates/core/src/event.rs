//! Domain event system: decoupled observation of agents and clans.
//!
//! Events are published when something interesting happens in the runtime.
//! Observers (the CLI, tests) subscribe without the loop knowing about them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

/// All domain events in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DomainEvent {
    /// A tool was executed
    ToolExecuted {
        agent: String,
        tool_name: String,
        success: bool,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// An agent loop committed a step to its history
    StepCommitted {
        agent: String,
        iteration: u32,
        action: String,
        timestamp: DateTime<Utc>,
    },

    /// A message reached a recipient's inbox
    MessageDelivered {
        sender: String,
        recipient: String,
        depth: u32,
        content_preview: String,
        timestamp: DateTime<Utc>,
    },

    /// A message was refused by the bus
    MessageRejected {
        sender: String,
        recipient: String,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    /// A transient backend failure is being retried
    BackendRetry {
        provider: String,
        attempt: u32,
        delay_ms: u64,
        error_message: String,
        timestamp: DateTime<Utc>,
    },

    /// An agent loop reached a terminal state
    AgentTerminated {
        agent: String,
        success: bool,
        reason: Option<String>,
        iterations: u32,
        timestamp: DateTime<Utc>,
    },

    /// A clan moved to a new coordination phase
    ClanPhaseChanged {
        clan: String,
        phase: String,
        timestamp: DateTime<Utc>,
    },
}

/// A broadcast-based event bus for domain events.
///
/// Uses `tokio::sync::broadcast` for multi-consumer pub/sub.
/// Components can subscribe to receive all events and filter for what they care about.
pub struct EventBus {
    sender: broadcast::Sender<Arc<DomainEvent>>,
}

impl EventBus {
    /// Create a new event bus with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: DomainEvent) {
        // No subscribers is fine
        let _ = self.sender.send(Arc::new(event));
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<DomainEvent>> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.sender.receiver_count())
            .finish()
    }
}
