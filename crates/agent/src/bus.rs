//! In-process message bus between agents.
//!
//! Every agent owns a mailbox. `send` appends to the recipient's mailbox and
//! `receive` drains it without blocking, so delivery order is send order for
//! each sender→recipient pair. Messages whose delegation depth exceeds the
//! configured bound are rejected instead of delivered.

use chrono::Utc;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, warn};
use unison_core::error::{CommunicationError, CoordinationError, Error, Result};
use unison_core::event::{DomainEvent, EventBus};
use unison_core::message::{AgentId, Message};

#[derive(Default)]
struct Mailbox {
    queue: VecDeque<Message>,
    notify: Arc<Notify>,
}

/// Routes [`Message`]s between registered agents.
pub struct MessageBus {
    mailboxes: Mutex<HashMap<AgentId, Mailbox>>,
    max_depth: u32,
    events: Option<Arc<EventBus>>,
}

impl std::fmt::Debug for MessageBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageBus")
            .field("agents", &self.agents())
            .field("max_depth", &self.max_depth)
            .finish()
    }
}

impl MessageBus {
    pub fn new(max_depth: u32) -> Self {
        Self { mailboxes: Mutex::new(HashMap::new()), max_depth, events: None }
    }

    /// Publish delivery and rejection events.
    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn max_depth(&self) -> u32 {
        self.max_depth
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<AgentId, Mailbox>> {
        // A panic while holding the lock cannot leave a mailbox half-written.
        self.mailboxes.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Create a mailbox for `agent`. Registering twice keeps the existing one.
    pub fn register(&self, agent: impl Into<AgentId>) {
        self.lock().entry(agent.into()).or_default();
    }

    pub fn is_registered(&self, agent: &str) -> bool {
        self.lock().contains_key(&AgentId::from(agent))
    }

    /// Registered identities, sorted.
    pub fn agents(&self) -> Vec<AgentId> {
        let mut agents: Vec<AgentId> = self.lock().keys().cloned().collect();
        agents.sort();
        agents
    }

    /// Check that `message` would be accepted, without delivering it.
    pub fn check(&self, message: &Message) -> Result<()> {
        let mailboxes = self.lock();
        Self::admit(&mailboxes, message, self.max_depth)
    }

    fn admit(mailboxes: &HashMap<AgentId, Mailbox>, message: &Message, max_depth: u32) -> Result<()> {
        if !mailboxes.contains_key(&message.sender) {
            return Err(CommunicationError::UnknownAgent(message.sender.to_string()).into());
        }
        if !mailboxes.contains_key(&message.recipient) {
            return Err(CommunicationError::UnknownAgent(message.recipient.to_string()).into());
        }
        if message.sender == message.recipient {
            return Err(CommunicationError::SelfAddressed(message.sender.to_string()).into());
        }
        if message.depth > max_depth {
            return Err(CoordinationError::DepthExceeded {
                sender: message.sender.to_string(),
                recipient: message.recipient.to_string(),
                depth: message.depth,
                max: max_depth,
            }
            .into());
        }
        Ok(())
    }

    /// Deliver `message` to its recipient's mailbox.
    pub fn send(&self, message: Message) -> Result<()> {
        let mut mailboxes = self.lock();
        if let Err(e) = Self::admit(&mailboxes, &message, self.max_depth) {
            drop(mailboxes);
            warn!(sender = %message.sender, recipient = %message.recipient, depth = message.depth, error = %e, "Message rejected");
            self.publish(DomainEvent::MessageRejected {
                sender: message.sender.to_string(),
                recipient: message.recipient.to_string(),
                reason: e.to_string(),
                timestamp: Utc::now(),
            });
            return Err(e);
        }

        let event = DomainEvent::MessageDelivered {
            sender: message.sender.to_string(),
            recipient: message.recipient.to_string(),
            depth: message.depth,
            content_preview: message.preview(80),
            timestamp: Utc::now(),
        };
        debug!(sender = %message.sender, recipient = %message.recipient, depth = message.depth, "Message delivered");

        let Some(mailbox) = mailboxes.get_mut(&message.recipient) else {
            return Err(Error::Internal("mailbox disappeared during delivery".into()));
        };
        mailbox.queue.push_back(message);
        mailbox.notify.notify_one();
        drop(mailboxes);

        self.publish(event);
        Ok(())
    }

    /// Drain every pending message for `agent`, oldest first.
    pub fn receive(&self, agent: &str) -> Vec<Message> {
        self.lock()
            .get_mut(&AgentId::from(agent))
            .map(|mailbox| mailbox.queue.drain(..).collect())
            .unwrap_or_default()
    }

    /// Return drained messages to the front of `agent`'s mailbox, keeping
    /// their order ahead of anything delivered since.
    pub fn requeue(&self, agent: &str, messages: Vec<Message>) {
        let mut mailboxes = self.lock();
        let Some(mailbox) = mailboxes.get_mut(&AgentId::from(agent)) else {
            return;
        };
        for message in messages.into_iter().rev() {
            mailbox.queue.push_front(message);
        }
        mailbox.notify.notify_one();
    }

    /// Number of undelivered messages waiting for `agent`.
    pub fn pending(&self, agent: &str) -> usize {
        self.lock().get(&AgentId::from(agent)).map_or(0, |m| m.queue.len())
    }

    /// Wait up to `timeout` for at least one message, then drain.
    ///
    /// Returns an empty list on timeout or for an unregistered agent.
    pub async fn wait(&self, agent: &str, timeout: Duration) -> Vec<Message> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notify = {
                let mut mailboxes = self.lock();
                let Some(mailbox) = mailboxes.get_mut(&AgentId::from(agent)) else {
                    return Vec::new();
                };
                if !mailbox.queue.is_empty() {
                    return mailbox.queue.drain(..).collect();
                }
                mailbox.notify.clone()
            };
            if tokio::time::timeout_at(deadline, notify.notified()).await.is_err() {
                return self.receive(agent);
            }
        }
    }

    fn publish(&self, event: DomainEvent) {
        if let Some(events) = &self.events {
            events.publish(event);
        }
    }
}
