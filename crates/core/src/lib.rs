//! # Unison Core
//!
//! Domain types, traits, and error definitions for the Unison multi-agent
//! runtime. This crate has **no framework dependencies**: it defines the
//! model that every other crate implements against.
//!
//! ## Layout
//!
//! - [`schema`]: typed tool parameters and their validation/coercion rules
//! - [`tool`]: the tool plugin trait, the validating [`ToolContract`] and the
//!   read-only [`ToolRegistry`]
//! - [`message`]: agent-to-agent messages
//! - [`provider`]: the model backend trait
//! - [`history`]: persisted loop steps and the history store trait
//! - [`agent`]: agent profiles and loop configuration
//! - [`event`]: domain events for in-process observers

pub mod error;
pub mod schema;
pub mod tool;
pub mod message;
pub mod provider;
pub mod history;
pub mod agent;
pub mod event;

// Re-export key types at crate root for ergonomics
pub use error::{Error, Result};
pub use schema::{Field, FieldType, Schema, ValidatedParams};
pub use tool::{Tool, ToolContract, ToolRegistry, ToolResult};
pub use message::{AgentId, Message, Priority};
pub use provider::{ChatMessage, Provider, ProviderRequest, ProviderResponse, Role, Usage};
pub use history::{HistoryStore, Step, StepAction};
pub use agent::{AgentProfile, LoopConfig};
pub use event::{DomainEvent, EventBus};
