//! Error types for the Unison domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error type; [`Error`] aggregates them.

use thiserror::Error;

use crate::schema::FieldType;

/// The top-level error type for all Unison operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Tool layer ---
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),

    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    // --- Agent loop ---
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("Backend error: {0}")]
    Provider(#[from] ProviderError),

    #[error("History error: {0}")]
    History(#[from] HistoryError),

    // --- Coordination ---
    #[error("Communication error: {0}")]
    Communication(#[from] CommunicationError),

    #[error("Coordination error: {0}")]
    Coordination(#[from] CoordinationError),

    #[error("Clan error: {0}")]
    Clan(#[from] ClanError),

    // --- Configuration ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Tool layer ---

/// A single parameter that failed validation.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FieldIssue {
    #[error("missing required parameter '{field}'")]
    Missing { field: String },

    #[error("parameter '{field}' expected {expected}, got {found}")]
    TypeMismatch {
        field: String,
        expected: FieldType,
        found: String,
    },

    #[error("parameter '{field}' is {value}, below the minimum {min}")]
    BelowMinimum { field: String, value: f64, min: f64 },

    #[error("parameter '{field}' is {value}, above the maximum {max}")]
    AboveMaximum { field: String, value: f64, max: f64 },

    #[error("parameter '{field}' must be one of {choices}")]
    NotAChoice { field: String, choices: String },
}

impl FieldIssue {
    /// Name of the offending field.
    pub fn field(&self) -> &str {
        match self {
            Self::Missing { field }
            | Self::TypeMismatch { field, .. }
            | Self::BelowMinimum { field, .. }
            | Self::AboveMaximum { field, .. }
            | Self::NotAChoice { field, .. } => field,
        }
    }
}

/// Parameters did not satisfy a tool's schema.
///
/// Always carries at least one issue, in schema field order.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("Parameter validation failed: {}", render_issues(.issues))]
pub struct ValidationError {
    pub issues: Vec<FieldIssue>,
}

fn render_issues(issues: &[FieldIssue]) -> String {
    issues
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// A schema was declared inconsistently. Raised at tool registration.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SchemaError {
    #[error("duplicate field name '{0}'")]
    DuplicateField(String),

    #[error("field name must not be empty")]
    EmptyName,

    #[error("default for '{field}' does not match its type: {reason}")]
    InvalidDefault { field: String, reason: String },

    #[error("min/max constraints only apply to numeric fields ('{0}')")]
    RangeOnNonNumeric(String),
}

#[derive(Debug, Clone, Error)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Duplicate tool name: {0}")]
    DuplicateName(String),

    #[error("Tool execution failed: {tool_name}: {reason}")]
    ExecutionFailed { tool_name: String, reason: String },

    #[error("Tool timed out: {tool_name} after {timeout_ms}ms")]
    Timeout { tool_name: String, timeout_ms: u64 },

    #[error("Invalid tool arguments: {0}")]
    InvalidArguments(String),
}

impl ToolError {
    /// Stable variant name, recorded as `exception_type` in tool results.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "NotFound",
            Self::DuplicateName(_) => "DuplicateName",
            Self::ExecutionFailed { .. } => "ExecutionFailed",
            Self::Timeout { .. } => "Timeout",
            Self::InvalidArguments(_) => "InvalidArguments",
        }
    }
}

// --- Agent loop ---

/// The model's response did not decode into a known action.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseError {
    #[error("response is empty")]
    Empty,

    #[error("response has no 'action' key")]
    MissingAction,

    #[error("unrecognized action '{0}'")]
    UnknownAction(String),

    #[error("action '{action}' requires key '{key}'")]
    MissingKey { action: String, key: String },

    #[error("malformed params: {0}")]
    MalformedParams(String),
}

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),
}

impl ProviderError {
    /// Whether the failure is worth retrying with the same backend.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::RateLimited { .. } | Self::Timeout(_) | Self::Network(_) => true,
            Self::ApiError { status_code, .. } => *status_code >= 500,
            Self::AuthenticationFailed(_) | Self::NotConfigured(_) => false,
        }
    }
}

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Corrupted history for '{identity}': {reason}")]
    Corrupted { identity: String, reason: String },
}

// --- Coordination ---

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CommunicationError {
    #[error("unknown agent '{0}'")]
    UnknownAgent(String),

    #[error("agent '{0}' cannot message itself")]
    SelfAddressed(String),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CoordinationError {
    #[error("delegation depth {depth} exceeds the bound of {max} ({sender} → {recipient})")]
    DepthExceeded {
        sender: String,
        recipient: String,
        depth: u32,
        max: u32,
    },
}

/// Construction-time misconfiguration of a clan. Never retried.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ClanError {
    #[error("clan has no manager")]
    MissingManager,

    #[error("clan has no members")]
    NoMembers,

    #[error("duplicate agent identity '{0}'")]
    DuplicateIdentity(String),

    #[error("invalid agent profile: {0}")]
    InvalidProfile(String),

    #[error("delegation plan names no members")]
    EmptyPlan,
}
