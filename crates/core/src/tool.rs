//! Tool trait: the abstraction over agent capabilities.
//!
//! Concrete tools implement [`Tool`]: a name, a description, a parameter
//! [`Schema`] and an `execute` operation over already-validated parameters.
//! The [`ToolContract`] wraps a tool and is the only way the agent loop runs
//! one: it validates, times, and catches every failure mode, so a tool
//! invocation always ends in a [`ToolResult`] and never in a fault.

use async_trait::async_trait;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::any::Any;
use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::error::{SchemaError, ToolError, ValidationError};
use crate::schema::{Schema, ValidatedParams};

/// The core Tool trait.
///
/// Implementations only see parameters that passed their schema. Returning
/// `Err` (or panicking) is reported to the agent as a failed [`ToolResult`].
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool (e.g., "calculator").
    fn name(&self) -> &str;

    /// A description of what this tool does (sent to the model).
    fn description(&self) -> &str;

    /// The parameters this tool accepts.
    fn schema(&self) -> Result<Schema, SchemaError>;

    fn version(&self) -> &str {
        "1.0.0"
    }

    fn tags(&self) -> Vec<String> {
        Vec::new()
    }

    /// Execute the tool with validated parameters.
    async fn execute(&self, params: ValidatedParams) -> Result<Value, ToolError>;
}

/// The standardized outcome of one tool invocation.
///
/// `success == false` implies `result` is `None` and `error_message` is
/// non-empty; `success == true` implies `error_message` is `None`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub success: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,

    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,

    pub execution_time: Duration,
}

impl ToolResult {
    pub fn succeeded(tool: &str, result: Value, execution_time: Duration) -> Self {
        let mut metadata = Map::new();
        metadata.insert("tool".into(), Value::String(tool.to_string()));
        Self {
            success: true,
            result: Some(result),
            error_message: None,
            metadata,
            execution_time,
        }
    }

    pub fn failed(
        tool: &str,
        message: impl Into<String>,
        exception_type: &str,
        execution_time: Duration,
    ) -> Self {
        let mut message = message.into();
        if message.trim().is_empty() {
            message = format!("{exception_type} in tool '{tool}'");
        }
        let mut metadata = Map::new();
        metadata.insert("tool".into(), Value::String(tool.to_string()));
        metadata.insert("exception_type".into(), Value::String(exception_type.to_string()));
        Self {
            success: false,
            result: None,
            error_message: Some(message),
            metadata,
            execution_time,
        }
    }

    /// The `exception_type` recorded for a failure.
    pub fn exception_type(&self) -> Option<&str> {
        self.metadata.get("exception_type").and_then(Value::as_str)
    }

    /// Render as an observation for the model.
    pub fn observation(&self) -> String {
        match (&self.result, &self.error_message) {
            (Some(Value::String(s)), _) if self.success => s.clone(),
            (Some(value), _) if self.success => value.to_string(),
            (_, Some(message)) => format!("Error: {message}"),
            _ => String::from("(no output)"),
        }
    }
}

/// A registered tool: the plugin plus its cached schema and call policy.
#[derive(Clone)]
pub struct ToolContract {
    tool: Arc<dyn Tool>,
    schema: Schema,
    timeout: Option<Duration>,
}

impl std::fmt::Debug for ToolContract {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolContract")
            .field("name", &self.tool.name())
            .field("schema", &self.schema)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl ToolContract {
    /// Wrap a tool, resolving its schema once.
    pub fn new(tool: impl Tool + 'static) -> Result<Self, SchemaError> {
        Self::from_arc(Arc::new(tool))
    }

    pub fn from_arc(tool: Arc<dyn Tool>) -> Result<Self, SchemaError> {
        let schema = tool.schema()?;
        Ok(Self { tool, schema, timeout: None })
    }

    /// Cancel any single invocation that runs longer than `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn name(&self) -> &str {
        self.tool.name()
    }

    pub fn description(&self) -> &str {
        self.tool.description()
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn validate(&self, params: &Value) -> Result<ValidatedParams, ValidationError> {
        self.schema.validate(params)
    }

    /// Validate and execute using the contract's own timeout.
    pub async fn run(&self, params: &Value) -> ToolResult {
        self.run_with_timeout(params, self.timeout).await
    }

    /// Validate and execute; the wrapped operation is only invoked when
    /// validation succeeds.
    pub async fn run_with_timeout(&self, params: &Value, timeout: Option<Duration>) -> ToolResult {
        let name = self.name();
        let start = Instant::now();

        let validated = match self.validate(params) {
            Ok(validated) => validated,
            Err(e) => {
                debug!(tool = %name, error = %e, "Tool parameters rejected");
                return ToolResult::failed(name, e.to_string(), "ValidationError", start.elapsed());
            }
        };

        let invocation = AssertUnwindSafe(self.tool.execute(validated)).catch_unwind();
        let outcome = match timeout {
            Some(limit) => match tokio::time::timeout(limit, invocation).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    warn!(tool = %name, timeout_ms = limit.as_millis() as u64, "Tool timed out");
                    let err = ToolError::Timeout {
                        tool_name: name.to_string(),
                        timeout_ms: limit.as_millis() as u64,
                    };
                    return ToolResult::failed(name, err.to_string(), "Timeout", start.elapsed());
                }
            },
            None => invocation.await,
        };

        let elapsed = start.elapsed();
        match outcome {
            Ok(Ok(value)) => ToolResult::succeeded(name, value, elapsed),
            Ok(Err(e)) => {
                warn!(tool = %name, error = %e, "Tool execution failed");
                ToolResult::failed(name, e.to_string(), e.kind(), elapsed)
            }
            Err(payload) => {
                let reason = panic_message(payload.as_ref());
                warn!(tool = %name, %reason, "Tool panicked");
                ToolResult::failed(name, format!("tool panicked: {reason}"), "Panic", elapsed)
            }
        }
    }

    /// Machine-readable description of the tool and its parameters.
    pub fn parameter_schema(&self) -> Value {
        serde_json::json!({
            "tool_name": self.name(),
            "description": self.description(),
            "version": self.tool.version(),
            "tags": self.tool.tags(),
            "parameters": self.schema,
        })
    }

    /// Prompt-friendly catalog entry.
    pub fn describe(&self) -> String {
        let mut out = format!("- {}: {}\n", self.name(), self.description());
        if self.schema.is_empty() {
            out.push_str("    (no parameters)\n");
        }
        for field in self.schema.fields() {
            out.push_str(&format!(
                "    {} ({}{}): {}",
                field.name,
                field.field_type,
                if field.required { ", required" } else { "" },
                field.description
            ));
            if let Some(default) = &field.default {
                out.push_str(&format!(" [default: {default}]"));
            }
            if let Some(choices) = &field.choices {
                out.push_str(&format!(" [one of: {}]", Value::Array(choices.clone())));
            }
            out.push('\n');
        }
        out
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".into()
    }
}

/// A registry of available tools.
///
/// Tools are registered while the registry is being built; once shared
/// (typically behind an `Arc`) it is read-only and safe to use from many
/// agents at once. Names are unique and iteration order is alphabetical.
#[derive(Debug, Clone, Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, ToolContract>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self { tools: BTreeMap::new() }
    }

    /// Register a contract. Duplicate names are a construction error.
    pub fn register(&mut self, contract: ToolContract) -> Result<(), ToolError> {
        let name = contract.name().to_string();
        if self.tools.contains_key(&name) {
            return Err(ToolError::DuplicateName(name));
        }
        self.tools.insert(name, contract);
        Ok(())
    }

    /// Builder-style registration of a plain tool.
    pub fn with_tool(mut self, tool: impl Tool + 'static) -> crate::Result<Self> {
        self.register(ToolContract::new(tool)?)?;
        Ok(self)
    }

    /// Look up a tool by name.
    pub fn lookup(&self, name: &str) -> Result<&ToolContract, ToolError> {
        self.tools.get(name).ok_or_else(|| ToolError::NotFound(name.to_string()))
    }

    pub fn get(&self, name: &str) -> Option<&ToolContract> {
        self.tools.get(name)
    }

    /// Run a tool by name. Only an unknown name is an `Err`; every other
    /// failure is a failed [`ToolResult`].
    pub async fn run(&self, name: &str, params: &Value) -> Result<ToolResult, ToolError> {
        Ok(self.lookup(name)?.run(params).await)
    }

    /// A new registry holding only the named tools.
    pub fn subset<S: AsRef<str>>(&self, names: &[S]) -> Result<Self, ToolError> {
        let mut subset = Self::new();
        for name in names {
            subset.register(self.lookup(name.as_ref())?.clone())?;
        }
        Ok(subset)
    }

    /// Apply a per-call timeout to every registered tool that has none.
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        for contract in self.tools.values_mut() {
            if contract.timeout.is_none() {
                contract.timeout = Some(timeout);
            }
        }
        self
    }

    /// List all registered tool names.
    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Catalog text for agent instructions.
    pub fn catalog(&self) -> String {
        if self.tools.is_empty() {
            return "No tools available.\n".into();
        }
        self.tools.values().map(ToolContract::describe).collect()
    }

    pub fn parameter_schemas(&self) -> Vec<Value> {
        self.tools.values().map(ToolContract::parameter_schema).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Field, FieldType};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Adds or subtracts two numbers and counts its invocations.
    struct ArithmeticTool {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Tool for ArithmeticTool {
        fn name(&self) -> &str {
            "arithmetic"
        }
        fn description(&self) -> &str {
            "Adds or subtracts"
        }
        fn schema(&self) -> Result<Schema, SchemaError> {
            Schema::new(vec![
                Field::new("operation", "operator", FieldType::String).with_choices(["+", "-"]),
                Field::new("x", "left", FieldType::Integer),
                Field::new("y", "right", FieldType::Integer),
            ])
        }
        async fn execute(&self, params: ValidatedParams) -> Result<Value, ToolError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let (x, y) = (params.get_i64("x")?, params.get_i64("y")?);
            match params.get_str("operation")? {
                "+" => Ok(json!(x + y)),
                _ => Ok(json!(x - y)),
            }
        }
    }

    struct FailingTool;

    #[async_trait]
    impl Tool for FailingTool {
        fn name(&self) -> &str {
            "failing"
        }
        fn description(&self) -> &str {
            "Always fails"
        }
        fn schema(&self) -> Result<Schema, SchemaError> {
            Ok(Schema::empty())
        }
        async fn execute(&self, _params: ValidatedParams) -> Result<Value, ToolError> {
            Err(ToolError::ExecutionFailed {
                tool_name: "failing".into(),
                reason: "disk on fire".into(),
            })
        }
    }

    struct PanickingTool;

    #[async_trait]
    impl Tool for PanickingTool {
        fn name(&self) -> &str {
            "panicking"
        }
        fn description(&self) -> &str {
            "Panics"
        }
        fn schema(&self) -> Result<Schema, SchemaError> {
            Ok(Schema::empty())
        }
        async fn execute(&self, _params: ValidatedParams) -> Result<Value, ToolError> {
            panic!("boom")
        }
    }

    struct SlowTool;

    #[async_trait]
    impl Tool for SlowTool {
        fn name(&self) -> &str {
            "slow"
        }
        fn description(&self) -> &str {
            "Sleeps for a minute"
        }
        fn schema(&self) -> Result<Schema, SchemaError> {
            Ok(Schema::empty())
        }
        async fn execute(&self, _params: ValidatedParams) -> Result<Value, ToolError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(json!("done"))
        }
    }

    fn arithmetic() -> (ToolContract, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let contract = ToolContract::new(ArithmeticTool { calls: calls.clone() }).unwrap();
        (contract, calls)
    }

    #[tokio::test]
    async fn valid_params_invoke_exactly_once() {
        let (contract, calls) = arithmetic();
        let result = contract.run(&json!({"operation": "+", "x": 10, "y": 5})).await;
        assert!(result.success);
        assert_eq!(result.result, Some(json!(15)));
        assert!(result.error_message.is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn invalid_params_never_invoke() {
        let (contract, calls) = arithmetic();
        let result = contract.run(&json!({"operation": "+", "x": 10})).await;
        assert!(!result.success);
        assert!(result.result.is_none());
        assert!(result.error_message.as_deref().unwrap().contains("'y'"));
        assert_eq!(result.exception_type(), Some("ValidationError"));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn tool_errors_are_wrapped() {
        let contract = ToolContract::new(FailingTool).unwrap();
        let result = contract.run(&json!({})).await;
        assert!(!result.success);
        assert!(result.error_message.unwrap().contains("disk on fire"));
        assert_eq!(result.metadata["exception_type"], "ExecutionFailed");
    }

    #[tokio::test]
    async fn panics_are_caught() {
        let contract = ToolContract::new(PanickingTool).unwrap();
        let result = contract.run(&json!({})).await;
        assert!(!result.success);
        assert_eq!(result.exception_type(), Some("Panic"));
        assert!(result.error_message.unwrap().contains("boom"));
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_cancels_only_the_call() {
        let contract = ToolContract::new(SlowTool).unwrap().with_timeout(Duration::from_secs(1));
        let result = contract.run(&json!({})).await;
        assert!(!result.success);
        assert_eq!(result.exception_type(), Some("Timeout"));
    }

    #[test]
    fn registry_rejects_duplicates() {
        let mut registry = ToolRegistry::new();
        registry.register(ToolContract::new(FailingTool).unwrap()).unwrap();
        let err = registry.register(ToolContract::new(FailingTool).unwrap()).unwrap_err();
        assert!(matches!(err, ToolError::DuplicateName(name) if name == "failing"));
    }

    #[tokio::test]
    async fn registry_unknown_tool() {
        let registry = ToolRegistry::new();
        let err = registry.run("nonexistent", &json!({})).await.unwrap_err();
        assert!(matches!(err, ToolError::NotFound(_)));
    }

    #[test]
    fn registry_subset_and_catalog() {
        let registry = ToolRegistry::new()
            .with_tool(FailingTool)
            .unwrap()
            .with_tool(PanickingTool)
            .unwrap();
        let subset = registry.subset(&["failing"]).unwrap();
        assert_eq!(subset.names(), vec!["failing"]);
        assert!(registry.subset(&["ghost"]).is_err());
        assert!(registry.catalog().contains("- panicking: Panics"));
    }

    #[test]
    fn parameter_schema_lists_fields() {
        let (contract, _) = arithmetic();
        let schema = contract.parameter_schema();
        assert_eq!(schema["tool_name"], "arithmetic");
        assert_eq!(schema["version"], "1.0.0");
        assert_eq!(schema["parameters"][1]["name"], "x");
        assert_eq!(schema["parameters"][1]["type"], "integer");
    }

    #[test]
    fn observation_rendering() {
        let ok = ToolResult::succeeded("t", json!("plain text"), Duration::ZERO);
        assert_eq!(ok.observation(), "plain text");
        let err = ToolResult::failed("t", "", "Timeout", Duration::ZERO);
        assert!(err.observation().starts_with("Error: Timeout"));
    }
}
