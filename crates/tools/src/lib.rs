//! Built-in tool implementations for Unison.
//!
//! Tools give agents deterministic capabilities the model should not
//! attempt on its own: arithmetic and descriptive statistics.

pub mod calculator;
pub mod data_analyzer;

use serde_json::Value;
use unison_core::error::Result;
use unison_core::tool::ToolRegistry;

pub use calculator::CalculatorTool;
pub use data_analyzer::DataAnalyzerTool;

/// Create a registry with all built-in tools.
pub fn default_registry() -> Result<ToolRegistry> {
    ToolRegistry::new()
        .with_tool(CalculatorTool)?
        .with_tool(DataAnalyzerTool)
}

/// Render a number, dropping the fraction when it is integral.
pub(crate) fn number(value: f64) -> Value {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        Value::from(value as i64)
    } else {
        Value::from(value)
    }
}
