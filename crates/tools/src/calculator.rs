//! Calculator tool: applies one binary arithmetic operation.
//!
//! Operators: `+`, `-`, `*`, `/`, `^` (power), `%` (remainder). Word
//! aliases (`add`, `subtract`, `multiply`, `divide`, `power`, `mod`) are
//! accepted as well.

use async_trait::async_trait;
use serde_json::Value;
use unison_core::error::{SchemaError, ToolError};
use unison_core::schema::{Field, FieldType, Schema, ValidatedParams};
use unison_core::tool::Tool;

use crate::number;

const OPERATIONS: [&str; 12] = [
    "+", "-", "*", "/", "^", "%", "add", "subtract", "multiply", "divide", "power", "mod",
];

pub struct CalculatorTool;

#[async_trait]
impl Tool for CalculatorTool {
    fn name(&self) -> &str {
        "calculator"
    }

    fn description(&self) -> &str {
        "Apply one arithmetic operation to two numbers: x <operation> y."
    }

    fn schema(&self) -> Result<Schema, SchemaError> {
        Schema::new(vec![
            Field::new("operation", "Operator: +, -, *, /, ^ or %", FieldType::String)
                .with_choices(OPERATIONS),
            Field::new("x", "Left operand", FieldType::Float),
            Field::new("y", "Right operand", FieldType::Float),
        ])
    }

    fn tags(&self) -> Vec<String> {
        vec!["math".into()]
    }

    async fn execute(&self, params: ValidatedParams) -> Result<Value, ToolError> {
        let operation = params.get_str("operation")?;
        let x = params.get_f64("x")?;
        let y = params.get_f64("y")?;
        let value = apply(operation, x, y).map_err(|reason| ToolError::ExecutionFailed {
            tool_name: "calculator".into(),
            reason,
        })?;
        Ok(number(value))
    }
}

/// Apply `operation` to `x` and `y`.
pub fn apply(operation: &str, x: f64, y: f64) -> Result<f64, String> {
    let value = match operation {
        "+" | "add" => x + y,
        "-" | "subtract" => x - y,
        "*" | "multiply" => x * y,
        "/" | "divide" => {
            if y == 0.0 {
                return Err("Cannot divide by zero".into());
            }
            x / y
        }
        "%" | "mod" => {
            if y == 0.0 {
                return Err("Cannot take a remainder by zero".into());
            }
            x % y
        }
        "^" | "power" => x.powf(y),
        other => return Err(format!("Unsupported operation: {other}")),
    };
    if value.is_finite() {
        Ok(value)
    } else {
        Err(format!("Result of {x} {operation} {y} is not a finite number"))
    }
}
