//! Data analyzer tool: descriptive statistics over a list of numbers.

use async_trait::async_trait;
use serde_json::{Map, Value, json};
use unison_core::error::{SchemaError, ToolError};
use unison_core::schema::{Field, FieldType, Schema, ValidatedParams};
use unison_core::tool::Tool;

use crate::number;

/// Operations understood by the `operations` parameter.
pub const SUPPORTED: [&str; 5] = ["mean", "median", "mode", "std", "variance"];

pub struct DataAnalyzerTool;

#[async_trait]
impl Tool for DataAnalyzerTool {
    fn name(&self) -> &str {
        "data_analyzer"
    }

    fn description(&self) -> &str {
        "Perform statistical analysis (mean, median, mode, std, variance) on a list of numbers."
    }

    fn schema(&self) -> Result<Schema, SchemaError> {
        Schema::new(vec![
            Field::new("data", "List of numbers to analyze, e.g. [1, 2, 3]", FieldType::List),
            Field::new("operations", "Statistics to compute", FieldType::List)
                .with_default(json!(["mean", "median"])),
            Field::new("precision", "Decimal places in results", FieldType::Integer)
                .with_default(2)
                .with_min(0.0)
                .with_max(10.0),
            Field::new("include_metadata", "Include count, min, max, range and sum", FieldType::Boolean)
                .with_default(true),
        ])
    }

    fn tags(&self) -> Vec<String> {
        vec!["math".into(), "statistics".into()]
    }

    async fn execute(&self, params: ValidatedParams) -> Result<Value, ToolError> {
        let data = numbers(params.get_list("data")?)?;
        let precision = params.get_i64("precision")? as i32;
        let include_metadata = params.get_bool("include_metadata")?;

        let mut results = Map::new();
        for op in params.get_list("operations")? {
            let op = op.as_str().ok_or_else(|| {
                ToolError::InvalidArguments(format!("operation names must be strings, got {op}"))
            })?;
            let value = match op {
                "mean" => number(round(mean(&data), precision)),
                "median" => number(round(median(&data), precision)),
                "mode" => mode(&data).map(number).unwrap_or_else(|| json!("No unique mode")),
                "std" => number(round(variance(&data).sqrt(), precision)),
                "variance" => number(round(variance(&data), precision)),
                other => {
                    return Err(ToolError::InvalidArguments(format!(
                        "unsupported operation '{other}' (supported: {})",
                        SUPPORTED.join(", ")
                    )));
                }
            };
            let key = if op == "std" { "standard_deviation" } else { op };
            results.insert(key.to_string(), value);
        }

        if include_metadata {
            let min = data.iter().copied().fold(f64::INFINITY, f64::min);
            let max = data.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            results.insert(
                "metadata".into(),
                json!({
                    "count": data.len(),
                    "min": number(min),
                    "max": number(max),
                    "range": number(max - min),
                    "sum": number(data.iter().sum()),
                }),
            );
        }

        Ok(Value::Object(results))
    }
}

fn numbers(list: &[Value]) -> Result<Vec<f64>, ToolError> {
    if list.is_empty() {
        return Err(ToolError::InvalidArguments("data must not be empty".into()));
    }
    list.iter()
        .map(|v| {
            v.as_f64()
                .ok_or_else(|| ToolError::InvalidArguments(format!("data must be numbers, got {v}")))
        })
        .collect()
}

fn round(value: f64, precision: i32) -> f64 {
    let factor = 10f64.powi(precision);
    (value * factor).round() / factor
}

fn mean(data: &[f64]) -> f64 {
    data.iter().sum::<f64>() / data.len() as f64
}

fn median(data: &[f64]) -> f64 {
    let mut sorted = data.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

/// Sample variance; zero for fewer than two values.
fn variance(data: &[f64]) -> f64 {
    if data.len() < 2 {
        return 0.0;
    }
    let m = mean(data);
    data.iter().map(|x| (x - m).powi(2)).sum::<f64>() / (data.len() - 1) as f64
}

/// The single most frequent value, or `None` when the top count is shared.
fn mode(data: &[f64]) -> Option<f64> {
    let mut counts: Vec<(f64, usize)> = Vec::new();
    for &x in data {
        match counts.iter_mut().find(|(v, _)| *v == x) {
            Some((_, n)) => *n += 1,
            None => counts.push((x, 1)),
        }
    }
    let top = counts.iter().map(|(_, n)| *n).max()?;
    let mut leaders = counts.iter().filter(|(_, n)| *n == top);
    let first = leaders.next()?;
    if leaders.next().is_some() { None } else { Some(first.0) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use unison_core::tool::ToolContract;

    #[test]
    fn statistics() {
        let data = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        assert_eq!(mean(&data), 5.0);
        assert_eq!(median(&data), 4.5);
        assert_eq!(mode(&data), Some(4.0));
        assert_eq!(round(variance(&data), 4), 4.5714);
        assert_eq!(mode(&[1.0, 2.0]), None);
        assert_eq!(variance(&[3.0]), 0.0);
    }

    #[tokio::test]
    async fn defaults_apply() {
        let contract = ToolContract::new(DataAnalyzerTool).unwrap();
        let result = contract.run(&json!({"data": [1, 2, 3, 4]})).await;
        assert!(result.success, "{:?}", result.error_message);
        let out = result.result.unwrap();
        assert_eq!(out["mean"], json!(2.5));
        assert_eq!(out["median"], json!(2.5));
        assert_eq!(out["metadata"]["count"], json!(4));
        assert_eq!(out["metadata"]["sum"], json!(10));
    }

    #[tokio::test]
    async fn precision_and_operations() {
        let contract = ToolContract::new(DataAnalyzerTool).unwrap();
        let result = contract
            .run(&json!({
                "data": [1, 2, 2],
                "operations": ["mean", "std", "mode"],
                "precision": 3,
                "include_metadata": false
            }))
            .await;
        let out = result.result.unwrap();
        assert_eq!(out["mean"], json!(1.667));
        assert_eq!(out["standard_deviation"], json!(0.577));
        assert_eq!(out["mode"], json!(2));
        assert!(out.get("metadata").is_none());
    }

    #[tokio::test]
    async fn non_numeric_data_fails() {
        let contract = ToolContract::new(DataAnalyzerTool).unwrap();
        let result = contract.run(&json!({"data": [1, "two"]})).await;
        assert!(!result.success);
        assert_eq!(result.exception_type(), Some("InvalidArguments"));
    }

    #[tokio::test]
    async fn unknown_operation_fails() {
        let contract = ToolContract::new(DataAnalyzerTool).unwrap();
        let result = contract.run(&json!({"data": [1], "operations": ["skew"]})).await;
        assert!(result.error_message.unwrap().contains("skew"));
    }

    #[tokio::test]
    async fn precision_is_bounded() {
        let contract = ToolContract::new(DataAnalyzerTool).unwrap();
        let result = contract.run(&json!({"data": [1], "precision": 42})).await;
        assert_eq!(result.exception_type(), Some("ValidationError"));
    }
}
