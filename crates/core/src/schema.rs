//! Typed tool parameters and their validation rules.
//!
//! A [`Schema`] is an ordered list of [`Field`]s declared when a tool is
//! registered. Validation turns loosely typed model output (a JSON object)
//! into [`ValidatedParams`]: defaults are filled in, values are coerced to
//! their declared type, and constraints are checked.
//!
//! Coercion rules:
//!
//! | declared  | accepts                                                      |
//! |-----------|--------------------------------------------------------------|
//! | `string`  | strings; numbers and booleans are rendered to text           |
//! | `integer` | integers, integral floats, numeric strings                   |
//! | `float`   | floats and integers                                          |
//! | `boolean` | booleans, `"true"` / `"false"` in any case                   |
//! | `list`    | JSON arrays only                                             |
//! | `dict`    | JSON objects only                                            |
//! | `any`     | anything                                                     |
//!
//! Unknown extra parameters are ignored. An explicit `null` counts as absent.
//! Validation is pure: the same input always yields the same verdict.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use std::collections::HashSet;
use std::fmt;

use crate::error::{FieldIssue, SchemaError, ToolError, ValidationError};

/// The declared type of a parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Integer,
    Float,
    Boolean,
    List,
    Dict,
    Any,
}

impl FieldType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Float => "float",
            Self::Boolean => "boolean",
            Self::List => "list",
            Self::Dict => "dict",
            Self::Any => "any",
        }
    }

    fn is_numeric(&self) -> bool {
        matches!(self, Self::Integer | Self::Float)
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A typed, named tool parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,

    pub description: String,

    #[serde(rename = "type")]
    pub field_type: FieldType,

    /// Applied when the parameter is absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,

    pub required: bool,

    /// Inclusive lower bound (numeric fields only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,

    /// Inclusive upper bound (numeric fields only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,

    /// Closed set of accepted values.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub choices: Option<Vec<Value>>,
}

impl Field {
    /// A required field with no default and no constraints.
    pub fn new(name: impl Into<String>, description: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            field_type,
            default: None,
            required: true,
            min: None,
            max: None,
            choices: None,
        }
    }

    /// Mark the field as optional.
    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    /// Value used when the parameter is absent.
    pub fn with_default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    pub fn with_min(mut self, min: f64) -> Self {
        self.min = Some(min);
        self
    }

    pub fn with_max(mut self, max: f64) -> Self {
        self.max = Some(max);
        self
    }

    /// Restrict the field to a closed set of values.
    pub fn with_choices<I, V>(mut self, choices: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.choices = Some(choices.into_iter().map(Into::into).collect());
        self
    }

    /// Coerce a present value to this field's type and check constraints.
    pub fn coerce(&self, value: &Value) -> Result<Value, FieldIssue> {
        let coerced = coerce_to(self.field_type, value).ok_or_else(|| FieldIssue::TypeMismatch {
            field: self.name.clone(),
            expected: self.field_type,
            found: kind_of(value).to_string(),
        })?;
        self.check_constraints(&coerced)?;
        Ok(coerced)
    }

    fn check_constraints(&self, value: &Value) -> Result<(), FieldIssue> {
        if let Some(n) = value.as_f64() {
            if let Some(min) = self.min {
                if n < min {
                    return Err(FieldIssue::BelowMinimum { field: self.name.clone(), value: n, min });
                }
            }
            if let Some(max) = self.max {
                if n > max {
                    return Err(FieldIssue::AboveMaximum { field: self.name.clone(), value: n, max });
                }
            }
        }

        if let Some(choices) = &self.choices {
            if !choices.iter().any(|choice| same_value(choice, value)) {
                return Err(FieldIssue::NotAChoice {
                    field: self.name.clone(),
                    choices: Value::Array(choices.clone()).to_string(),
                });
            }
        }

        Ok(())
    }
}

/// An ordered set of uniquely named fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Schema {
    fields: Vec<Field>,
}

impl Schema {
    /// Build a schema, rejecting inconsistent declarations.
    pub fn new(fields: Vec<Field>) -> Result<Self, SchemaError> {
        let mut seen = HashSet::new();
        for field in &fields {
            if field.name.trim().is_empty() {
                return Err(SchemaError::EmptyName);
            }
            if !seen.insert(field.name.as_str()) {
                return Err(SchemaError::DuplicateField(field.name.clone()));
            }
            if (field.min.is_some() || field.max.is_some()) && !field.field_type.is_numeric() {
                return Err(SchemaError::RangeOnNonNumeric(field.name.clone()));
            }
            if let Some(default) = &field.default {
                field.coerce(default).map_err(|issue| SchemaError::InvalidDefault {
                    field: field.name.clone(),
                    reason: issue.to_string(),
                })?;
            }
        }
        Ok(Self { fields })
    }

    /// A schema with no parameters.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Validate raw parameters.
    ///
    /// `null` is treated as an empty object; any other non-object value is
    /// rejected outright. Issues are reported in field declaration order.
    pub fn validate(&self, params: &Value) -> Result<ValidatedParams, ValidationError> {
        let empty = Map::new();
        let map = match params {
            Value::Object(map) => map,
            Value::Null => &empty,
            other => {
                return Err(ValidationError {
                    issues: vec![FieldIssue::TypeMismatch {
                        field: "params".into(),
                        expected: FieldType::Dict,
                        found: kind_of(other).to_string(),
                    }],
                });
            }
        };

        let mut validated = Map::new();
        let mut issues = Vec::new();

        for field in &self.fields {
            let supplied = map.get(&field.name).filter(|v| !v.is_null());
            let candidate = match (supplied, &field.default) {
                (Some(value), _) => value,
                (None, Some(default)) => default,
                (None, None) if field.required => {
                    issues.push(FieldIssue::Missing { field: field.name.clone() });
                    continue;
                }
                (None, None) => continue,
            };

            match field.coerce(candidate) {
                Ok(value) => {
                    validated.insert(field.name.clone(), value);
                }
                Err(issue) => issues.push(issue),
            }
        }

        if issues.is_empty() {
            Ok(ValidatedParams(validated))
        } else {
            Err(ValidationError { issues })
        }
    }
}

/// Parameters that passed schema validation, keyed by field name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ValidatedParams(Map<String, Value>);

impl ValidatedParams {
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_inner(self) -> Map<String, Value> {
        self.0
    }

    pub fn get_str(&self, name: &str) -> Result<&str, ToolError> {
        self.require(name)?.as_str().ok_or_else(|| wrong_type(name, "string"))
    }

    pub fn get_i64(&self, name: &str) -> Result<i64, ToolError> {
        self.require(name)?.as_i64().ok_or_else(|| wrong_type(name, "integer"))
    }

    pub fn get_f64(&self, name: &str) -> Result<f64, ToolError> {
        self.require(name)?.as_f64().ok_or_else(|| wrong_type(name, "float"))
    }

    pub fn get_bool(&self, name: &str) -> Result<bool, ToolError> {
        self.require(name)?.as_bool().ok_or_else(|| wrong_type(name, "boolean"))
    }

    pub fn get_list(&self, name: &str) -> Result<&Vec<Value>, ToolError> {
        self.require(name)?.as_array().ok_or_else(|| wrong_type(name, "list"))
    }

    pub fn get_dict(&self, name: &str) -> Result<&Map<String, Value>, ToolError> {
        self.require(name)?.as_object().ok_or_else(|| wrong_type(name, "dict"))
    }

    fn require(&self, name: &str) -> Result<&Value, ToolError> {
        self.0
            .get(name)
            .ok_or_else(|| ToolError::InvalidArguments(format!("Missing '{name}' argument")))
    }
}

impl From<Map<String, Value>> for ValidatedParams {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

fn wrong_type(name: &str, expected: &str) -> ToolError {
    ToolError::InvalidArguments(format!("'{name}' is not a {expected}"))
}

// ── Coercion ──────────────────────────────────────────────────────────────

fn coerce_to(field_type: FieldType, value: &Value) -> Option<Value> {
    match field_type {
        FieldType::Any => Some(value.clone()),
        FieldType::String => match value {
            Value::String(_) => Some(value.clone()),
            Value::Number(n) => Some(Value::String(n.to_string())),
            Value::Bool(b) => Some(Value::String(b.to_string())),
            _ => None,
        },
        FieldType::Integer => match value {
            Value::Number(n) if n.is_i64() || n.is_u64() => Some(value.clone()),
            Value::Number(n) => n.as_f64().and_then(integral),
            Value::String(s) => {
                let s = s.trim();
                s.parse::<i64>()
                    .ok()
                    .map(Value::from)
                    .or_else(|| s.parse::<f64>().ok().and_then(integral))
            }
            _ => None,
        },
        FieldType::Float => match value {
            Value::Number(n) => n.as_f64().and_then(Number::from_f64).map(Value::Number),
            _ => None,
        },
        FieldType::Boolean => match value {
            Value::Bool(_) => Some(value.clone()),
            Value::String(s) if s.eq_ignore_ascii_case("true") => Some(Value::Bool(true)),
            Value::String(s) if s.eq_ignore_ascii_case("false") => Some(Value::Bool(false)),
            _ => None,
        },
        FieldType::List => value.is_array().then(|| value.clone()),
        FieldType::Dict => value.is_object().then(|| value.clone()),
    }
}

fn integral(f: f64) -> Option<Value> {
    // i64::MAX as f64 rounds up to 2^63, which is out of range.
    let in_range = f >= i64::MIN as f64 && f < i64::MAX as f64;
    (f.is_finite() && f.fract() == 0.0 && in_range).then(|| Value::from(f as i64))
}

fn same_value(a: &Value, b: &Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

/// Human-readable JSON kind of a value, used in validation messages.
pub fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_f64() => "float",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "dict",
    }
}
