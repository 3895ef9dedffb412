//! Structured model response decoding.
//!
//! The model answers in a line-oriented `key: value` format:
//!
//! ```text
//! thought: the user wants a sum
//! action: tool_call
//! name: calculator
//! params: {"operation": "+", "x": 10, "y": 5}
//! ```
//!
//! Decoding is a tagged-variant decode: `action` selects the variant and each
//! variant has its own required keys. A JSON object with the same keys is
//! accepted too. `<think>` blocks and a code fence wrapping the whole
//! response are stripped first.

use serde_json::{Map, Value};
use unison_core::error::ParseError;

const KEYS: [&str; 7] = ["thought", "action", "name", "params", "recipient", "content", "resource"];

/// One decoded action.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    ToolCall { name: String, params: Value },
    SendMessage { recipient: String, content: String, resource: Option<String> },
    FinalAnswer { content: String },
}

impl Action {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ToolCall { .. } => "tool_call",
            Self::SendMessage { .. } => "send_message",
            Self::FinalAnswer { .. } => "final_answer",
        }
    }
}

/// A decoded model response.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelResponse {
    pub thought: String,
    pub action: Action,
}

/// Decode a raw completion.
pub fn parse_response(raw: &str) -> Result<ModelResponse, ParseError> {
    let text = strip_reasoning(raw);
    if text.trim().is_empty() {
        return Err(ParseError::Empty);
    }

    let fields = match serde_json::from_str::<Value>(text.trim()) {
        Ok(Value::Object(map)) => map,
        _ => key_values(&text),
    };
    decode(fields)
}

/// Remove `<think>…</think>` blocks and a fence around the whole response.
pub fn strip_reasoning(raw: &str) -> String {
    let mut text = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(start) = rest.find("<think>") {
        text.push_str(&rest[..start]);
        match rest[start..].find("</think>") {
            Some(end) => rest = &rest[start + end + "</think>".len()..],
            None => {
                rest = "";
                break;
            }
        }
    }
    text.push_str(rest);

    match unwrap_fence(text.trim()) {
        Some(inner) => inner.to_string(),
        None => text,
    }
}

fn unwrap_fence(text: &str) -> Option<&str> {
    let body = text.strip_prefix("```")?.strip_suffix("```")?;
    // The opening line may carry a language tag.
    let (_, body) = body.split_once('\n')?;
    Some(body)
}

fn action_name(raw: &str) -> String {
    raw.trim_matches(|c: char| c == '`' || c == '"' || c == '\'' || c.is_whitespace())
        .to_ascii_lowercase()
}

/// Split `key: value` lines; unknown-key lines continue the previous value.
///
/// Once `content` starts, every later line belongs to it, except a
/// `resource` key on a `send_message`.
fn key_values(text: &str) -> Map<String, Value> {
    let mut fields: Vec<(String, String)> = Vec::new();
    let mut preamble = Vec::new();

    for line in text.lines() {
        let started_content = fields.iter().any(|(k, _)| k == "content");
        let sending = fields.iter().any(|(k, v)| k == "action" && action_name(v) == "send_message");
        match split_key(line) {
            Some((key, value))
                if !fields.iter().any(|(k, _)| k == key)
                    && (!started_content || (sending && key == "resource")) =>
            {
                fields.push((key.to_string(), value.to_string()));
            }
            _ => match fields.last_mut() {
                Some((_, value)) => {
                    value.push('\n');
                    value.push_str(line);
                }
                None if !line.trim().is_empty() => preamble.push(line.trim()),
                None => {}
            },
        }
    }

    let mut map = Map::new();
    for (key, value) in fields {
        map.insert(key, Value::String(value.trim().to_string()));
    }
    if !preamble.is_empty() && !map.contains_key("thought") {
        map.insert("thought".into(), Value::String(preamble.join(" ")));
    }
    map
}

fn split_key(line: &str) -> Option<(&'static str, &str)> {
    let trimmed = line.trim_start().trim_start_matches(['-', '*', ' ']);
    let (key, value) = trimmed.split_once(':')?;
    let key = key.trim().trim_matches('*').trim().to_ascii_lowercase();
    let value = value.trim().trim_start_matches('*').trim();
    KEYS.iter().find(|k| **k == key).map(|k| (*k, value))
}

fn decode(mut fields: Map<String, Value>) -> Result<ModelResponse, ParseError> {
    let thought = take_text(&mut fields, "thought").unwrap_or_default();
    let action = action_name(&take_text(&mut fields, "action").ok_or(ParseError::MissingAction)?);

    let required = |fields: &mut Map<String, Value>, key: &str| {
        take_text(fields, key).ok_or_else(|| ParseError::MissingKey {
            action: action.clone(),
            key: key.to_string(),
        })
    };

    let action = match action.as_str() {
        "tool_call" => {
            let name = required(&mut fields, "name")?;
            let params = match fields.remove("params") {
                Some(Value::Object(map)) => Value::Object(map),
                Some(Value::String(s)) => parse_params(&s)?,
                Some(Value::Null) | None => {
                    return Err(ParseError::MissingKey {
                        action: action.clone(),
                        key: "params".into(),
                    });
                }
                Some(other) => {
                    return Err(ParseError::MalformedParams(format!(
                        "expected an object, got {other}"
                    )));
                }
            };
            Action::ToolCall { name, params }
        }
        "send_message" => Action::SendMessage {
            recipient: required(&mut fields, "recipient")?,
            content: required(&mut fields, "content")?,
            resource: take_text(&mut fields, "resource"),
        },
        "final_answer" => Action::FinalAnswer { content: required(&mut fields, "content")? },
        _ => return Err(ParseError::UnknownAction(action.clone())),
    };

    Ok(ModelResponse { thought, action })
}

/// Remove `key` and return it as non-empty text.
fn take_text(fields: &mut Map<String, Value>, key: &str) -> Option<String> {
    let text = match fields.remove(key)? {
        Value::String(s) => s,
        Value::Null => return None,
        other => other.to_string(),
    };
    let text = text.trim();
    (!text.is_empty()).then(|| text.to_string())
}

/// Parse tool parameters: a JSON object, or `key: value` pairs separated by
/// commas or newlines. Values are decoded as JSON when possible.
pub fn parse_params(text: &str) -> Result<Value, ParseError> {
    let text = text.trim();
    if text.is_empty() || text == "{}" {
        return Ok(Value::Object(Map::new()));
    }
    if text.starts_with('{') {
        return match serde_json::from_str::<Value>(text) {
            Ok(Value::Object(map)) => Ok(Value::Object(map)),
            Ok(other) => Err(ParseError::MalformedParams(format!("expected an object, got {other}"))),
            Err(e) => Err(ParseError::MalformedParams(e.to_string())),
        };
    }

    let mut map = Map::new();
    for pair in split_top_level(text) {
        let pair = pair.trim().trim_start_matches('-').trim();
        if pair.is_empty() {
            continue;
        }
        let (key, value) = pair
            .split_once(':')
            .or_else(|| pair.split_once('='))
            .ok_or_else(|| ParseError::MalformedParams(format!("expected key: value, got '{pair}'")))?;
        let key = key.trim().trim_matches(|c| c == '"' || c == '\'').to_string();
        if key.is_empty() {
            return Err(ParseError::MalformedParams(format!("missing key in '{pair}'")));
        }
        map.insert(key, scalar(value.trim()));
    }
    Ok(Value::Object(map))
}

fn scalar(text: &str) -> Value {
    match serde_json::from_str::<Value>(text) {
        Ok(value) => value,
        Err(_) => Value::String(text.trim_matches(|c| c == '"' || c == '\'').to_string()),
    }
}

/// Split on commas and newlines outside brackets and quotes.
fn split_top_level(text: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut depth = 0i32;
    let mut quote: Option<char> = None;

    for c in text.chars() {
        match (quote, c) {
            (Some(q), c) if c == q => {
                quote = None;
                current.push(c);
            }
            (Some(_), c) => current.push(c),
            (None, '"' | '\'') => {
                quote = Some(c);
                current.push(c);
            }
            (None, '[' | '{' | '(') => {
                depth += 1;
                current.push(c);
            }
            (None, ']' | '}' | ')') => {
                depth -= 1;
                current.push(c);
            }
            (None, ',' | '\n') if depth <= 0 => parts.push(std::mem::take(&mut current)),
            (None, c) => current.push(c),
        }
    }
    parts.push(current);
    parts
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn tool_call_with_json_params() {
        let raw = "thought: add them\naction: tool_call\nname: calculator\nparams: {\"operation\": \"+\", \"x\": 10, \"y\": 5}";
        let parsed = parse_response(raw).unwrap();
        assert_eq!(parsed.thought, "add them");
        assert_eq!(
            parsed.action,
            Action::ToolCall {
                name: "calculator".into(),
                params: json!({"operation": "+", "x": 10, "y": 5})
            }
        );
    }

    #[test]
    fn tool_call_with_key_value_params() {
        let raw = "thought: stats\naction: tool_call\nname: data_analyzer\nparams: data: [1, 2, 3], precision: 1, include_metadata: false";
        let Action::ToolCall { params, .. } = parse_response(raw).unwrap().action else {
            panic!("expected tool call");
        };
        assert_eq!(params, json!({"data": [1, 2, 3], "precision": 1, "include_metadata": false}));
    }

    #[test]
    fn multi_line_params() {
        let raw = "action: tool_call\nname: calculator\nparams:\n  operation: *\n  x: 3\n  y: 4";
        let Action::ToolCall { params, .. } = parse_response(raw).unwrap().action else {
            panic!("expected tool call");
        };
        assert_eq!(params, json!({"operation": "*", "x": 3, "y": 4}));
    }

    #[test]
    fn send_message_with_resource() {
        let raw = "thought: ask\naction: send_message\nrecipient: analyst\ncontent: crunch these\nresource: data.csv";
        let parsed = parse_response(raw).unwrap();
        assert_eq!(
            parsed.action,
            Action::SendMessage {
                recipient: "analyst".into(),
                content: "crunch these".into(),
                resource: Some("data.csv".into())
            }
        );
    }

    #[test]
    fn final_answer_keeps_multiline_content() {
        let raw = "thought: done\naction: final_answer\ncontent: line one\nname: not a key here\nline three";
        let Action::FinalAnswer { content } = parse_response(raw).unwrap().action else {
            panic!("expected final answer");
        };
        assert_eq!(content, "line one\nname: not a key here\nline three");
    }

    #[test]
    fn strips_think_blocks_and_fences() {
        let raw = "<think>private\nreasoning</think>\n```\naction: final_answer\ncontent: 42\n```";
        let parsed = parse_response(raw).unwrap();
        assert_eq!(parsed.action, Action::FinalAnswer { content: "42".into() });
    }

    #[test]
    fn final_answer_keeps_resource_lines_and_inner_fences() {
        let raw = "action: final_answer\ncontent: The report is ready.\nResource: https://example.com/r\nThanks.";
        let Action::FinalAnswer { content } = parse_response(raw).unwrap().action else {
            panic!("expected final answer");
        };
        assert_eq!(content, "The report is ready.\nResource: https://example.com/r\nThanks.");

        let raw = "action: final_answer\ncontent: Use this:\n```rust\nfn main() {}\n```";
        let Action::FinalAnswer { content } = parse_response(raw).unwrap().action else {
            panic!("expected final answer");
        };
        assert_eq!(content, "Use this:\n```rust\nfn main() {}\n```");
    }

    #[test]
    fn fence_with_language_tag_is_unwrapped() {
        let raw = "```yaml\nthought: t\naction: final_answer\ncontent: ok\n```";
        assert_eq!(parse_response(raw).unwrap().action, Action::FinalAnswer { content: "ok".into() });
    }

    #[test]
    fn json_response_accepted() {
        let raw = r#"{"thought": "t", "action": "final_answer", "content": "ok"}"#;
        assert_eq!(parse_response(raw).unwrap().action, Action::FinalAnswer { content: "ok".into() });
    }

    #[test]
    fn keys_are_case_insensitive_and_bold_tolerant() {
        let raw = "**Thought:** hmm\n**Action:** FINAL_ANSWER\n**Content:** yes";
        assert_eq!(parse_response(raw).unwrap().action, Action::FinalAnswer { content: "yes".into() });
    }

    #[test]
    fn errors() {
        assert_eq!(parse_response("   "), Err(ParseError::Empty));
        assert_eq!(parse_response("just chatting"), Err(ParseError::MissingAction));
        assert_eq!(
            parse_response("action: dance"),
            Err(ParseError::UnknownAction("dance".into()))
        );
        assert_eq!(
            parse_response("action: tool\nname: c\nparams: {}"),
            Err(ParseError::UnknownAction("tool".into()))
        );
        assert_eq!(
            parse_response("action: message\nrecipient: a\ncontent: hi"),
            Err(ParseError::UnknownAction("message".into()))
        );
        assert_eq!(
            parse_response("action: send_message\ncontent: hi"),
            Err(ParseError::MissingKey { action: "send_message".into(), key: "recipient".into() })
        );
        assert_eq!(
            parse_response("action: tool_call\nname: calculator"),
            Err(ParseError::MissingKey { action: "tool_call".into(), key: "params".into() })
        );
        assert_eq!(
            parse_response("action: final_answer\ncontent:   "),
            Err(ParseError::MissingKey { action: "final_answer".into(), key: "content".into() })
        );
        assert!(matches!(
            parse_response("action: tool_call\nname: c\nparams: {not json"),
            Err(ParseError::MalformedParams(_))
        ));
    }

    #[test]
    fn params_without_separator_is_malformed() {
        assert!(matches!(parse_params("just words"), Err(ParseError::MalformedParams(_))));
        assert_eq!(parse_params("").unwrap(), json!({}));
    }
}
