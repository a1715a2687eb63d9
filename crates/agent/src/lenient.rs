//! Lenient decoding of model output.
//!
//! Every place that turns LLM text into a structure (plans, goals,
//! adaptation strategies, action decisions) goes through this module, so
//! the tolerance rules live in one table:
//!
//! - JSON may be bare, inside a ```` ```json ```` fence, or embedded in prose.
//! - `function_name` / `tool` are accepted for `tool_name`.
//! - `args` / `arguments` / `params` / `parameters` / `tool_params` are
//!   accepted for the parameter map, which may also arrive as a JSON string
//!   or as a list whose first element is the map.

use serde_json::{Map, Value};
use steward_core::error::ProviderError;
use steward_core::provider::{Provider, ProviderRequest};
use thiserror::Error;

const TOOL_NAME_ALIASES: &[&str] = &["tool_name", "function_name", "tool"];
const PARAM_ALIASES: &[&str] = &["tool_params", "parameters", "args", "arguments", "params"];

#[derive(Debug, Error)]
pub enum LenientError {
    #[error("provider call failed: {0}")]
    Provider(#[from] ProviderError),

    #[error("provider returned an empty or errored response")]
    EmptyResponse,

    #[error("no JSON object found in model output")]
    NoJson,

    #[error("model output is JSON but not an object")]
    NotAnObject,

    #[error("missing field: {0}")]
    MissingField(&'static str),
}

/// Find and parse the first JSON value in `text`.
pub fn extract_json(text: &str) -> Option<Value> {
    let trimmed = strip_fence(text.trim());
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return Some(value);
    }
    // Objects first: prose like "step [1]" must not shadow the real payload.
    first_balanced(trimmed, '{', Value::is_object).or_else(|| first_balanced(trimmed, '[', |_| true))
}

/// First balanced span opening at `open` that parses and satisfies `accept`.
fn first_balanced(text: &str, open: char, accept: impl Fn(&Value) -> bool) -> Option<Value> {
    text.match_indices(open).find_map(|(start, _)| {
        let end = balanced_end(&text[start..])?;
        serde_json::from_str::<Value>(&text[start..start + end])
            .ok()
            .filter(|v| accept(v))
    })
}

/// Parse `text` into a JSON object.
pub fn decode_object(text: &str) -> Result<Map<String, Value>, LenientError> {
    match extract_json(text) {
        Some(Value::Object(map)) => Ok(map),
        Some(_) => Err(LenientError::NotAnObject),
        None => Err(LenientError::NoJson),
    }
}

/// Send `request` and decode the reply as a JSON object.
///
/// Transport errors, blank content and an `error` metadata marker are all
/// reported as `Err` so callers can take their fallback path.
pub async fn request_object(
    provider: &dyn Provider,
    request: ProviderRequest,
) -> Result<Map<String, Value>, LenientError> {
    let response = provider.complete(request).await?;
    if response.is_soft_failure() {
        return Err(LenientError::EmptyResponse);
    }
    decode_object(response.content())
}

/// Rewrite aliased keys in place so `tool_name` and `params_key` are canonical.
pub fn canonicalize(obj: &mut Map<String, Value>, params_key: &str) {
    let has_tool = obj
        .get("tool_name")
        .and_then(Value::as_str)
        .is_some_and(|s| !s.trim().is_empty());
    if !has_tool {
        if let Some(name) = TOOL_NAME_ALIASES[1..]
            .iter()
            .find_map(|alias| obj.get(*alias).and_then(Value::as_str).map(str::to_string))
        {
            obj.insert("tool_name".into(), Value::String(name));
        }
    }

    let params = std::iter::once(params_key)
        .chain(PARAM_ALIASES.iter().copied())
        .find_map(|alias| obj.get(alias).and_then(coerce_params));
    for alias in PARAM_ALIASES {
        if *alias != params_key {
            obj.remove(*alias);
        }
    }
    obj.insert(params_key.into(), Value::Object(params.unwrap_or_default()));
}

/// A parameter map from an object, a JSON-encoded string, or a list of one object.
fn coerce_params(value: &Value) -> Option<Map<String, Value>> {
    match value {
        Value::Object(map) => Some(map.clone()),
        Value::Array(items) => items.first().and_then(Value::as_object).cloned(),
        Value::String(raw) => match serde_json::from_str::<Value>(raw) {
            Ok(Value::Object(map)) => Some(map),
            _ => None,
        },
        _ => None,
    }
}

/// First non-empty string under any of `keys`.
pub fn str_field(obj: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|k| obj.get(*k))
        .find_map(|v| match v {
            Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
}

/// A numeric field, accepting numbers or numeric strings.
pub fn f64_field(obj: &Map<String, Value>, key: &str) -> Option<f64> {
    match obj.get(key)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// A list of strings; a single string becomes a one-element list.
pub fn string_list(obj: &Map<String, Value>, key: &str) -> Vec<String> {
    match obj.get(key) {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|v| match v {
                Value::String(s) => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .collect(),
        Some(Value::String(s)) if !s.trim().is_empty() => vec![s.clone()],
        _ => Vec::new(),
    }
}

/// The content of a ```` ``` ```` fence, if the text has one.
fn strip_fence(text: &str) -> &str {
    let Some(open) = text.find("```") else {
        return text;
    };
    let after = &text[open + 3..];
    // skip an info string such as `json`
    let body_start = after.find('\n').map(|i| i + 1).unwrap_or(0);
    let body = &after[body_start..];
    match body.find("```") {
        Some(close) => body[..close].trim(),
        None => body.trim(),
    }
}

/// Byte length of the balanced JSON value at the start of `text`.
fn balanced_end(text: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, c) in text.char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' | '[' => depth += 1,
            '}' | ']' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(i + c.len_utf8());
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn bare_json() {
        let v = extract_json(r#"{"a": 1}"#).unwrap();
        assert_eq!(v, json!({"a": 1}));
    }

    #[test]
    fn fenced_json() {
        let text = "Here is the plan:\n```json\n{\"strategy\": \"sequential\"}\n```\nDone.";
        assert_eq!(extract_json(text).unwrap(), json!({"strategy": "sequential"}));
    }

    #[test]
    fn embedded_json_with_braces_in_strings() {
        let text = r#"Sure! {"answer": "use {braces} carefully", "n": [1, 2]} trailing"#;
        let v = extract_json(text).unwrap();
        assert_eq!(v["answer"], "use {braces} carefully");
    }

    #[test]
    fn bracketed_prose_before_object() {
        let text = r#"Step [1] of the plan: {"strategy": "retry", "confidence": 0.8}"#;
        let obj = decode_object(text).unwrap();
        assert_eq!(obj["strategy"], "retry");
    }

    #[test]
    fn stray_brace_before_object() {
        let text = r#"Use {path} here. {"tool_name": "filesystem"}"#;
        assert_eq!(decode_object(text).unwrap()["tool_name"], "filesystem");
    }

    #[test]
    fn embedded_array_still_extracted() {
        assert_eq!(extract_json("ids: [1, 2] done").unwrap(), json!([1, 2]));
    }

    #[test]
    fn garbage_is_none() {
        assert!(extract_json("").is_none());
        assert!(extract_json("no json here").is_none());
        assert!(extract_json("{ unterminated").is_none());
        assert!(matches!(decode_object("[1,2]"), Err(LenientError::NotAnObject)));
    }

    #[test]
    fn function_name_and_args_aliases() {
        let mut obj = json!({"function_name": "filesystem", "args": {"action": "list"}})
            .as_object()
            .cloned()
            .unwrap();
        canonicalize(&mut obj, "tool_params");
        assert_eq!(obj["tool_name"], "filesystem");
        assert_eq!(obj["tool_params"], json!({"action": "list"}));
        assert!(obj.get("args").is_none());
    }

    #[test]
    fn args_as_list_of_one_dict() {
        let mut obj = json!({"tool_name": "filesystem", "args": [{"path": "~/Desktop"}]})
            .as_object()
            .cloned()
            .unwrap();
        canonicalize(&mut obj, "parameters");
        assert_eq!(obj["parameters"], json!({"path": "~/Desktop"}));
    }

    #[test]
    fn arguments_as_json_string() {
        let mut obj = json!({"tool": "notes", "arguments": "{\"title\": \"x\"}"})
            .as_object()
            .cloned()
            .unwrap();
        canonicalize(&mut obj, "parameters");
        assert_eq!(obj["tool_name"], "notes");
        assert_eq!(obj["parameters"], json!({"title": "x"}));
    }

    #[test]
    fn canonical_keys_win_over_aliases() {
        let mut obj = json!({
            "tool_name": "filesystem",
            "function_name": "other",
            "tool_params": {"a": 1},
            "args": {"b": 2}
        })
        .as_object()
        .cloned()
        .unwrap();
        canonicalize(&mut obj, "tool_params");
        assert_eq!(obj["tool_name"], "filesystem");
        assert_eq!(obj["tool_params"], json!({"a": 1}));
    }

    #[test]
    fn missing_params_become_empty_map() {
        let mut obj = json!({"action_type": "final_answer"}).as_object().cloned().unwrap();
        canonicalize(&mut obj, "parameters");
        assert_eq!(obj["parameters"], json!({}));
    }

    #[test]
    fn field_helpers() {
        let obj = json!({"p": "3", "q": 2.5, "deps": "step_1", "name": "  x "})
            .as_object()
            .cloned()
            .unwrap();
        assert_eq!(f64_field(&obj, "p"), Some(3.0));
        assert_eq!(f64_field(&obj, "q"), Some(2.5));
        assert_eq!(string_list(&obj, "deps"), vec!["step_1".to_string()]);
        assert_eq!(str_field(&obj, &["missing", "name"]), Some("x".into()));
    }
}
