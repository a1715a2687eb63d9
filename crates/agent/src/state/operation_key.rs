//! Operation keys: canonical identity of a tool invocation.
//!
//! Two calls that would do the same thing must map to the same key. The
//! scratchpad uses keys, never raw parameter equality, to decide whether an
//! operation has already been performed.

use serde_json::{Map, Value};

/// Tools whose identity is `action` + target path.
const FILESYSTEM_TOOLS: &[&str] = &["filesystem", "file_manager"];

/// Tools (or tool/action pairs) whose identity is a search description.
const FINDER_TOOLS: &[&str] = &["smart_file_finder"];
const FINDER_ACTIONS: &[&str] = &["find", "locate", "search_files"];

/// Compute the operation key for a tool call.
///
/// Deterministic and independent of parameter insertion order.
pub fn operation_key(tool_name: &str, params: &Map<String, Value>) -> String {
    if FILESYSTEM_TOOLS.contains(&tool_name) {
        return filesystem_key(tool_name, params);
    }

    let action = scalar(params, &["action"]);
    let is_finder = FINDER_TOOLS.contains(&tool_name)
        || (tool_name == "system_explorer"
            && action.as_deref().is_some_and(|a| FINDER_ACTIONS.contains(&a)));
    if is_finder {
        return finder_key(tool_name, params);
    }

    generic_key(tool_name, params)
}

fn filesystem_key(tool_name: &str, params: &Map<String, Value>) -> String {
    let action = scalar(params, &["action"]).unwrap_or_else(|| "list".into());
    let path = scalar(params, &["path", "src", "source"])
        .map(|p| normalize_path(&p))
        .unwrap_or_default();
    match scalar(params, &["dst", "destination"]) {
        Some(dst) => format!("{tool_name}_{action}_{path}_{}", normalize_path(&dst)),
        None => format!("{tool_name}_{action}_{path}"),
    }
}

fn finder_key(tool_name: &str, params: &Map<String, Value>) -> String {
    let action = scalar(params, &["action"]).unwrap_or_default();
    let description = scalar(params, &["description", "query", "pattern"])
        .map(|d| d.trim().to_lowercase())
        .unwrap_or_default();
    let directory = scalar(params, &["directory", "search_path", "path"])
        .map(|d| normalize_path(&d))
        .unwrap_or_default();
    format!("{tool_name}_{action}_{description}_{directory}")
}

fn generic_key(tool_name: &str, params: &Map<String, Value>) -> String {
    let mut pairs: Vec<String> = params
        .iter()
        .filter_map(|(k, v)| scalar_text(v).map(|text| format!("{k}={text}")))
        .collect();
    pairs.sort();
    if pairs.is_empty() {
        tool_name.to_string()
    } else {
        format!("{tool_name}_{}", pairs.join("&"))
    }
}

/// First scalar value found under any of `keys`, rendered as text.
fn scalar(params: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|k| params.get(*k))
        .find_map(scalar_text)
        .filter(|s| !s.is_empty())
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn normalize_path(path: &str) -> String {
    let trimmed = path.trim();
    if trimmed.len() > 1 {
        trimmed.trim_end_matches('/').to_string()
    } else {
        trimmed.to_string()
    }
}
