//! Observation recording and answer synthesis.
//!
//! Turns tool results into scratchpad observations (with lessons derived
//! from failures) and builds the natural-language text every terminal
//! result carries: the success answer, the partial summary and the
//! timeout summary.

use serde_json::Value;
use steward_core::tool::ToolResult;

use crate::state::Scratchpad;
use crate::state::scratchpad::preview;

/// How many successful outputs the partial and timeout summaries list.
const SUMMARY_OUTPUTS: usize = 3;

/// Lessons a failed tool call teaches, derived from its error text.
pub fn derive_lessons(error: &str) -> Vec<String> {
    let lower = error.to_lowercase();
    let mut lessons = Vec::new();
    if lower.contains("missing required parameter") || lower.contains("missing parameter") {
        lessons.push("supply every required parameter; check the tool schema first".into());
    }
    if lower.contains("unknown action") || lower.contains("invalid action") {
        lessons.push("use only the actions listed in the tool's choices".into());
    }
    if lower.contains("not found") || lower.contains("no such file") {
        lessons.push("the path does not exist; explore the directory before acting on it".into());
    }
    if lower.contains("permission denied") {
        lessons.push("the target is not accessible; pick a location the user owns".into());
    }
    if lower.contains("timeout") || lower.contains("timed out") {
        lessons.push("the call took too long; narrow its scope".into());
    }
    if lessons.is_empty() {
        lessons.push(format!("avoid repeating this call unchanged: {}", preview(error, 80)));
    }
    lessons
}

/// One-line interpretation of a tool result.
fn analyze(result: &ToolResult) -> String {
    if result.success {
        match result.data.as_ref().and_then(item_count) {
            Some(n) => format!("succeeded with {n} item(s)"),
            None => "succeeded".into(),
        }
    } else {
        format!(
            "failed: {}",
            result.error_message.as_deref().unwrap_or("unknown error")
        )
    }
}

/// Record `result` as the observation of the scratchpad's current step.
pub fn record_tool_result(scratchpad: &mut Scratchpad, result: &ToolResult) {
    let lessons = match (&result.success, &result.error_message) {
        (false, Some(err)) => derive_lessons(err),
        (false, None) => derive_lessons(&result.output),
        _ => Vec::new(),
    };
    let content = if result.success || result.error_message.is_none() {
        result.output.clone()
    } else {
        result.error_message.clone().unwrap_or_default()
    };
    scratchpad.add_observation(
        content,
        result.success,
        result.data.clone(),
        Some(analyze(result)),
        lessons,
    );
}

/// Record a call that never reached the tool.
pub fn record_rejection(scratchpad: &mut Scratchpad, reason: &str) {
    scratchpad.add_observation(
        reason,
        false,
        None,
        Some("rejected before execution".into()),
        derive_lessons(reason),
    );
}

// ── Answer synthesis ──

fn item_count(data: &Value) -> Option<usize> {
    match data {
        Value::Array(items) => Some(items.len()),
        Value::Object(map) => ["files", "items", "results", "entries", "matches"]
            .iter()
            .find_map(|k| map.get(*k).and_then(Value::as_array).map(Vec::len))
            .or_else(|| map.get("count").and_then(Value::as_u64).map(|n| n as usize)),
        _ => None,
    }
}

fn count_field(map: &serde_json::Map<String, Value>, key: &str) -> Option<usize> {
    match map.get(key)? {
        Value::Array(items) => Some(items.len()),
        Value::Number(n) => n.as_u64().map(|n| n as usize),
        _ => None,
    }
}

/// Human-readable rendering of a tool's structured result.
pub fn describe_data(data: &Value) -> Option<String> {
    match data {
        Value::Object(map) => {
            if let Some(message) = map.get("message").and_then(Value::as_str) {
                return Some(message.to_string());
            }
            if let Some(result) = map.get("result") {
                return Some(match result {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                });
            }
            let mut parts = Vec::new();
            if let Some(n) = count_field(map, "deleted").or_else(|| count_field(map, "deleted_count")) {
                parts.push(format!("deleted {n} item(s)"));
            }
            if let Some(n) = count_field(map, "found")
                .or_else(|| count_field(map, "files"))
                .or_else(|| count_field(map, "matches"))
            {
                parts.push(format!("found {n} item(s)"));
            }
            (!parts.is_empty()).then(|| parts.join(", "))
        }
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Array(items) => Some(format!("{} item(s)", items.len())),
        _ => None,
    }
}

/// The answer for a completed goal, built from the latest successful output.
pub fn success_answer(scratchpad: &Scratchpad) -> String {
    let detail = scratchpad
        .successful_observations()
        .last()
        .and_then(|(_, obs)| obs.data.as_ref().and_then(describe_data).or_else(|| {
            (!obs.content.trim().is_empty()).then(|| preview(&obs.content, 200))
        }));
    match detail {
        Some(detail) => format!("Completed: {}\n{detail}", scratchpad.goal),
        None => format!("Completed: {}", scratchpad.goal),
    }
}

fn latest_outputs(scratchpad: &Scratchpad) -> Vec<String> {
    let outputs: Vec<String> = scratchpad
        .successful_observations()
        .map(|(action, obs)| {
            format!(
                "- {}: {}",
                action.tool_name().unwrap_or("tool"),
                preview(&obs.content, 120)
            )
        })
        .collect();
    let skip = outputs.len().saturating_sub(SUMMARY_OUTPUTS);
    outputs.into_iter().skip(skip).collect()
}

/// "Partially completed: x/y steps succeeded" plus the latest successful outputs.
pub fn partial_summary(scratchpad: &Scratchpad) -> String {
    let (ok, total) = scratchpad.success_ratio();
    let mut out = format!("Partially completed: {ok}/{total} steps succeeded");
    let outputs = latest_outputs(scratchpad);
    if !outputs.is_empty() {
        out.push('\n');
        out.push_str(&outputs.join("\n"));
    }
    out
}

/// What had been achieved when the time budget ran out.
pub fn timeout_summary(scratchpad: &Scratchpad, timeout_seconds: u64) -> String {
    let outputs = latest_outputs(scratchpad);
    if outputs.is_empty() {
        format!("Timed out after {timeout_seconds}s before any tool call succeeded.")
    } else {
        format!(
            "Timed out after {timeout_seconds}s. Completed so far ({} successful tool call(s)):\n{}",
            scratchpad.successful_tool_calls,
            outputs.join("\n")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::ActionKind;
    use serde_json::{Map, json};

    fn tool_step(pad: &mut Scratchpad, tool: &str, result: &ToolResult) {
        pad.start_new_step();
        pad.add_thought("act", 1, 0.8, vec![]);
        pad.add_action(ActionKind::ToolCall {
            tool_name: tool.into(),
            parameters: Map::new(),
        });
        record_tool_result(pad, result);
    }

    #[test]
    fn lessons_match_error_text() {
        assert!(derive_lessons("missing required parameter 'path'")[0].contains("required"));
        assert!(derive_lessons("Unknown action: zap")[0].contains("actions"));
        assert!(derive_lessons("No such file or directory")[0].contains("explore"));
        assert!(derive_lessons("Permission denied")[0].contains("accessible"));
        assert!(derive_lessons("request timed out")[0].contains("too long"));
        assert!(derive_lessons("kaboom")[0].contains("kaboom"));
    }

    #[test]
    fn failures_record_lessons_and_successes_do_not() {
        let mut pad = Scratchpad::new("g");
        tool_step(&mut pad, "filesystem", &ToolResult::failure("path not found"));
        let obs = pad.steps[0].observation.as_ref().unwrap();
        assert!(!obs.success);
        assert_eq!(obs.content, "path not found");
        assert!(!obs.lessons_learned.is_empty());

        tool_step(&mut pad, "filesystem", &ToolResult::ok(json!({"files": ["a", "b"]})));
        let obs = pad.steps[1].observation.as_ref().unwrap();
        assert!(obs.lessons_learned.is_empty());
        assert_eq!(obs.analysis.as_deref(), Some("succeeded with 2 item(s)"));
    }

    #[test]
    fn describe_data_prefers_message_then_counts() {
        assert_eq!(describe_data(&json!({"message": "3 files removed"})).unwrap(), "3 files removed");
        assert_eq!(describe_data(&json!({"result": 5})).unwrap(), "5");
        assert_eq!(
            describe_data(&json!({"deleted": ["a", "b", "c"]})).unwrap(),
            "deleted 3 item(s)"
        );
        assert_eq!(describe_data(&json!({"files": []})).unwrap(), "found 0 item(s)");
        assert!(describe_data(&json!({"other": true})).is_none());
    }

    #[test]
    fn success_answer_mentions_completion() {
        let mut pad = Scratchpad::new("clean desktop");
        assert_eq!(success_answer(&pad), "Completed: clean desktop");
        tool_step(&mut pad, "filesystem", &ToolResult::ok(json!({"deleted": 3})));
        let answer = success_answer(&pad);
        assert!(answer.starts_with("Completed: clean desktop"));
        assert!(answer.contains("deleted 3 item(s)"));
    }

    #[test]
    fn partial_and_timeout_summaries() {
        let mut pad = Scratchpad::new("g");
        assert!(timeout_summary(&pad, 0).contains("before any tool call succeeded"));

        tool_step(&mut pad, "system_explorer", &ToolResult::ok(json!("listing")));
        tool_step(&mut pad, "filesystem", &ToolResult::failure("denied"));
        let partial = partial_summary(&pad);
        assert!(partial.starts_with("Partially completed: 1/2 steps succeeded"));
        assert!(partial.contains("system_explorer: listing"));

        let timeout = timeout_summary(&pad, 30);
        assert!(timeout.contains("30s"));
        assert!(timeout.contains("1 successful tool call"));
    }
}
