//! Tool-parameter validation before execution.
//!
//! A small per-tool table fixes what models commonly get wrong (a missing
//! `action`, `source`/`destination` instead of `src`/`dst`). A generic pass
//! over the tool's declared metadata then fills remaining required
//! parameters from their defaults, or rejects the call.

use serde_json::{Map, Value};
use steward_core::tool::ToolMetadata;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParamError {
    #[error("missing required parameter '{param}' for tool '{tool}'")]
    MissingRequired { tool: String, param: String },
}

struct ToolFixes {
    defaults: &'static [(&'static str, &'static str)],
    aliases: &'static [(&'static str, &'static str)],
}

fn fixes_for(tool: &str) -> Option<ToolFixes> {
    match tool {
        "filesystem" | "file_manager" => Some(ToolFixes {
            defaults: &[("action", "list")],
            aliases: &[
                ("source", "src"),
                ("destination", "dst"),
                ("target", "dst"),
                ("directory", "path"),
            ],
        }),
        "system_explorer" => Some(ToolFixes {
            defaults: &[("action", "tree")],
            aliases: &[("directory", "path"), ("max_depth", "depth")],
        }),
        _ => None,
    }
}

fn is_missing(params: &Map<String, Value>, name: &str) -> bool {
    match params.get(name) {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.trim().is_empty(),
        Some(_) => false,
    }
}

/// Return the parameters `tool` should actually be called with.
///
/// `metadata` is the tool's declared schema; without it only the per-tool
/// table applies.
pub fn validate_tool_params(
    tool: &str,
    params: &Map<String, Value>,
    metadata: Option<&ToolMetadata>,
) -> Result<Map<String, Value>, ParamError> {
    let mut fixed = params.clone();

    if let Some(fixes) = fixes_for(tool) {
        for (alias, canonical) in fixes.aliases {
            if is_missing(&fixed, canonical) {
                if let Some(value) = fixed.remove(*alias) {
                    debug!(tool, from = alias, to = canonical, "Renamed parameter");
                    fixed.insert((*canonical).into(), value);
                }
            }
        }
        for (name, default) in fixes.defaults {
            if is_missing(&fixed, name) {
                debug!(tool, param = name, default, "Filled parameter default");
                fixed.insert((*name).into(), Value::String((*default).into()));
            }
        }
    }

    let Some(metadata) = metadata else {
        return Ok(fixed);
    };
    for param in metadata.required_parameters() {
        if !is_missing(&fixed, &param.name) {
            continue;
        }
        match &param.default {
            Some(default) => {
                fixed.insert(param.name.clone(), default.clone());
            }
            None => {
                return Err(ParamError::MissingRequired {
                    tool: tool.to_string(),
                    param: param.name.clone(),
                });
            }
        }
    }
    Ok(fixed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patterns::test_helpers::{filesystem_metadata, mcp_doctor_metadata};
    use serde_json::json;

    fn obj(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn filesystem_defaults_to_list() {
        let meta = filesystem_metadata();
        let out = validate_tool_params("filesystem", &obj(json!({"path": "/tmp"})), Some(&meta))
            .unwrap();
        assert_eq!(out["action"], json!("list"));
        assert_eq!(out["path"], json!("/tmp"));
    }

    #[test]
    fn source_and_destination_are_renamed() {
        let meta = filesystem_metadata();
        let out = validate_tool_params(
            "filesystem",
            &obj(json!({"action": "move", "path": "/a", "source": "/a/x", "destination": "/b"})),
            Some(&meta),
        )
        .unwrap();
        assert_eq!(out["src"], json!("/a/x"));
        assert_eq!(out["dst"], json!("/b"));
        assert!(!out.contains_key("source"));
        assert!(!out.contains_key("destination"));
    }

    #[test]
    fn explicit_canonical_value_wins_over_alias() {
        let out = validate_tool_params(
            "filesystem",
            &obj(json!({"action": "copy", "src": "/keep", "source": "/drop"})),
            None,
        )
        .unwrap();
        assert_eq!(out["src"], json!("/keep"));
    }

    #[test]
    fn missing_required_without_default_is_rejected() {
        let meta = filesystem_metadata();
        let err = validate_tool_params("filesystem", &obj(json!({"action": "delete"})), Some(&meta))
            .unwrap_err();
        assert_eq!(
            err,
            ParamError::MissingRequired {
                tool: "filesystem".into(),
                param: "path".into()
            }
        );
        assert!(err.to_string().contains("missing required parameter"));
    }

    #[test]
    fn blank_string_counts_as_missing() {
        let meta = mcp_doctor_metadata();
        let err = validate_tool_params("mcp_doctor", &obj(json!({"query": "  "})), Some(&meta));
        assert!(err.is_err());
    }

    #[test]
    fn unknown_tool_passes_through() {
        let params = obj(json!({"city": "Seoul"}));
        let out = validate_tool_params("weather", &params, None).unwrap();
        assert_eq!(out, params);
    }
}
