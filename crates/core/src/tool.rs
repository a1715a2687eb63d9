//! Tool traits: the abstraction over agent capabilities.
//!
//! Two seams live here:
//!
//! - [`Tool`]: one concrete capability (filesystem, calendar, notes, ...),
//!   described by [`ToolMetadata`] and executed with JSON arguments.
//! - [`ToolExecutor`]: what the engine actually consumes. Given a tool name
//!   and parameters it performs at most one execution and always answers
//!   with a [`ToolResult`]; no retries, no panics, no error propagation.
//!
//! [`ToolRegistry`] implements `ToolExecutor` over a set of boxed tools.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, warn};

use crate::error::ToolError;

/// Declared type of a tool parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParameterType {
    String,
    Integer,
    Number,
    Boolean,
    Array,
    Object,
}

impl ParameterType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Array => "array",
            Self::Object => "object",
        }
    }
}

/// One declared parameter of a tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolParameter {
    pub name: String,

    #[serde(rename = "type")]
    pub param_type: ParameterType,

    pub description: String,

    #[serde(default)]
    pub required: bool,

    /// Closed vocabulary the parameter is restricted to, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub choices: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<serde_json::Value>,
}

impl ToolParameter {
    pub fn new(
        name: impl Into<String>,
        param_type: ParameterType,
        description: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            param_type,
            description: description.into(),
            required: false,
            choices: None,
            default: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_choices<I, S>(mut self, choices: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.choices = Some(choices.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_default(mut self, default: serde_json::Value) -> Self {
        self.default = Some(default);
        self
    }
}

/// Everything the engine needs to describe a tool to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolMetadata {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub parameters: Vec<ToolParameter>,
}

impl ToolMetadata {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            category: "general".into(),
            parameters: Vec::new(),
        }
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    pub fn with_parameter(mut self, parameter: ToolParameter) -> Self {
        self.parameters.push(parameter);
        self
    }

    /// Look up a declared parameter by name.
    pub fn parameter(&self, name: &str) -> Option<&ToolParameter> {
        self.parameters.iter().find(|p| p.name == name)
    }

    /// Iterate over parameters marked required.
    pub fn required_parameters(&self) -> impl Iterator<Item = &ToolParameter> {
        self.parameters.iter().filter(|p| p.required)
    }

    /// JSON Schema describing the parameters (sent to the LLM).
    pub fn parameters_schema(&self) -> serde_json::Value {
        let mut properties = serde_json::Map::new();
        for p in &self.parameters {
            let mut prop = serde_json::json!({
                "type": p.param_type.as_str(),
                "description": p.description,
            });
            if let Some(choices) = &p.choices {
                prop["enum"] = serde_json::json!(choices);
            }
            if let Some(default) = &p.default {
                prop["default"] = default.clone();
            }
            properties.insert(p.name.clone(), prop);
        }
        let required: Vec<&str> = self.required_parameters().map(|p| p.name.as_str()).collect();
        serde_json::json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }
}

/// The result of a tool execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    /// Whether the tool executed successfully
    pub success: bool,

    /// Human-readable output
    #[serde(default)]
    pub output: String,

    /// Optional structured data
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,

    /// Failure reason, present when `success` is false
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl ToolResult {
    /// A successful result carrying structured data.
    pub fn ok(data: serde_json::Value) -> Self {
        let output = match &data {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        Self {
            success: true,
            output,
            data: Some(data),
            error_message: None,
        }
    }

    /// A failed result with a reason.
    pub fn failure(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            success: false,
            output: message.clone(),
            data: None,
            error_message: Some(message),
        }
    }
}

/// A single concrete capability.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool (e.g., "filesystem", "system_explorer").
    fn name(&self) -> &str;

    /// Description, category, and declared parameters.
    fn metadata(&self) -> ToolMetadata;

    /// Execute the tool with the given arguments.
    async fn execute(
        &self,
        arguments: serde_json::Value,
    ) -> std::result::Result<ToolResult, ToolError>;
}

/// The tool-execution seam the engine consumes.
///
/// `execute` is at-most-once and never retries; all retry policy lives in
/// the engine. Failures come back as `ToolResult { success: false, .. }`.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    /// Names of all available tools.
    fn list_tools(&self) -> Vec<String>;

    /// Metadata for one tool.
    fn get_tool_metadata(&self, name: &str) -> Option<ToolMetadata>;

    /// Execute a tool by name.
    async fn execute(&self, tool_name: &str, parameters: serde_json::Value) -> ToolResult;

    /// Metadata for every tool, in `list_tools` order.
    fn catalog(&self) -> Vec<ToolMetadata> {
        self.list_tools()
            .iter()
            .filter_map(|name| self.get_tool_metadata(name))
            .collect()
    }
}

/// A registry of available tools.
pub struct ToolRegistry {
    tools: HashMap<String, Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Register a tool. Replaces any existing tool with the same name.
    pub fn register(&mut self, tool: Box<dyn Tool>) {
        let name = tool.name().to_string();
        self.tools.insert(name, tool);
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.tools.get(name).map(|t| t.as_ref())
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ToolExecutor for ToolRegistry {
    fn list_tools(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    fn get_tool_metadata(&self, name: &str) -> Option<ToolMetadata> {
        self.tools.get(name).map(|t| t.metadata())
    }

    async fn execute(&self, tool_name: &str, parameters: serde_json::Value) -> ToolResult {
        let Some(tool) = self.tools.get(tool_name) else {
            warn!(tool = tool_name, "Tool not registered");
            return ToolResult::failure(ToolError::NotFound(tool_name.to_string()).to_string());
        };

        match tool.execute(parameters).await {
            Ok(result) => {
                debug!(tool = tool_name, success = result.success, "Tool executed");
                result
            }
            Err(e) => {
                warn!(tool = tool_name, error = %e, "Tool execution error");
                ToolResult::failure(e.to_string())
            }
        }
    }
}
