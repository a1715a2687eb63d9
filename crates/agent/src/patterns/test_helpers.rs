//! Shared test helpers for engine tests.

use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use steward_core::error::ProviderError;
use steward_core::message::Message;
use steward_core::provider::{Provider, ProviderRequest, ProviderResponse, Usage};
use steward_core::tool::{ParameterType, ToolExecutor, ToolMetadata, ToolParameter, ToolResult};

/// A mock provider that returns a sequence of scripted responses.
///
/// Each call to `complete` returns the next response in the queue.
/// Panics if more calls are made than responses provided.
pub struct SequentialMockProvider {
    responses: Mutex<Vec<ProviderResponse>>,
    call_count: Mutex<usize>,
    requests: Mutex<Vec<ProviderRequest>>,
}

impl SequentialMockProvider {
    pub fn new(responses: Vec<ProviderResponse>) -> Self {
        Self {
            responses: Mutex::new(responses),
            call_count: Mutex::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Script plain-text responses.
    pub fn texts<I, S>(texts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self::new(texts.into_iter().map(|t| make_text_response(t.as_ref())).collect())
    }

    /// Script JSON responses.
    pub fn jsons<I>(values: I) -> Self
    where
        I: IntoIterator<Item = Value>,
    {
        Self::new(values.into_iter().map(|v| make_text_response(&v.to_string())).collect())
    }

    pub fn call_count(&self) -> usize {
        *self.call_count.lock().unwrap()
    }

    /// Every request received so far.
    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Provider for SequentialMockProvider {
    fn name(&self) -> &str {
        "sequential_mock"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let mut count = self.call_count.lock().unwrap();
        let responses = self.responses.lock().unwrap();

        if *count >= responses.len() {
            panic!(
                "SequentialMockProvider: no more responses (call #{}, have {})",
                *count,
                responses.len()
            );
        }

        self.requests.lock().unwrap().push(request);
        let response = responses[*count].clone();
        *count += 1;
        Ok(response)
    }
}

/// A provider whose every call fails at the transport level.
pub struct FailingProvider;

#[async_trait]
impl Provider for FailingProvider {
    fn name(&self) -> &str {
        "failing_mock"
    }

    async fn complete(&self, _request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        Err(ProviderError::Network("connection refused".into()))
    }
}

/// Create a simple text response.
pub fn make_text_response(text: &str) -> ProviderResponse {
    ProviderResponse {
        message: Message::assistant(text),
        usage: Some(Usage {
            prompt_tokens: 10,
            completion_tokens: 5,
            total_tokens: 15,
        }),
        model: "mock-model".into(),
        metadata: serde_json::Map::new(),
    }
}

/// An empty response carrying an error marker, as a gateway reports upstream failures.
pub fn make_error_response() -> ProviderResponse {
    let mut response = make_text_response("");
    response
        .metadata
        .insert("error".into(), json!("upstream content filter"));
    response
}

// ── Tools ──

/// A tool executor with scripted per-tool results and a call log.
#[derive(Default)]
pub struct MockToolExecutor {
    tools: Vec<ToolMetadata>,
    queued: Mutex<HashMap<String, VecDeque<ToolResult>>>,
    fallback: HashMap<String, ToolResult>,
    calls: Mutex<Vec<(String, Value)>>,
}

impl MockToolExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Executor exposing `filesystem`, `system_explorer` and `mcp_doctor`.
    pub fn with_standard_tools() -> Self {
        Self::new()
            .with_tool(filesystem_metadata())
            .with_tool(system_explorer_metadata())
            .with_tool(mcp_doctor_metadata())
    }

    pub fn with_tool(mut self, metadata: ToolMetadata) -> Self {
        self.tools.push(metadata);
        self
    }

    /// Queue a result for the next call to `tool`.
    pub fn with_result(self, tool: &str, result: ToolResult) -> Self {
        self.queued
            .lock()
            .unwrap()
            .entry(tool.to_string())
            .or_default()
            .push_back(result);
        self
    }

    /// Result returned once the queue for `tool` is empty.
    pub fn always(mut self, tool: &str, result: ToolResult) -> Self {
        self.fallback.insert(tool.to_string(), result);
        self
    }

    pub fn calls(&self) -> Vec<(String, Value)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self, tool: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|(t, _)| t == tool).count()
    }
}

#[async_trait]
impl ToolExecutor for MockToolExecutor {
    fn list_tools(&self) -> Vec<String> {
        self.tools.iter().map(|t| t.name.clone()).collect()
    }

    fn get_tool_metadata(&self, name: &str) -> Option<ToolMetadata> {
        self.tools.iter().find(|t| t.name == name).cloned()
    }

    async fn execute(&self, tool_name: &str, parameters: Value) -> ToolResult {
        self.calls
            .lock()
            .unwrap()
            .push((tool_name.to_string(), parameters));
        let queued = self
            .queued
            .lock()
            .unwrap()
            .get_mut(tool_name)
            .and_then(VecDeque::pop_front);
        queued
            .or_else(|| self.fallback.get(tool_name).cloned())
            .unwrap_or_else(|| ToolResult::failure(format!("no scripted result for {tool_name}")))
    }
}

pub fn filesystem_metadata() -> ToolMetadata {
    ToolMetadata::new("filesystem", "List, create, copy, move and delete files")
        .with_category("file")
        .with_parameter(
            ToolParameter::new("action", ParameterType::String, "Operation to perform")
                .required()
                .with_choices(["list", "create_dir", "copy", "move", "delete"])
                .with_default(json!("list")),
        )
        .with_parameter(
            ToolParameter::new("path", ParameterType::String, "Target path").required(),
        )
        .with_parameter(ToolParameter::new("src", ParameterType::String, "Source path"))
        .with_parameter(ToolParameter::new("dst", ParameterType::String, "Destination path"))
}

pub fn system_explorer_metadata() -> ToolMetadata {
    ToolMetadata::new("system_explorer", "Explore directory structure and find files")
        .with_category("file")
        .with_parameter(
            ToolParameter::new("action", ParameterType::String, "Exploration mode")
                .required()
                .with_choices(["tree", "find", "locate", "explore_common", "get_structure", "search_files"]),
        )
        .with_parameter(ToolParameter::new("path", ParameterType::String, "Root path"))
        .with_parameter(ToolParameter::new("depth", ParameterType::Integer, "Max depth"))
}

pub fn mcp_doctor_metadata() -> ToolMetadata {
    ToolMetadata::new("mcp_doctor", "Diagnose tool errors and suggest fixes")
        .with_category("system")
        .with_parameter(
            ToolParameter::new("query", ParameterType::String, "What went wrong").required(),
        )
        .with_parameter(ToolParameter::new("query_type", ParameterType::String, "Query kind"))
}
