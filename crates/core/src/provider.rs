//! Provider trait: the abstraction over the language-model gateway.
//!
//! A Provider sends an ordered list of messages to an LLM and returns one
//! complete response. It is stateless: one request, one response.
//!
//! The engine treats both an `Err` and an empty-content response as a soft
//! failure and falls back to a safe default. Only configuration problems
//! (missing credentials) are expected to be fatal, and those belong to the
//! provider's constructor, not to `complete()`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;
use crate::message::Message;

/// Configuration for a provider request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderRequest {
    /// The model to use (e.g., "gemini-2.5-pro", "gpt-4o")
    pub model: String,

    /// The conversation messages
    pub messages: Vec<Message>,

    /// Temperature (0.0 = deterministic, 1.0 = creative)
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Maximum tokens to generate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Ask the provider for a JSON-only response body
    #[serde(default)]
    pub json_mode: bool,

    /// Stop sequences
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stop: Vec<String>,
}

fn default_temperature() -> f32 {
    0.7
}

impl ProviderRequest {
    /// Build a request with the default temperature and no token limit.
    pub fn new(model: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            model: model.into(),
            messages,
            temperature: default_temperature(),
            max_tokens: None,
            json_mode: false,
            stop: Vec::new(),
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn json(mut self) -> Self {
        self.json_mode = true;
        self
    }
}

/// A complete response from a provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderResponse {
    /// The generated message
    pub message: Message,

    /// Token usage statistics
    pub usage: Option<Usage>,

    /// Which model actually responded (may differ from requested)
    pub model: String,

    /// Provider-specific metadata (an `error` key marks a degraded response)
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl ProviderResponse {
    /// The text content of the response.
    pub fn content(&self) -> &str {
        &self.message.content
    }

    /// Empty content or an error marker in metadata.
    pub fn is_soft_failure(&self) -> bool {
        self.message.is_blank() || self.metadata.contains_key("error")
    }
}

/// Token usage information.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// The core Provider trait.
///
/// Every LLM backend implements this trait. The engine calls `complete()`
/// without knowing which backend is in use.
#[async_trait]
pub trait Provider: Send + Sync {
    /// A human-readable name for this provider (e.g., "gemini", "openai").
    fn name(&self) -> &str;

    /// Send a request and get a complete response.
    async fn complete(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<ProviderResponse, ProviderError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_request_defaults() {
        let req = ProviderRequest::new("gpt-4o", vec![Message::user("hi")]);
        assert!((req.temperature - 0.7).abs() < f32::EPSILON);
        assert!(!req.json_mode);
        assert!(req.max_tokens.is_none());
    }

    #[test]
    fn provider_request_builder() {
        let req = ProviderRequest::new("gpt-4o", vec![])
            .with_temperature(0.3)
            .with_max_tokens(2048)
            .json();
        assert!((req.temperature - 0.3).abs() < f32::EPSILON);
        assert_eq!(req.max_tokens, Some(2048));
        assert!(req.json_mode);
    }

    #[test]
    fn empty_content_is_soft_failure() {
        let resp = ProviderResponse {
            message: Message::assistant(""),
            usage: None,
            model: "m".into(),
            metadata: serde_json::Map::new(),
        };
        assert!(resp.is_soft_failure());

        let mut metadata = serde_json::Map::new();
        metadata.insert("error".into(), serde_json::json!("blocked"));
        let resp = ProviderResponse {
            message: Message::assistant("partial"),
            usage: None,
            model: "m".into(),
            metadata,
        };
        assert!(resp.is_soft_failure());
    }
}
