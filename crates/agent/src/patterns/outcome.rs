//! Inputs and outputs of a goal attempt.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use steward_config::EngineConfig;

use crate::state::Scratchpad;

/// What a driving application hands the engine for one goal attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentContext {
    pub goal: String,
    pub max_iterations: usize,
    pub timeout_seconds: u64,
    #[serde(default)]
    pub user_preferences: Map<String, Value>,
    #[serde(default)]
    pub constraints: Map<String, Value>,
}

impl AgentContext {
    pub fn new(goal: impl Into<String>) -> Self {
        Self {
            goal: goal.into(),
            max_iterations: 10,
            timeout_seconds: 300,
            user_preferences: Map::new(),
            constraints: Map::new(),
        }
    }

    /// A context carrying the `[engine]` iteration and time budgets.
    pub fn from_config(goal: impl Into<String>, config: &EngineConfig) -> Self {
        Self::new(goal)
            .with_max_iterations(config.max_iterations)
            .with_timeout(config.timeout_seconds)
    }

    pub fn with_max_iterations(mut self, max: usize) -> Self {
        self.max_iterations = max;
        self
    }

    pub fn with_timeout(mut self, seconds: u64) -> Self {
        self.timeout_seconds = seconds;
        self
    }

    pub fn with_preference(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.user_preferences.insert(key.into(), value.into());
        self
    }

    pub fn with_constraint(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.constraints.insert(key.into(), value.into());
        self
    }

    /// One-line rendering of the limits for prompts.
    pub fn limits_summary(&self) -> String {
        format!(
            "max iterations: {}, timeout: {}s, preferences: {}, constraints: {}",
            self.max_iterations,
            self.timeout_seconds,
            Value::Object(self.user_preferences.clone()),
            Value::Object(self.constraints.clone()),
        )
    }
}

/// Why an attempt ended without success.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    TimeoutExceeded,
    MaxIterationsReached,
    /// A tool or provider error string carried through unchanged.
    Propagated(String),
}

impl ErrorCode {
    pub fn as_str(&self) -> &str {
        match self {
            Self::TimeoutExceeded => "TIMEOUT_EXCEEDED",
            Self::MaxIterationsReached => "MAX_ITERATIONS_REACHED",
            Self::Propagated(msg) => msg,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of [`ReactEngine::execute_goal`](super::react::ReactEngine::execute_goal)
/// and its planning variant.
///
/// `final_answer` is never empty, including on timeout and budget exhaustion.
/// `metadata` always carries `iterations` and `execution_time` (seconds).
#[derive(Debug, Clone, Serialize)]
pub struct AgentResult {
    pub success: bool,
    pub final_answer: String,
    pub scratchpad: Scratchpad,
    pub error_code: Option<ErrorCode>,
    pub metadata: Map<String, Value>,
}

impl AgentResult {
    pub fn iterations(&self) -> usize {
        self.metadata
            .get("iterations")
            .and_then(Value::as_u64)
            .unwrap_or(0) as usize
    }

    pub fn execution_time(&self) -> f64 {
        self.metadata
            .get("execution_time")
            .and_then(Value::as_f64)
            .unwrap_or(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn context_defaults_and_builders() {
        let ctx = AgentContext::new("tidy the desktop")
            .with_max_iterations(4)
            .with_timeout(0)
            .with_constraint("dry_run", true);
        assert_eq!(ctx.max_iterations, 4);
        assert_eq!(ctx.timeout_seconds, 0);
        assert_eq!(ctx.constraints["dry_run"], json!(true));
        assert!(ctx.limits_summary().contains("timeout: 0s"));
    }

    #[test]
    fn context_takes_engine_budgets() {
        let config = EngineConfig {
            max_iterations: 7,
            timeout_seconds: 45,
            ..EngineConfig::default()
        };
        let ctx = AgentContext::from_config("g", &config);
        assert_eq!(ctx.max_iterations, 7);
        assert_eq!(ctx.timeout_seconds, 45);
    }

    #[test]
    fn error_codes_render() {
        assert_eq!(ErrorCode::TimeoutExceeded.to_string(), "TIMEOUT_EXCEEDED");
        assert_eq!(ErrorCode::MaxIterationsReached.as_str(), "MAX_ITERATIONS_REACHED");
        assert_eq!(ErrorCode::Propagated("tool exploded".into()).as_str(), "tool exploded");
    }

    #[test]
    fn result_metadata_accessors() {
        let mut metadata = Map::new();
        metadata.insert("iterations".into(), json!(3));
        metadata.insert("execution_time".into(), json!(1.5));
        let result = AgentResult {
            success: true,
            final_answer: "done".into(),
            scratchpad: Scratchpad::new("g"),
            error_code: None,
            metadata,
        };
        assert_eq!(result.iterations(), 3);
        assert!((result.execution_time() - 1.5).abs() < f64::EPSILON);
    }
}
