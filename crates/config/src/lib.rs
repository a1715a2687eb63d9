//! Configuration loading, validation, and management for Steward.
//!
//! Loads configuration from `~/.steward/config.toml` with environment
//! variable overrides. Validates all settings at startup; a configuration
//! error is the one failure class that is fatal before the agent runs.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.steward/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// API key for the language-model provider
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Language-model provider name
    #[serde(default = "default_provider")]
    pub provider: String,

    /// Execution engine settings
    #[serde(default)]
    pub engine: EngineConfig,

    /// Planning engine settings
    #[serde(default)]
    pub planning: PlanningConfig,

    /// Dynamic adapter thresholds
    #[serde(default)]
    pub adapter: AdapterConfig,

    /// Task canvas persistence
    #[serde(default)]
    pub canvas: CanvasConfig,
}

fn default_provider() -> String {
    "gemini".into()
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("api_key", &redact(&self.api_key))
            .field("provider", &self.provider)
            .field("engine", &self.engine)
            .field("planning", &self.planning)
            .field("adapter", &self.adapter)
            .field("canvas", &self.canvas)
            .finish()
    }
}

/// How the scratchpad's reasoning history grows.
///
/// The full chain of prior thoughts is replayed into every prompt, so the
/// default keeps everything. `KeepLast(n)` is an explicit opt-in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryPolicy {
    #[default]
    Unbounded,
    KeepLast(usize),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,

    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,

    /// Retry once with tool use forced when the model jumps to a final answer
    #[serde(default = "default_true")]
    pub forced_tool_retry: bool,

    /// Hard cap on failures of the same plan step before it is skipped
    #[serde(default = "default_max_step_failures")]
    pub max_step_failures: u32,

    #[serde(default)]
    pub history_policy: HistoryPolicy,
}

fn default_model() -> String {
    "gemini-2.5-pro".into()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    8192
}
fn default_max_iterations() -> usize {
    10
}
fn default_timeout_seconds() -> u64 {
    300
}
fn default_max_step_failures() -> u32 {
    3
}
fn default_true() -> bool {
    true
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            max_iterations: default_max_iterations(),
            timeout_seconds: default_timeout_seconds(),
            forced_tool_retry: true,
            max_step_failures: default_max_step_failures(),
            history_policy: HistoryPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanningConfig {
    /// Run the second LLM review pass over a freshly parsed plan
    #[serde(default = "default_true")]
    pub validation_pass: bool,

    /// Upper bound on steps requested from the model
    #[serde(default = "default_max_plan_steps")]
    pub max_steps: usize,
}

fn default_max_plan_steps() -> usize {
    10
}

impl Default for PlanningConfig {
    fn default() -> Self {
        Self {
            validation_pass: true,
            max_steps: default_max_plan_steps(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdapterConfig {
    /// Below this many seconds per remaining step a timeout risk is raised
    #[serde(default = "default_min_seconds_per_step")]
    pub min_seconds_per_step: f64,

    /// Actual/estimated duration ratio that counts as an overrun
    #[serde(default = "default_duration_overrun_factor")]
    pub duration_overrun_factor: f64,
}

fn default_min_seconds_per_step() -> f64 {
    15.0
}
fn default_duration_overrun_factor() -> f64 {
    3.0
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            min_seconds_per_step: default_min_seconds_per_step(),
            duration_overrun_factor: default_duration_overrun_factor(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanvasConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Defaults to `~/.steward/canvas` when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directory: Option<PathBuf>,

    /// Keyword overlap needed to treat two goals as the same task
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f64,
}

fn default_similarity_threshold() -> f64 {
    0.6
}

impl Default for CanvasConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            directory: None,
            similarity_threshold: default_similarity_threshold(),
        }
    }
}

impl CanvasConfig {
    /// The configured directory, or the default under the config dir.
    pub fn resolved_directory(&self) -> PathBuf {
        self.directory
            .clone()
            .unwrap_or_else(|| AppConfig::config_dir().join("canvas"))
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.steward/config.toml).
    ///
    /// Environment overrides (highest priority):
    /// - `STEWARD_API_KEY`
    /// - `STEWARD_MODEL`
    /// - `STEWARD_MAX_ITERATIONS`
    /// - `STEWARD_TIMEOUT_SECS`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;

        if config.api_key.is_none() {
            config.api_key = std::env::var("STEWARD_API_KEY").ok();
        }

        if let Ok(model) = std::env::var("STEWARD_MODEL") {
            config.engine.model = model;
        }

        if let Ok(raw) = std::env::var("STEWARD_MAX_ITERATIONS") {
            config.engine.max_iterations = raw.parse().map_err(|_| {
                ConfigError::ValidationError(format!(
                    "STEWARD_MAX_ITERATIONS must be a positive integer, got '{raw}'"
                ))
            })?;
        }

        if let Ok(raw) = std::env::var("STEWARD_TIMEOUT_SECS") {
            config.engine.timeout_seconds = raw.parse().map_err(|_| {
                ConfigError::ValidationError(format!(
                    "STEWARD_TIMEOUT_SECS must be an integer, got '{raw}'"
                ))
            })?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".steward")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let engine = &self.engine;
        if engine.temperature < 0.0 || engine.temperature > 2.0 {
            return Err(ConfigError::ValidationError(
                "engine.temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if engine.max_iterations == 0 {
            return Err(ConfigError::ValidationError(
                "engine.max_iterations must be > 0".into(),
            ));
        }

        if engine.max_step_failures == 0 {
            return Err(ConfigError::ValidationError(
                "engine.max_step_failures must be > 0".into(),
            ));
        }

        if let HistoryPolicy::KeepLast(0) = engine.history_policy {
            return Err(ConfigError::ValidationError(
                "engine.history_policy keep_last must be > 0".into(),
            ));
        }

        if self.adapter.duration_overrun_factor < 1.0 {
            return Err(ConfigError::ValidationError(
                "adapter.duration_overrun_factor must be >= 1.0".into(),
            ));
        }

        let threshold = self.canvas.similarity_threshold;
        if threshold <= 0.0 || threshold > 1.0 {
            return Err(ConfigError::ValidationError(
                "canvas.similarity_threshold must be in (0.0, 1.0]".into(),
            ));
        }

        Ok(())
    }

    /// Check if an API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    /// Generate a default config TOML string (for the `init` command).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            provider: default_provider(),
            engine: EngineConfig::default(),
            planning: PlanningConfig::default(),
            adapter: AdapterConfig::default(),
            canvas: CanvasConfig::default(),
        }
    }
}

/// Get the user's home directory.
pub fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

impl From<ConfigError> for steward_core::Error {
    fn from(e: ConfigError) -> Self {
        steward_core::Error::Config {
            message: e.to_string(),
        }
    }
}
