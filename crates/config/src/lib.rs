//! Configuration loading, validation, and management for OpenOrca.
//!
//! Loads configuration from `~/.openorca/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.openorca/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// LLM endpoint settings
    #[serde(default)]
    pub provider: ProviderConfig,

    /// Agent loop settings
    #[serde(default)]
    pub agent: AgentConfig,
}

/// Endpoint settings for the OpenAI-compatible provider.
#[derive(Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Display name used in logs and error messages
    #[serde(default = "default_provider_name")]
    pub name: String,

    /// Base URL of the `/v1` API
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// API key (local servers usually ignore it)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Model identifier sent with every request
    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Maximum tokens per response
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Context window of the model, in tokens
    #[serde(default = "default_context_window")]
    pub context_window: usize,
}

fn default_provider_name() -> String {
    "lmstudio".into()
}
fn default_api_url() -> String {
    "http://localhost:1234/v1".into()
}
fn default_model() -> String {
    "local-model".into()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    4096
}
fn default_context_window() -> usize {
    32_768
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            name: default_provider_name(),
            api_url: default_api_url(),
            api_key: None,
            model: default_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            context_window: default_context_window(),
        }
    }
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("name", &self.name)
            .field("api_url", &self.api_url)
            .field("api_key", &redact(&self.api_key))
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("context_window", &self.context_window)
            .finish()
    }
}

/// Agent loop settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Hard cap on model round-trips per turn
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,

    /// Send tool definitions and accept structured calls
    #[serde(default = "default_true")]
    pub native_tool_calling: bool,

    #[serde(default = "default_max_parallel_tools")]
    pub max_parallel_tools: usize,

    #[serde(default = "default_tool_timeout_secs")]
    pub tool_timeout_secs: u64,

    /// Calls with larger argument payloads are rejected unexecuted
    #[serde(default = "default_max_tool_argument_bytes")]
    pub max_tool_argument_bytes: usize,

    /// Fraction of the context window that triggers compaction
    #[serde(default = "default_compaction_threshold")]
    pub compaction_threshold: f32,

    /// Most recent turns kept verbatim by compaction
    #[serde(default = "default_keep_recent_turns")]
    pub keep_recent_turns: usize,

    /// Only read-only tools run
    #[serde(default)]
    pub plan_mode: bool,

    /// Only read-only tools run
    #[serde(default)]
    pub sandbox_mode: bool,

    /// Forward captured reasoning to the display
    #[serde(default)]
    pub show_thinking: bool,

    #[serde(default = "default_max_truncation_retries")]
    pub max_truncation_retries: usize,

    #[serde(default = "default_max_nudges")]
    pub max_nudges: usize,

    /// Characters of output after which an untagged stream stops being
    /// watched for reasoning tags
    #[serde(default = "default_thinking_detection_budget")]
    pub thinking_detection_budget: usize,
}

fn default_true() -> bool {
    true
}
fn default_max_iterations() -> usize {
    25
}
fn default_max_parallel_tools() -> usize {
    4
}
fn default_tool_timeout_secs() -> u64 {
    120
}
fn default_max_tool_argument_bytes() -> usize {
    65_536
}
fn default_compaction_threshold() -> f32 {
    0.8
}
fn default_keep_recent_turns() -> usize {
    4
}
fn default_max_truncation_retries() -> usize {
    2
}
fn default_max_nudges() -> usize {
    1
}
fn default_thinking_detection_budget() -> usize {
    256
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            native_tool_calling: true,
            max_parallel_tools: default_max_parallel_tools(),
            tool_timeout_secs: default_tool_timeout_secs(),
            max_tool_argument_bytes: default_max_tool_argument_bytes(),
            compaction_threshold: default_compaction_threshold(),
            keep_recent_turns: default_keep_recent_turns(),
            plan_mode: false,
            sandbox_mode: false,
            show_thinking: false,
            max_truncation_retries: default_max_truncation_retries(),
            max_nudges: default_max_nudges(),
            thinking_detection_budget: default_thinking_detection_budget(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.openorca/config.toml).
    ///
    /// Environment overrides, highest priority first:
    /// - `OPENORCA_API_KEY`, then `OPENAI_API_KEY` (only if no key is configured)
    /// - `OPENORCA_API_URL`
    /// - `OPENORCA_MODEL`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env_overrides(|key| std::env::var(key).ok());
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

    fn apply_env_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if self.provider.api_key.is_none() {
            self.provider.api_key = var("OPENORCA_API_KEY").or_else(|| var("OPENAI_API_KEY"));
        }
        if let Some(url) = var("OPENORCA_API_URL") {
            self.provider.api_url = url;
        }
        if let Some(model) = var("OPENORCA_MODEL") {
            self.provider.model = model;
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".openorca")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=2.0).contains(&self.provider.temperature) {
            return Err(ConfigError::ValidationError(
                "provider.temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if self.provider.api_url.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "provider.api_url must not be empty".into(),
            ));
        }

        if self.provider.context_window == 0 {
            return Err(ConfigError::ValidationError(
                "provider.context_window must be > 0".into(),
            ));
        }

        if !(self.agent.compaction_threshold > 0.0 && self.agent.compaction_threshold <= 1.0) {
            return Err(ConfigError::ValidationError(
                "agent.compaction_threshold must be in (0.0, 1.0]".into(),
            ));
        }

        if self.agent.max_iterations == 0 {
            return Err(ConfigError::ValidationError(
                "agent.max_iterations must be > 0".into(),
            ));
        }

        if self.agent.max_parallel_tools == 0 {
            return Err(ConfigError::ValidationError(
                "agent.max_parallel_tools must be > 0".into(),
            ));
        }

        if self.agent.tool_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "agent.tool_timeout_secs must be > 0".into(),
            ));
        }

        Ok(())
    }

    /// Check if an API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.provider.api_key.is_some()
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
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
