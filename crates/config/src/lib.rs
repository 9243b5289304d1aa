//! Configuration loading, validation, and management for DeepCritic.
//!
//! Loads configuration from `~/.deepcritic/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.deepcritic/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// API key for the hosted generation provider
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Default generation provider ("gemini", "openai", "ollama", ...)
    #[serde(default = "default_provider")]
    pub default_provider: String,

    /// Default model
    #[serde(default = "default_model")]
    pub default_model: String,

    /// Default temperature
    #[serde(default = "default_temperature")]
    pub default_temperature: f32,

    /// Default max tokens per LLM response
    #[serde(default = "default_max_tokens")]
    pub default_max_tokens: u32,

    /// Run entirely against a local Ollama model and the local codebase index
    #[serde(default)]
    pub use_local: bool,

    /// Orchestrator settings
    #[serde(default)]
    pub agent: AgentConfig,

    /// Search tool settings
    #[serde(default)]
    pub tools: ToolsConfig,

    /// Local (Ollama) backend settings
    #[serde(default)]
    pub local: LocalConfig,

    /// Provider-specific configurations
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,
}

fn default_provider() -> String {
    "gemini".into()
}
fn default_model() -> String {
    "gemini-1.5-pro".into()
}
fn default_temperature() -> f32 {
    0.0
}
fn default_max_tokens() -> u32 {
    8192
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
            .field("default_provider", &self.default_provider)
            .field("default_temperature", &self.default_temperature)
            .field("default_max_tokens", &self.default_max_tokens)
            .field("use_local", &self.use_local)
            .field("agent", &self.agent)
            .field("tools", &self.tools)
            .field("local", &self.local)
            .field("providers", &self.providers)
            .finish()
    }
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("api_key", &redact(&self.api_key))
            .field("api_url", &self.api_url)
            .finish()
    }
}

impl std::fmt::Debug for ToolsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolsConfig")
            .field("tavily_api_key", &redact(&self.tavily_api_key))
            .field("tavily_api_url", &self.tavily_api_url)
            .field("max_results", &self.max_results)
            .field("vector_store_dir", &self.vector_store_dir)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

/// Orchestrator settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Maximum generator passes per run before the run is cut off
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    /// Upper bound on any single generation call, in seconds
    #[serde(default = "default_provider_timeout")]
    pub provider_timeout_secs: u64,

    /// Model used by the critic (defaults to the generation model)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub critic_model: Option<String>,
}

fn default_max_iterations() -> u32 {
    10
}
fn default_provider_timeout() -> u64 {
    120
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            provider_timeout_secs: default_provider_timeout(),
            critic_model: None,
        }
    }
}

/// Search tool settings.
#[derive(Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Tavily API key for `tavily_search`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tavily_api_key: Option<String>,

    /// Tavily endpoint
    #[serde(default = "default_tavily_url")]
    pub tavily_api_url: String,

    /// Results returned per search
    #[serde(default = "default_max_results")]
    pub max_results: u32,

    /// Directory holding the pre-built local codebase index
    #[serde(default = "default_vector_store_dir")]
    pub vector_store_dir: String,

    /// Per-request HTTP timeout for search backends, in seconds
    #[serde(default = "default_tool_timeout")]
    pub timeout_secs: u64,
}

fn default_tavily_url() -> String {
    "https://api.tavily.com".into()
}
fn default_max_results() -> u32 {
    3
}
fn default_vector_store_dir() -> String {
    "data/vector_store".into()
}
fn default_tool_timeout() -> u64 {
    30
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            tavily_api_key: None,
            tavily_api_url: default_tavily_url(),
            max_results: default_max_results(),
            vector_store_dir: default_vector_store_dir(),
            timeout_secs: default_tool_timeout(),
        }
    }
}

/// Local (Ollama) backend settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalConfig {
    /// Ollama server root (without the `/v1` suffix)
    #[serde(default = "default_ollama_url")]
    pub base_url: String,

    /// Chat model served by Ollama
    #[serde(default = "default_local_model")]
    pub model: String,

    /// Embedding model used by the local codebase search
    #[serde(default = "default_local_model")]
    pub embedding_model: String,
}

fn default_ollama_url() -> String {
    "http://localhost:11434".into()
}
fn default_local_model() -> String {
    "llama3".into()
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self {
            base_url: default_ollama_url(),
            model: default_local_model(),
            embedding_model: default_local_model(),
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,
}

/// Which search capability the run is given.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchMode {
    /// `tavily_search` over the public web
    Web,
    /// `local_codebase_search` over the local index
    Local,
}

impl AppConfig {
    /// Load configuration from the default path (~/.deepcritic/config.toml).
    ///
    /// Environment variables take precedence over the file:
    /// - `DEEPCRITIC_API_KEY`, `GOOGLE_API_KEY`, `GEMINI_API_KEY` (first set wins)
    /// - `DEEPCRITIC_PROVIDER`, `DEEPCRITIC_MODEL`
    /// - `DEEPCRITIC_USE_LOCAL` (`true`/`1`)
    /// - `TAVILY_API_KEY`, `OLLAMA_BASE_URL`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env(|key| std::env::var(key).ok());
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

    /// Apply environment overrides through `lookup` (normally `std::env::var`).
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if self.api_key.is_none() {
            self.api_key = lookup("DEEPCRITIC_API_KEY")
                .or_else(|| lookup("GOOGLE_API_KEY"))
                .or_else(|| lookup("GEMINI_API_KEY"));
        }

        if let Some(provider) = lookup("DEEPCRITIC_PROVIDER") {
            self.default_provider = provider;
        }

        if let Some(model) = lookup("DEEPCRITIC_MODEL") {
            self.default_model = model;
        }

        if let Some(flag) = lookup("DEEPCRITIC_USE_LOCAL") {
            self.use_local = matches!(flag.trim().to_ascii_lowercase().as_str(), "true" | "1" | "yes");
        }

        if self.tools.tavily_api_key.is_none() {
            self.tools.tavily_api_key = lookup("TAVILY_API_KEY");
        }

        if let Some(url) = lookup("OLLAMA_BASE_URL") {
            self.local.base_url = url;
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".deepcritic")
    }

    /// Validate the configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.default_temperature < 0.0 || self.default_temperature > 2.0 {
            return Err(ConfigError::ValidationError(
                "default_temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if self.agent.max_iterations == 0 {
            return Err(ConfigError::ValidationError(
                "agent.max_iterations must be at least 1".into(),
            ));
        }

        if self.agent.provider_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "agent.provider_timeout_secs must be > 0".into(),
            ));
        }

        if self.tools.timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "tools.timeout_secs must be > 0".into(),
            ));
        }

        if self.tools.max_results == 0 || self.tools.max_results > 20 {
            return Err(ConfigError::ValidationError(
                "tools.max_results must be between 1 and 20".into(),
            ));
        }

        Ok(())
    }

    /// The provider name the run should use, honoring local mode.
    pub fn generation_provider(&self) -> &str {
        if self.use_local {
            "ollama"
        } else {
            &self.default_provider
        }
    }

    /// The model the generator should use, honoring local mode.
    pub fn generation_model(&self) -> &str {
        if self.use_local {
            &self.local.model
        } else {
            &self.default_model
        }
    }

    /// The model the critic should use.
    pub fn critic_model(&self) -> &str {
        self.agent
            .critic_model
            .as_deref()
            .unwrap_or_else(|| self.generation_model())
    }

    /// Which search tool the run is given.
    pub fn search_mode(&self) -> SearchMode {
        if self.use_local {
            SearchMode::Local
        } else {
            SearchMode::Web
        }
    }

    /// Check if an API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    /// Render the effective configuration, secrets omitted.
    pub fn to_redacted_toml(&self) -> String {
        let mut config = self.clone();
        config.api_key = config.api_key.map(|_| "[REDACTED]".into());
        config.tools.tavily_api_key = config.tools.tavily_api_key.map(|_| "[REDACTED]".into());
        for provider in config.providers.values_mut() {
            provider.api_key = provider.api_key.take().map(|_| "[REDACTED]".into());
        }
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            default_provider: default_provider(),
            default_model: default_model(),
            default_temperature: default_temperature(),
            default_max_tokens: default_max_tokens(),
            use_local: false,
            agent: AgentConfig::default(),
            tools: ToolsConfig::default(),
            local: LocalConfig::default(),
            providers: HashMap::new(),
        }
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
