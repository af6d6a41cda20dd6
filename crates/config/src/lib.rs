//! Configuration loading, validation, and management for Stepwise.
//!
//! Loads configuration from `~/.stepwise/config.toml` (or `$STEPWISE_CONFIG`)
//! and layers environment variables and explicit command-line overrides on
//! top, in that order of increasing precedence.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use stepwise_core::RiskPolicy;

pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_OLLAMA_BASE_URL: &str = "http://127.0.0.1:11434";
pub const DEFAULT_OLLAMA_MODEL: &str = "deepseek-coder-v2:latest";

/// The root configuration structure.
///
/// Maps directly to `~/.stepwise/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Default backend: `auto`, `ollama` or `openai`
    #[serde(default = "default_provider")]
    pub default_provider: String,

    #[serde(default)]
    pub openai: OpenAiConfig,

    #[serde(default)]
    pub ollama: OllamaConfig,

    /// Planning loop settings
    #[serde(default)]
    pub agent: AgentConfig,

    /// Unit and tool execution settings
    #[serde(default)]
    pub exec: ExecConfig,

    /// HTTP retry and timeout settings
    #[serde(default)]
    pub retry: RetryConfig,
}

fn default_provider() -> String {
    "openai".into()
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct OpenAiConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_openai_base_url")]
    pub base_url: String,

    #[serde(default = "default_openai_model")]
    pub model: String,
}

fn default_openai_base_url() -> String {
    DEFAULT_OPENAI_BASE_URL.into()
}

fn default_openai_model() -> String {
    DEFAULT_OPENAI_MODEL.into()
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: default_openai_base_url(),
            model: default_openai_model(),
        }
    }
}

impl std::fmt::Debug for OpenAiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiConfig")
            .field("api_key", &redact(&self.api_key))
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OllamaConfig {
    #[serde(default = "default_ollama_base_url")]
    pub base_url: String,

    #[serde(default = "default_ollama_model")]
    pub model: String,
}

fn default_ollama_base_url() -> String {
    DEFAULT_OLLAMA_BASE_URL.into()
}

fn default_ollama_model() -> String {
    DEFAULT_OLLAMA_MODEL.into()
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            base_url: default_ollama_base_url(),
            model: default_ollama_model(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Planning steps per turn
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,

    /// `strict`, `normal` or `off`
    #[serde(default = "default_risk_policy")]
    pub risk_policy: String,

    /// Ask before every tool or unit run
    #[serde(default = "default_true")]
    pub confirm_tools: bool,

    #[serde(default = "default_decision_cache_ttl_secs")]
    pub decision_cache_ttl_secs: u64,

    #[serde(default = "default_decision_cache_max_entries")]
    pub decision_cache_max_entries: usize,

    /// Planner prompt budget in estimated tokens
    #[serde(default = "default_token_budget")]
    pub token_budget: usize,

    /// Cap for a single history result
    #[serde(default = "default_history_max_chars")]
    pub history_max_chars: usize,

    /// Unit catalog size above which a warning is logged
    #[serde(default = "default_catalog_token_budget")]
    pub catalog_token_budget: usize,
}

fn default_max_steps() -> usize {
    4
}
fn default_risk_policy() -> String {
    "normal".into()
}
fn default_true() -> bool {
    true
}
fn default_decision_cache_ttl_secs() -> u64 {
    180
}
fn default_decision_cache_max_entries() -> usize {
    64
}
fn default_token_budget() -> usize {
    20_000
}
fn default_history_max_chars() -> usize {
    2000
}
fn default_catalog_token_budget() -> usize {
    6000
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
            risk_policy: default_risk_policy(),
            confirm_tools: true,
            decision_cache_ttl_secs: default_decision_cache_ttl_secs(),
            decision_cache_max_entries: default_decision_cache_max_entries(),
            token_budget: default_token_budget(),
            history_max_chars: default_history_max_chars(),
            catalog_token_budget: default_catalog_token_budget(),
        }
    }
}

impl AgentConfig {
    pub fn policy(&self) -> Result<RiskPolicy, ConfigError> {
        self.risk_policy.parse().map_err(ConfigError::ValidationError)
    }

    pub fn decision_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.decision_cache_ttl_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecConfig {
    /// Wall-clock limit for a unit or tool run
    #[serde(default = "default_exec_timeout_secs")]
    pub timeout_secs: u64,

    /// PowerShell binary; `pwsh` then `powershell` are tried when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interpreter: Option<String>,

    /// Unit sources directory, relative to the base directory
    #[serde(default = "default_units_dir")]
    pub units_dir: String,
}

fn default_exec_timeout_secs() -> u64 {
    300
}
fn default_units_dir() -> String {
    "units".into()
}

impl Default for ExecConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_exec_timeout_secs(),
            interpreter: None,
            units_dir: default_units_dir(),
        }
    }
}

impl ExecConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Retries after the first attempt
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// First backoff delay; doubles per retry
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Liveness probe timeout for the local backend
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
}

fn default_max_retries() -> u32 {
    2
}
fn default_base_delay_ms() -> u64 {
    2000
}
fn default_request_timeout_secs() -> u64 {
    60
}
fn default_probe_timeout_ms() -> u64 {
    3000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            request_timeout_secs: default_request_timeout_secs(),
            probe_timeout_ms: default_probe_timeout_ms(),
        }
    }
}

impl RetryConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}

/// Explicit overrides, typically from command-line flags. They beat both
/// the environment and the config file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub provider: Option<String>,
    pub model: Option<String>,
    pub base_url: Option<String>,
    pub risk_policy: Option<String>,
    pub confirm_tools: Option<bool>,
}

impl AppConfig {
    /// Load configuration from the default path and apply environment
    /// overrides:
    /// - `STEPWISE_PROVIDER`, `STEPWISE_MODEL`, `STEPWISE_RISK_POLICY`
    /// - `OPENAI_API_KEY`, `OPENAI_BASE_URL`, `OLLAMA_BASE_URL`
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::load_from(&Self::config_path())?;
        config.apply_env_with(|key| std::env::var(key).ok());
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

    /// Apply environment overrides through `lookup`. Blank values are ignored.
    pub fn apply_env_with<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(provider) = get("STEPWISE_PROVIDER") {
            self.default_provider = provider;
        }
        if let Some(model) = get("STEPWISE_MODEL") {
            self.set_model(&model);
        }
        if let Some(policy) = get("STEPWISE_RISK_POLICY") {
            self.agent.risk_policy = policy;
        }
        if self.openai.api_key.is_none() {
            self.openai.api_key = get("OPENAI_API_KEY");
        }
        if let Some(url) = get("OPENAI_BASE_URL") {
            self.openai.base_url = url;
        }
        if let Some(url) = get("OLLAMA_BASE_URL") {
            self.ollama.base_url = url;
        }
    }

    /// Apply explicit overrides (highest precedence).
    pub fn apply_overrides(&mut self, overrides: &Overrides) {
        let given = |v: &Option<String>| v.as_deref().map(str::trim).filter(|v| !v.is_empty()).map(String::from);

        if let Some(provider) = given(&overrides.provider) {
            self.default_provider = provider;
        }
        if let Some(model) = given(&overrides.model) {
            self.set_model(&model);
        }
        if let Some(url) = given(&overrides.base_url) {
            match self.default_provider.to_ascii_lowercase().as_str() {
                "ollama" => self.ollama.base_url = url,
                "openai" => self.openai.base_url = url,
                _ => {
                    self.ollama.base_url = url.clone();
                    self.openai.base_url = url;
                }
            }
        }
        if let Some(policy) = given(&overrides.risk_policy) {
            self.agent.risk_policy = policy;
        }
        if let Some(confirm) = overrides.confirm_tools {
            self.agent.confirm_tools = confirm;
        }
    }

    /// A model override applies to the selected backend; in auto mode it
    /// applies to both since either may answer.
    fn set_model(&mut self, model: &str) {
        match self.default_provider.to_ascii_lowercase().as_str() {
            "ollama" => self.ollama.model = model.to_string(),
            "openai" => self.openai.model = model.to_string(),
            _ => {
                self.ollama.model = model.to_string();
                self.openai.model = model.to_string();
            }
        }
    }

    /// Config file path: `$STEPWISE_CONFIG` or `~/.stepwise/config.toml`.
    pub fn config_path() -> PathBuf {
        match std::env::var("STEPWISE_CONFIG") {
            Ok(path) if !path.trim().is_empty() => PathBuf::from(path.trim()),
            _ => Self::config_dir().join("config.toml"),
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        home_dir().join(".stepwise")
    }

    /// Directory holding unit sources for `base_dir`.
    pub fn units_dir(&self, base_dir: &Path) -> PathBuf {
        base_dir.join(&self.exec.units_dir)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.agent.max_steps == 0 {
            return Err(ConfigError::ValidationError("agent.max_steps must be at least 1".into()));
        }
        self.agent.policy()?;

        if self.exec.timeout_secs == 0 {
            return Err(ConfigError::ValidationError("exec.timeout_secs must be > 0".into()));
        }

        for (name, url) in [("openai.base_url", &self.openai.base_url), ("ollama.base_url", &self.ollama.base_url)] {
            validate_base_url(url).map_err(|reason| ConfigError::ValidationError(format!("{name}: {reason}")))?;
        }

        Ok(())
    }

    /// Check if an OpenAI API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.openai.api_key.as_deref().is_some_and(|k| !k.trim().is_empty())
    }

    /// Generate a default config TOML string (for the `config init` command).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

/// Base URLs must be absolute http(s) URLs.
pub fn validate_base_url(url: &str) -> Result<(), String> {
    let url = url.trim();
    let rest = url
        .strip_prefix("http://")
        .or_else(|| url.strip_prefix("https://"))
        .ok_or_else(|| format!("invalid base URL {url:?}: scheme must be http or https"))?;
    if rest.trim_matches('/').is_empty() {
        return Err(format!("invalid base URL {url:?}: missing host"));
    }
    Ok(())
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            default_provider: default_provider(),
            openai: OpenAiConfig::default(),
            ollama: OllamaConfig::default(),
            agent: AgentConfig::default(),
            exec: ExecConfig::default(),
            retry: RetryConfig::default(),
        }
    }
}

/// Get the user's home directory.
pub fn home_dir() -> PathBuf {
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
