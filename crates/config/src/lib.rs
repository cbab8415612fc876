//! Configuration loading, validation, and management for Parley.
//!
//! Loads configuration from `~/.parley/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.parley/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// API key (can be overridden per-provider)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Default LLM provider
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

    /// Gateway configuration
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Chat room limits
    #[serde(default)]
    pub room: RoomConfig,

    /// External context service
    #[serde(default)]
    pub context: ContextConfig,

    /// Decision pipeline tuning shared by all agents
    #[serde(default)]
    pub decision: DecisionConfig,

    /// Provider-specific configurations
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,

    /// Agents hosted in-process by the gateway
    #[serde(default)]
    pub agents: Vec<AgentConfig>,
}

fn default_provider() -> String {
    "openrouter".into()
}
fn default_model() -> String {
    "anthropic/claude-sonnet-4".into()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    1024
}
fn default_true() -> bool {
    true
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
            .field("default_model", &self.default_model)
            .field("default_temperature", &self.default_temperature)
            .field("default_max_tokens", &self.default_max_tokens)
            .field("gateway", &self.gateway)
            .field("room", &self.room)
            .field("context", &self.context)
            .field("decision", &self.decision)
            .field("providers", &self.providers)
            .field("agents", &self.agents)
            .finish()
    }
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("api_key", &redact(&self.api_key))
            .field("api_url", &self.api_url)
            .field("default_model", &self.default_model)
            .finish()
    }
}

impl std::fmt::Debug for ContextConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextConfig")
            .field("backend", &self.backend)
            .field("base_url", &self.base_url)
            .field("api_key", &redact(&self.api_key))
            .field("workspace", &self.workspace)
            .field("retry", &self.retry)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_host")]
    pub host: String,
}

fn default_port() -> u16 {
    42618
}
fn default_host() -> String {
    "127.0.0.1".into()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomConfig {
    /// Messages retained in the history ring
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,

    /// Messages replayed to a connection when it registers
    #[serde(default = "default_join_history")]
    pub join_history: usize,

    /// Per-connection outbound queue depth
    #[serde(default = "default_outbound_buffer")]
    pub outbound_buffer: usize,

    /// Upper bound on `get_history` limits
    #[serde(default = "default_history_capacity")]
    pub max_history_query: usize,
}

fn default_history_capacity() -> usize {
    1000
}
fn default_join_history() -> usize {
    50
}
fn default_outbound_buffer() -> usize {
    256
}

impl Default for RoomConfig {
    fn default() -> Self {
        Self {
            history_capacity: default_history_capacity(),
            join_history: default_join_history(),
            outbound_buffer: default_outbound_buffer(),
            max_history_query: default_history_capacity(),
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    /// "memory" (ephemeral, in-process) or "http"
    #[serde(default = "default_context_backend")]
    pub backend: String,

    #[serde(default = "default_context_url")]
    pub base_url: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_workspace")]
    pub workspace: String,

    #[serde(default)]
    pub retry: RetryConfig,
}

fn default_context_backend() -> String {
    "memory".into()
}
fn default_context_url() -> String {
    "http://localhost:8000".into()
}
fn default_workspace() -> String {
    "parley".into()
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            backend: default_context_backend(),
            base_url: default_context_url(),
            api_key: None,
            workspace: default_workspace(),
            retry: RetryConfig::default(),
        }
    }
}

/// Backoff for rate-limited context calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// First delay; doubles on every further attempt
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
}

fn default_max_retries() -> u32 {
    3
}
fn default_base_delay_ms() -> u64 {
    1000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionConfig {
    /// Gate decisions below this confidence are treated as "don't respond"
    #[serde(default = "default_min_gate_confidence")]
    pub min_gate_confidence: f32,

    /// Mention suffixes that mark a token as an agent name ("@FooBot")
    #[serde(default = "default_agent_name_suffixes")]
    pub agent_name_suffixes: Vec<String>,

    /// Recent room messages included in prompts
    #[serde(default = "default_context_messages")]
    pub context_messages: usize,

    /// Token budget requested for the session summary
    #[serde(default = "default_summary_tokens")]
    pub summary_tokens: u32,

    #[serde(default = "default_search_limit")]
    pub search_limit: usize,
}

fn default_min_gate_confidence() -> f32 {
    0.6
}
fn default_agent_name_suffixes() -> Vec<String> {
    vec!["bot".into(), "agent".into()]
}
fn default_context_messages() -> usize {
    10
}
fn default_summary_tokens() -> u32 {
    2000
}
fn default_search_limit() -> usize {
    5
}

impl Default for DecisionConfig {
    fn default() -> Self {
        Self {
            min_gate_confidence: default_min_gate_confidence(),
            agent_name_suffixes: default_agent_name_suffixes(),
            context_messages: default_context_messages(),
            summary_tokens: default_summary_tokens(),
            search_limit: default_search_limit(),
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_model: Option<String>,
}

/// An agent participant hosted by the gateway process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Display name in the room (must be unique)
    pub name: String,

    /// Personality and standing instructions
    #[serde(default = "default_persona")]
    pub persona: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    #[serde(default)]
    pub capabilities: Vec<String>,

    #[serde(default)]
    pub proactive: ProactiveConfig,
}

fn default_persona() -> String {
    "You are a friendly, concise participant in a group chat.".into()
}

impl AgentConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            persona: default_persona(),
            model: None,
            temperature: None,
            capabilities: vec![],
            proactive: ProactiveConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProactiveConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Silence (and tick period) before the agent considers speaking up
    #[serde(default = "default_proactive_interval")]
    pub interval_secs: u64,
}

fn default_proactive_interval() -> u64 {
    30
}

impl Default for ProactiveConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: default_proactive_interval(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.parley/config.toml).
    ///
    /// Also checks environment variables for API keys:
    /// - `PARLEY_API_KEY` (highest priority)
    /// - `OPENROUTER_API_KEY`
    /// - `OPENAI_API_KEY`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_path();
        let mut config = Self::load_from(&config_path)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if self.api_key.is_none() {
            self.api_key = std::env::var("PARLEY_API_KEY")
                .ok()
                .or_else(|| std::env::var("OPENROUTER_API_KEY").ok())
                .or_else(|| std::env::var("OPENAI_API_KEY").ok());
        }

        if let Ok(provider) = std::env::var("PARLEY_PROVIDER") {
            self.default_provider = provider;
        }

        if let Ok(model) = std::env::var("PARLEY_MODEL") {
            self.default_model = model;
        }

        if self.context.api_key.is_none() {
            self.context.api_key = std::env::var("PARLEY_CONTEXT_API_KEY").ok();
        }
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
        dirs_home().join(".parley")
    }

    pub fn config_path() -> PathBuf {
        Self::config_dir().join("config.toml")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_temperature < 0.0 || self.default_temperature > 2.0 {
            return Err(ConfigError::ValidationError(
                "default_temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if self.room.history_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "room.history_capacity must be > 0".into(),
            ));
        }

        if self.room.outbound_buffer == 0 {
            return Err(ConfigError::ValidationError(
                "room.outbound_buffer must be > 0".into(),
            ));
        }

        if !(0.0..=1.0).contains(&self.decision.min_gate_confidence) {
            return Err(ConfigError::ValidationError(
                "decision.min_gate_confidence must be between 0.0 and 1.0".into(),
            ));
        }

        if !matches!(self.context.backend.as_str(), "memory" | "http") {
            return Err(ConfigError::ValidationError(format!(
                "unknown context backend '{}' (expected \"memory\" or \"http\")",
                self.context.backend
            )));
        }

        let mut seen = HashSet::new();
        for agent in &self.agents {
            let name = agent.name.trim();
            if name.is_empty() {
                return Err(ConfigError::ValidationError("agent name must not be empty".into()));
            }
            if !seen.insert(name.to_lowercase()) {
                return Err(ConfigError::ValidationError(format!(
                    "duplicate agent name '{name}'"
                )));
            }
            if let Some(t) = agent.temperature {
                if !(0.0..=2.0).contains(&t) {
                    return Err(ConfigError::ValidationError(format!(
                        "agent '{name}': temperature must be between 0.0 and 2.0"
                    )));
                }
            }
            if agent.proactive.interval_secs == 0 {
                return Err(ConfigError::ValidationError(format!(
                    "agent '{name}': proactive.interval_secs must be > 0"
                )));
            }
        }

        Ok(())
    }

    /// Check if an API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    /// Generate a default config TOML string (for `onboard` command).
    pub fn default_toml() -> String {
        let config = Self {
            agents: vec![AgentConfig::new("HelperBot")],
            ..Self::default()
        };
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
            gateway: GatewayConfig::default(),
            room: RoomConfig::default(),
            context: ContextConfig::default(),
            decision: DecisionConfig::default(),
            providers: HashMap::new(),
            agents: vec![],
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
