//! Configuration loading, validation, and management for stockchat.
//!
//! Loads configuration from `~/.stockchat/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Backends the orchestrator knows how to talk to.
pub const KNOWN_PROVIDERS: [&str; 3] = ["openai", "anthropic", "ollama"];

/// The root configuration structure.
///
/// Maps directly to `~/.stockchat/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// API key shared by every provider without its own
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Backend used when the caller does not pick one
    #[serde(default = "default_provider")]
    pub default_provider: String,

    /// Sampling and transport settings for backend calls
    #[serde(default)]
    pub llm: LlmConfig,

    /// Stock database
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Conversation loop settings
    #[serde(default)]
    pub chat: ChatConfig,

    /// Guard rails for `execute_sql_query`
    #[serde(default)]
    pub sql: SqlConfig,

    /// Bounds for the lookup tools
    #[serde(default)]
    pub tools: ToolsConfig,

    /// Provider-specific configurations
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,
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

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("api_key", &redact(&self.api_key))
            .field("default_provider", &self.default_provider)
            .field("llm", &self.llm)
            .field("database", &self.database)
            .field("chat", &self.chat)
            .field("sql", &self.sql)
            .field("tools", &self.tools)
            .field("providers", &self.providers)
            .finish()
    }
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("api_key", &redact(&self.api_key))
            .field("api_url", &self.api_url)
            .field("model", &self.model)
            .finish()
    }
}

#[derive(Clone, Default, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Timeout for one backend round-trip
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_temperature() -> f32 {
    0.3
}
fn default_max_tokens() -> u32 {
    2048
}
fn default_request_timeout() -> u64 {
    60
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// sqlx connection URL (e.g., "sqlite:///var/lib/stocks.db")
    #[serde(default = "default_database_url")]
    pub url: String,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Timeout for one tool query
    #[serde(default = "default_query_timeout")]
    pub query_timeout_secs: u64,
}

fn default_database_url() -> String {
    format!(
        "sqlite://{}",
        AppConfig::config_dir().join("stocks.db").display()
    )
}
fn default_max_connections() -> u32 {
    4
}
fn default_query_timeout() -> u64 {
    10
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            max_connections: default_max_connections(),
            query_timeout_secs: default_query_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatConfig {
    /// Backend round-trips allowed per run
    #[serde(default = "default_max_turns")]
    pub max_turns: u32,

    /// Replaces the built-in analyst prompt
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
}

fn default_max_turns() -> u32 {
    5
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            max_turns: default_max_turns(),
            system_prompt: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SqlConfig {
    /// LIMIT appended to queries that carry none
    #[serde(default = "default_sql_limit")]
    pub default_limit: u32,

    /// Queries asking for more rows than this are rejected
    #[serde(default = "default_sql_max_limit")]
    pub max_limit: u32,

    /// Engine error messages are cut to this many characters
    #[serde(default = "default_max_error_chars")]
    pub max_error_chars: usize,
}

fn default_sql_limit() -> u32 {
    100
}
fn default_sql_max_limit() -> u32 {
    500
}
fn default_max_error_chars() -> usize {
    300
}

impl Default for SqlConfig {
    fn default() -> Self {
        Self {
            default_limit: default_sql_limit(),
            max_limit: default_sql_max_limit(),
            max_error_chars: default_max_error_chars(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    #[serde(default = "default_history_days")]
    pub history_default_days: u32,

    #[serde(default = "default_history_max_days")]
    pub history_max_days: u32,

    #[serde(default = "default_search_max_results")]
    pub search_max_results: u32,

    #[serde(default = "default_filter_limit")]
    pub filter_default_limit: u32,

    #[serde(default = "default_filter_max_limit")]
    pub filter_max_limit: u32,
}

fn default_history_days() -> u32 {
    30
}
fn default_history_max_days() -> u32 {
    365
}
fn default_search_max_results() -> u32 {
    50
}
fn default_filter_limit() -> u32 {
    20
}
fn default_filter_max_limit() -> u32 {
    100
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            history_default_days: default_history_days(),
            history_max_days: default_history_max_days(),
            search_max_results: default_search_max_results(),
            filter_default_limit: default_filter_limit(),
            filter_max_limit: default_filter_max_limit(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.stockchat/config.toml).
    ///
    /// Environment variables override file settings:
    /// - `STOCKCHAT_API_KEY` (shared key, when the file has none)
    /// - `OPENAI_API_KEY` / `ANTHROPIC_API_KEY` (per provider)
    /// - `STOCKCHAT_PROVIDER`, `STOCKCHAT_MODEL`, `STOCKCHAT_DATABASE_URL`
    /// - `OLLAMA_HOST`
    ///
    /// `path` overrides the default location.
    pub fn load_with(path: Option<&Path>) -> Result<Self, ConfigError> {
        let default_path = Self::config_path();
        let mut config = Self::load_from(path.unwrap_or(&default_path))?;
        config.apply_overrides(|key| std::env::var(key).ok());
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

    /// Apply environment overrides read through `var`.
    pub fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if self.api_key.is_none() {
            self.api_key = var("STOCKCHAT_API_KEY");
        }

        for (provider, key_var) in [("openai", "OPENAI_API_KEY"), ("anthropic", "ANTHROPIC_API_KEY")] {
            if let Some(key) = var(key_var) {
                let entry = self.providers.entry(provider.to_string()).or_default();
                if entry.api_key.is_none() {
                    entry.api_key = Some(key);
                }
            }
        }

        if let Some(host) = var("OLLAMA_HOST") {
            let entry = self.providers.entry("ollama".to_string()).or_default();
            if entry.api_url.is_none() {
                entry.api_url = Some(normalize_host(&host));
            }
        }

        if let Some(provider) = var("STOCKCHAT_PROVIDER") {
            self.default_provider = provider.trim().to_lowercase();
        }

        if let Some(model) = var("STOCKCHAT_MODEL") {
            self.providers
                .entry(self.default_provider.clone())
                .or_default()
                .model = Some(model);
        }

        if let Some(url) = var("STOCKCHAT_DATABASE_URL") {
            self.database.url = url;
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".stockchat")
    }

    /// Get the default configuration file path.
    pub fn config_path() -> PathBuf {
        Self::config_dir().join("config.toml")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=2.0).contains(&self.llm.temperature) {
            return Err(ConfigError::ValidationError(
                "llm.temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if self.chat.max_turns == 0 {
            return Err(ConfigError::ValidationError(
                "chat.max_turns must be at least 1".into(),
            ));
        }

        if self.sql.default_limit == 0 {
            return Err(ConfigError::ValidationError(
                "sql.default_limit must be at least 1".into(),
            ));
        }

        if self.sql.default_limit > self.sql.max_limit {
            return Err(ConfigError::ValidationError(format!(
                "sql.default_limit ({}) exceeds sql.max_limit ({})",
                self.sql.default_limit, self.sql.max_limit
            )));
        }

        if !KNOWN_PROVIDERS.contains(&self.default_provider.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "unknown default_provider '{}', expected one of: {}",
                self.default_provider,
                KNOWN_PROVIDERS.join(", ")
            )));
        }

        Ok(())
    }

    /// Settings for one provider, falling back to an empty entry.
    pub fn provider(&self, name: &str) -> ProviderConfig {
        self.providers.get(name).cloned().unwrap_or_default()
    }

    /// The API key for `name`: its own key first, then the shared one.
    pub fn api_key_for(&self, name: &str) -> Option<String> {
        self.providers
            .get(name)
            .and_then(|p| p.api_key.clone())
            .or_else(|| self.api_key.clone())
    }

    /// Generate a default config TOML string (for `init` command).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            default_provider: default_provider(),
            llm: LlmConfig::default(),
            database: DatabaseConfig::default(),
            chat: ChatConfig::default(),
            sql: SqlConfig::default(),
            tools: ToolsConfig::default(),
            providers: HashMap::new(),
        }
    }
}

/// `OLLAMA_HOST` is often set without a scheme ("127.0.0.1:11434").
fn normalize_host(host: &str) -> String {
    let host = host.trim().trim_end_matches('/');
    if host.starts_with("http://") || host.starts_with("https://") {
        host.to_string()
    } else {
        format!("http://{host}")
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
