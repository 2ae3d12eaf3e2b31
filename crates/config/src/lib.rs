//! Configuration loading, validation, and management for ragchat.
//!
//! Loads configuration from `~/.ragchat/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use ragchat_core::Expiration;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// The root configuration structure.
///
/// Maps directly to `~/.ragchat/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// API key for the completion engine
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Completion engine settings
    #[serde(default)]
    pub provider: ProviderConfig,

    /// Prompt budgeting and exchange settings
    #[serde(default)]
    pub chat: ChatConfig,

    /// Conversation history storage settings
    #[serde(default)]
    pub conversation: ConversationConfig,
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
            .field("chat", &self.chat)
            .field("conversation", &self.conversation)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default = "default_provider_name")]
    pub name: String,

    #[serde(default = "default_api_url")]
    pub api_url: String,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Path to a `tokenizer.json` for exact token counting
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokenizer_path: Option<PathBuf>,
}

fn default_provider_name() -> String {
    "openai".into()
}
fn default_api_url() -> String {
    "https://api.openai.com/v1".into()
}
fn default_model() -> String {
    "gpt-4o-mini".into()
}
fn default_temperature() -> f32 {
    0.7
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            name: default_provider_name(),
            api_url: default_api_url(),
            model: default_model(),
            temperature: default_temperature(),
            tokenizer_path: None,
        }
    }
}

/// What a second exchange on a busy conversation does.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BusyPolicy {
    /// Wait for the in-flight exchange to finish.
    #[default]
    Queue,
    /// Fail immediately with `ConversationBusy`.
    Reject,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatConfig {
    /// Context window of the model (prompt + answer)
    #[serde(default = "default_max_input_tokens")]
    pub max_input_tokens: usize,

    /// Tokens reserved for the answer
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,

    /// Number of candidate chunks requested from the chunk source
    #[serde(default = "default_max_relevant_chunks")]
    pub max_relevant_chunks: usize,

    /// Token cap on the history replayed into the reformulation prompt
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reformulation_history_tokens: Option<usize>,

    #[serde(default)]
    pub on_busy: BusyPolicy,
}

fn default_max_input_tokens() -> usize {
    16_385
}
fn default_max_output_tokens() -> u32 {
    800
}
fn default_max_relevant_chunks() -> usize {
    5
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            max_input_tokens: default_max_input_tokens(),
            max_output_tokens: default_max_output_tokens(),
            max_relevant_chunks: default_max_relevant_chunks(),
            reformulation_history_tokens: None,
            on_busy: BusyPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpirationMode {
    #[default]
    Sliding,
    Absolute,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationConfig {
    /// Messages kept per conversation; older ones are dropped first
    #[serde(default = "default_max_messages")]
    pub max_messages: usize,

    #[serde(default)]
    pub expiration: ExpirationMode,

    /// Lifetime of a conversation in seconds
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
}

fn default_max_messages() -> usize {
    20
}
fn default_ttl_secs() -> u64 {
    3600
}

impl ConversationConfig {
    /// The cache expiration policy this section describes.
    pub fn expiration(&self) -> Expiration {
        let ttl = Duration::from_secs(self.ttl_secs);
        match self.expiration {
            ExpirationMode::Sliding => Expiration::Sliding(ttl),
            ExpirationMode::Absolute => Expiration::Absolute(ttl),
        }
    }
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            max_messages: default_max_messages(),
            expiration: ExpirationMode::default(),
            ttl_secs: default_ttl_secs(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.ragchat/config.toml).
    ///
    /// Also checks environment variables:
    /// - `RAGCHAT_API_KEY`, then `OPENAI_API_KEY`, when the file sets no `api_key`
    /// - `RAGCHAT_MODEL`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;

        if config.api_key.is_none() {
            config.api_key = std::env::var("RAGCHAT_API_KEY")
                .ok()
                .or_else(|| std::env::var("OPENAI_API_KEY").ok());
        }

        if let Ok(model) = std::env::var("RAGCHAT_MODEL") {
            config.provider.model = model;
        }

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
        dirs_home().join(".ragchat")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=2.0).contains(&self.provider.temperature) {
            return Err(ConfigError::ValidationError(
                "provider.temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if self.chat.max_output_tokens as usize >= self.chat.max_input_tokens {
            return Err(ConfigError::ValidationError(
                "chat.max_output_tokens must be smaller than chat.max_input_tokens".into(),
            ));
        }

        if self.chat.max_relevant_chunks == 0 {
            return Err(ConfigError::ValidationError(
                "chat.max_relevant_chunks must be > 0".into(),
            ));
        }

        if self.conversation.max_messages == 0 {
            return Err(ConfigError::ValidationError(
                "conversation.max_messages must be > 0".into(),
            ));
        }

        if self.conversation.ttl_secs == 0 {
            return Err(ConfigError::ValidationError(
                "conversation.ttl_secs must be > 0".into(),
            ));
        }

        Ok(())
    }

    /// Check if an API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            provider: ProviderConfig::default(),
            chat: ChatConfig::default(),
            conversation: ConversationConfig::default(),
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

impl From<ConfigError> for ragchat_core::Error {
    fn from(e: ConfigError) -> Self {
        ragchat_core::Error::Config {
            message: e.to_string(),
        }
    }
}
