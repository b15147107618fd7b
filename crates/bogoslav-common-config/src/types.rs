//! Configuration types.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BogoslavConfig {
    /// Watched paths and change-event shaping.
    pub watch: WatchConfig,
    /// Remote model selection.
    pub model: ModelConfig,
    /// Retry policy for transient transport errors.
    pub retry: RetryConfig,
    /// Prompt assembly and dispatch policy.
    pub dispatch: DispatchConfig,
    /// Session history handling.
    pub session: SessionConfig,
    /// Logging defaults (overridden by CLI flags and environment).
    pub logging: LoggingConfig,
}

/// File watch configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    /// Files or directories to watch. Directories are watched recursively.
    pub paths: Vec<PathBuf>,
    /// Debounce window in milliseconds.
    pub debounce_ms: u64,
    /// Glob patterns for paths that never produce change events.
    pub ignore_patterns: Vec<String>,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            paths: Vec::new(),
            debounce_ms: 300,
            ignore_patterns: vec![
                "**/.git/**".to_string(),
                "**/target/**".to_string(),
                "**/*.tmp.*".to_string(),
                "**/*.swp".to_string(),
                "**/*~".to_string(),
            ],
        }
    }
}

/// Supported model providers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Google Gemini (`generateContent` API).
    #[default]
    Gemini,
    /// Anthropic Messages API.
    Anthropic,
}

impl ProviderKind {
    /// Environment variable holding the API key when none is configured.
    pub fn default_api_key_env(&self) -> &'static str {
        match self {
            Self::Gemini => "GEMINI_API_KEY",
            Self::Anthropic => "ANTHROPIC_API_KEY",
        }
    }

    /// Model used when none is configured.
    pub fn default_model(&self) -> &'static str {
        match self {
            Self::Gemini => "gemini-2.0-flash",
            Self::Anthropic => "claude-sonnet-4-20250514",
        }
    }

    /// Parse from a CLI or config string.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "gemini" | "google" => Some(Self::Gemini),
            "anthropic" | "claude" => Some(Self::Anthropic),
            _ => None,
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Gemini => write!(f, "gemini"),
            Self::Anthropic => write!(f, "anthropic"),
        }
    }
}

/// Remote model configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Provider to talk to.
    pub provider: ProviderKind,
    /// Model name. Empty means the provider default.
    pub model: String,
    /// Environment variable holding the API key. Empty means the provider default.
    pub api_key_env: String,
    /// Override of the provider base URL (proxies, tests).
    pub base_url: Option<String>,
    /// Maximum output tokens per response.
    pub max_tokens: u32,
    /// Sampling temperature.
    pub temperature: Option<f32>,
    /// System prompt sent with every request.
    pub system_prompt: String,
    /// Whole-request timeout in seconds.
    pub request_timeout_secs: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: ProviderKind::default(),
            model: String::new(),
            api_key_env: String::new(),
            base_url: None,
            max_tokens: 4096,
            temperature: None,
            system_prompt: "You are an assistant embedded in a text file. \
                Answer the instruction you are given concisely. \
                Reply with plain text that can be inserted into the file as is."
                .to_string(),
            request_timeout_secs: 120,
        }
    }
}

impl ModelConfig {
    /// Effective model name.
    pub fn model_name(&self) -> &str {
        if self.model.trim().is_empty() {
            self.provider.default_model()
        } else {
            &self.model
        }
    }

    /// Effective API key variable name.
    pub fn api_key_var(&self) -> &str {
        if self.api_key_env.trim().is_empty() {
            self.provider.default_api_key_env()
        } else {
            &self.api_key_env
        }
    }
}

/// Retry policy for transient transport failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the initial attempt.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub base_delay_ms: u64,
    /// Upper bound for any single delay.
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 500,
            max_delay_ms: 8_000,
        }
    }
}

/// Prompt assembly and dispatch policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Dispatch unanswered directives found when a file is first loaded.
    pub dispatch_existing: bool,
    /// Include the document text preceding an inline instruction.
    pub include_preceding_text: bool,
    /// Upper bound for embedded context (preceding text and references).
    pub max_context_bytes: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            dispatch_existing: true,
            include_preceding_text: true,
            max_context_bytes: 64 * 1024,
        }
    }
}

/// Session configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Directory for session transcripts. No persistence when unset.
    pub persist_dir: Option<PathBuf>,
}

/// Logging defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Level name (trace, debug, info, warn, error).
    pub level: String,
    /// Output format (pretty, compact, json).
    pub format: String,
    /// Optional log file.
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
            format: "pretty".to_string(),
            file: None,
        }
    }
}
