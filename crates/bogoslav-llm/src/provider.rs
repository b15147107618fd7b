use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LlmMessage {
    pub role: MessageRole,
    pub content: String,
}

impl LlmMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LlmRequest {
    pub model: String,
    pub messages: Vec<LlmMessage>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub system_prompt: Option<String>,
}

impl LlmRequest {
    /// Text of the last user message, if any.
    pub fn last_user_text(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == MessageRole::User)
            .map(|m| m.content.as_str())
    }

    /// Fold `System` messages into the system prompt, returning the prompt
    /// and the remaining conversation.
    pub(crate) fn split_system(self) -> (Option<String>, Vec<LlmMessage>) {
        let mut system_prompt = self.system_prompt;
        let messages = self
            .messages
            .into_iter()
            .filter_map(|m| match m.role {
                MessageRole::System => {
                    system_prompt = Some(m.content);
                    None
                }
                _ => Some(m),
            })
            .collect();
        (system_prompt, messages)
    }
}

#[derive(Debug, Clone)]
pub struct LlmResponse {
    pub content: String,
    pub role: MessageRole,
    pub finish_reason: Option<String>,
    pub usage: TokenUsage,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LlmStreamChunk {
    pub delta: String,
    pub is_complete: bool,
    pub finish_reason: Option<String>,
}

impl LlmStreamChunk {
    pub fn text(delta: impl Into<String>) -> Self {
        Self {
            delta: delta.into(),
            is_complete: false,
            finish_reason: None,
        }
    }

    pub fn done(finish_reason: impl Into<String>) -> Self {
        Self {
            delta: String::new(),
            is_complete: true,
            finish_reason: Some(finish_reason.into()),
        }
    }
}

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("missing API key: set {0}")]
    MissingApiKey(String),

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("request timed out")]
    Timeout,

    #[error("rate limited")]
    RateLimited { retry_after: Option<Duration> },

    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("parse error: {0}")]
    Parse(String),

    #[error("prompt blocked by provider: {0}")]
    Blocked(String),
}

impl LlmError {
    /// Whether retrying the same request may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Network(e) => !e.is_builder() && !e.is_decode(),
            Self::Timeout | Self::RateLimited { .. } => true,
            Self::Api { status, .. } => *status >= 500,
            Self::MissingApiKey(_) | Self::Parse(_) | Self::Blocked(_) => false,
        }
    }

    /// Server-requested delay before the next attempt.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }

    pub(crate) fn from_transport(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else {
            Self::Network(err)
        }
    }
}

pub type LlmStream = Pin<Box<dyn Stream<Item = Result<LlmStreamChunk, LlmError>> + Send>>;

#[async_trait]
pub trait LlmProvider: Send + Sync {
    fn name(&self) -> &str;
    fn model(&self) -> &str;

    async fn complete(&self, request: LlmRequest) -> Result<LlmResponse, LlmError>;
    async fn complete_stream(&self, request: LlmRequest) -> Result<LlmStream, LlmError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(LlmError::Timeout.is_transient());
        assert!(LlmError::RateLimited { retry_after: None }.is_transient());
        assert!(LlmError::Api {
            status: 503,
            message: "overloaded".into()
        }
        .is_transient());
        assert!(!LlmError::Api {
            status: 401,
            message: "bad key".into()
        }
        .is_transient());
        assert!(!LlmError::Parse("garbage".into()).is_transient());
        assert!(!LlmError::MissingApiKey("GEMINI_API_KEY".into()).is_transient());
    }

    #[test]
    fn test_split_system_prefers_inline_system_message() {
        let request = LlmRequest {
            model: "m".into(),
            messages: vec![
                LlmMessage {
                    role: MessageRole::System,
                    content: "be brief".into(),
                },
                LlmMessage::user("hi"),
            ],
            temperature: None,
            max_tokens: None,
            system_prompt: Some("default".into()),
        };
        let (system, messages) = request.split_system();
        assert_eq!(system.as_deref(), Some("be brief"));
        assert_eq!(messages, vec![LlmMessage::user("hi")]);
    }
}
