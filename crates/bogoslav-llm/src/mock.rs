//! Scripted provider for tests.

use crate::provider::*;
use async_stream::stream;
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

/// One scripted answer.
#[derive(Debug, Clone)]
pub enum MockReply {
    /// Streamed as a single chunk.
    Text(String),
    /// Streamed chunk by chunk.
    Chunks(Vec<String>),
    /// The request fails before the stream opens.
    Fail(MockFailure),
}

/// Failures a [`MockReply`] can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockFailure {
    Timeout,
    RateLimited,
    Status(u16),
}

impl MockFailure {
    fn into_error(self) -> LlmError {
        match self {
            Self::Timeout => LlmError::Timeout,
            Self::RateLimited => LlmError::RateLimited { retry_after: None },
            Self::Status(status) => LlmError::Api {
                status,
                message: "scripted failure".to_string(),
            },
        }
    }
}

/// Provider answering from a script, recording every request.
///
/// Once the script is exhausted each request is answered with
/// `echo: <last user message>`.
pub struct MockProvider {
    model: String,
    delay: Duration,
    script: Mutex<VecDeque<MockReply>>,
    requests: Mutex<Vec<LlmRequest>>,
}

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MockProvider {
    pub fn new() -> Self {
        Self {
            model: "mock-model".to_string(),
            delay: Duration::ZERO,
            script: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Wait this long after the stream opens before the first chunk.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_reply(self, reply: MockReply) -> Self {
        self.push(reply);
        self
    }

    pub fn with_text(self, text: impl Into<String>) -> Self {
        self.with_reply(MockReply::Text(text.into()))
    }

    /// Queue another reply.
    pub fn push(&self, reply: MockReply) {
        locked(&self.script).push_back(reply);
    }

    /// Requests received so far, oldest first.
    pub fn requests(&self) -> Vec<LlmRequest> {
        locked(&self.requests).clone()
    }

    pub fn call_count(&self) -> usize {
        locked(&self.requests).len()
    }

    fn next_reply(&self, request: &LlmRequest) -> MockReply {
        locked(&self.requests).push(request.clone());
        locked(&self.script).pop_front().unwrap_or_else(|| {
            MockReply::Text(format!(
                "echo: {}",
                request.last_user_text().unwrap_or_default()
            ))
        })
    }
}

#[async_trait::async_trait]
impl LlmProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: LlmRequest) -> Result<LlmResponse, LlmError> {
        let content = match self.next_reply(&request) {
            MockReply::Text(text) => text,
            MockReply::Chunks(chunks) => chunks.concat(),
            MockReply::Fail(failure) => return Err(failure.into_error()),
        };
        tokio::time::sleep(self.delay).await;
        Ok(LlmResponse {
            content,
            role: MessageRole::Assistant,
            finish_reason: Some("stop".to_string()),
            usage: TokenUsage::default(),
        })
    }

    async fn complete_stream(&self, request: LlmRequest) -> Result<LlmStream, LlmError> {
        let chunks = match self.next_reply(&request) {
            MockReply::Text(text) => vec![text],
            MockReply::Chunks(chunks) => chunks,
            MockReply::Fail(failure) => return Err(failure.into_error()),
        };
        let delay = self.delay;

        let stream = stream! {
            tokio::time::sleep(delay).await;
            for chunk in chunks {
                yield Ok(LlmStreamChunk::text(chunk));
            }
            yield Ok(LlmStreamChunk::done("stop"));
        };
        Ok(Box::pin(stream))
    }
}
