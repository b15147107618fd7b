use crate::http::{error_from_response, SseBuffer};
use crate::provider::*;
use async_stream::stream;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};

pub const ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com";
const ANTHROPIC_VERSION: &str = "2023-06-01";

pub struct AnthropicProvider {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl AnthropicProvider {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            model: model.into(),
            base_url: ANTHROPIC_BASE_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_client(mut self, client: Client) -> Self {
        self.client = client;
        self
    }

    fn build_request(&self, request: LlmRequest, stream: bool) -> AnthropicRequest {
        let temperature = request.temperature;
        let max_tokens = request.max_tokens.unwrap_or(4096);
        let model = if request.model.is_empty() {
            self.model.clone()
        } else {
            request.model.clone()
        };
        let (system, messages) = request.split_system();

        AnthropicRequest {
            model,
            max_tokens,
            messages: messages
                .into_iter()
                .map(|m| AnthropicMessage {
                    role: match m.role {
                        MessageRole::Assistant => "assistant",
                        _ => "user",
                    }
                    .to_string(),
                    content: m.content,
                })
                .collect(),
            system: system.filter(|s| !s.trim().is_empty()),
            temperature,
            stream,
        }
    }

    async fn send(&self, body: &AnthropicRequest) -> Result<reqwest::Response, LlmError> {
        let response = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(body)
            .send()
            .await
            .map_err(LlmError::from_transport)?;

        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }
        Ok(response)
    }
}

#[derive(Debug, Serialize)]
struct AnthropicRequest {
    model: String,
    max_tokens: u32,
    messages: Vec<AnthropicMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    stream: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct AnthropicMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicContent>,
    usage: Option<AnthropicUsage>,
    stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AnthropicContent {
    #[serde(rename = "type")]
    content_type: String,
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct AnthropicUsage {
    #[serde(default)]
    input_tokens: u32,
    #[serde(default)]
    output_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct AnthropicStreamEvent {
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default)]
    delta: Option<AnthropicDelta>,
    #[serde(default)]
    error: Option<AnthropicStreamError>,
}

#[derive(Debug, Deserialize)]
struct AnthropicDelta {
    text: Option<String>,
    stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AnthropicStreamError {
    #[serde(rename = "type")]
    error_type: String,
    message: String,
}

impl AnthropicStreamError {
    fn into_error(self) -> LlmError {
        // Mid-stream errors carry no HTTP status.
        let status = match self.error_type.as_str() {
            "overloaded_error" => 529,
            "rate_limit_error" => return LlmError::RateLimited { retry_after: None },
            "api_error" => 500,
            _ => 400,
        };
        LlmError::Api {
            status,
            message: format!("{}: {}", self.error_type, self.message),
        }
    }
}

#[async_trait::async_trait]
impl LlmProvider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn complete_stream(&self, request: LlmRequest) -> Result<LlmStream, LlmError> {
        let body = self.build_request(request, true);
        let response = self.send(&body).await?;

        let stream = stream! {
            let mut reader = response.bytes_stream();
            let mut sse = SseBuffer::default();
            let mut stop_reason = None;

            while let Some(chunk) = reader.next().await {
                let chunk = match chunk {
                    Ok(c) => c,
                    Err(e) => {
                        yield Err(LlmError::from_transport(e));
                        return;
                    }
                };

                for payload in sse.push(&chunk) {
                    let Ok(event) = serde_json::from_str::<AnthropicStreamEvent>(&payload) else {
                        continue;
                    };
                    match event.event_type.as_str() {
                        "content_block_delta" => {
                            if let Some(text) = event.delta.and_then(|d| d.text) {
                                yield Ok(LlmStreamChunk::text(text));
                            }
                        }
                        "message_delta" => {
                            if let Some(reason) = event.delta.and_then(|d| d.stop_reason) {
                                stop_reason = Some(reason);
                            }
                        }
                        "message_stop" => {
                            yield Ok(LlmStreamChunk::done(
                                stop_reason.take().unwrap_or_else(|| "end_turn".to_string()),
                            ));
                            return;
                        }
                        "error" => {
                            if let Some(error) = event.error {
                                yield Err(error.into_error());
                                return;
                            }
                        }
                        _ => {}
                    }
                }
            }

            yield Ok(LlmStreamChunk::done(
                stop_reason.unwrap_or_else(|| "end_of_stream".to_string()),
            ));
        };

        Ok(Box::pin(stream))
    }

    async fn complete(&self, request: LlmRequest) -> Result<LlmResponse, LlmError> {
        let body = self.build_request(request, false);
        let response = self.send(&body).await?;

        let anthropic_response: AnthropicResponse = response
            .json()
            .await
            .map_err(|e| LlmError::Parse(e.to_string()))?;

        let content = anthropic_response
            .content
            .into_iter()
            .filter(|c| c.content_type == "text")
            .map(|c| c.text)
            .collect::<Vec<_>>()
            .join("");

        let usage = anthropic_response
            .usage
            .map(|u| TokenUsage {
                input_tokens: u.input_tokens,
                output_tokens: u.output_tokens,
            })
            .unwrap_or_default();

        Ok(LlmResponse {
            content,
            role: MessageRole::Assistant,
            finish_reason: anthropic_response.stop_reason,
            usage,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_serialization() {
        let provider = AnthropicProvider::new("test-key", "claude-sonnet-4-20250514");
        let request = LlmRequest {
            model: String::new(),
            messages: vec![LlmMessage::user("Hello")],
            temperature: Some(0.2),
            max_tokens: None,
            system_prompt: Some("You are a helpful assistant".into()),
        };

        let json = serde_json::to_value(provider.build_request(request, false)).unwrap();
        assert_eq!(json["model"], "claude-sonnet-4-20250514");
        assert_eq!(json["max_tokens"], 4096);
        assert_eq!(json["messages"][0]["role"], "user");
        assert_eq!(json["system"], "You are a helpful assistant");
        assert_eq!(json["stream"], false);
    }

    #[test]
    fn test_stream_event_deserialization() {
        let event_json = r#"{"type": "content_block_delta", "index": 0, "delta": {"type": "text_delta", "text": "Hello"}}"#;
        let event: AnthropicStreamEvent = serde_json::from_str(event_json).unwrap();
        assert_eq!(event.event_type, "content_block_delta");
        assert_eq!(event.delta.unwrap().text.unwrap(), "Hello");

        let stop_json = r#"{"type": "message_stop"}"#;
        let stop_event: AnthropicStreamEvent = serde_json::from_str(stop_json).unwrap();
        assert_eq!(stop_event.event_type, "message_stop");
    }

    #[test]
    fn test_stream_error_mapping() {
        let overloaded = AnthropicStreamError {
            error_type: "overloaded_error".into(),
            message: "Overloaded".into(),
        };
        assert!(overloaded.into_error().is_transient());

        let invalid = AnthropicStreamError {
            error_type: "invalid_request_error".into(),
            message: "bad".into(),
        };
        assert!(!invalid.into_error().is_transient());
    }
}
