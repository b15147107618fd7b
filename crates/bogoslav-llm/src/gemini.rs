use crate::http::{error_from_response, SseBuffer};
use crate::provider::*;
use async_stream::stream;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};

pub const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com";

/// Google Gemini `generateContent` provider.
pub struct GeminiProvider {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl GeminiProvider {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            model: model.into(),
            base_url: GEMINI_BASE_URL.to_string(),
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

    /// `request.model` wins over the configured model when set.
    fn endpoint(&self, request: &LlmRequest, method: &str) -> String {
        let model = if request.model.is_empty() {
            &self.model
        } else {
            &request.model
        };
        format!("{}/v1beta/models/{}:{}", self.base_url, model, method)
    }

    fn build_request(request: LlmRequest) -> GenerateContentRequest {
        let temperature = request.temperature;
        let max_output_tokens = request.max_tokens;
        let (system_prompt, messages) = request.split_system();

        let contents = messages
            .into_iter()
            .map(|m| Content {
                role: Some(
                    match m.role {
                        MessageRole::Assistant => "model",
                        _ => "user",
                    }
                    .to_string(),
                ),
                parts: vec![Part { text: m.content }],
            })
            .collect();

        let generation_config = (temperature.is_some() || max_output_tokens.is_some()).then_some(
            GenerationConfig {
                temperature,
                max_output_tokens,
            },
        );

        GenerateContentRequest {
            contents,
            system_instruction: system_prompt
                .filter(|s| !s.trim().is_empty())
                .map(|text| Content {
                    role: None,
                    parts: vec![Part { text }],
                }),
            generation_config,
        }
    }

    async fn post(&self, url: String, body: &GenerateContentRequest) -> Result<reqwest::Response, LlmError> {
        let response = self
            .client
            .post(url)
            .header("x-goog-api-key", &self.api_key)
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
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

#[derive(Debug, Serialize)]
struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
struct Part {
    text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    usage_metadata: Option<UsageMetadata>,
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<CandidateContent>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<PartResponse>,
}

#[derive(Debug, Deserialize)]
struct PartResponse {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: u32,
    #[serde(default)]
    candidates_token_count: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

impl GenerateContentResponse {
    fn text(&self) -> String {
        self.candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .map(|content| {
                content
                    .parts
                    .iter()
                    .filter_map(|p| p.text.as_deref())
                    .collect::<String>()
            })
            .unwrap_or_default()
    }

    fn finish_reason(&self) -> Option<String> {
        self.candidates.first().and_then(|c| c.finish_reason.clone())
    }

    fn blocked(&self) -> Option<LlmError> {
        let reason = self.prompt_feedback.as_ref()?.block_reason.clone()?;
        Some(LlmError::Blocked(reason))
    }
}

#[async_trait::async_trait]
impl LlmProvider for GeminiProvider {
    fn name(&self) -> &str {
        "gemini"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: LlmRequest) -> Result<LlmResponse, LlmError> {
        let url = self.endpoint(&request, "generateContent");
        let body = Self::build_request(request);
        let response = self.post(url, &body).await?;

        let parsed: GenerateContentResponse = response
            .json()
            .await
            .map_err(|e| LlmError::Parse(e.to_string()))?;
        if let Some(err) = parsed.blocked() {
            return Err(err);
        }

        let usage = parsed
            .usage_metadata
            .as_ref()
            .map(|u| TokenUsage {
                input_tokens: u.prompt_token_count,
                output_tokens: u.candidates_token_count,
            })
            .unwrap_or_default();

        Ok(LlmResponse {
            content: parsed.text(),
            role: MessageRole::Assistant,
            finish_reason: parsed.finish_reason(),
            usage,
        })
    }

    async fn complete_stream(&self, request: LlmRequest) -> Result<LlmStream, LlmError> {
        let url = format!("{}?alt=sse", self.endpoint(&request, "streamGenerateContent"));
        let body = Self::build_request(request);
        let response = self.post(url, &body).await?;

        let stream = stream! {
            let mut reader = response.bytes_stream();
            let mut sse = SseBuffer::default();

            while let Some(chunk) = reader.next().await {
                let chunk = match chunk {
                    Ok(c) => c,
                    Err(e) => {
                        yield Err(LlmError::from_transport(e));
                        return;
                    }
                };

                for payload in sse.push(&chunk) {
                    let event: GenerateContentResponse = match serde_json::from_str(&payload) {
                        Ok(event) => event,
                        Err(e) => {
                            yield Err(LlmError::Parse(e.to_string()));
                            return;
                        }
                    };
                    if let Some(err) = event.blocked() {
                        yield Err(err);
                        return;
                    }

                    let text = event.text();
                    if !text.is_empty() {
                        yield Ok(LlmStreamChunk::text(text));
                    }
                    if let Some(reason) = event.finish_reason() {
                        yield Ok(LlmStreamChunk::done(reason));
                        return;
                    }
                }
            }

            yield Ok(LlmStreamChunk::done("end_of_stream"));
        };

        Ok(Box::pin(stream))
    }
}
