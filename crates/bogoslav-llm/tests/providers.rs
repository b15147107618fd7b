//! HTTP provider tests against a local mock server.

use bogoslav_llm::{
    AnthropicProvider, GeminiProvider, LlmError, LlmMessage, LlmProvider, LlmRequest,
};
use futures::StreamExt;
use mockito::Matcher;

fn request() -> LlmRequest {
    LlmRequest {
        model: String::new(),
        messages: vec![LlmMessage::user("What is 2+2?")],
        temperature: None,
        max_tokens: Some(64),
        system_prompt: Some("Be terse.".into()),
    }
}

async fn collect_text(provider: &dyn LlmProvider) -> Result<(String, Option<String>), LlmError> {
    let mut stream = provider.complete_stream(request()).await?;
    let mut text = String::new();
    let mut finish = None;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        text.push_str(&chunk.delta);
        if chunk.is_complete {
            finish = chunk.finish_reason;
        }
    }
    Ok((text, finish))
}

#[tokio::test]
async fn test_gemini_complete() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/v1beta/models/gemini-2.0-flash:generateContent")
        .match_header("x-goog-api-key", "test-key")
        .match_body(Matcher::PartialJsonString(
            r#"{"contents":[{"role":"user","parts":[{"text":"What is 2+2?"}]}]}"#.into(),
        ))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            r#"{"candidates":[{"content":{"role":"model","parts":[{"text":"4"}]},"finishReason":"STOP"}],
                "usageMetadata":{"promptTokenCount":7,"candidatesTokenCount":1}}"#,
        )
        .create_async()
        .await;

    let provider = GeminiProvider::new("test-key", "gemini-2.0-flash").with_base_url(server.url());
    let response = provider.complete(request()).await.unwrap();

    assert_eq!(response.content, "4");
    assert_eq!(response.finish_reason.as_deref(), Some("STOP"));
    assert_eq!(response.usage.input_tokens, 7);
    mock.assert_async().await;
}

#[tokio::test]
async fn test_gemini_stream() {
    let mut server = mockito::Server::new_async().await;
    let body = concat!(
        "data: {\"candidates\":[{\"content\":{\"role\":\"model\",\"parts\":[{\"text\":\"The answer \"}]}}]}\r\n\r\n",
        "data: {\"candidates\":[{\"content\":{\"role\":\"model\",\"parts\":[{\"text\":\"is 4.\"}]},\"finishReason\":\"STOP\"}]}\r\n\r\n",
    );
    let mock = server
        .mock("POST", Matcher::Regex(":streamGenerateContent".into()))
        .match_query(Matcher::UrlEncoded("alt".into(), "sse".into()))
        .with_status(200)
        .with_header("content-type", "text/event-stream")
        .with_body(body)
        .create_async()
        .await;

    let provider = GeminiProvider::new("test-key", "gemini-2.0-flash").with_base_url(server.url());
    let (text, finish) = collect_text(&provider).await.unwrap();

    assert_eq!(text, "The answer is 4.");
    assert_eq!(finish.as_deref(), Some("STOP"));
    mock.assert_async().await;
}

#[tokio::test]
async fn test_gemini_errors_are_classified() {
    let mut server = mockito::Server::new_async().await;
    let _unavailable = server
        .mock("POST", "/v1beta/models/down:generateContent")
        .with_status(503)
        .with_body(r#"{"error":{"code":503,"message":"The model is overloaded.","status":"UNAVAILABLE"}}"#)
        .create_async()
        .await;
    let _limited = server
        .mock("POST", "/v1beta/models/busy:generateContent")
        .with_status(429)
        .with_header("retry-after", "3")
        .create_async()
        .await;
    let _denied = server
        .mock("POST", "/v1beta/models/denied:generateContent")
        .with_status(403)
        .with_body(r#"{"error":{"code":403,"message":"Permission denied","status":"PERMISSION_DENIED"}}"#)
        .create_async()
        .await;

    let down = GeminiProvider::new("k", "down").with_base_url(server.url());
    let err = down.complete(request()).await.unwrap_err();
    assert!(err.is_transient());
    assert!(err.to_string().contains("UNAVAILABLE"));

    let busy = GeminiProvider::new("k", "busy").with_base_url(server.url());
    let err = busy.complete(request()).await.unwrap_err();
    assert_eq!(err.retry_after(), Some(std::time::Duration::from_secs(3)));

    let denied = GeminiProvider::new("k", "denied").with_base_url(server.url());
    let err = denied.complete(request()).await.unwrap_err();
    assert!(!err.is_transient());
}

#[tokio::test]
async fn test_anthropic_stream() {
    let mut server = mockito::Server::new_async().await;
    let body = concat!(
        "event: message_start\n",
        "data: {\"type\":\"message_start\",\"message\":{\"id\":\"msg_1\"}}\n\n",
        "event: content_block_delta\n",
        "data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"Hello\"}}\n\n",
        "event: content_block_delta\n",
        "data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\" there\"}}\n\n",
        "event: message_delta\n",
        "data: {\"type\":\"message_delta\",\"delta\":{\"stop_reason\":\"max_tokens\"}}\n\n",
        "event: message_stop\n",
        "data: {\"type\":\"message_stop\"}\n\n",
    );
    let mock = server
        .mock("POST", "/v1/messages")
        .match_header("x-api-key", "test-key")
        .match_header("anthropic-version", "2023-06-01")
        .match_body(Matcher::PartialJsonString(
            r#"{"stream":true,"system":"Be terse.","max_tokens":64}"#.into(),
        ))
        .with_status(200)
        .with_header("content-type", "text/event-stream")
        .with_body(body)
        .create_async()
        .await;

    let provider =
        AnthropicProvider::new("test-key", "claude-sonnet-4-20250514").with_base_url(server.url());
    let (text, finish) = collect_text(&provider).await.unwrap();

    assert_eq!(text, "Hello there");
    assert_eq!(finish.as_deref(), Some("max_tokens"));
    mock.assert_async().await;
}

#[tokio::test]
async fn test_anthropic_complete() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/v1/messages")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            r#"{"type":"message","content":[{"type":"text","text":"4"}],
                "stop_reason":"end_turn","usage":{"input_tokens":10,"output_tokens":1}}"#,
        )
        .create_async()
        .await;

    let provider =
        AnthropicProvider::new("test-key", "claude-sonnet-4-20250514").with_base_url(server.url());
    let response = provider.complete(request()).await.unwrap();

    assert_eq!(response.content, "4");
    assert_eq!(response.usage.output_tokens, 1);
    mock.assert_async().await;
}
