//! Helpers shared by the HTTP providers.

use crate::provider::LlmError;
use reqwest::header::HeaderValue;
use reqwest::{Response, StatusCode};
use serde::Deserialize;
use std::time::Duration;

/// Accumulates a `text/event-stream` body and splits it into `data:`
/// payloads.
#[derive(Debug, Default)]
pub(crate) struct SseBuffer {
    buffer: String,
}

impl SseBuffer {
    /// Append raw bytes and return the payloads of every complete event.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buffer
            .push_str(&String::from_utf8_lossy(bytes).replace('\r', ""));

        let mut payloads = Vec::new();
        while let Some(idx) = self.buffer.find("\n\n") {
            let event: String = self.buffer.drain(..idx + 2).collect();
            let data: Vec<&str> = event
                .lines()
                .filter_map(|line| line.strip_prefix("data:"))
                .map(|data| data.strip_prefix(' ').unwrap_or(data))
                .collect();
            if !data.is_empty() {
                payloads.push(data.join("\n"));
            }
        }
        payloads
    }
}

#[derive(Deserialize)]
struct ErrorWrapper {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: Option<String>,
    status: Option<String>,
    #[serde(rename = "type")]
    error_type: Option<String>,
}

/// Turn a non-success response into an [`LlmError`].
pub(crate) async fn error_from_response(response: Response) -> LlmError {
    let status = response.status();
    let retry_after = parse_retry_after(response.headers().get("retry-after"));
    let body = response.text().await.unwrap_or_default();
    map_http_error(status, &body, retry_after)
}

pub(crate) fn map_http_error(
    status: StatusCode,
    body: &str,
    retry_after: Option<Duration>,
) -> LlmError {
    if status == StatusCode::TOO_MANY_REQUESTS {
        return LlmError::RateLimited { retry_after };
    }

    let message = serde_json::from_str::<ErrorWrapper>(body)
        .ok()
        .and_then(|wrapper| {
            let label = wrapper.error.status.or(wrapper.error.error_type);
            let message = wrapper.error.message?;
            Some(match label {
                Some(label) if !label.is_empty() => format!("{label}: {message}"),
                _ => message,
            })
        })
        .unwrap_or_else(|| body.trim().to_string());

    LlmError::Api {
        status: status.as_u16(),
        message,
    }
}

fn parse_retry_after(header: Option<&HeaderValue>) -> Option<Duration> {
    let value = header?.to_str().ok()?;
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}
