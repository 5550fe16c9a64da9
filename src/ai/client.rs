//! Streaming LLM client for OpenAI-compatible chat-completion APIs.
//!
//! Issues one streaming completion and forwards incremental text deltas to
//! the caller as they arrive, accumulating the full text and the final usage
//! metadata. Provider internals never leak past this module: errors are
//! collapsed to short human-readable messages.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::utils::{ApiError, ApiResult};

/// Seam between the stream proxy and the LLM provider, so tests can feed a
/// scripted token stream without the network.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    async fn stream_completion(
        &self,
        messages: Vec<ChatMessage>,
        cancel: &CancellationToken,
        on_delta: &mut (dyn for<'a> FnMut(&'a str) + Send),
    ) -> ApiResult<StreamOutcome>;
}

#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_base: String,
    pub api_key: String,
    pub model: String,
    pub max_tokens: u32,
    pub request_timeout: Duration,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: "system".to_string(), content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: "user".to_string(), content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: "assistant".to_string(), content: content.into() }
    }
}

#[derive(Debug, Default, Clone)]
pub struct StreamOutcome {
    pub content: String,
    pub prompt_tokens: i32,
    pub completion_tokens: i32,
    /// Set when the stream stopped because the caller cancelled.
    pub cancelled: bool,
}

pub struct LlmClient {
    http: Client,
    config: LlmConfig,
}

impl LlmClient {
    pub fn new(config: LlmConfig) -> Self {
        let http = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .unwrap_or_default();
        Self { http, config }
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    /// Stream one completion. `on_delta` observes each text delta in arrival
    /// order. On cancellation the connection is dropped promptly and the
    /// partial accumulation is returned with `cancelled` set.
    pub async fn stream_chat<F>(
        &self,
        messages: Vec<ChatMessage>,
        cancel: &CancellationToken,
        mut on_delta: F,
    ) -> ApiResult<StreamOutcome>
    where
        F: FnMut(&str) + Send,
    {
        let url = format!(
            "{}/chat/completions",
            self.config.api_base.trim_end_matches('/')
        );
        let request = StreamRequest {
            model: self.config.model.clone(),
            messages,
            max_tokens: Some(self.config.max_tokens),
            stream: true,
            stream_options: StreamOptions { include_usage: true },
        };

        let response = self
            .http
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .json(&request)
            .send()
            .await
            .map_err(|err| {
                if err.is_timeout() {
                    ApiError::internal("LLM provider timed out")
                } else {
                    tracing::warn!(error = %err, "LLM request failed");
                    ApiError::internal("LLM provider is unreachable")
                }
            })?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after_secs = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok())
                .unwrap_or(60);
            return Err(ApiError::RateLimited { retry_after_secs });
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(%status, body, "LLM provider rejected the request");
            return Err(ApiError::internal(format!("LLM provider error ({})", status)));
        }

        let mut outcome = StreamOutcome::default();
        let mut stream = response.bytes_stream();
        let mut buffer = String::new();

        loop {
            let chunk = tokio::select! {
                chunk = stream.next() => match chunk {
                    Some(Ok(chunk)) => chunk,
                    Some(Err(err)) => {
                        tracing::warn!(error = %err, "LLM stream read failed");
                        return Err(ApiError::internal("LLM stream interrupted"));
                    }
                    None => break,
                },
                () = cancel.cancelled() => {
                    outcome.cancelled = true;
                    return Ok(outcome);
                }
            };

            buffer.push_str(&String::from_utf8_lossy(&chunk));

            // Process complete SSE lines; a partial line stays buffered.
            while let Some(line_end) = buffer.find('\n') {
                let line = buffer[..line_end].trim().to_string();
                buffer = buffer[line_end + 1..].to_string();

                if line.is_empty() || line == "data: [DONE]" {
                    continue;
                }
                let Some(json) = line.strip_prefix("data: ") else { continue };
                let Ok(chunk) = serde_json::from_str::<StreamChunk>(json) else {
                    continue;
                };

                if let Some(choices) = chunk.choices {
                    for choice in choices {
                        if let Some(content) = choice.delta.and_then(|d| d.content) {
                            if !content.is_empty() {
                                outcome.content.push_str(&content);
                                on_delta(&content);
                            }
                        }
                    }
                }
                if let Some(usage) = chunk.usage {
                    outcome.prompt_tokens = usage.prompt_tokens;
                    outcome.completion_tokens = usage.completion_tokens;
                }
            }
        }

        Ok(outcome)
    }
}

#[async_trait]
impl CompletionBackend for LlmClient {
    async fn stream_completion(
        &self,
        messages: Vec<ChatMessage>,
        cancel: &CancellationToken,
        on_delta: &mut (dyn for<'a> FnMut(&'a str) + Send),
    ) -> ApiResult<StreamOutcome> {
        self.stream_chat(messages, cancel, |delta| on_delta(delta)).await
    }
}

#[derive(Debug, Serialize)]
struct StreamRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    stream: bool,
    stream_options: StreamOptions,
}

#[derive(Debug, Serialize)]
struct StreamOptions {
    include_usage: bool,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    choices: Option<Vec<StreamChoice>>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: Option<StreamDelta>,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    prompt_tokens: i32,
    completion_tokens: i32,
}
