//! OpenAI-compatible chat-completion transport.
//!
//! One small client covers both consumers: the summarizer issues
//! non-streaming completions, the default chat runner consumes the SSE
//! stream. Works against any endpoint speaking the OpenAI chat protocol
//! (OpenAI, OpenRouter, LM Studio, Ollama's `/v1`, ...).

pub mod summarizer;

use futures::stream::{Stream, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(90);

/// Transport-layer error.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("api error (status {status}): {message}")]
    Api { status: u16, message: String },
    #[error("api key contains invalid characters")]
    InvalidApiKey,
    #[error("stream error: {0}")]
    Stream(String),
}

pub type Result<T> = std::result::Result<T, LlmError>;

/// A pinned stream of parsed chat chunks.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<ChatChunk>> + Send>>;

/// Minimal OpenAI-compatible client.
#[derive(Clone)]
pub struct OpenAiClient {
    base_url: String,
    api_key: Option<String>,
    client: Client,
}

impl OpenAiClient {
    /// `base_url` is the API root (e.g. `https://api.openai.com/v1`); the
    /// `/chat/completions` suffix is appended per call.
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        let client = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .connect_timeout(DEFAULT_CONNECT_TIMEOUT)
            .pool_idle_timeout(DEFAULT_POOL_IDLE_TIMEOUT)
            .pool_max_idle_per_host(2)
            .build()
            .expect("reqwest client construction cannot fail with static options");

        Self {
            base_url: base_url.into(),
            api_key,
            client,
        }
    }

    fn endpoint(&self, base_override: Option<&str>) -> String {
        let base = base_override.unwrap_or(&self.base_url);
        format!("{}/chat/completions", base.trim_end_matches('/'))
    }

    fn headers(&self) -> Result<reqwest::header::HeaderMap> {
        let mut headers = reqwest::header::HeaderMap::new();
        if let Some(key) = &self.api_key {
            let clean_key = key.trim();
            let header_value: reqwest::header::HeaderValue =
                format!("Bearer {clean_key}").parse().map_err(|_| {
                    tracing::error!(
                        "API key contains invalid characters (length={})",
                        clean_key.len()
                    );
                    LlmError::InvalidApiKey
                })?;
            headers.insert(reqwest::header::AUTHORIZATION, header_value);
        }
        headers.insert(
            reqwest::header::CONTENT_TYPE,
            "application/json".parse().expect("valid content-type"),
        );
        Ok(headers)
    }

    async fn handle_error(response: reqwest::Response) -> LlmError {
        let status = response.status().as_u16();
        let message = match response.json::<ApiErrorResponse>().await {
            Ok(body) => body.error.message,
            Err(_) => "unknown error".to_string(),
        };
        LlmError::Api { status, message }
    }

    /// One non-streaming completion. Returns the first choice's content.
    pub async fn complete(
        &self,
        request: &ChatRequest,
        base_override: Option<&str>,
    ) -> Result<String> {
        let url = self.endpoint(base_override);
        tracing::debug!(model = %request.model, messages = request.messages.len(), %url, "chat completion");

        let response = self
            .client
            .post(&url)
            .headers(self.headers()?)
            .json(request)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::handle_error(response).await);
        }

        let body: ChatResponse = response.json().await?;
        Ok(body
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.and_then(|m| m.content))
            .unwrap_or_default())
    }

    /// Open a streaming completion and parse the `data:`-framed chunk lines.
    pub async fn stream_chat(
        &self,
        request: &ChatRequest,
        base_override: Option<&str>,
    ) -> Result<ChunkStream> {
        let url = self.endpoint(base_override);
        tracing::debug!(model = %request.model, messages = request.messages.len(), %url, "chat stream");

        let response = self
            .client
            .post(&url)
            .headers(self.headers()?)
            .json(request)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::handle_error(response).await);
        }

        // SSE lines can split across network chunks; carry a buffer between
        // reads and only parse complete lines.
        let buffer = Arc::new(Mutex::new(String::new()));
        let stream = response
            .bytes_stream()
            .map(move |chunk_result| -> Vec<Result<ChatChunk>> {
                let chunk = match chunk_result {
                    Ok(c) => c,
                    Err(e) => return vec![Err(LlmError::Stream(e.to_string()))],
                };

                let mut buf = buffer.lock().expect("SSE buffer lock poisoned");
                buf.push_str(&String::from_utf8_lossy(&chunk));

                let mut parsed = Vec::new();
                while let Some(newline_pos) = buf.find('\n') {
                    let line = buf[..newline_pos].trim().to_string();
                    buf.drain(..=newline_pos);

                    let Some(json_str) = line.strip_prefix("data: ") else {
                        continue;
                    };
                    if json_str == "[DONE]" {
                        continue;
                    }
                    match serde_json::from_str::<ChatChunk>(json_str) {
                        Ok(chunk) => parsed.push(Ok(chunk)),
                        Err(e) => {
                            let preview: String = json_str.chars().take(200).collect();
                            tracing::warn!("unparseable stream chunk: {e} | {preview}");
                        }
                    }
                }
                parsed
            })
            .flat_map(futures::stream::iter);

        Ok(Box::pin(stream))
    }
}

// ─── Chat protocol types ─────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    pub stream: bool,
}

impl ChatRequest {
    pub fn new(model: impl Into<String>, messages: Vec<ChatMessage>) -> Self {
        Self {
            model: model.into(),
            messages,
            max_tokens: None,
            temperature: None,
            stream: false,
        }
    }

    pub fn streaming(mut self) -> Self {
        self.stream = true;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    #[serde(default)]
    pub content: Option<String>,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: Some(content.into()),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: Some(content.into()),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: Some(content.into()),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatResponse {
    #[serde(default)]
    pub choices: Vec<ChatChoice>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatChoice {
    #[serde(default)]
    pub message: Option<ChatMessage>,
}

/// One parsed streaming chunk.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatChunk {
    #[serde(default)]
    pub choices: Vec<ChunkChoice>,
}

impl ChatChunk {
    pub fn content_delta(&self) -> Option<&str> {
        self.choices
            .first()
            .and_then(|c| c.delta.as_ref())
            .and_then(|d| d.content.as_deref())
    }

    pub fn reasoning_delta(&self) -> Option<&str> {
        self.choices
            .first()
            .and_then(|c| c.delta.as_ref())
            .and_then(|d| d.reasoning_content.as_deref())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChunkChoice {
    #[serde(default)]
    pub delta: Option<ChunkDelta>,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChunkDelta {
    #[serde(default)]
    pub content: Option<String>,
    /// Reasoning channel used by DeepSeek-style providers.
    #[serde(default)]
    pub reasoning_content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    error: ApiError,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    message: String,
}
