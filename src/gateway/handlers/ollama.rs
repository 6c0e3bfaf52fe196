//! `POST /run_ollama_sse` — passthrough streaming to an Ollama-style
//! endpoint, splitting `thinking` vs `content` chunks into SSE frames.

use crate::gateway::server::AppState;
use crate::gateway::sse::{ContentFrame, ErrorFrame, ThinkingFrame};
use crate::gateway::sse_channel;
use crate::llm::ChatMessage;
use axum::extract::State;
use axum::response::{IntoResponse, Json, Response};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

const DEFAULT_OLLAMA_BASE_URL: &str = "http://localhost:11434";

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OllamaRunRequest {
    pub model: String,
    #[serde(default)]
    pub base_url: Option<String>,
    pub messages: Vec<ChatMessage>,
    /// Ollama's reasoning switch, forwarded verbatim.
    #[serde(default)]
    pub think: Option<bool>,
}

#[derive(Debug, Serialize)]
struct OllamaChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    think: Option<bool>,
}

/// One NDJSON chunk of an `/api/chat` stream.
#[derive(Debug, Deserialize)]
struct OllamaChunk {
    #[serde(default)]
    message: Option<OllamaChunkMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OllamaChunkMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    thinking: Option<String>,
}

pub async fn run_ollama_sse(
    State(state): State<AppState>,
    Json(req): Json<OllamaRunRequest>,
) -> Response {
    let (tx, rx) = mpsc::channel::<String>(32);
    let http = state.http.clone();
    tokio::spawn(drive_passthrough(http, req, tx));
    sse_channel(rx).into_response()
}

async fn send<T: Serialize>(tx: &mpsc::Sender<String>, frame: &T) -> bool {
    match serde_json::to_string(frame) {
        Ok(json) => tx.send(json).await.is_ok(),
        Err(e) => {
            tracing::error!("failed to serialize SSE frame: {e}");
            true
        }
    }
}

async fn drive_passthrough(
    http: reqwest::Client,
    req: OllamaRunRequest,
    tx: mpsc::Sender<String>,
) {
    let base = req
        .base_url
        .as_deref()
        .unwrap_or(DEFAULT_OLLAMA_BASE_URL)
        .trim_end_matches('/')
        .to_string();
    let url = format!("{base}/api/chat");
    let body = OllamaChatRequest {
        model: &req.model,
        messages: &req.messages,
        stream: true,
        think: req.think,
    };

    let response = match http.post(&url).json(&body).send().await {
        Ok(r) => r,
        Err(e) => {
            let _ = send(&tx, &ErrorFrame::new(e.to_string())).await;
            return;
        }
    };
    if !response.status().is_success() {
        let status = response.status();
        let detail = response.text().await.unwrap_or_default();
        let _ = send(&tx, &ErrorFrame::new(format!("upstream {status}: {detail}"))).await;
        return;
    }

    let mut stream = response.bytes_stream();
    let mut buffer = String::new();
    let mut thinking_id: Option<String> = None;

    'outer: while let Some(chunk) = stream.next().await {
        let chunk = match chunk {
            Ok(c) => c,
            Err(e) => {
                let _ = send(&tx, &ErrorFrame::new(e.to_string())).await;
                break;
            }
        };
        buffer.push_str(&String::from_utf8_lossy(&chunk));

        while let Some(newline_pos) = buffer.find('\n') {
            let line = buffer[..newline_pos].trim().to_string();
            buffer.drain(..=newline_pos);
            if line.is_empty() {
                continue;
            }

            let parsed: OllamaChunk = match serde_json::from_str(&line) {
                Ok(p) => p,
                Err(e) => {
                    tracing::warn!("unparseable ollama chunk: {e}");
                    continue;
                }
            };

            if let Some(error) = parsed.error {
                let _ = send(&tx, &ErrorFrame::new(error)).await;
                break 'outer;
            }

            if let Some(message) = parsed.message {
                if let Some(thinking) = message.thinking.filter(|t| !t.is_empty()) {
                    let id = thinking_id
                        .get_or_insert_with(|| uuid::Uuid::new_v4().to_string())
                        .clone();
                    if !send(&tx, &ThinkingFrame::delta(thinking, id)).await {
                        return;
                    }
                }
                if let Some(content) = message.content.filter(|c| !c.is_empty()) {
                    if let Some(id) = thinking_id.take() {
                        if !send(&tx, &ThinkingFrame::done(id)).await {
                            return;
                        }
                    }
                    if !send(&tx, &ContentFrame::delta(content)).await {
                        return;
                    }
                }
            }

            if parsed.done {
                break 'outer;
            }
        }
    }

    if let Some(id) = thinking_id.take() {
        let _ = send(&tx, &ThinkingFrame::done(id)).await;
    }
}
