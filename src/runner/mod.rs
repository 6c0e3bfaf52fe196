//! Agent runner abstraction.
//!
//! A runner is an async event producer: given a session snapshot and the new
//! user message it yields a lazy sequence of events into a bounded channel,
//! which the gateway drains while writing SSE to the client. The retry pass
//! after a token-limit error is a second, freshly-created producer, never a
//! seek on the old one.

use crate::context::scope::RequestScope;
use crate::error::GatewayError;
use crate::llm::{ChatMessage, ChatRequest, OpenAiClient};
use crate::session::event::{Content, Part, Session};
use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Capacity of the runner → gateway event channel.
const EVENT_CHANNEL_CAPACITY: usize = 32;

/// One event yielded by a runner.
///
/// Text fields are cumulative: each event carries the full content produced
/// so far, and the gateway derives client deltas by prefix comparison.
#[derive(Debug, Clone, Default)]
pub struct RunnerEvent {
    /// Structured content snapshot, when the runner has one.
    pub content: Option<Content>,
    /// The runner's canonical stringification of the content so far.
    pub text: Option<String>,
    /// A model-reported error. Token-limit wordings here trigger the
    /// gateway's shrink-and-retry pass.
    pub error_message: Option<String>,
}

impl RunnerEvent {
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            error_message: Some(message.into()),
            ..Default::default()
        }
    }

    /// Content-channel text: the canonical stringification when present, else
    /// the concatenated non-thought parts.
    pub fn content_text(&self) -> String {
        if let Some(text) = &self.text {
            return text.clone();
        }
        self.content
            .as_ref()
            .map(|c| {
                c.parts
                    .iter()
                    .filter(|p| !p.is_thought())
                    .filter_map(|p| p.as_text())
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default()
    }

    /// Thinking-channel text: concatenated thought parts.
    pub fn thought_text(&self) -> String {
        self.content
            .as_ref()
            .map(|c| {
                c.parts
                    .iter()
                    .filter(|p| p.is_thought())
                    .filter_map(|p| p.as_text())
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default()
    }
}

/// An agent able to serve one conversational turn.
#[async_trait]
pub trait AgentRunner: Send + Sync {
    /// Start serving a turn. Events arrive on the returned channel; dropping
    /// the receiver or cancelling `cancel` must stop the producer and any
    /// in-flight LLM request.
    async fn run(
        &self,
        session: Session,
        new_message: Content,
        scope: RequestScope,
        cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<RunnerEvent>, GatewayError>;
}

/// Default runner: replays the session history to an OpenAI-compatible chat
/// endpoint and streams the completion back as cumulative events.
///
/// The gateway persists the user's turn before invoking the runner, so the
/// session snapshot already ends with it. The incoming message is therefore
/// not appended to the prompt again; it would double up the final user turn.
pub struct ChatRunner {
    client: OpenAiClient,
    model: String,
}

impl ChatRunner {
    pub fn new(client: OpenAiClient, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
        }
    }

    fn history_messages(session: &Session) -> Vec<ChatMessage> {
        session
            .events
            .iter()
            .filter_map(|event| {
                let text = event.content.text();
                if text.trim().is_empty() {
                    return None;
                }
                Some(if event.is_user_authored() {
                    ChatMessage::user(text)
                } else {
                    ChatMessage::assistant(text)
                })
            })
            .collect()
    }
}

#[async_trait]
impl AgentRunner for ChatRunner {
    async fn run(
        &self,
        session: Session,
        _new_message: Content,
        scope: RequestScope,
        cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<RunnerEvent>, GatewayError> {
        let (model, base_override) = match &scope.model_override {
            Some(o) => (o.model.clone(), o.base_url.clone()),
            None => (self.model.clone(), None),
        };

        let request = ChatRequest::new(model, Self::history_messages(&session)).streaming();
        let client = self.client.clone();
        let (tx, rx) = mpsc::channel::<RunnerEvent>(EVENT_CHANNEL_CAPACITY);

        tokio::spawn(async move {
            let mut stream = match client.stream_chat(&request, base_override.as_deref()).await {
                Ok(s) => s,
                Err(e) => {
                    let _ = tx.send(RunnerEvent::error(e.to_string())).await;
                    return;
                }
            };

            let mut content_accum = String::new();
            let mut thought_accum = String::new();

            loop {
                let chunk = tokio::select! {
                    _ = cancel.cancelled() => {
                        tracing::debug!("runner stream cancelled");
                        return;
                    }
                    chunk = stream.next() => match chunk {
                        Some(c) => c,
                        None => break,
                    },
                };

                let chunk = match chunk {
                    Ok(c) => c,
                    Err(e) => {
                        let _ = tx.send(RunnerEvent::error(e.to_string())).await;
                        return;
                    }
                };

                let mut changed = false;
                if let Some(delta) = chunk.reasoning_delta() {
                    thought_accum.push_str(delta);
                    changed = true;
                }
                if let Some(delta) = chunk.content_delta() {
                    content_accum.push_str(delta);
                    changed = true;
                }
                if !changed {
                    continue;
                }

                let mut parts = Vec::new();
                if !thought_accum.is_empty() {
                    parts.push(Part::thought(thought_accum.clone()));
                }
                if !content_accum.is_empty() {
                    parts.push(Part::text(content_accum.clone()));
                }

                let event = RunnerEvent {
                    content: Some(Content::model(parts)),
                    text: Some(content_accum.clone()),
                    error_message: None,
                };
                if tx.send(event).await.is_err() {
                    // Receiver gone: client disconnected.
                    return;
                }
            }
        });

        Ok(rx)
    }
}
