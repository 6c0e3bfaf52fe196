//! The streaming HTTP gateway.
//!
//! Serves:
//! - `GET  /list-apps`                                — app discovery
//! - `POST /apps/{app}/users/{u}/sessions/{s}`        — create session
//! - `GET  /apps/{app}/users/{u}/sessions/{s}`        — fetch session
//! - `GET  /apps/{app}/users/{u}/sessions`            — list sessions
//! - `DELETE /apps/{app}/users/{u}/sessions/{s}`      — delete session
//! - `POST /run_sse`                                  — serve one turn over SSE
//! - `POST /run_ollama_sse`                           — Ollama passthrough SSE
//! - `POST /context-tools`                            — memory/stuck dispatch

pub mod handlers;
pub mod hooks;
pub mod server;
pub mod sse;

use axum::response::sse::{Event as SseEvent, Sse};
use futures::Stream;
use futures::stream;
use std::convert::Infallible;
use tokio::sync::mpsc;

/// Adapt a channel of pre-serialized JSON frames into an SSE response body.
///
/// Frames go out as bare `data: <json>` events. When the client disconnects
/// the stream (and with it the receiver) is dropped, which the producing task
/// observes as a failed send.
pub fn sse_channel(
    rx: mpsc::Receiver<String>,
) -> Sse<impl Stream<Item = Result<SseEvent, Infallible>>> {
    let stream = stream::unfold(rx, |mut rx| async move {
        let data = rx.recv().await?;
        Some((Ok(SseEvent::default().data(data)), rx))
    });
    Sse::new(stream)
}
