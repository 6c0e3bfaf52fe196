//! `POST /run_sse` — the core streaming endpoint.
//!
//! Per request: validate, resolve the ambient scope, run the pre-hook, append
//! the user turn, then drive the runner while translating cumulative event
//! text into prefix-delta SSE frames. A token-limit error from the model
//! triggers exactly one replay of the turn with a tightened trim budget,
//! provided no content delta has reached the client yet; any other error is
//! surfaced verbatim as an `{error}` frame.

use crate::context::scope::{DEFAULT_RETRY_TRIM_PERCENT, ModelOverride, RequestScope};
use crate::error::is_token_limit_error;
use crate::gateway::handlers::error_response;
use crate::gateway::server::AppState;
use crate::gateway::sse::{ContentFrame, DeltaTracker, ErrorFrame, ThinkingFrame};
use crate::gateway::{hooks, sse_channel};
use crate::runner::AgentRunner;
use crate::session::event::{Content, Event, SessionKey};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRequest {
    pub app_name: String,
    pub user_id: String,
    pub session_id: String,
    pub new_message: Content,
    /// Token-level streaming hint for the runner; the response is SSE either way.
    #[serde(default)]
    pub streaming: bool,
    #[serde(default)]
    pub model_override: Option<ModelOverride>,
    #[serde(default)]
    pub tool_executor_url: Option<String>,
    #[serde(default)]
    pub context_limit: Option<u32>,
    #[serde(default)]
    pub retry_trim_percent: Option<f64>,
}

pub async fn run_sse(State(state): State<AppState>, Json(req): Json<RunRequest>) -> Response {
    let Some(runner) = state.runner.clone() else {
        return error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "agent not loaded: no runner is configured on this deployment",
        );
    };

    if let Some(pct) = req.retry_trim_percent {
        if !(1.0..=100.0).contains(&pct) {
            return error_response(
                StatusCode::BAD_REQUEST,
                "retryTrimPercent must be in [1, 100]",
            );
        }
    }

    let key = SessionKey::new(&req.app_name, &req.user_id, &req.session_id);
    let scope = RequestScope {
        model_override: req.model_override.clone(),
        context_limit: req.context_limit,
        retry_trim_percent: req.retry_trim_percent.unwrap_or(DEFAULT_RETRY_TRIM_PERCENT),
        retry_token_budget_factor: None,
        tool_executor_url: req
            .tool_executor_url
            .clone()
            .or_else(|| state.config.tool_executor_url.clone()),
    };

    // 404 before the SSE stream opens.
    let session = match state.raw_store.get_session(&key, &scope).await {
        Ok(session) => session,
        Err(e) => return error_response(StatusCode::NOT_FOUND, e.to_string()),
    };

    let new_message = match &state.strategies {
        Some(strategies) => hooks::pre_run(strategies, &session, &req.new_message).await,
        None => req.new_message.clone(),
    };

    // One invocation id ties the user turn and the model's reply together.
    let invocation_id = uuid::Uuid::new_v4().to_string();
    let user_event = Event {
        id: uuid::Uuid::new_v4().to_string(),
        invocation_id: invocation_id.clone(),
        author: "user".to_string(),
        timestamp: now_epoch_seconds(),
        content: new_message.clone(),
        actions: None,
    };
    if let Err(e) = state.store.append_event(&key, user_event).await {
        return error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string());
    }

    let (tx, rx) = mpsc::channel::<String>(32);
    let cancel = CancellationToken::new();
    tokio::spawn(drive(
        state,
        key,
        invocation_id,
        new_message,
        scope,
        runner,
        tx,
        cancel,
    ));

    sse_channel(rx).into_response()
}

fn now_epoch_seconds() -> f64 {
    chrono::Utc::now().timestamp_millis() as f64 / 1000.0
}

/// Serialize and send one frame; `false` means the client hung up.
async fn send<T: Serialize>(tx: &mpsc::Sender<String>, frame: &T) -> bool {
    match serde_json::to_string(frame) {
        Ok(json) => tx.send(json).await.is_ok(),
        Err(e) => {
            tracing::error!("failed to serialize SSE frame: {e}");
            true
        }
    }
}

/// The per-request stream driver: INIT → STREAM → (RETRY → STREAM)? → DONE.
#[allow(clippy::too_many_arguments)]
async fn drive(
    state: AppState,
    key: SessionKey,
    invocation_id: String,
    new_message: Content,
    mut scope: RequestScope,
    runner: Arc<dyn AgentRunner>,
    tx: mpsc::Sender<String>,
    cancel: CancellationToken,
) {
    let user_text = new_message.text();
    let mut content_tracker = DeltaTracker::new();
    let mut thought_tracker = DeltaTracker::new();
    let mut thinking_id: Option<String> = None;
    let mut final_text = String::new();
    let mut had_error = false;
    let mut retried = false;

    macro_rules! emit {
        ($frame:expr) => {
            if !send(&tx, $frame).await {
                cancel.cancel();
                return;
            }
        };
    }

    'attempts: loop {
        // Reading through the decorated stack applies compaction and the
        // (possibly retry-tightened) trim budget for this attempt.
        let session = match state.store.get_session(&key, &scope).await {
            Ok(session) => session,
            Err(e) => {
                had_error = true;
                emit!(&ErrorFrame::new(e.to_string()));
                break;
            }
        };

        let mut events = match runner
            .run(session, new_message.clone(), scope.clone(), cancel.child_token())
            .await
        {
            Ok(rx) => rx,
            Err(e) => {
                had_error = true;
                emit!(&ErrorFrame::new(e.to_string()));
                break;
            }
        };

        while let Some(event) = events.recv().await {
            if let Some(message) = &event.error_message {
                // Replay only while nothing has reached the content channel:
                // once deltas are out, a restarted stream could no longer
                // concatenate back to the final text, so the error is
                // surfaced like any other.
                if !retried && !content_tracker.has_sent() && is_token_limit_error(message) {
                    tracing::warn!(
                        "model reported token overflow, replaying turn at {}% budget: {message}",
                        scope.retry_trim_percent
                    );
                    retried = true;
                    scope.enter_retry();
                    // Only the thinking channel can have streamed yet; close
                    // the segment and forget it.
                    thought_tracker.reset();
                    if let Some(id) = thinking_id.take() {
                        emit!(&ThinkingFrame::done(id));
                    }
                    continue 'attempts;
                }
                had_error = true;
                emit!(&ErrorFrame::new(message.clone()));
                continue;
            }

            let thought = event.thought_text();
            if let Some(delta) = thought_tracker.advance(&thought) {
                let id = thinking_id
                    .get_or_insert_with(|| uuid::Uuid::new_v4().to_string())
                    .clone();
                emit!(&ThinkingFrame::delta(delta, id));
            }

            let content_text = event.content_text();
            if let Some(delta) = content_tracker.advance(&content_text) {
                // Content beginning closes an open reasoning segment.
                if let Some(id) = thinking_id.take() {
                    emit!(&ThinkingFrame::done(id));
                }
                emit!(&ContentFrame::delta(delta));
                final_text = content_text;
            }
        }
        break;
    }

    if let Some(id) = thinking_id.take() {
        let _ = send(&tx, &ThinkingFrame::done(id)).await;
    }

    if !final_text.is_empty() {
        let assistant_event = Event {
            id: uuid::Uuid::new_v4().to_string(),
            invocation_id,
            author: "assistant".to_string(),
            timestamp: now_epoch_seconds(),
            content: Content::model(vec![crate::session::event::Part::text(final_text.clone())]),
            actions: None,
        };
        if let Err(e) = state.store.append_event(&key, assistant_event).await {
            tracing::warn!("failed to append assistant turn for {key}: {e}");
        }
    }

    if let Some(strategies) = &state.strategies {
        hooks::post_run(
            strategies.clone(),
            key.app_name.clone(),
            user_text,
            final_text,
            had_error,
        );
    }
    // tx drops here, which ends the SSE stream.
}
