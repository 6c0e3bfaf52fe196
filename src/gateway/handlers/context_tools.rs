//! `POST /context-tools` — direct dispatch to the external memory and
//! stuck-detection services. Answers 501 on deployments without them.

use crate::context::adapter::Message;
use crate::gateway::handlers::error_response;
use crate::gateway::server::AppState;
use crate::strategies::{ContextStrategies, StrategyError, StuckDetection, TaskOutcome};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct ContextToolRequest {
    pub tool: String,
    #[serde(default)]
    pub args: serde_json::Value,
}

enum ToolError {
    Unknown(String),
    BadArgs(String),
    Strategy(StrategyError),
}

impl From<StrategyError> for ToolError {
    fn from(e: StrategyError) -> Self {
        ToolError::Strategy(e)
    }
}

pub async fn context_tools(
    State(state): State<AppState>,
    Json(req): Json<ContextToolRequest>,
) -> Response {
    let Some(strategies) = state.strategies.clone() else {
        return error_response(
            StatusCode::NOT_IMPLEMENTED,
            "context strategies are not enabled on this deployment",
        );
    };

    match dispatch(&strategies, &req).await {
        Ok(value) => Json(value).into_response(),
        Err(ToolError::Unknown(tool)) => {
            error_response(StatusCode::BAD_REQUEST, format!("unknown context tool: {tool}"))
        }
        Err(ToolError::BadArgs(message)) => error_response(StatusCode::BAD_REQUEST, message),
        Err(ToolError::Strategy(e)) => {
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

fn str_arg<'a>(args: &'a serde_json::Value, name: &str) -> Result<&'a str, ToolError> {
    args.get(name)
        .and_then(|v| v.as_str())
        .ok_or_else(|| ToolError::BadArgs(format!("missing string argument: {name}")))
}

fn opt_str_arg(args: &serde_json::Value, name: &str) -> String {
    args.get(name)
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string()
}

fn messages_arg(args: &serde_json::Value) -> Result<Vec<Message>, ToolError> {
    args.get("messages")
        .cloned()
        .and_then(|v| serde_json::from_value(v).ok())
        .ok_or_else(|| ToolError::BadArgs("messages must be a message array".to_string()))
}

async fn dispatch(
    strategies: &ContextStrategies,
    req: &ContextToolRequest,
) -> Result<serde_json::Value, ToolError> {
    let args = &req.args;
    match req.tool.as_str() {
        "sieve" => {
            let query = str_arg(args, "query")?;
            let budget = args
                .get("tokenBudget")
                .and_then(|v| v.as_u64())
                .unwrap_or(1000) as u32;
            let result = strategies.memory.sieve(query, budget).await?;
            Ok(serde_json::to_value(result).map_err(StrategyError::from)?)
        }
        "ingest" => {
            let content = str_arg(args, "content")?;
            let tags: Vec<String> = args
                .get("tags")
                .and_then(|v| serde_json::from_value(v.clone()).ok())
                .unwrap_or_default();
            let node = strategies
                .memory
                .ingest(
                    content,
                    &opt_str_arg(args, "category"),
                    &opt_str_arg(args, "subcategory"),
                    &opt_str_arg(args, "source"),
                    &tags,
                )
                .await?;
            Ok(serde_json::to_value(node).map_err(StrategyError::from)?)
        }
        "record_task_outcome" | "recordTaskOutcome" => {
            let outcome: TaskOutcome = args
                .get("outcome")
                .cloned()
                .and_then(|v| serde_json::from_value(v).ok())
                .ok_or_else(|| {
                    ToolError::BadArgs("outcome must be one of success|failure|partial".to_string())
                })?;
            strategies.memory.record_task_outcome(outcome).await?;
            Ok(serde_json::json!({ "recorded": outcome }))
        }
        "detect_stuck" | "detectStuck" => {
            let messages = messages_arg(args)?;
            let detection = strategies.stuck.detect_stuck(&messages).await?;
            Ok(serde_json::to_value(detection).map_err(StrategyError::from)?)
        }
        "generate_recovery_message" | "generateRecoveryMessage" => {
            let detection: StuckDetection = args
                .get("detection")
                .cloned()
                .and_then(|v| serde_json::from_value(v).ok())
                .ok_or_else(|| ToolError::BadArgs("detection must be a detection object".to_string()))?;
            let recovery = strategies.stuck.generate_recovery_message(&detection).await?;
            Ok(serde_json::to_value(recovery).map_err(StrategyError::from)?)
        }
        "sort_by_priority" | "sortByPriority" => {
            let messages = messages_arg(args)?;
            let ranked = strategies.ranker.sort_by_priority(&messages);
            Ok(serde_json::to_value(ranked).map_err(StrategyError::from)?)
        }
        "select_by_token_budget" | "selectByTokenBudget" => {
            let messages = messages_arg(args)?;
            let budget = args
                .get("tokenBudget")
                .and_then(|v| v.as_u64())
                .unwrap_or(1000) as u32;
            let selected = strategies.ranker.select_by_token_budget(
                &messages,
                budget,
                &crate::context::estimator::estimate_message_tokens,
            );
            Ok(serde_json::json!({ "selected": selected }))
        }
        "select_top_messages" | "selectTopMessages" => {
            let messages = messages_arg(args)?;
            let n = args.get("n").and_then(|v| v.as_u64()).unwrap_or(10) as usize;
            let selected = strategies.ranker.select_top_messages(&messages, n);
            Ok(serde_json::json!({ "selected": selected }))
        }
        other => Err(ToolError::Unknown(other.to_string())),
    }
}
