//! Router construction and server bootstrap.

use crate::config::GatewayConfig;
use crate::gateway::handlers;
use crate::runner::AgentRunner;
use crate::session::store::SessionStore;
use crate::strategies::ContextStrategies;
use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;

/// The single app this gateway serves.
pub const APP_NAME: &str = "adk_chat";

/// JSON body cap: generous enough for inline attachments.
const BODY_LIMIT_BYTES: usize = 50 * 1024 * 1024;

/// Shared state for the gateway.
#[derive(Clone)]
pub struct AppState {
    /// Innermost store: CRUD and existence checks that must not trigger a
    /// context pass.
    pub raw_store: Arc<dyn SessionStore>,
    /// Fully decorated stack (compaction inside, trimming outside) used on
    /// the run path.
    pub store: Arc<dyn SessionStore>,
    /// None when no agent is configured; `/run_sse` answers 500 in that case.
    pub runner: Option<Arc<dyn AgentRunner>>,
    /// None unless context strategies are enabled.
    pub strategies: Option<Arc<ContextStrategies>>,
    pub config: Arc<GatewayConfig>,
    /// Shared client for passthrough upstreams.
    pub http: reqwest::Client,
}

/// Build the axum router for the gateway.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/list-apps", get(handlers::sessions::list_apps))
        .route(
            "/apps/{app}/users/{user}/sessions",
            get(handlers::sessions::list_sessions),
        )
        .route(
            "/apps/{app}/users/{user}/sessions/{session}",
            post(handlers::sessions::create_session)
                .get(handlers::sessions::get_session)
                .delete(handlers::sessions::delete_session),
        )
        .route("/run_sse", post(handlers::run::run_sse))
        .route("/run_ollama_sse", post(handlers::ollama::run_ollama_sse))
        .route("/context-tools", post(handlers::context_tools::context_tools))
        .layer(DefaultBodyLimit::max(BODY_LIMIT_BYTES))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Bind and serve until the process exits.
pub async fn start_server(state: AppState) -> anyhow::Result<()> {
    use anyhow::Context;

    let config = state.config.clone();
    let app = build_router(state);
    let addr: SocketAddr = format!("{}:{}", config.bind, config.port)
        .parse()
        .context("invalid gateway bind address")?;

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let local = listener.local_addr()?;
    if let Some(path) = &config.port_file {
        std::fs::write(path, local.port().to_string())
            .with_context(|| format!("writing port file {}", path.display()))?;
    }

    tracing::info!("gateway listening on http://{local}");
    axum::serve(listener, app).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::scope::RequestScope;
    use crate::error::GatewayError;
    use crate::runner::RunnerEvent;
    use crate::session::event::{Content, Part, Session, SessionKey};
    use crate::session::store::InMemorySessionStore;
    use crate::session::trimming::{TrimConfig, TrimmingSessionStore};
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;
    use tower::ServiceExt;

    /// Runner stub: each `run` call plays the next scripted event sequence.
    struct ScriptedRunner {
        scripts: Mutex<VecDeque<Vec<RunnerEvent>>>,
    }

    impl ScriptedRunner {
        fn new(scripts: Vec<Vec<RunnerEvent>>) -> Self {
            Self {
                scripts: Mutex::new(scripts.into()),
            }
        }
    }

    #[async_trait]
    impl crate::runner::AgentRunner for ScriptedRunner {
        async fn run(
            &self,
            _session: Session,
            _new_message: Content,
            _scope: RequestScope,
            _cancel: CancellationToken,
        ) -> Result<mpsc::Receiver<RunnerEvent>, GatewayError> {
            let script = self
                .scripts
                .lock()
                .expect("script lock")
                .pop_front()
                .unwrap_or_default();
            let (tx, rx) = mpsc::channel(32);
            tokio::spawn(async move {
                for event in script {
                    if tx.send(event).await.is_err() {
                        break;
                    }
                }
            });
            Ok(rx)
        }
    }

    fn content_event(text: &str) -> RunnerEvent {
        RunnerEvent {
            content: Some(Content::model(vec![Part::text(text)])),
            text: Some(text.to_string()),
            error_message: None,
        }
    }

    fn state_with_runner(runner: Option<Arc<dyn AgentRunner>>) -> AppState {
        let raw: Arc<dyn SessionStore> = Arc::new(InMemorySessionStore::new());
        let store: Arc<dyn SessionStore> = Arc::new(TrimmingSessionStore::new(
            raw.clone(),
            None,
            TrimConfig::default(),
        ));
        AppState {
            raw_store: raw,
            store,
            runner,
            strategies: None,
            config: Arc::new(GatewayConfig::default()),
            http: reqwest::Client::new(),
        }
    }

    async fn create_test_session(state: &AppState) -> SessionKey {
        let key = SessionKey::new(APP_NAME, "u1", "s1");
        state
            .raw_store
            .create_session(&key, Default::default())
            .await
            .expect("create");
        key
    }

    fn run_body() -> String {
        serde_json::json!({
            "appName": APP_NAME,
            "userId": "u1",
            "sessionId": "s1",
            "newMessage": {"role": "user", "parts": [{"text": "hello"}]},
            "streaming": true
        })
        .to_string()
    }

    async fn post_run_sse(state: AppState, body: String) -> (StatusCode, Vec<serde_json::Value>) {
        let app = build_router(state);
        let request = Request::builder()
            .method("POST")
            .uri("/run_sse")
            .header("content-type", "application/json")
            .body(Body::from(body))
            .expect("request");
        let response = app.oneshot(request).await.expect("response");
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
            .await
            .expect("body");
        let text = String::from_utf8_lossy(&bytes);
        let frames = text
            .lines()
            .filter_map(|line| line.strip_prefix("data: "))
            .map(|json| serde_json::from_str(json).expect("frame json"))
            .collect();
        (status, frames)
    }

    #[tokio::test]
    async fn list_apps_names_the_chat_app() {
        let app = build_router(state_with_runner(None));
        let request = Request::builder()
            .uri("/list-apps")
            .body(Body::empty())
            .expect("request");
        let response = app.oneshot(request).await.expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), 4096).await.expect("body");
        assert_eq!(&bytes[..], br#"["adk_chat"]"#);
    }

    #[tokio::test]
    async fn session_crud_status_codes() {
        let app = build_router(state_with_runner(None));
        let uri = format!("/apps/{APP_NAME}/users/u1/sessions/s1");

        // Missing -> 404
        let response = app
            .clone()
            .oneshot(Request::builder().uri(&uri).body(Body::empty()).expect("req"))
            .await
            .expect("resp");
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        // Create -> 200
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(&uri)
                    .header("content-type", "application/json")
                    .body(Body::from("{}"))
                    .expect("req"),
            )
            .await
            .expect("resp");
        assert_eq!(response.status(), StatusCode::OK);

        // Duplicate -> 400
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(&uri)
                    .header("content-type", "application/json")
                    .body(Body::from("{}"))
                    .expect("req"),
            )
            .await
            .expect("resp");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        // Fetch -> 200
        let response = app
            .clone()
            .oneshot(Request::builder().uri(&uri).body(Body::empty()).expect("req"))
            .await
            .expect("resp");
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn run_sse_without_runner_fails_before_sse_opens() {
        let state = state_with_runner(None);
        create_test_session(&state).await;
        let app = build_router(state);
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/run_sse")
                    .header("content-type", "application/json")
                    .body(Body::from(run_body()))
                    .expect("req"),
            )
            .await
            .expect("resp");
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn run_sse_on_missing_session_is_404() {
        let runner: Arc<dyn AgentRunner> = Arc::new(ScriptedRunner::new(vec![]));
        let state = state_with_runner(Some(runner));
        let app = build_router(state);
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/run_sse")
                    .header("content-type", "application/json")
                    .body(Body::from(run_body()))
                    .expect("req"),
            )
            .await
            .expect("resp");
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn run_sse_streams_prefix_deltas() {
        let runner: Arc<dyn AgentRunner> = Arc::new(ScriptedRunner::new(vec![vec![
            content_event("Hello"),
            content_event("Hello world"),
            content_event("Hi"),
        ]]));
        let state = state_with_runner(Some(runner));
        create_test_session(&state).await;

        let (status, frames) = post_run_sse(state, run_body()).await;
        assert_eq!(status, StatusCode::OK);

        let deltas: Vec<&str> = frames
            .iter()
            .filter_map(|f| f["content"]["parts"][0]["text"].as_str())
            .collect();
        assert_eq!(deltas, vec!["Hello", " world", "Hi"]);
    }

    #[tokio::test]
    async fn run_sse_thinking_then_content_transition() {
        let runner: Arc<dyn AgentRunner> = Arc::new(ScriptedRunner::new(vec![vec![
            RunnerEvent {
                content: Some(Content::model(vec![Part::thought("reasoning…")])),
                text: None,
                error_message: None,
            },
            RunnerEvent {
                content: Some(Content::model(vec![
                    Part::thought("reasoning…"),
                    Part::text("answer"),
                ])),
                text: None,
                error_message: None,
            },
        ]]));
        let state = state_with_runner(Some(runner));
        create_test_session(&state).await;

        let (_, frames) = post_run_sse(state, run_body()).await;
        assert_eq!(frames.len(), 3);

        assert_eq!(frames[0]["thinking"]["text"], "reasoning…");
        let open_id = frames[0]["thinking"]["id"].as_str().expect("id");

        assert_eq!(frames[1]["thinking"]["text"], "");
        assert_eq!(frames[1]["thinking"]["id"], open_id);
        assert_eq!(frames[1]["thinking"]["metadata"]["vscodeReasoningDone"], true);

        assert_eq!(frames[2]["content"]["parts"][0]["text"], "answer");
    }

    #[tokio::test]
    async fn token_limit_error_replays_the_turn_once() {
        // First attempt dies on overflow before any content is out (thinking
        // alone does not block the replay). The client must see zero error
        // frames and exactly the retry's content deltas, with nothing from
        // the first attempt leaking into the content stream.
        let runner: Arc<dyn AgentRunner> = Arc::new(ScriptedRunner::new(vec![
            vec![
                RunnerEvent {
                    content: Some(Content::model(vec![Part::thought("sizing up the prompt")])),
                    text: None,
                    error_message: None,
                },
                RunnerEvent::error("Prompt too long (num_ctx exceeded)"),
            ],
            vec![content_event("Short"), content_event("Short answer")],
        ]));
        let state = state_with_runner(Some(runner));
        create_test_session(&state).await;

        let (_, frames) = post_run_sse(state, run_body()).await;
        assert!(frames.iter().all(|f| f.get("error").is_none()));

        let deltas: Vec<&str> = frames
            .iter()
            .filter_map(|f| f["content"]["parts"][0]["text"].as_str())
            .collect();
        assert_eq!(deltas, vec!["Short", " answer"]);
    }

    #[tokio::test]
    async fn token_limit_after_streamed_content_is_not_retried() {
        // Once content deltas are out, a replay would corrupt the stream (the
        // concatenated deltas must still reconstruct the final text), so the
        // overflow is surfaced verbatim and the second script never plays.
        let runner: Arc<dyn AgentRunner> = Arc::new(ScriptedRunner::new(vec![
            vec![
                content_event("partial answer"),
                RunnerEvent::error("Prompt too long (num_ctx exceeded)"),
            ],
            vec![content_event("never played")],
        ]));
        let state = state_with_runner(Some(runner));
        create_test_session(&state).await;

        let (_, frames) = post_run_sse(state, run_body()).await;

        let errors: Vec<&str> = frames.iter().filter_map(|f| f["error"].as_str()).collect();
        assert_eq!(errors, vec!["Prompt too long (num_ctx exceeded)"]);

        let deltas: Vec<&str> = frames
            .iter()
            .filter_map(|f| f["content"]["parts"][0]["text"].as_str())
            .collect();
        assert_eq!(deltas, vec!["partial answer"]);
        assert_eq!(deltas.concat(), "partial answer");
    }

    #[tokio::test]
    async fn second_token_limit_error_is_surfaced_raw() {
        let runner: Arc<dyn AgentRunner> = Arc::new(ScriptedRunner::new(vec![
            vec![RunnerEvent::error("context_length_exceeded")],
            vec![RunnerEvent::error("context_length_exceeded")],
        ]));
        let state = state_with_runner(Some(runner));
        create_test_session(&state).await;

        let (_, frames) = post_run_sse(state, run_body()).await;
        let errors: Vec<&str> = frames
            .iter()
            .filter_map(|f| f["error"].as_str())
            .collect();
        assert_eq!(errors, vec!["context_length_exceeded"]);
    }

    #[tokio::test]
    async fn non_token_limit_errors_pass_straight_through() {
        let runner: Arc<dyn AgentRunner> = Arc::new(ScriptedRunner::new(vec![vec![
            RunnerEvent::error("connection refused"),
        ]]));
        let state = state_with_runner(Some(runner));
        create_test_session(&state).await;

        let (_, frames) = post_run_sse(state, run_body()).await;
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0]["error"], "connection refused");
    }

    #[tokio::test]
    async fn completed_turn_is_appended_to_the_session() {
        let runner: Arc<dyn AgentRunner> = Arc::new(ScriptedRunner::new(vec![vec![
            content_event("Hello world"),
        ]]));
        let state = state_with_runner(Some(runner));
        let key = create_test_session(&state).await;

        let (_, frames) = post_run_sse(state.clone(), run_body()).await;
        assert!(!frames.is_empty());

        let session = state
            .raw_store
            .get_session(&key, &RequestScope::default())
            .await
            .expect("session");
        // User turn + assistant turn, one shared invocation.
        assert_eq!(session.events.len(), 2);
        assert_eq!(session.events[0].author, "user");
        assert_eq!(session.events[1].author, "assistant");
        assert_eq!(session.events[1].content.text(), "Hello world");
        assert_eq!(
            session.events[0].invocation_id,
            session.events[1].invocation_id
        );
    }

    #[tokio::test]
    async fn invalid_retry_trim_percent_is_rejected() {
        let runner: Arc<dyn AgentRunner> = Arc::new(ScriptedRunner::new(vec![]));
        let state = state_with_runner(Some(runner));
        create_test_session(&state).await;

        let body = serde_json::json!({
            "appName": APP_NAME,
            "userId": "u1",
            "sessionId": "s1",
            "newMessage": {"role": "user", "parts": [{"text": "hello"}]},
            "retryTrimPercent": 0.5
        })
        .to_string();
        let app = build_router(state);
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/run_sse")
                    .header("content-type", "application/json")
                    .body(Body::from(body))
                    .expect("req"),
            )
            .await
            .expect("resp");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn context_tools_answer_501_without_strategies() {
        let state = state_with_runner(None);
        let app = build_router(state);
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/context-tools")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"tool": "sieve", "args": {"query": "x"}}"#))
                    .expect("req"),
            )
            .await
            .expect("resp");
        assert_eq!(response.status(), StatusCode::NOT_IMPLEMENTED);
    }

    #[tokio::test]
    async fn context_tools_dispatch_when_enabled() {
        use crate::strategies::{JsonFileMemory, RecencyRanker, RepetitionStuckDetector};
        let mut state = state_with_runner(None);
        state.strategies = Some(Arc::new(ContextStrategies {
            memory: Arc::new(JsonFileMemory::open(None)),
            stuck: Arc::new(RepetitionStuckDetector::default()),
            ranker: Arc::new(RecencyRanker::default()),
        }));
        let app = build_router(state);

        // Unknown tool -> 400
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/context-tools")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"tool": "nope"}"#))
                    .expect("req"),
            )
            .await
            .expect("resp");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        // Ingest then sieve round-trips through the HTTP surface.
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/context-tools")
                    .header("content-type", "application/json")
                    .body(Body::from(
                        r#"{"tool": "ingest", "args": {"content": "release cadence is weekly"}}"#,
                    ))
                    .expect("req"),
            )
            .await
            .expect("resp");
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/context-tools")
                    .header("content-type", "application/json")
                    .body(Body::from(
                        r#"{"tool": "sieve", "args": {"query": "release cadence", "tokenBudget": 500}}"#,
                    ))
                    .expect("req"),
            )
            .await
            .expect("resp");
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), 4096).await.expect("body");
        let value: serde_json::Value = serde_json::from_slice(&bytes).expect("json");
        assert_eq!(value["nodesIncluded"], 1);
    }

    #[tokio::test]
    async fn context_tools_priority_selection() {
        use crate::strategies::{JsonFileMemory, RecencyRanker, RepetitionStuckDetector};
        let mut state = state_with_runner(None);
        state.strategies = Some(Arc::new(ContextStrategies {
            memory: Arc::new(JsonFileMemory::open(None)),
            stuck: Arc::new(RepetitionStuckDetector::default()),
            ranker: Arc::new(RecencyRanker::default()),
        }));
        let app = build_router(state);

        let body = serde_json::json!({
            "tool": "selectTopMessages",
            "args": {
                "messages": [
                    {"role": 1, "content": [{"type": "text", "value": "first"}]},
                    {"role": 2, "content": [{"type": "text", "value": "second"}]},
                    {"role": 1, "content": [{"type": "text", "value": "third"}]}
                ],
                "n": 2
            }
        })
        .to_string();
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/context-tools")
                    .header("content-type", "application/json")
                    .body(Body::from(body))
                    .expect("req"),
            )
            .await
            .expect("resp");
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), 4096).await.expect("body");
        let value: serde_json::Value = serde_json::from_slice(&bytes).expect("json");
        // Recency wins: the two most recent messages, in input order.
        assert_eq!(value["selected"], serde_json::json!([1, 2]));
    }

    #[tokio::test]
    async fn chat_runner_prompt_carries_each_turn_exactly_once() {
        use crate::llm::OpenAiClient;
        use crate::runner::ChatRunner;
        use mockito::Matcher;

        // Exact-body matchers: the gateway appends the user turn to the store
        // before the runner reads it back, so the assembled prompt must carry
        // it exactly once, and the second turn must replay the whole history.
        let mut upstream = mockito::Server::new_async().await;
        let first = upstream
            .mock("POST", "/v1/chat/completions")
            .match_body(Matcher::Json(serde_json::json!({
                "model": "test-model",
                "messages": [{"role": "user", "content": "hello"}],
                "stream": true
            })))
            .with_status(200)
            .with_body(concat!(
                "data: {\"choices\":[{\"delta\":{\"content\":\"Hello world\"}}]}\n\n",
                "data: [DONE]\n\n",
            ))
            .create_async()
            .await;
        let second = upstream
            .mock("POST", "/v1/chat/completions")
            .match_body(Matcher::Json(serde_json::json!({
                "model": "test-model",
                "messages": [
                    {"role": "user", "content": "hello"},
                    {"role": "assistant", "content": "Hello world"},
                    {"role": "user", "content": "and again"}
                ],
                "stream": true
            })))
            .with_status(200)
            .with_body(concat!(
                "data: {\"choices\":[{\"delta\":{\"content\":\"Again\"}}]}\n\n",
                "data: [DONE]\n\n",
            ))
            .create_async()
            .await;

        let runner: Arc<dyn AgentRunner> = Arc::new(ChatRunner::new(
            OpenAiClient::new(format!("{}/v1", upstream.url()), None),
            "test-model",
        ));
        let state = state_with_runner(Some(runner));
        create_test_session(&state).await;

        let (_, frames) = post_run_sse(state.clone(), run_body()).await;
        let deltas: Vec<&str> = frames
            .iter()
            .filter_map(|f| f["content"]["parts"][0]["text"].as_str())
            .collect();
        assert_eq!(deltas, vec!["Hello world"]);

        let second_body = serde_json::json!({
            "appName": APP_NAME,
            "userId": "u1",
            "sessionId": "s1",
            "newMessage": {"role": "user", "parts": [{"text": "and again"}]},
            "streaming": true
        })
        .to_string();
        let (_, frames) = post_run_sse(state, second_body).await;
        let deltas: Vec<&str> = frames
            .iter()
            .filter_map(|f| f["content"]["parts"][0]["text"].as_str())
            .collect();
        assert_eq!(deltas, vec!["Again"]);

        first.assert_async().await;
        second.assert_async().await;
    }
}
