//! Session CRUD endpoints.

use crate::context::scope::RequestScope;
use crate::gateway::handlers::error_response;
use crate::gateway::server::{APP_NAME, AppState};
use crate::session::event::SessionKey;
use crate::session::store::StoreError;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::Deserialize;
use std::collections::HashMap;

/// `GET /list-apps`
pub async fn list_apps() -> Json<Vec<&'static str>> {
    Json(vec![APP_NAME])
}

#[derive(Debug, Default, Deserialize)]
pub struct CreateSessionRequest {
    #[serde(default)]
    pub state: HashMap<String, serde_json::Value>,
}

/// `POST /apps/{app}/users/{user}/sessions/{session}` — 400 if it exists.
pub async fn create_session(
    State(state): State<AppState>,
    Path((app, user, session)): Path<(String, String, String)>,
    body: Option<Json<CreateSessionRequest>>,
) -> Response {
    let key = SessionKey::new(app, user, session);
    let initial_state = body.map(|Json(b)| b.state).unwrap_or_default();
    match state.raw_store.create_session(&key, initial_state).await {
        Ok(session) => Json(session).into_response(),
        Err(e @ StoreError::AlreadyExists(_)) => {
            error_response(StatusCode::BAD_REQUEST, e.to_string())
        }
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

/// `GET /apps/{app}/users/{user}/sessions/{session}` — 404 if missing.
///
/// Reads the baseline store: a plain fetch returns the authoritative history,
/// not a per-request trimmed view. Compaction, when enabled against a
/// writable store, is already reflected here through its write-back.
pub async fn get_session(
    State(state): State<AppState>,
    Path((app, user, session)): Path<(String, String, String)>,
) -> Response {
    let key = SessionKey::new(app, user, session);
    match state.raw_store.get_session(&key, &RequestScope::default()).await {
        Ok(session) => Json(session).into_response(),
        Err(e @ StoreError::NotFound(_)) => error_response(StatusCode::NOT_FOUND, e.to_string()),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

/// `GET /apps/{app}/users/{user}/sessions`
pub async fn list_sessions(
    State(state): State<AppState>,
    Path((app, user)): Path<(String, String)>,
) -> Response {
    match state.raw_store.list_sessions(&app, &user).await {
        Ok(sessions) => Json(sessions).into_response(),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

/// `DELETE /apps/{app}/users/{user}/sessions/{session}`
pub async fn delete_session(
    State(state): State<AppState>,
    Path((app, user, session)): Path<(String, String, String)>,
) -> Response {
    let key = SessionKey::new(app, user, session);
    match state.raw_store.delete_session(&key).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e @ StoreError::NotFound(_)) => error_response(StatusCode::NOT_FOUND, e.to_string()),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}
