//! JSON read API plus the manual reindex trigger.
//!
//! Handlers only translate; validation lives in [`crate::query`] and all
//! store access runs on the blocking pool.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;

use super::error::ApiError;
use super::AppState;
use crate::indexer::RescanReport;
use crate::query::{DetailParams, ProjectParams, SessionParams};
use crate::rescan::RescanOutcome;
use crate::store::{ProjectRow, SessionDetail, SessionRow};

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub sessions: i64,
    pub rescanning: bool,
}

#[derive(Debug, Serialize)]
pub struct SessionsResponse {
    pub sessions: Vec<SessionRow>,
}

#[derive(Debug, Serialize)]
pub struct ProjectsResponse {
    pub projects: Vec<ProjectRow>,
}

/// Routes:
/// - GET  /api/health
/// - GET  /api/sessions
/// - GET  /api/sessions/{id}
/// - GET  /api/projects
/// - POST /api/reindex
pub fn api_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/sessions", get(list_sessions))
        .route("/api/sessions/{id}", get(get_session))
        .route("/api/projects", get(list_projects))
        .route("/api/reindex", post(reindex))
}

async fn health(State(state): State<Arc<AppState>>) -> Result<Json<HealthResponse>, ApiError> {
    let query = state.query.clone();
    let sessions = tokio::task::spawn_blocking(move || query.session_count()).await??;
    Ok(Json(HealthResponse {
        status: "ok".to_string(),
        sessions,
        rescanning: state.rescanner.is_running(),
    }))
}

async fn list_sessions(
    State(state): State<Arc<AppState>>,
    Query(params): Query<SessionParams>,
) -> Result<Json<SessionsResponse>, ApiError> {
    let query = state.query.clone();
    let sessions = tokio::task::spawn_blocking(move || query.sessions(params)).await??;
    Ok(Json(SessionsResponse { sessions }))
}

async fn get_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(params): Query<DetailParams>,
) -> Result<Json<SessionDetail>, ApiError> {
    let query = state.query.clone();
    let lookup = id.clone();
    let detail = tokio::task::spawn_blocking(move || query.session(&lookup, params)).await??;
    detail.map(Json).ok_or(ApiError::SessionNotFound(id))
}

async fn list_projects(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ProjectParams>,
) -> Result<Json<ProjectsResponse>, ApiError> {
    let query = state.query.clone();
    let projects = tokio::task::spawn_blocking(move || query.projects(params)).await??;
    Ok(Json(ProjectsResponse { projects }))
}

async fn reindex(State(state): State<Arc<AppState>>) -> Result<Json<RescanReport>, ApiError> {
    match state.rescanner.rescan().await {
        RescanOutcome::Completed(report) => Ok(Json(report)),
        RescanOutcome::Skipped => Err(ApiError::Conflict(
            "a rescan is already running".to_string(),
        )),
        RescanOutcome::Failed(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::{CodexProbe, ProbeRegistry};
    use crate::rescan::Rescanner;
    use crate::server::app;
    use crate::store::IndexStore;
    use axum::{
        body::Body,
        http::{Method, Request, StatusCode},
    };
    use serde_json::Value;
    use std::fs;
    use std::sync::Mutex;
    use tower::ServiceExt;

    const ROLLOUT: &str = r#"{"timestamp":"2025-03-01T10:00:00Z","type":"session_meta","payload":{"id":"abc","cwd":"/home/dev/app"}}
{"timestamp":"2025-03-01T10:00:01Z","type":"response_item","payload":{"type":"message","role":"user","content":[{"type":"input_text","text":"Fix the login bug"}]}}
{"timestamp":"2025-03-01T10:00:05Z","type":"response_item","payload":{"type":"function_call","name":"shell","arguments":"{\"command\":[\"ls\"]}","call_id":"c1"}}
{"timestamp":"2025-03-01T10:00:05Z","type":"response_item","payload":{"type":"function_call_output","call_id":"c1","output":"src\ntests"}}
{"timestamp":"2025-03-01T10:00:06Z","type":"response_item","payload":{"type":"message","role":"assistant","content":[{"type":"output_text","text":"Done."}]}}
"#;

    /// State over a temp Codex directory holding one rollout, already indexed
    fn indexed_state() -> (tempfile::TempDir, Arc<AppState>) {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("rollout-abc.jsonl"), ROLLOUT).unwrap();

        let store = Arc::new(Mutex::new(IndexStore::open_in_memory().unwrap()));
        let mut registry = ProbeRegistry::empty();
        registry.register(Box::new(CodexProbe::new(Some(dir.path().to_path_buf()), None)));
        let rescanner = Arc::new(Rescanner::new(store, registry));
        assert!(matches!(rescanner.try_rescan(), RescanOutcome::Completed(_)));
        (dir, Arc::new(AppState::new(rescanner)))
    }

    async fn send(state: &Arc<AppState>, method: Method, uri: &str) -> (StatusCode, Value) {
        let response = app(Arc::clone(state))
            .oneshot(
                Request::builder()
                    .method(method)
                    .uri(uri)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn test_health() {
        let (_dir, state) = indexed_state();
        let (status, body) = send(&state, Method::GET, "/api/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["sessions"], 1);
        assert_eq!(body["rescanning"], false);
    }

    #[tokio::test]
    async fn test_search_sessions() {
        let (_dir, state) = indexed_state();

        let (status, body) = send(&state, Method::GET, "/api/sessions?q=LOGIN%20bug&source=codex").await;
        assert_eq!(status, StatusCode::OK);
        let sessions = body["sessions"].as_array().unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0]["id"], "codex:abc");
        assert_eq!(sessions[0]["title"], "Fix the login bug");
        assert_eq!(sessions[0]["cwd"], "/home/dev/app");

        let (_, body) = send(&state, Method::GET, "/api/sessions?q=payments").await;
        assert!(body["sessions"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_bad_parameters_are_400() {
        let (_dir, state) = indexed_state();
        for uri in [
            "/api/sessions?start=yesterday",
            "/api/sessions?sort=title",
            "/api/sessions?source=gemini",
            "/api/sessions?start=2025-03-02&end=2025-03-01",
            "/api/projects?limit=-1",
            "/api/sessions/codex:abc?exclude_roles=critic",
        ] {
            let (status, body) = send(&state, Method::GET, uri).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{uri}");
            assert_eq!(body["error"], "Invalid request");
            assert!(body["details"].is_string());
        }
    }

    #[tokio::test]
    async fn test_session_detail() {
        let (_dir, state) = indexed_state();

        let (status, body) = send(&state, Method::GET, "/api/sessions/codex:abc").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["session"]["message_count"], 2);
        assert_eq!(body["messages"].as_array().unwrap().len(), 4);

        let (_, body) = send(&state, Method::GET, "/api/sessions/codex:abc?exclude_roles=tool").await;
        let shapes: Vec<(&str, &str)> = body["messages"]
            .as_array()
            .unwrap()
            .iter()
            .map(|m| (m["role"].as_str().unwrap(), m["kind"].as_str().unwrap()))
            .collect();
        assert_eq!(
            shapes,
            vec![
                ("user", "message"),
                ("assistant", "tool_use"),
                ("assistant", "message")
            ]
        );

        let (status, body) = send(&state, Method::GET, "/api/sessions/codex:nope").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "Session not found");
    }

    #[tokio::test]
    async fn test_projects() {
        let (_dir, state) = indexed_state();
        let (status, body) = send(&state, Method::GET, "/api/projects").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["projects"][0]["project"], "/home/dev/app");
        assert_eq!(body["projects"][0]["session_count"], 1);
    }

    #[tokio::test]
    async fn test_reindex() {
        let (_dir, state) = indexed_state();

        let (status, body) = send(&state, Method::POST, "/api/reindex").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["sources"][0]["source"], "codex");
        assert_eq!(body["sources"][0]["unchanged"], 1);

        state.rescanner.set_running(true);
        let (status, body) = send(&state, Method::POST, "/api/reindex").await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"], "Conflict");
        state.rescanner.set_running(false);
    }
}
