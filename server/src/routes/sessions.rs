//! REST endpoints for session management (token-gated).
//!
//! - `POST   /api/sessions`           — create a cold session, return its WS URL
//! - `GET    /api/sessions`           — list all sessions
//! - `GET    /api/sessions/{id}`      — one session's projection
//! - `DELETE /api/sessions/{id}`      — terminate and remove
//! - `POST   /api/sessions/{id}/stop` — terminate but keep the record
//!
//! Creation validates the working directory here (must exist, must pass the
//! path guard) so the registry only ever sees admissible canonical paths.

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use super::{ok, ok_empty, ApiError};
use crate::guard::is_path_allowed;
use crate::sessions::session::SessionStatus;
use crate::state::AppState;
use crate::util::expand_tilde;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionRequest {
    /// Absolute working directory for the session.
    pub path: Option<String>,
    /// Which configured AI command to launch; defaults to the first enabled.
    pub ai_command_id: Option<String>,
}

/// `POST /api/sessions` — create a session and hand back its WebSocket URL.
pub async fn create_session(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<CreateSessionRequest>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let path = body
        .path
        .as_deref()
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .ok_or_else(|| ApiError::BadRequest("path is required".to_string()))?;
    let expanded = expand_tilde(path);
    if !expanded.starts_with('/') {
        return Err(ApiError::BadRequest(format!(
            "path must be absolute: {expanded}"
        )));
    }
    let canonical = std::fs::canonicalize(expanded.as_ref())
        .map_err(|_| ApiError::BadRequest(format!("path does not exist: {expanded}")))?;
    if !canonical.is_dir() {
        return Err(ApiError::BadRequest(format!(
            "path is not a directory: {}",
            canonical.display()
        )));
    }
    let canonical_str = canonical.to_string_lossy().into_owned();

    let config = state.config.get().await;
    if !is_path_allowed(&canonical_str, &config.allowed_dirs) {
        return Err(ApiError::Forbidden(format!(
            "Path is outside the allowed directories: {canonical_str}"
        )));
    }

    let command = config
        .resolve_ai_command(body.ai_command_id.as_deref())
        .ok_or_else(|| match body.ai_command_id {
            Some(id) => ApiError::BadRequest(format!("Unknown or disabled AI command: {id}")),
            None => ApiError::BadRequest("No enabled AI command configured".to_string()),
        })?;

    let session = state.registry.create(&canonical_str, &command.cmd).await;
    let ws_url = ws_url(&headers, &session.id);
    info!("Session {} created via REST ({})", session.id, command.name);

    Ok((
        StatusCode::CREATED,
        ok(json!({ "session": session, "wsUrl": ws_url })),
    ))
}

/// `GET /api/sessions` — list projections of all sessions.
pub async fn list_sessions(State(state): State<AppState>) -> Json<Value> {
    ok(json!({ "sessions": state.registry.list().await }))
}

/// `GET /api/sessions/{id}`
pub async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    match state.registry.get(&id).await {
        Some(session) => Ok(ok(json!({ "session": session }))),
        None => Err(ApiError::NotFound(format!("Session {id} not found"))),
    }
}

/// `DELETE /api/sessions/{id}` — terminate and remove the record.
pub async fn delete_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    if state.registry.delete(&id).await {
        Ok(ok_empty())
    } else {
        Err(ApiError::NotFound(format!("Session {id} not found")))
    }
}

/// `POST /api/sessions/{id}/stop` — terminate but keep the record around for
/// inspection until the reaper drops it.
pub async fn stop_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    if !state
        .registry
        .terminate(&id, SessionStatus::Terminated)
        .await
    {
        return Err(ApiError::NotFound(format!("Session {id} not found")));
    }
    let session = state.registry.get(&id).await;
    Ok(ok(json!({ "status": "terminated", "session": session })))
}

/// Build the session's WebSocket URL from the request's Host header.
fn ws_url(headers: &HeaderMap, session_id: &str) -> String {
    let host = headers
        .get("host")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("localhost");
    let scheme = match headers
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
    {
        Some("https") => "wss",
        _ => "ws",
    };
    format!("{scheme}://{host}/ws?sessionId={session_id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ws_url_uses_host_and_scheme() {
        let mut headers = HeaderMap::new();
        headers.insert("host", "example.com:3456".parse().unwrap());
        assert_eq!(
            ws_url(&headers, "abc"),
            "ws://example.com:3456/ws?sessionId=abc"
        );

        headers.insert("x-forwarded-proto", "https".parse().unwrap());
        assert_eq!(
            ws_url(&headers, "abc"),
            "wss://example.com:3456/ws?sessionId=abc"
        );
    }
}
