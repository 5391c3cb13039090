//! Token bootstrap and management endpoints.
//!
//! - `GET    /api/auth/status` — `{hasToken}` (no auth)
//! - `POST   /api/auth/init`   — first-time token creation (no auth, single-shot)
//! - `POST   /api/auth/verify` — login check (no auth)
//! - `PUT    /api/auth`        — rotate (proves possession of the current token)
//! - `DELETE /api/auth`        — clear (bearer-token gated)
//!
//! These routes live outside the [`crate::auth::require_token`] middleware —
//! a fresh install has no token yet — so the one gated operation (`DELETE`)
//! checks the bearer header itself.

use axum::{extract::State, http::HeaderMap, http::StatusCode, Json};
use serde::Deserialize;
use serde_json::{json, Value};

use super::{ok, ok_empty, ApiError};
use crate::auth::bearer_token;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct TokenRequest {
    pub token: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RotateRequest {
    pub current_token: String,
    pub new_token: String,
}

/// `GET /api/auth/status`
pub async fn status(State(state): State<AppState>) -> Json<Value> {
    let has_token = state.tokens.status().await;
    ok(json!({ "hasToken": has_token }))
}

/// `POST /api/auth/init`
pub async fn init(
    State(state): State<AppState>,
    Json(body): Json<TokenRequest>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    state.tokens.init(&body.token).await?;
    Ok((StatusCode::CREATED, ok(json!({ "hasToken": true }))))
}

/// `POST /api/auth/verify`
pub async fn verify(
    State(state): State<AppState>,
    Json(body): Json<TokenRequest>,
) -> Json<Value> {
    let valid = state.tokens.verify(&body.token).await;
    ok(json!({ "valid": valid }))
}

/// `PUT /api/auth` — rotate the token.
pub async fn rotate(
    State(state): State<AppState>,
    Json(body): Json<RotateRequest>,
) -> Result<Json<Value>, ApiError> {
    state
        .tokens
        .rotate(&body.current_token, &body.new_token)
        .await?;
    Ok(ok_empty())
}

/// `DELETE /api/auth` — clear the token.
pub async fn clear(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    let provided = bearer_token(&headers).ok_or(ApiError::Unauthorized)?;
    if !state.tokens.verify(provided).await {
        return Err(ApiError::Unauthorized);
    }
    state.tokens.clear().await?;
    Ok(ok_empty())
}
