//! Configuration read/update endpoints (token-gated).
//!
//! The `auth` subtree never crosses this surface: reads strip it, writes
//! cannot touch it (the patch type simply has no such field).

use axum::{extract::State, Json};
use serde_json::Value;

use super::{ok, ApiError};
use crate::config::ConfigPatch;
use crate::state::AppState;

/// `GET /api/config` — current config without the `auth` subtree.
pub async fn get_config(State(state): State<AppState>) -> Json<Value> {
    ok(state.config.get().await.sanitized())
}

/// `PUT /api/config` — merge the supplied fields and persist.
pub async fn put_config(
    State(state): State<AppState>,
    Json(patch): Json<ConfigPatch>,
) -> Result<Json<Value>, ApiError> {
    if let Some(dirs) = &patch.allowed_dirs {
        if let Some(bad) = dirs.iter().find(|d| !d.starts_with('/')) {
            return Err(ApiError::BadRequest(format!(
                "allowedDirs entries must be absolute paths: {bad}"
            )));
        }
    }
    if let Some(commands) = &patch.ai_commands {
        if let Some(bad) = commands.iter().find(|c| c.cmd.trim().is_empty()) {
            return Err(ApiError::BadRequest(format!(
                "aiCommands entry {:?} has an empty cmd",
                bad.name
            )));
        }
    }

    let updated = state
        .config
        .update(|c| {
            if let Some(port) = patch.port {
                c.port = port;
            }
            if let Some(dirs) = patch.allowed_dirs {
                c.allowed_dirs = dirs;
            }
            if let Some(commands) = patch.ai_commands {
                c.ai_commands = commands;
            }
        })
        .await?;
    Ok(ok(updated.sanitized()))
}
