//! Directory browsing endpoints (token-gated).
//!
//! The browser uses these to pick a working directory before creating a
//! session. Listing goes through the same path guard as session creation,
//! so the picker can't see outside the allow-list either.

use std::path::Path;

use axum::{
    extract::{Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::{ok, ApiError};
use crate::guard::is_path_allowed;
use crate::state::AppState;
use crate::util::expand_tilde;

#[derive(Deserialize)]
pub struct DirsQuery {
    pub path: String,
}

/// A single entry within a directory listing.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DirEntry {
    pub name: String,
    pub path: String,
    pub is_directory: bool,
}

/// `GET /api/dirs?path=…` — list a directory within the allow-list.
pub async fn list_dirs(
    State(state): State<AppState>,
    Query(query): Query<DirsQuery>,
) -> Result<Json<Value>, ApiError> {
    let expanded = expand_tilde(&query.path);
    if !expanded.starts_with('/') {
        return Err(ApiError::BadRequest("Path must be absolute".to_string()));
    }
    let canonical = std::fs::canonicalize(expanded.as_ref())
        .map_err(|_| ApiError::NotFound(format!("Directory not found: {expanded}")))?;
    if !canonical.is_dir() {
        return Err(ApiError::BadRequest(format!(
            "Not a directory: {}",
            canonical.display()
        )));
    }

    let canonical_str = canonical.to_string_lossy().into_owned();
    let allowed_dirs = state.config.get().await.allowed_dirs;
    if !is_path_allowed(&canonical_str, &allowed_dirs) {
        return Err(ApiError::Forbidden(format!(
            "Path is outside the allowed directories: {canonical_str}"
        )));
    }

    let mut entries: Vec<DirEntry> = std::fs::read_dir(&canonical)
        .map_err(|e| ApiError::Internal(format!("Failed to read directory: {e}")))?
        .filter_map(Result::ok)
        .map(|entry| {
            let name = entry.file_name().to_string_lossy().into_owned();
            let is_directory = entry.file_type().is_ok_and(|t| t.is_dir());
            DirEntry {
                path: entry.path().to_string_lossy().into_owned(),
                name,
                is_directory,
            }
        })
        .collect();
    // Directories first, then case-insensitive by name.
    entries.sort_by(|a, b| {
        b.is_directory
            .cmp(&a.is_directory)
            .then_with(|| a.name.to_lowercase().cmp(&b.name.to_lowercase()))
    });

    Ok(ok(json!({ "path": canonical_str, "entries": entries })))
}

/// `GET /api/dirs/breadcrumbs?path=…` — cumulative path segments for the
/// directory picker's breadcrumb bar.
pub async fn breadcrumbs(Query(query): Query<DirsQuery>) -> Result<Json<Value>, ApiError> {
    let expanded = expand_tilde(&query.path);
    if !expanded.starts_with('/') {
        return Err(ApiError::BadRequest("Path must be absolute".to_string()));
    }

    let mut crumbs = vec![json!({ "name": "/", "path": "/" })];
    let mut accumulated = String::new();
    for segment in Path::new(expanded.as_ref())
        .components()
        .filter_map(|c| match c {
            std::path::Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
            _ => None,
        })
    {
        accumulated.push('/');
        accumulated.push_str(&segment);
        crumbs.push(json!({ "name": segment, "path": accumulated }));
    }

    Ok(ok(json!({ "breadcrumbs": crumbs })))
}
