//! HTTP route handlers.
//!
//! Each sub-module corresponds to an API endpoint group. All responses use
//! the `{success, data?, error?}` envelope; handlers that can fail return
//! [`ApiError`], which renders the envelope with a matching status code.
//!
//! Handlers own input validation only — the semantics live in the registry,
//! the token store, and the path guard.

pub mod auth;
pub mod config;
pub mod dirs;
pub mod health;
pub mod sessions;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::{json, Value};

use crate::auth::TokenError;

/// Wrap a payload in the success envelope.
pub fn ok(data: impl Serialize) -> Json<Value> {
    Json(json!({ "success": true, "data": data }))
}

/// Success with no payload.
pub fn ok_empty() -> Json<Value> {
    Json(json!({ "success": true }))
}

/// Failures of the HTTP surface, rendered as `{success:false, error}`.
#[derive(Debug)]
pub enum ApiError {
    Unauthorized,
    WeakToken,
    AlreadyExists(String),
    Forbidden(String),
    NotFound(String),
    BadRequest(String),
    Internal(String),
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApiError::Unauthorized => write!(f, "Invalid or missing token"),
            ApiError::WeakToken => write!(f, "Token must be at least 8 characters"),
            ApiError::AlreadyExists(m)
            | ApiError::Forbidden(m)
            | ApiError::NotFound(m)
            | ApiError::BadRequest(m)
            | ApiError::Internal(m) => write!(f, "{m}"),
        }
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::WeakToken | ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::AlreadyExists(_) => StatusCode::CONFLICT,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({ "success": false, "error": self.to_string() }));
        (self.status(), body).into_response()
    }
}

impl From<TokenError> for ApiError {
    fn from(e: TokenError) -> Self {
        match e {
            TokenError::AlreadyExists => ApiError::AlreadyExists(e.to_string()),
            TokenError::WeakToken => ApiError::WeakToken,
            TokenError::Unauthorized => ApiError::Unauthorized,
            TokenError::Io(m) => ApiError::Internal(m),
        }
    }
}

impl From<std::io::Error> for ApiError {
    fn from(e: std::io::Error) -> Self {
        ApiError::Internal(e.to_string())
    }
}
