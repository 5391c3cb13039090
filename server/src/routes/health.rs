//! Unauthenticated health-check endpoint.

use axum::{extract::State, Json};
use serde_json::Value;

use crate::state::AppState;

/// `GET /api/health` — liveness probe.
///
/// No authentication required, suitable for load-balancer health checks.
pub async fn health(State(state): State<AppState>) -> Json<Value> {
    super::ok(serde_json::json!({
        "status": "ok",
        "uptimeSecs": state.start_time.elapsed().as_secs(),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
