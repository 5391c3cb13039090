//! # clicast
//!
//! Browser terminal server for local AI command-line tools.
//!
//! clicast exposes interactive shell programs (`claude`, `ollama run …`) to
//! a browser over HTTP and WebSocket. The server owns the pseudo-terminals,
//! brokers the byte streams, tracks session lifecycle, and enforces
//! bearer-token access control plus per-path sandboxing.
//!
//! ## API surface
//!
//! | Method     | Path                      | Auth  | Description                    |
//! |------------|---------------------------|-------|--------------------------------|
//! | GET        | `/api/health`             | No    | Liveness probe                 |
//! | GET        | `/api/auth/status`        | No    | Whether a token is configured  |
//! | POST       | `/api/auth/init`          | No*   | First-time token creation      |
//! | POST       | `/api/auth/verify`        | No    | Bearer login check             |
//! | PUT        | `/api/auth`               | No†   | Rotate token                   |
//! | DELETE     | `/api/auth`               | Yes   | Clear token                    |
//! | GET/PUT    | `/api/config`             | Yes   | Read/update config             |
//! | GET        | `/api/dirs`               | Yes   | List a directory               |
//! | GET        | `/api/dirs/breadcrumbs`   | Yes   | Path segments                  |
//! | POST/GET   | `/api/sessions`           | Yes   | Create / list sessions         |
//! | GET/DELETE | `/api/sessions/{id}`      | Yes   | Inspect / delete a session     |
//! | POST       | `/api/sessions/{id}/stop` | Yes   | Terminate, keep the record     |
//! | WS         | `/ws?sessionId=…&token=…` | Yes   | Per-session terminal           |
//! | WS         | `/ws/dev?token=…`         | Yes   | Shared developer terminal      |
//!
//! \* single-shot — fails with 409 once a token exists.
//! † proves possession by verifying the current token in the body.
//!
//! WebSocket auth is via `?token=<token>` query param (no `Authorization`
//! header available during the upgrade handshake).

use std::time::Duration;

use axum::{
    middleware,
    routing::{get, post, put},
    Router,
};
use clap::Parser;
use tokio::net::TcpListener;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};
use tracing::{info, warn};

use clicast_server::{auth, routes, state::AppState, ws, ConfigStore};

/// Browser terminal server for local AI command-line tools.
#[derive(Parser)]
#[command(name = "clicast", version)]
struct Cli {
    /// Path to the JSON config file (default: ~/.clicast/config.json).
    #[arg(long)]
    config: Option<String>,
}

/// HTTP request timeout in seconds unless overridden by `IDLE_TIMEOUT` (or
/// its legacy alias `BUN_IDLE_TIMEOUT`).
const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 120;

fn idle_timeout() -> Duration {
    let secs = std::env::var("IDLE_TIMEOUT")
        .or_else(|_| std::env::var("BUN_IDLE_TIMEOUT"))
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(DEFAULT_IDLE_TIMEOUT_SECS);
    Duration::from_secs(secs)
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let log_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt().with_env_filter(log_filter).init();

    info!("clicast v{} starting", env!("CARGO_PKG_VERSION"));

    let config_path = ConfigStore::resolve_path(cli.config.as_deref());
    info!("Config file: {}", config_path.display());
    let store = ConfigStore::open(config_path).expect("Failed to open config");
    let state = AppState::new(store);

    let config = state.config.get().await;
    if state.tokens.status().await {
        info!("Auth token configured");
    } else {
        warn!("No auth token yet — initialize one via POST /api/auth/init");
    }
    if config.allowed_dirs.is_empty() {
        warn!("allowedDirs is empty — sessions may start in any directory");
    }

    // Auth bootstrap routes stay outside the token middleware; DELETE checks
    // the bearer itself since it shares a path with the ungated PUT.
    let public_routes = Router::new()
        .route("/api/health", get(routes::health::health))
        .route("/api/auth/status", get(routes::auth::status))
        .route("/api/auth/init", post(routes::auth::init))
        .route("/api/auth/verify", post(routes::auth::verify))
        .route(
            "/api/auth",
            put(routes::auth::rotate).delete(routes::auth::clear),
        );

    let authed_routes = Router::new()
        .route(
            "/api/config",
            get(routes::config::get_config).put(routes::config::put_config),
        )
        .route("/api/dirs", get(routes::dirs::list_dirs))
        .route("/api/dirs/breadcrumbs", get(routes::dirs::breadcrumbs))
        .route(
            "/api/sessions",
            get(routes::sessions::list_sessions).post(routes::sessions::create_session),
        )
        .route(
            "/api/sessions/{id}",
            get(routes::sessions::get_session).delete(routes::sessions::delete_session),
        )
        .route("/api/sessions/{id}/stop", post(routes::sessions::stop_session))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_token,
        ));

    // WebSocket routes authenticate during the upgrade and are long-lived,
    // so the request timeout only wraps the REST surface.
    let ws_routes = Router::new()
        .route("/ws", get(ws::session_ws_upgrade))
        .route("/ws/dev", get(ws::dev::dev_ws_upgrade));

    let app = Router::new()
        .merge(public_routes.layer(TimeoutLayer::new(idle_timeout())))
        .merge(authed_routes.layer(TimeoutLayer::new(idle_timeout())))
        .merge(ws_routes)
        .layer(TraceLayer::new_for_http())
        .with_state(state.clone());

    let listen = format!("0.0.0.0:{}", config.port);
    let listener = TcpListener::bind(&listen).await.expect("Failed to bind");
    info!("Listening on {listen}");

    let shutdown = {
        let state = state.clone();
        async move {
            wait_for_signal().await;
            info!("Shutting down…");
            // Close every WebSocket (code 1001), then tear down the PTYs.
            // Session kill is SIGTERM-all then one bounded wait, so this
            // completes in fixed time regardless of how many are live.
            let _ = state.shutdown.send(());
            state.registry.shutdown().await;
            state.dev.shutdown().await;
        }
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .expect("Server error");

    info!("Goodbye");
}

async fn wait_for_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to register SIGTERM");
        tokio::select! {
            _ = ctrl_c => info!("Received SIGINT"),
            _ = sigterm.recv() => info!("Received SIGTERM"),
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received SIGINT");
    }
}
