//! Shared application state passed to every handler via Axum's `State`
//! extractor.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::broadcast;

use crate::auth::TokenStore;
use crate::config::ConfigStore;
use crate::dev::DevTerminal;
use crate::sessions::SessionRegistry;

/// Shared application state for the clicast server.
#[derive(Clone)]
pub struct AppState {
    /// The JSON config store (file + cached copy).
    pub config: Arc<ConfigStore>,
    /// Bearer-token credential store, backed by `config`.
    pub tokens: TokenStore,
    /// The authoritative session map and its idle reaper.
    pub registry: SessionRegistry,
    /// The shared developer-terminal singleton.
    pub dev: DevTerminal,
    /// Fired once at shutdown; every WebSocket loop closes with 1001 on it.
    pub shutdown: broadcast::Sender<()>,
    /// Monotonic instant when the server started (for uptime calculation).
    pub start_time: Instant,
}

impl AppState {
    pub fn new(config: ConfigStore) -> Self {
        let config = Arc::new(config);
        let (shutdown, _) = broadcast::channel(1);
        Self {
            tokens: TokenStore::new(Arc::clone(&config)),
            config,
            registry: SessionRegistry::new(),
            dev: DevTerminal::new(),
            shutdown,
            start_time: Instant::now(),
        }
    }
}
