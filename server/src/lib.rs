#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::unused_async)]

//! clicast server library — the session and streaming core behind the
//! browser terminal.
//!
//! - `config` — JSON config store (port, allow-list, AI commands, token hash)
//! - `auth` — SHA-256 token store and bearer middleware
//! - `guard` — working-directory admission against the allow-list
//! - `shell` — shell probing, AI command interpretation, PTY plumbing
//! - `sessions` — session registry, history ring, idle reaper
//! - `dev` — the shared developer-terminal singleton
//! - `ws` — WebSocket protocol and connection loops
//! - `routes` — REST API route handlers

pub mod auth;
pub mod config;
pub mod dev;
pub mod guard;
pub mod routes;
pub mod sessions;
pub mod shell;
pub mod state;
pub mod util;
pub mod ws;

// Re-export key types at crate root for convenience.
pub use auth::TokenStore;
pub use config::{Config, ConfigStore};
pub use dev::DevTerminal;
pub use sessions::SessionRegistry;
pub use state::AppState;
