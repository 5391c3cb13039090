//! JSON configuration store.
//!
//! The whole server is driven by a single pretty-printed JSON file:
//!
//! ```json
//! {
//!   "version": "1.0.0",
//!   "port": 3456,
//!   "allowedDirs": ["/home/user/projects"],
//!   "aiCommands": [
//!     { "id": "…uuid…", "name": "Claude", "cmd": "claude", "enabled": true }
//!   ],
//!   "auth": { "tokenHash": "…hex sha256…" }
//! }
//! ```
//!
//! Resolution order for the file location: `--config <path>` on the command
//! line, then `$HOME/.clicast/config.json`, then `./clicast.json` when `HOME`
//! is unset. A missing file is created at startup, seeded from the `PORT`,
//! `AI_COMMAND`, and `ALLOWED_DIRS` environment variables.
//!
//! [`ConfigStore`] keeps an in-memory copy behind an `RwLock`; every mutation
//! rewrites the file so external edits are the only way to get out of sync.

use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::info;
use uuid::Uuid;

/// Schema version written to new config files.
pub const CONFIG_VERSION: &str = "1.0.0";

/// Top-level configuration, deserialized from the JSON file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default = "default_version")]
    pub version: String,
    /// TCP port the HTTP/WS server binds (default 3456). Override with `PORT`.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Absolute directory roots sessions may be started in. Empty = no limit.
    #[serde(default)]
    pub allowed_dirs: Vec<String>,
    /// The AI commands offered to the browser. At least one should be enabled.
    #[serde(default = "default_ai_commands")]
    pub ai_commands: Vec<AiCommand>,
    /// Bearer-token credential. Absent until `POST /api/auth/init`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<AuthSection>,
}

/// One entry of the `aiCommands` list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiCommand {
    #[serde(default = "new_command_id")]
    pub id: String,
    pub name: String,
    /// Shell command string, e.g. `"claude"` or `"ollama run llama3"`.
    pub cmd: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

/// The `auth` subtree: a single hex SHA-256 digest of the bearer token.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthSection {
    pub token_hash: String,
}

/// Fields a `PUT /api/config` request may replace. `auth` is deliberately
/// absent — the token is only ever touched through the auth endpoints.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigPatch {
    pub port: Option<u16>,
    pub allowed_dirs: Option<Vec<String>>,
    pub ai_commands: Option<Vec<AiCommand>>,
}

fn default_version() -> String {
    CONFIG_VERSION.to_string()
}

fn default_port() -> u16 {
    3456
}

fn default_true() -> bool {
    true
}

fn new_command_id() -> String {
    Uuid::new_v4().to_string()
}

fn default_ai_commands() -> Vec<AiCommand> {
    vec![AiCommand {
        id: new_command_id(),
        name: "Claude".to_string(),
        cmd: "claude".to_string(),
        enabled: true,
    }]
}

impl Config {
    /// Compiled defaults, optionally overridden by environment variables
    /// (`PORT`, `AI_COMMAND`, `ALLOWED_DIRS`). Used when no file exists yet.
    pub fn seeded_from_env() -> Self {
        let port = std::env::var("PORT")
            .ok()
            .and_then(|v| v.parse::<u16>().ok())
            .unwrap_or_else(default_port);

        let allowed_dirs = std::env::var("ALLOWED_DIRS")
            .map(|v| {
                v.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(ToString::to_string)
                    .collect()
            })
            .unwrap_or_default();

        let ai_commands = match std::env::var("AI_COMMAND") {
            Ok(cmd) if !cmd.trim().is_empty() => {
                let cmd = cmd.trim().to_string();
                let name = cmd
                    .split_whitespace()
                    .next()
                    .unwrap_or("AI")
                    .to_string();
                vec![AiCommand {
                    id: new_command_id(),
                    name,
                    cmd,
                    enabled: true,
                }]
            }
            _ => default_ai_commands(),
        };

        Config {
            version: default_version(),
            port,
            allowed_dirs,
            ai_commands,
            auth: None,
        }
    }

    /// Copy with the `auth` subtree stripped, for returning to clients.
    pub fn sanitized(&self) -> Config {
        Config {
            auth: None,
            ..self.clone()
        }
    }

    /// The command to launch for a session: the entry with `id` when given,
    /// otherwise the first enabled entry.
    pub fn resolve_ai_command(&self, id: Option<&str>) -> Option<&AiCommand> {
        match id {
            Some(id) => self.ai_commands.iter().find(|c| c.id == id && c.enabled),
            None => self.ai_commands.iter().find(|c| c.enabled),
        }
    }
}

/// Owns the config file path and a cached in-memory copy.
pub struct ConfigStore {
    path: PathBuf,
    cached: RwLock<Config>,
}

impl ConfigStore {
    /// Resolve the config file location from the `--config` flag.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        match std::env::var("HOME") {
            Ok(home) => Path::new(&home).join(".clicast").join("config.json"),
            Err(_) => PathBuf::from("clicast.json"),
        }
    }

    /// Open the store, creating the file (seeded from the environment) when
    /// it does not exist yet.
    pub fn open(path: PathBuf) -> io::Result<Self> {
        let config = if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            serde_json::from_str(&content).map_err(|e| {
                io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("failed to parse {}: {e}", path.display()),
                )
            })?
        } else {
            let config = Config::seeded_from_env();
            write_pretty(&path, &config)?;
            info!("Created config file {}", path.display());
            config
        };

        Ok(Self {
            path,
            cached: RwLock::new(config),
        })
    }

    /// Directory containing the config file (used for the legacy token file).
    pub fn dir(&self) -> PathBuf {
        self.path
            .parent()
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf)
    }

    /// Snapshot of the current config.
    pub async fn get(&self) -> Config {
        self.cached.read().await.clone()
    }

    /// Mutate the cached config and persist the result. Returns the updated
    /// snapshot.
    pub async fn update<F>(&self, mutate: F) -> io::Result<Config>
    where
        F: FnOnce(&mut Config),
    {
        let mut cached = self.cached.write().await;
        mutate(&mut cached);
        write_pretty(&self.path, &cached)?;
        Ok(cached.clone())
    }
}

fn write_pretty(path: &Path, config: &Config) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let mut json = serde_json::to_string_pretty(config)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;
    json.push('\n');
    std::fs::write(path, json)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::Mutex;

    /// Serializes tests that read or write process environment variables.
    static ENV_LOCK: Mutex<()> = Mutex::const_new(());

    fn temp_config_path() -> PathBuf {
        std::env::temp_dir()
            .join(format!("clicast-test-{}", Uuid::new_v4()))
            .join("config.json")
    }

    #[tokio::test]
    async fn creates_file_with_defaults() {
        let _env = ENV_LOCK.lock().await;
        std::env::remove_var("PORT");
        std::env::remove_var("AI_COMMAND");
        std::env::remove_var("ALLOWED_DIRS");

        let path = temp_config_path();
        let store = ConfigStore::open(path.clone()).unwrap();
        assert!(path.exists());

        let config = store.get().await;
        assert_eq!(config.version, CONFIG_VERSION);
        assert_eq!(config.port, 3456);
        assert!(config.allowed_dirs.is_empty());
        assert_eq!(config.ai_commands.len(), 1);
        assert_eq!(config.ai_commands[0].cmd, "claude");
        assert!(config.ai_commands[0].enabled);
        assert!(config.auth.is_none());
    }

    #[tokio::test]
    async fn seeds_from_environment() {
        let _env = ENV_LOCK.lock().await;
        std::env::set_var("PORT", "4000");
        std::env::set_var("AI_COMMAND", "ollama run llama3");
        std::env::set_var("ALLOWED_DIRS", "/srv/a, /srv/b");

        let store = ConfigStore::open(temp_config_path()).unwrap();
        let config = store.get().await;

        std::env::remove_var("PORT");
        std::env::remove_var("AI_COMMAND");
        std::env::remove_var("ALLOWED_DIRS");

        assert_eq!(config.port, 4000);
        assert_eq!(config.allowed_dirs, vec!["/srv/a", "/srv/b"]);
        assert_eq!(config.ai_commands[0].cmd, "ollama run llama3");
        assert_eq!(config.ai_commands[0].name, "ollama");
    }

    #[tokio::test]
    async fn update_persists_and_reloads() {
        let _env = ENV_LOCK.lock().await;
        std::env::remove_var("PORT");
        std::env::remove_var("AI_COMMAND");
        std::env::remove_var("ALLOWED_DIRS");

        let path = temp_config_path();
        let store = ConfigStore::open(path.clone()).unwrap();
        store
            .update(|c| {
                c.allowed_dirs = vec!["/srv/a".to_string()];
                c.auth = Some(AuthSection {
                    token_hash: "ab".repeat(32),
                });
            })
            .await
            .unwrap();

        // A fresh store sees the persisted state.
        let reopened = ConfigStore::open(path).unwrap();
        let config = reopened.get().await;
        assert_eq!(config.allowed_dirs, vec!["/srv/a"]);
        assert_eq!(config.auth.unwrap().token_hash, "ab".repeat(32));
    }

    #[test]
    fn missing_fields_take_defaults() {
        let config: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(config.port, 3456);
        assert_eq!(config.ai_commands.len(), 1);
        assert!(config.auth.is_none());
    }

    #[test]
    fn sanitized_strips_auth() {
        let mut config = Config::seeded_from_env();
        config.auth = Some(AuthSection {
            token_hash: "00".repeat(32),
        });
        assert!(config.sanitized().auth.is_none());
    }

    #[test]
    fn resolve_ai_command_skips_disabled() {
        let mut config: Config = serde_json::from_str("{}").unwrap();
        config.ai_commands = vec![
            AiCommand {
                id: "one".into(),
                name: "One".into(),
                cmd: "one".into(),
                enabled: false,
            },
            AiCommand {
                id: "two".into(),
                name: "Two".into(),
                cmd: "two".into(),
                enabled: true,
            },
        ];
        assert_eq!(config.resolve_ai_command(None).unwrap().id, "two");
        assert!(config.resolve_ai_command(Some("one")).is_none());
        assert_eq!(config.resolve_ai_command(Some("two")).unwrap().cmd, "two");
    }
}
