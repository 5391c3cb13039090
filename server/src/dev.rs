//! The shared developer terminal.
//!
//! One process-wide PTY running the user's login shell, broadcast to every
//! `/ws/dev` subscriber. The first `init` spawns it; later clients attach to
//! the same shell and replay its history ring. Concurrent inits converge on
//! a single spawn because the whole slot sits behind one `Mutex`.

use std::sync::atomic::AtomicU64;
use std::sync::Arc;

use tokio::sync::{broadcast, Mutex};
use tracing::{info, warn};

use crate::sessions::ring::{HistoryRing, MAX_HISTORY_BYTES};
use crate::sessions::session::{ExitInfo, SessionEvent, SessionProcess};
use crate::shell;

/// Event channel capacity for dev-terminal subscribers.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Everything a `/ws/dev` connection needs after `init`.
pub struct DevAttach {
    /// Whether this `init` spawned the shell (vs. joined a running one).
    pub is_new: bool,
    pub ring: Arc<Mutex<HistoryRing>>,
    pub events: broadcast::Receiver<SessionEvent>,
}

struct DevShell {
    process: SessionProcess,
    ring: Arc<Mutex<HistoryRing>>,
    events: broadcast::Sender<SessionEvent>,
}

/// The process-wide shared shell slot.
///
/// Cloneable — all clones share the same slot.
#[derive(Clone, Default)]
pub struct DevTerminal {
    inner: Arc<Mutex<Option<DevShell>>>,
}

impl DevTerminal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach to the shared shell, spawning it if no live one exists.
    pub async fn init(&self, cols: u16, rows: u16) -> Result<DevAttach, String> {
        let mut slot = self.inner.lock().await;

        if let Some(shell) = slot.as_ref() {
            if !shell.process.has_exited() {
                return Ok(DevAttach {
                    is_new: false,
                    ring: Arc::clone(&shell.ring),
                    events: shell.events.subscribe(),
                });
            }
        }

        let program = shell::resolve_login_shell();
        let home = shell::resolve_home_dir();
        let ring = Arc::new(Mutex::new(HistoryRing::new(MAX_HISTORY_BYTES)));
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        // Login shell so rc files are sourced, as a real terminal would.
        let (process, exit_rx) = SessionProcess::spawn(
            "dev terminal",
            &program,
            &["-l".to_string()],
            &home,
            &shell::terminal_env(),
            cols,
            rows,
            Arc::clone(&ring),
            Arc::new(AtomicU64::new(0)),
        )?;
        info!("Dev terminal started: {program} (pid {})", process.pid);

        let pid = process.pid;
        let slot_ref = Arc::clone(&self.inner);
        let events_tx = events.clone();
        tokio::spawn(async move {
            let exit = exit_rx.await.unwrap_or(ExitInfo {
                code: -1,
                signal: Some(libc::SIGKILL),
            });
            info!("Dev terminal exited with code {}", exit.code);
            let mut slot = slot_ref.lock().await;
            // Only clear the slot if it still holds *this* shell; a kill may
            // already have been replaced by a respawn.
            if slot.as_ref().is_some_and(|s| s.process.pid == pid) {
                if let Some(shell) = slot.take() {
                    shell.process.abort_tasks();
                }
            }
            let _ = events_tx.send(SessionEvent::Exit(exit));
        });

        let attach = DevAttach {
            is_new: true,
            ring: Arc::clone(&ring),
            events: events.subscribe(),
        };
        *slot = Some(DevShell {
            process,
            ring,
            events,
        });
        Ok(attach)
    }

    /// Forward input bytes to the shared shell. Logged no-op when it is not
    /// running.
    pub async fn write(&self, data: &[u8]) {
        match self.inner.lock().await.as_ref() {
            Some(shell) => shell.process.write(data),
            None => warn!("Dev terminal: input ignored, shell not running"),
        }
    }

    /// Resize the shared shell's PTY. No-op when it is not running.
    pub async fn resize(&self, cols: u16, rows: u16) {
        if let Some(shell) = self.inner.lock().await.as_ref() {
            if let Err(e) = shell.process.resize(cols, rows) {
                warn!("Dev terminal: resize failed: {e}");
            }
        }
    }

    /// Kill the shared shell. Returns whether one was running. Subscribers
    /// learn about the teardown through the `Exit` event.
    pub async fn kill(&self) -> bool {
        let shell = self.inner.lock().await.take();
        match shell {
            Some(shell) => {
                info!("Dev terminal: kill requested");
                tokio::spawn(async move {
                    shell.process.graceful_kill().await;
                });
                true
            }
            None => false,
        }
    }

    /// Tear down the shared shell during server shutdown.
    pub async fn shutdown(&self) {
        if let Some(shell) = self.inner.lock().await.take() {
            shell.process.graceful_kill().await;
            info!("Dev terminal stopped");
        }
    }
}
