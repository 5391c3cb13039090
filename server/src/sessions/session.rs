//! The per-session record and its PTY-backed child process.
//!
//! A [`SessionProcess`] wraps a child running on a PTY. Output is decoupled
//! from any particular WebSocket: the reader task appends chunks to the
//! session's [`HistoryRing`] and wakes subscribers, so the session survives
//! client disconnects and late joiners can replay the retained tail.
//!
//! The child is made a session leader (`setsid` + `TIOCSCTTY` in the spawn
//! path), so signals sent to `-pgid` reach its whole process tree.

use std::collections::HashMap;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::os::unix::io::RawFd;
use std::os::unix::process::ExitStatusExt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::{broadcast, mpsc, oneshot, Mutex};
use tracing::info;

use super::ring::HistoryRing;
use crate::shell::pty;
use crate::util::now_ms;

/// How long the exit watcher waits for the output reader to drain the PTY
/// after the child is reaped.
const DRAIN_TIMEOUT: tokio::time::Duration = tokio::time::Duration::from_secs(2);

/// Session lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Created,
    Running,
    Exited,
    Terminated,
}

impl SessionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Running => "running",
            Self::Exited => "exited",
            Self::Terminated => "terminated",
        }
    }

    /// Whether the session will never run again.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Exited | Self::Terminated)
    }
}

/// How a child left the PTY.
#[derive(Debug, Clone, Copy)]
pub struct ExitInfo {
    pub code: i32,
    pub signal: Option<i32>,
}

/// Events the registry publishes and WebSocket connections consume.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// The session status changed.
    Status(SessionStatus),
    /// The PTY child exited. Emitted at most once, after the terminal
    /// `Status` event.
    Exit(ExitInfo),
    /// A session-scoped failure (e.g. the spawn failed), diagnostic text only.
    Error(String),
}

/// A session record owned by the registry.
///
/// The `Arc`'d fields are shared with the I/O tasks and with WebSocket
/// subscribers; everything else is mutated only under the registry map lock.
pub struct SessionRecord {
    pub id: String,
    pub working_dir: String,
    pub ai_command: String,
    pub status: SessionStatus,
    pub created_at: u64,
    /// Epoch ms of the last input/output/resize, bumped lock-free from the
    /// PTY reader.
    pub last_activity: Arc<AtomicU64>,
    pub ring: Arc<Mutex<HistoryRing>>,
    /// Per-session event channel; one receiver per connected client.
    pub events: broadcast::Sender<SessionEvent>,
    /// The live child, `None` until `start` and again after termination.
    pub process: Option<SessionProcess>,
}

impl SessionRecord {
    pub fn touch(&self) {
        self.last_activity.store(now_ms(), Ordering::Relaxed);
    }

    pub fn last_activity_ms(&self) -> u64 {
        self.last_activity.load(Ordering::Relaxed)
    }
}

/// A child process attached to a PTY, plus its background I/O tasks.
pub struct SessionProcess {
    /// OS process ID of the child (also its process group, via `setsid`).
    pub pid: u32,
    stdin_tx: mpsc::UnboundedSender<Vec<u8>>,
    /// PTY master fd, kept alive for resize.
    master: OwnedFd,
    /// Set by the exit watcher the moment `wait()` returns.
    exited: Arc<AtomicBool>,
    /// Handles to the background I/O tasks — aborted on kill.
    tasks: Vec<tokio::task::JoinHandle<()>>,
}

impl SessionProcess {
    /// Spawn `program args…` on a fresh PTY of the given size.
    ///
    /// Three background tasks route I/O: a stdin writer (channel → master),
    /// an output reader (master → `ring`, bumping `last_activity`), and an
    /// exit watcher that fires the returned receiver exactly once.
    #[allow(clippy::too_many_arguments)]
    pub fn spawn(
        label: &str,
        program: &str,
        args: &[String],
        working_dir: &str,
        env: &HashMap<String, String>,
        cols: u16,
        rows: u16,
        ring: Arc<Mutex<HistoryRing>>,
        last_activity: Arc<AtomicU64>,
    ) -> Result<(Self, oneshot::Receiver<ExitInfo>), String> {
        let pty_pair = pty::allocate_pty(cols, rows)
            .map_err(|e| format!("Failed to allocate PTY: {e}"))?;

        let mut child = pty::spawn_on_pty(&pty_pair, program, args, working_dir, env)
            .map_err(|e| format!("Failed to spawn {program}: {e}"))?;

        let pid = child.id().unwrap_or(0);
        let master = pty_pair.master;
        let master_raw: RawFd = master.as_raw_fd();

        // Dup the master fd: one for writing, one for reading, the original
        // kept for resize.
        let writer_fd: RawFd = unsafe { libc::dup(master_raw) };
        if writer_fd < 0 {
            return Err(format!(
                "dup() failed for PTY master writer: {}",
                std::io::Error::last_os_error()
            ));
        }
        let reader_fd: RawFd = unsafe { libc::dup(master_raw) };
        if reader_fd < 0 {
            unsafe {
                libc::close(writer_fd);
            }
            return Err(format!(
                "dup() failed for PTY master reader: {}",
                std::io::Error::last_os_error()
            ));
        }

        // SAFETY: we own these file descriptors via dup
        let master_write =
            tokio::fs::File::from_std(unsafe { std::fs::File::from_raw_fd(writer_fd) });
        let master_read =
            tokio::fs::File::from_std(unsafe { std::fs::File::from_raw_fd(reader_fd) });

        // stdin writer task: channel → PTY master (write side)
        let (stdin_tx, mut stdin_rx) = mpsc::unbounded_channel::<Vec<u8>>();
        let stdin_task = tokio::spawn(async move {
            let mut writer = master_write;
            while let Some(data) = stdin_rx.recv().await {
                if writer.write_all(&data).await.is_err() {
                    break;
                }
                if writer.flush().await.is_err() {
                    break;
                }
            }
        });

        // Output reader task: PTY master (read side) → history ring
        let label_out = label.to_string();
        let output_task = tokio::spawn(async move {
            let mut reader = master_read;
            let mut tmp = [0u8; 4096];
            loop {
                match reader.read(&mut tmp).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        let data = String::from_utf8_lossy(&tmp[..n]).into_owned();
                        ring.lock().await.push(data);
                        last_activity.store(now_ms(), Ordering::Relaxed);
                    }
                }
            }
            info!("{label_out}: PTY output closed");
        });

        // Exit watcher task. After the child is reaped, the output reader is
        // given a bounded window to drain what the PTY still buffers, so the
        // exit report never races ahead of the final output chunks. The
        // timeout covers grandchildren that keep the slave fd open.
        let exited = Arc::new(AtomicBool::new(false));
        let exited_watch = Arc::clone(&exited);
        let label_exit = label.to_string();
        let (exit_tx, exit_rx) = oneshot::channel();
        let exit_task = tokio::spawn(async move {
            let exit = match child.wait().await {
                Ok(status) => {
                    let info = ExitInfo {
                        code: status.code().unwrap_or(-1),
                        signal: status.signal(),
                    };
                    info!(
                        "{label_exit}: exited with code {} (signal {:?})",
                        info.code, info.signal
                    );
                    info
                }
                Err(e) => {
                    info!("{label_exit}: wait error: {e}");
                    ExitInfo {
                        code: -1,
                        signal: None,
                    }
                }
            };
            let _ = tokio::time::timeout(DRAIN_TIMEOUT, output_task).await;
            exited_watch.store(true, Ordering::Relaxed);
            let _ = exit_tx.send(exit);
        });

        Ok((
            SessionProcess {
                pid,
                stdin_tx,
                master,
                exited,
                tasks: vec![stdin_task, exit_task],
            },
            exit_rx,
        ))
    }

    /// Enqueue bytes for the child's stdin. Non-blocking; silently dropped
    /// once the writer side has closed.
    pub fn write(&self, data: &[u8]) {
        let _ = self.stdin_tx.send(data.to_vec());
    }

    /// Resize the terminal window. Idempotent; dimensions are clamped.
    pub fn resize(&self, cols: u16, rows: u16) -> Result<(), String> {
        pty::resize_pty(&self.master, cols, rows).map_err(|e| e.to_string())
    }

    /// Whether the child has already been reaped.
    pub fn has_exited(&self) -> bool {
        self.exited.load(Ordering::Relaxed)
    }

    /// Request termination of the process group (SIGTERM).
    pub fn kill(&self) {
        self.signal(libc::SIGTERM);
    }

    /// Gracefully kill: SIGTERM first, wait up to 3 s for the child to exit,
    /// then SIGKILL if it's still running. Aborts the I/O tasks afterwards.
    pub async fn graceful_kill(&self) {
        self.signal(libc::SIGTERM);

        let deadline = tokio::time::Instant::now() + tokio::time::Duration::from_secs(3);
        loop {
            if self.has_exited() {
                break;
            }
            if tokio::time::Instant::now() >= deadline {
                self.signal(libc::SIGKILL);
                break;
            }
            tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
        }

        self.abort_tasks();
    }

    /// Abort the background I/O tasks (stdin writer, reader, exit watcher).
    pub fn abort_tasks(&self) {
        for task in &self.tasks {
            task.abort();
        }
    }

    fn signal(&self, signal: i32) {
        #[allow(clippy::cast_possible_wrap)]
        let pgid = self.pid as i32;
        if pgid > 0 {
            // kill(-pgid, signal) delivers to the whole process group.
            unsafe {
                libc::kill(-pgid, signal);
            }
        }
    }
}
