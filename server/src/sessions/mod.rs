//! Session lifecycle management.
//!
//! [`SessionRegistry`] is the single authority for creating, starting,
//! accessing, and destroying AI terminal sessions. Sessions are created
//! *cold* by the REST layer (`status=created`, no PTY) and started by the
//! first WebSocket `init`, which carries the terminal dimensions. A session
//! survives client disconnects — output keeps accumulating in its history
//! ring so a reconnecting browser can replay the tail.
//!
//! ## Concurrency
//!
//! The session map is behind an `RwLock`. Read operations (input, resize,
//! list) take a read lock; mutations (create, start, terminate, delete,
//! sweep) take a write lock. Output never touches the map: the PTY reader
//! writes straight into the `Arc`'d ring.
//!
//! ## Reaper
//!
//! A single 30 s ticker, started lazily by the first `create` and stopped
//! once the map empties, terminates running sessions idle for 30 minutes
//! and drops terminal records older than a 5-minute grace.

pub mod ring;
pub mod session;

use std::collections::HashMap;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{broadcast, Mutex, RwLock};
use tracing::{info, warn};
use uuid::Uuid;

use crate::shell;
use crate::util::now_ms;
use ring::{HistoryRing, MAX_HISTORY_BYTES};
use session::{ExitInfo, SessionEvent, SessionProcess, SessionRecord, SessionStatus};

/// Period of the idle-reaper ticker.
const REAPER_INTERVAL: Duration = Duration::from_secs(30);

/// A running session with no I/O for this long is terminated by the reaper.
const SESSION_IDLE_MS: u64 = 30 * 60 * 1000;

/// Exited/terminated records linger this long before the reaper drops them.
const TERMINAL_GRACE_MS: u64 = 5 * 60 * 1000;

/// Per-session event channel capacity.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Projection of a session record for REST responses and listings. Excludes
/// the PTY handle and the client set by construction.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub id: String,
    pub working_dir: String,
    pub ai_command: String,
    pub status: SessionStatus,
    pub created_at: u64,
    pub last_activity: u64,
}

impl SessionInfo {
    fn of(record: &SessionRecord) -> Self {
        Self {
            id: record.id.clone(),
            working_dir: record.working_dir.clone(),
            ai_command: record.ai_command.clone(),
            status: record.status,
            created_at: record.created_at,
            last_activity: record.last_activity_ms(),
        }
    }
}

/// What a WebSocket connection needs to follow one session: the event
/// stream plus the shared history ring.
pub struct SessionSubscription {
    pub events: broadcast::Receiver<SessionEvent>,
    pub ring: Arc<Mutex<HistoryRing>>,
}

/// Manages the pool of AI terminal sessions.
///
/// Cloneable — all clones share the same inner map and reaper slot.
#[derive(Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<RwLock<HashMap<String, SessionRecord>>>,
    reaper: Arc<Mutex<Option<tokio::task::JoinHandle<()>>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a cold session record. The PTY is not spawned until
    /// [`SessionRegistry::start`].
    pub async fn create(&self, working_dir: &str, ai_command: &str) -> SessionInfo {
        let id = Uuid::new_v4().to_string();
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let now = now_ms();
        let record = SessionRecord {
            id: id.clone(),
            working_dir: working_dir.to_string(),
            ai_command: ai_command.to_string(),
            status: SessionStatus::Created,
            created_at: now,
            last_activity: Arc::new(AtomicU64::new(now)),
            ring: Arc::new(Mutex::new(HistoryRing::new(MAX_HISTORY_BYTES))),
            events,
            process: None,
        };
        let info = SessionInfo::of(&record);

        {
            let mut sessions = self.sessions.write().await;
            sessions.insert(id.clone(), record);
            info!(
                "Session {id} created in {working_dir} ({} total)",
                sessions.len()
            );
        }
        self.ensure_reaper().await;
        info
    }

    pub async fn exists(&self, id: &str) -> bool {
        self.sessions.read().await.contains_key(id)
    }

    /// Snapshot projections of all records.
    pub async fn list(&self) -> Vec<SessionInfo> {
        self.sessions
            .read()
            .await
            .values()
            .map(SessionInfo::of)
            .collect()
    }

    pub async fn get(&self, id: &str) -> Option<SessionInfo> {
        self.sessions.read().await.get(id).map(SessionInfo::of)
    }

    /// Snapshot of the output ring, oldest chunk first.
    pub async fn history(&self, id: &str) -> Option<Vec<String>> {
        let ring = {
            let sessions = self.sessions.read().await;
            Arc::clone(&sessions.get(id)?.ring)
        };
        let snapshot = ring.lock().await.snapshot();
        Some(snapshot)
    }

    /// Subscribe to a session's events and history ring.
    pub async fn subscribe(&self, id: &str) -> Option<SessionSubscription> {
        let sessions = self.sessions.read().await;
        let record = sessions.get(id)?;
        Some(SessionSubscription {
            events: record.events.subscribe(),
            ring: Arc::clone(&record.ring),
        })
    }

    /// Spawn the session's PTY with the given dimensions. Idempotent: a
    /// session that is already running (or has already ended) is left
    /// untouched. Returns `Err` only for an unknown id — spawn failures are
    /// reported through the session's event channel (`Error` then
    /// `Status(Exited)`).
    pub async fn start(&self, id: &str, cols: u16, rows: u16) -> Result<(), String> {
        let mut sessions = self.sessions.write().await;
        let record = sessions
            .get_mut(id)
            .ok_or_else(|| format!("Session {id} not found"))?;

        if record.process.is_some() || record.status.is_terminal() {
            return Ok(());
        }

        let invocation = shell::interpret_ai_command(&record.ai_command, &record.working_dir);
        let args = vec!["-c".to_string(), invocation.command_line.clone()];
        let spawned = SessionProcess::spawn(
            &format!("session {id}"),
            "bash",
            &args,
            &invocation.working_dir,
            &shell::terminal_env(),
            cols,
            rows,
            Arc::clone(&record.ring),
            Arc::clone(&record.last_activity),
        );

        match spawned {
            Ok((process, exit_rx)) => {
                info!("Session {id} running (pid {})", process.pid);
                record.process = Some(process);
                record.status = SessionStatus::Running;
                record.touch();
                let _ = record
                    .events
                    .send(SessionEvent::Status(SessionStatus::Running));

                // Watch for the child's exit and finalize the record.
                let registry = self.clone();
                let id = id.to_string();
                tokio::spawn(async move {
                    let exit = exit_rx.await.unwrap_or(ExitInfo {
                        code: -1,
                        signal: Some(libc::SIGKILL),
                    });
                    registry.handle_exit(&id, exit).await;
                });
                Ok(())
            }
            Err(e) => {
                warn!("Session {id}: spawn failed: {e}");
                record.status = SessionStatus::Exited;
                record.touch();
                let _ = record
                    .events
                    .send(SessionEvent::Error(format!("Failed to start session: {e}")));
                let _ = record
                    .events
                    .send(SessionEvent::Status(SessionStatus::Exited));
                Ok(())
            }
        }
    }

    /// Forward input bytes to the session's PTY. Logged no-op when the
    /// session has no live terminal.
    pub async fn write(&self, id: &str, data: &[u8]) {
        let sessions = self.sessions.read().await;
        match sessions.get(id) {
            Some(record) => match &record.process {
                Some(process) => {
                    record.touch();
                    process.write(data);
                }
                None => warn!("Session {id}: input ignored, no active terminal"),
            },
            None => warn!("Session {id}: input ignored, unknown session"),
        }
    }

    /// Resize the session's PTY. No-op when there is none.
    pub async fn resize(&self, id: &str, cols: u16, rows: u16) {
        let sessions = self.sessions.read().await;
        if let Some(record) = sessions.get(id) {
            if let Some(process) = &record.process {
                record.touch();
                if let Err(e) = process.resize(cols, rows) {
                    warn!("Session {id}: resize failed: {e}");
                }
            }
        }
    }

    /// Move a session to a terminal status, killing its PTY if one is live.
    /// Idempotent. Returns whether the session exists.
    pub async fn terminate(&self, id: &str, reason: SessionStatus) -> bool {
        debug_assert!(reason.is_terminal());
        let process = {
            let mut sessions = self.sessions.write().await;
            let Some(record) = sessions.get_mut(id) else {
                return false;
            };
            if record.status.is_terminal() {
                return true;
            }
            record.status = reason;
            record.touch();
            let _ = record.events.send(SessionEvent::Status(reason));
            record.process.take()
        };

        if let Some(process) = process {
            info!("Session {id} {}", reason.as_str());
            // Kill outside the map lock; the exit watcher broadcasts the
            // final `Exit` event once the child is gone.
            tokio::spawn(async move {
                process.graceful_kill().await;
            });
        }
        true
    }

    /// Terminate and remove the record. Returns whether it existed.
    pub async fn delete(&self, id: &str) -> bool {
        if !self.terminate(id, SessionStatus::Terminated).await {
            return false;
        }
        let mut sessions = self.sessions.write().await;
        sessions.remove(id);
        info!("Session {id} deleted ({} remaining)", sessions.len());
        true
    }

    /// Record the child's exit. Fires the terminal `Status` (unless one was
    /// already emitted by `terminate`) followed by the final `Exit` event.
    async fn handle_exit(&self, id: &str, exit: ExitInfo) {
        let mut sessions = self.sessions.write().await;
        let Some(record) = sessions.get_mut(id) else {
            return;
        };
        // Dropping the process closes the stdin channel; the I/O tasks have
        // already wound down by the time the exit report arrives.
        drop(record.process.take());
        if !record.status.is_terminal() {
            record.status = SessionStatus::Exited;
            let _ = record
                .events
                .send(SessionEvent::Status(SessionStatus::Exited));
        }
        record.touch();
        let _ = record.events.send(SessionEvent::Exit(exit));
    }

    /// Start the reaper ticker unless one is already alive.
    async fn ensure_reaper(&self) {
        let mut slot = self.reaper.lock().await;
        if slot.as_ref().is_some_and(|h| !h.is_finished()) {
            return;
        }
        let registry = self.clone();
        *slot = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(REAPER_INTERVAL);
            interval.tick().await; // first tick fires immediately
            loop {
                interval.tick().await;
                registry.sweep().await;
                // Re-check emptiness under the reaper slot lock so a
                // concurrent `create` either sees the cleared slot or we see
                // its session.
                let mut slot = registry.reaper.lock().await;
                if registry.sessions.read().await.is_empty() {
                    slot.take();
                    return;
                }
            }
        }));
    }

    /// One reaper pass: terminate idle running sessions, drop stale terminal
    /// records.
    async fn sweep(&self) {
        let now = now_ms();
        let (idle, stale) = {
            let sessions = self.sessions.read().await;
            let idle: Vec<String> = sessions
                .values()
                .filter(|r| {
                    r.status == SessionStatus::Running
                        && now.saturating_sub(r.last_activity_ms()) >= SESSION_IDLE_MS
                })
                .map(|r| r.id.clone())
                .collect();
            let stale: Vec<String> = sessions
                .values()
                .filter(|r| {
                    r.status.is_terminal()
                        && now.saturating_sub(r.last_activity_ms()) >= TERMINAL_GRACE_MS
                })
                .map(|r| r.id.clone())
                .collect();
            (idle, stale)
        };

        for id in idle {
            info!("Session {id} idle for 30+ minutes, terminating");
            self.terminate(&id, SessionStatus::Terminated).await;
        }
        if !stale.is_empty() {
            let mut sessions = self.sessions.write().await;
            for id in stale {
                sessions.remove(&id);
                info!("Reaped terminal session {id}");
            }
        }
    }

    /// Shut everything down: stop the reaper and gracefully kill all
    /// sessions. SIGTERM goes out to every process group at once, then a
    /// single bounded wait covers them all, so shutdown time does not grow
    /// with the session count.
    pub async fn shutdown(&self) {
        if let Some(handle) = self.reaper.lock().await.take() {
            handle.abort();
        }

        let processes: Vec<(String, SessionProcess)> = {
            let mut sessions = self.sessions.write().await;
            sessions
                .iter_mut()
                .filter_map(|(id, record)| {
                    record.status = SessionStatus::Terminated;
                    record.process.take().map(|p| (id.clone(), p))
                })
                .collect()
        };
        if processes.is_empty() {
            return;
        }

        for (id, process) in &processes {
            process.kill();
            info!("Session {id}: SIGTERM sent (shutdown)");
        }

        let deadline = tokio::time::Instant::now() + tokio::time::Duration::from_secs(3);
        loop {
            if processes.iter().all(|(_, p)| p.has_exited())
                || tokio::time::Instant::now() >= deadline
            {
                break;
            }
            tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
        }

        for (id, process) in &processes {
            if !process.has_exited() {
                info!("Session {id}: still running, SIGKILL");
            }
            process.graceful_kill().await;
        }
        info!("Shut down {} session(s)", processes.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{timeout, Duration};

    async fn next_event(rx: &mut broadcast::Receiver<SessionEvent>) -> SessionEvent {
        timeout(Duration::from_secs(10), rx.recv())
            .await
            .expect("timed out waiting for session event")
            .expect("event channel closed")
    }

    #[tokio::test]
    async fn create_is_cold() {
        let registry = SessionRegistry::new();
        let info = registry.create("/tmp", "echo hello").await;
        assert_eq!(info.status, SessionStatus::Created);
        assert!(registry.exists(&info.id).await);
        assert_eq!(registry.list().await.len(), 1);
        assert_eq!(registry.history(&info.id).await.unwrap(), Vec::<String>::new());
    }

    #[tokio::test]
    async fn start_runs_command_and_captures_output() {
        let registry = SessionRegistry::new();
        let info = registry.create("/tmp", "echo terminal-says-hi").await;
        let mut sub = registry.subscribe(&info.id).await.unwrap();

        registry.start(&info.id, 80, 24).await.unwrap();
        assert!(matches!(
            next_event(&mut sub.events).await,
            SessionEvent::Status(SessionStatus::Running)
        ));

        // `echo` exits immediately: expect the terminal status then the exit.
        assert!(matches!(
            next_event(&mut sub.events).await,
            SessionEvent::Status(SessionStatus::Exited)
        ));
        match next_event(&mut sub.events).await {
            SessionEvent::Exit(exit) => assert_eq!(exit.code, 0),
            other => panic!("expected exit event, got {other:?}"),
        }

        let history = registry.history(&info.id).await.unwrap().join("");
        assert!(
            history.contains("terminal-says-hi"),
            "history should capture output, got: {history:?}"
        );
        assert_eq!(
            registry.get(&info.id).await.unwrap().status,
            SessionStatus::Exited
        );
    }

    #[tokio::test]
    async fn start_is_idempotent() {
        let registry = SessionRegistry::new();
        let info = registry.create("/tmp", "sleep 30").await;
        registry.start(&info.id, 80, 24).await.unwrap();
        registry.start(&info.id, 80, 24).await.unwrap();
        assert_eq!(
            registry.get(&info.id).await.unwrap().status,
            SessionStatus::Running
        );
        registry.delete(&info.id).await;
    }

    #[tokio::test]
    async fn start_unknown_session_errors() {
        let registry = SessionRegistry::new();
        assert!(registry.start("no-such-id", 80, 24).await.is_err());
    }

    #[tokio::test]
    async fn terminate_is_idempotent_and_kills() {
        let registry = SessionRegistry::new();
        let info = registry.create("/tmp", "sleep 30").await;
        let mut sub = registry.subscribe(&info.id).await.unwrap();
        registry.start(&info.id, 80, 24).await.unwrap();
        assert!(matches!(
            next_event(&mut sub.events).await,
            SessionEvent::Status(SessionStatus::Running)
        ));

        assert!(registry.terminate(&info.id, SessionStatus::Terminated).await);
        assert!(matches!(
            next_event(&mut sub.events).await,
            SessionEvent::Status(SessionStatus::Terminated)
        ));
        // The SIGTERM'd child is reaped and reported.
        assert!(matches!(
            next_event(&mut sub.events).await,
            SessionEvent::Exit(_)
        ));

        // Second terminate is a quiet no-op.
        assert!(registry.terminate(&info.id, SessionStatus::Terminated).await);
        assert_eq!(
            registry.get(&info.id).await.unwrap().status,
            SessionStatus::Terminated
        );
    }

    #[tokio::test]
    async fn delete_removes_record() {
        let registry = SessionRegistry::new();
        let info = registry.create("/tmp", "echo bye").await;
        assert!(registry.delete(&info.id).await);
        assert!(!registry.exists(&info.id).await);
        assert!(!registry.delete(&info.id).await);
    }

    #[tokio::test]
    async fn write_without_terminal_is_noop() {
        let registry = SessionRegistry::new();
        let info = registry.create("/tmp", "echo hello").await;
        // Must not panic or spawn anything.
        registry.write(&info.id, b"ls\r").await;
        registry.resize(&info.id, 100, 30).await;
        assert_eq!(
            registry.get(&info.id).await.unwrap().status,
            SessionStatus::Created
        );
    }

    #[tokio::test]
    async fn spawn_failure_emits_error_then_exited() {
        let registry = SessionRegistry::new();
        // A working directory that cannot exist makes the spawn itself fail.
        let info = registry
            .create("/nonexistent-root/nowhere", "echo hello")
            .await;
        let mut sub = registry.subscribe(&info.id).await.unwrap();
        registry.start(&info.id, 80, 24).await.unwrap();

        assert!(matches!(
            next_event(&mut sub.events).await,
            SessionEvent::Error(_)
        ));
        assert!(matches!(
            next_event(&mut sub.events).await,
            SessionEvent::Status(SessionStatus::Exited)
        ));
        assert_eq!(
            registry.get(&info.id).await.unwrap().status,
            SessionStatus::Exited
        );
    }

    #[tokio::test]
    async fn input_reaches_the_terminal() {
        let registry = SessionRegistry::new();
        let info = registry.create("/tmp", "cat").await;
        let mut sub = registry.subscribe(&info.id).await.unwrap();
        registry.start(&info.id, 80, 24).await.unwrap();
        assert!(matches!(
            next_event(&mut sub.events).await,
            SessionEvent::Status(SessionStatus::Running)
        ));

        registry.write(&info.id, b"round-trip\r").await;

        // Poll the ring until the echo comes back through the PTY.
        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        loop {
            let history = registry.history(&info.id).await.unwrap().join("");
            if history.contains("round-trip") {
                break;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "no echo in history: {history:?}"
            );
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        registry.delete(&info.id).await;
    }
}
