//! WebSocket transport for AI terminal sessions.
//!
//! ## Connection lifecycle
//!
//! 1. The browser connects to `GET /ws?sessionId=<id>&token=<t>`. The token
//!    and the session id are both validated **before** the upgrade
//!    completes — a bad token is a 401, an unknown session a 400.
//! 2. The first client frame must be `init{cols,rows}`: it spawns the PTY
//!    (first client only — `start` is idempotent), and the server answers
//!    `ready` followed by a `history` replay of the scroll-back ring, sent
//!    to this connection only.
//! 3. From then on every PTY chunk arrives as an `output` frame, keystrokes
//!    flow back as `input`, window changes as `resize`.
//! 4. When the PTY exits, the connection receives `status` and `exit`
//!    frames and is closed with code 1000 after a short grace.
//!
//! Closing the socket never terminates the session — the PTY keeps running
//! so a reconnecting browser can replay the ring and reattach. Any number of
//! clients may watch one session; each gets its own ring cursor, so a slow
//! client never blocks the PTY reader or its peers.

pub mod dev;
pub mod protocol;

use std::sync::Arc;

use axum::{
    extract::{
        ws::{close_code, CloseFrame, Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    response::{IntoResponse, Response},
};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::{broadcast, mpsc, Mutex};
use tracing::{debug, info};

use crate::routes::ApiError;
use crate::sessions::ring::HistoryRing;
use crate::sessions::session::SessionEvent;
use crate::state::AppState;
use protocol::{ClientMessage, ServerMessage};

/// Delay between the last session-scoped frame and the socket close.
const CLOSE_GRACE: tokio::time::Duration = tokio::time::Duration::from_millis(1500);

/// Per-connection outgoing queue depth.
pub(crate) const OUTBOUND_QUEUE: usize = 256;

pub(crate) const ERR_NOT_INITIALIZED: &str = "Terminal not initialized. Send init first.";
pub(crate) const ERR_BINARY_FRAME: &str = "Binary frames are not supported";
pub(crate) const ERR_BAD_FRAME: &str = "Failed to parse message";

/// What a connection pushes at its writer task.
pub(crate) enum Outbound {
    Msg(ServerMessage),
    Close { code: u16, reason: &'static str },
}

/// Query parameters for the `/ws` upgrade request.
#[derive(Deserialize)]
pub struct SessionWsQuery {
    #[serde(rename = "sessionId")]
    pub session_id: String,
    /// Bearer token as a query parameter (browsers can't set headers on
    /// WebSocket upgrades).
    pub token: String,
}

/// `GET /ws?sessionId=<id>&token=<t>` — per-session terminal upgrade.
pub async fn session_ws_upgrade(
    State(state): State<AppState>,
    Query(query): Query<SessionWsQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    if !state.tokens.verify(&query.token).await {
        return ApiError::Unauthorized.into_response();
    }
    if !state.registry.exists(&query.session_id).await {
        return ApiError::BadRequest(format!("Unknown session {}", query.session_id))
            .into_response();
    }
    ws.on_upgrade(move |socket| handle_session_ws(socket, state, query.session_id))
}

/// Forward queued frames to the WebSocket sink. One writer per connection
/// keeps per-socket FIFO ordering without sharing the sink across tasks.
pub(crate) fn spawn_writer(
    mut sink: SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<Outbound>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(out) = rx.recv().await {
            match out {
                Outbound::Msg(msg) => {
                    if sink
                        .send(Message::Text(msg.to_text().into()))
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
                Outbound::Close { code, reason } => {
                    let _ = sink
                        .send(Message::Close(Some(CloseFrame {
                            code,
                            reason: reason.into(),
                        })))
                        .await;
                    break;
                }
            }
        }
    })
}

/// Background task streaming ring chunks to one connection as `output`
/// frames, starting after `cursor`. Dies when the connection's queue closes.
pub(crate) fn spawn_output_stream(
    ring: Arc<Mutex<HistoryRing>>,
    tx: mpsc::Sender<Outbound>,
    mut cursor: u64,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let (chunks, notify) = {
                let ring = ring.lock().await;
                if ring.has_since(cursor) {
                    (ring.read_since(cursor), None)
                } else {
                    (Vec::new(), Some(ring.notifier()))
                }
            };
            for chunk in chunks {
                cursor = chunk.seq;
                if tx
                    .send(Outbound::Msg(ServerMessage::Output { data: chunk.data }))
                    .await
                    .is_err()
                {
                    return;
                }
            }
            if let Some(notify) = notify {
                notify.notified().await;
            }
        }
    })
}

/// Start the 1.5 s grace timer that closes the socket with code 1000. The
/// `exit` frame (already queued) stays ahead of the close because both go
/// through the same writer.
pub(crate) fn schedule_close(scheduled: &mut bool, close_tx: &mpsc::Sender<()>) {
    if *scheduled {
        return;
    }
    *scheduled = true;
    let close_tx = close_tx.clone();
    tokio::spawn(async move {
        tokio::time::sleep(CLOSE_GRACE).await;
        let _ = close_tx.send(()).await;
    });
}

/// Main event loop for one `/ws` connection.
async fn handle_session_ws(socket: WebSocket, state: AppState, session_id: String) {
    // Subscribe before anything else so no status/exit event slips past
    // between the upgrade and the first init.
    let Some(mut sub) = state.registry.subscribe(&session_id).await else {
        // Deleted between the existence check and now.
        return;
    };

    let (sink, mut stream) = socket.split();
    let (tx, rx) = mpsc::channel::<Outbound>(OUTBOUND_QUEUE);
    let writer = spawn_writer(sink, rx);

    let mut shutdown_rx = state.shutdown.subscribe();
    let (close_tx, mut close_rx) = mpsc::channel::<()>(1);
    let mut close_scheduled = false;

    let mut initialized = false;
    let mut output_task: Option<tokio::task::JoinHandle<()>> = None;

    debug!("Session {session_id}: client connected");

    loop {
        tokio::select! {
            ws_msg = stream.next() => {
                let Some(Ok(msg)) = ws_msg else { break };
                match msg {
                    Message::Text(text) => {
                        let parsed = match serde_json::from_str::<ClientMessage>(text.as_str()) {
                            Ok(parsed) => parsed,
                            Err(_) => {
                                let _ = tx.send(Outbound::Msg(ServerMessage::error(ERR_BAD_FRAME))).await;
                                continue;
                            }
                        };
                        match parsed {
                            ClientMessage::Init { cols, rows } => {
                                if initialized {
                                    let _ = tx.send(Outbound::Msg(ServerMessage::ready(&session_id))).await;
                                    continue;
                                }
                                if let Err(e) = state.registry.start(&session_id, cols, rows).await {
                                    let _ = tx.send(Outbound::Msg(ServerMessage::error(e))).await;
                                    continue;
                                }
                                initialized = true;
                                let _ = tx.send(Outbound::Msg(ServerMessage::ready(&session_id))).await;

                                // Snapshot and cursor under one lock so the
                                // replay and the live stream line up exactly.
                                let (snapshot, cursor) = {
                                    let ring = sub.ring.lock().await;
                                    (ring.snapshot(), ring.last_seq())
                                };
                                let _ = tx.send(Outbound::Msg(ServerMessage::History { data: snapshot })).await;
                                output_task = Some(spawn_output_stream(
                                    Arc::clone(&sub.ring),
                                    tx.clone(),
                                    cursor,
                                ));

                                // A late joiner to a session that already
                                // ended gets the terminal status and the
                                // grace close; its events were broadcast
                                // before we subscribed.
                                if let Some(info) = state.registry.get(&session_id).await {
                                    if info.status.is_terminal() {
                                        let _ = tx.send(Outbound::Msg(ServerMessage::Status {
                                            status: info.status.as_str(),
                                            session_id: Some(session_id.clone()),
                                        })).await;
                                        schedule_close(&mut close_scheduled, &close_tx);
                                    }
                                }
                            }
                            ClientMessage::Input { data } => {
                                if initialized {
                                    state.registry.write(&session_id, data.as_bytes()).await;
                                } else {
                                    let _ = tx.send(Outbound::Msg(ServerMessage::error(ERR_NOT_INITIALIZED))).await;
                                }
                            }
                            ClientMessage::Resize { cols, rows } => {
                                // Silently ignored before init.
                                if initialized {
                                    state.registry.resize(&session_id, cols, rows).await;
                                }
                            }
                            ClientMessage::Ping => {
                                let _ = tx.send(Outbound::Msg(ServerMessage::Pong)).await;
                            }
                            ClientMessage::Kill => {
                                let _ = tx.send(Outbound::Msg(ServerMessage::error(
                                    "kill is only available on the dev terminal",
                                ))).await;
                            }
                        }
                    }
                    Message::Binary(_) => {
                        let _ = tx.send(Outbound::Msg(ServerMessage::error(ERR_BINARY_FRAME))).await;
                    }
                    Message::Close(_) => break,
                    _ => {}
                }
            }
            event = sub.events.recv() => {
                match event {
                    Ok(SessionEvent::Status(status)) => {
                        let _ = tx.send(Outbound::Msg(ServerMessage::Status {
                            status: status.as_str(),
                            session_id: Some(session_id.clone()),
                        })).await;
                        if status.is_terminal() {
                            schedule_close(&mut close_scheduled, &close_tx);
                        }
                    }
                    Ok(SessionEvent::Exit(exit)) => {
                        let _ = tx.send(Outbound::Msg(ServerMessage::Exit {
                            code: exit.code,
                            signal: exit.signal,
                        })).await;
                        schedule_close(&mut close_scheduled, &close_tx);
                    }
                    Ok(SessionEvent::Error(message)) => {
                        let _ = tx.send(Outbound::Msg(ServerMessage::Error { message })).await;
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        debug!("Session {session_id}: client lagged {n} events");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        // Session deleted from the registry.
                        let _ = tx.send(Outbound::Close {
                            code: close_code::NORMAL,
                            reason: "session deleted",
                        }).await;
                        break;
                    }
                }
            }
            _ = close_rx.recv() => {
                let _ = tx.send(Outbound::Close {
                    code: close_code::NORMAL,
                    reason: "session ended",
                }).await;
                break;
            }
            _ = shutdown_rx.recv() => {
                let _ = tx.send(Outbound::Close {
                    code: close_code::AWAY,
                    reason: "server shutting down",
                }).await;
                break;
            }
        }
    }

    // The session itself stays alive for reconnects; only this connection's
    // machinery goes away.
    if let Some(task) = output_task {
        task.abort();
    }
    drop(tx);
    let _ = writer.await;
    info!("Session {session_id}: client disconnected");
}
