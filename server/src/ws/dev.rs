//! WebSocket handler for the shared developer terminal.
//!
//! Same wire protocol as `/ws`, with three differences: there is no
//! `sessionId` (the shell is a process-wide singleton), `init` spawns the
//! shell lazily on the first connect (`ready` carries `isNew`), and `kill`
//! is accepted to tear the shared shell down.

use std::sync::Arc;

use axum::{
    extract::{
        ws::{close_code, Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    response::{IntoResponse, Response},
};
use futures::StreamExt;
use serde::Deserialize;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info};

use super::{
    protocol::{ClientMessage, ServerMessage},
    schedule_close, spawn_output_stream, spawn_writer, Outbound, ERR_BAD_FRAME,
    ERR_BINARY_FRAME, ERR_NOT_INITIALIZED, OUTBOUND_QUEUE,
};
use crate::routes::ApiError;
use crate::sessions::session::SessionEvent;
use crate::state::AppState;

/// Query parameters for the `/ws/dev` upgrade request.
#[derive(Deserialize)]
pub struct DevWsQuery {
    pub token: String,
}

/// `GET /ws/dev?token=<t>` — shared developer terminal upgrade.
pub async fn dev_ws_upgrade(
    State(state): State<AppState>,
    Query(query): Query<DevWsQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    if !state.tokens.verify(&query.token).await {
        return ApiError::Unauthorized.into_response();
    }
    ws.on_upgrade(move |socket| handle_dev_ws(socket, state))
}

/// Await the next event once a receiver exists; park forever until then so
/// the select arm stays inert before `init`.
async fn next_event(
    events: &mut Option<broadcast::Receiver<SessionEvent>>,
) -> Result<SessionEvent, broadcast::error::RecvError> {
    match events {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// Main event loop for one `/ws/dev` connection.
async fn handle_dev_ws(socket: WebSocket, state: AppState) {
    let (sink, mut stream) = socket.split();
    let (tx, rx) = mpsc::channel::<Outbound>(OUTBOUND_QUEUE);
    let writer = spawn_writer(sink, rx);

    let mut shutdown_rx = state.shutdown.subscribe();
    let (close_tx, mut close_rx) = mpsc::channel::<()>(1);
    let mut close_scheduled = false;

    let mut initialized = false;
    let mut events: Option<broadcast::Receiver<SessionEvent>> = None;
    let mut output_task: Option<tokio::task::JoinHandle<()>> = None;

    debug!("Dev terminal: client connected");

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
                                    let _ = tx.send(Outbound::Msg(ServerMessage::ready_dev(false))).await;
                                    continue;
                                }
                                let attach = match state.dev.init(cols, rows).await {
                                    Ok(attach) => attach,
                                    Err(e) => {
                                        let _ = tx.send(Outbound::Msg(ServerMessage::error(
                                            format!("Failed to start dev terminal: {e}"),
                                        ))).await;
                                        continue;
                                    }
                                };
                                initialized = true;
                                events = Some(attach.events);
                                let _ = tx.send(Outbound::Msg(ServerMessage::ready_dev(attach.is_new))).await;

                                let (snapshot, cursor) = {
                                    let ring = attach.ring.lock().await;
                                    (ring.snapshot(), ring.last_seq())
                                };
                                let _ = tx.send(Outbound::Msg(ServerMessage::History { data: snapshot })).await;
                                output_task = Some(spawn_output_stream(
                                    Arc::clone(&attach.ring),
                                    tx.clone(),
                                    cursor,
                                ));
                            }
                            ClientMessage::Input { data } => {
                                if initialized {
                                    state.dev.write(data.as_bytes()).await;
                                } else {
                                    let _ = tx.send(Outbound::Msg(ServerMessage::error(ERR_NOT_INITIALIZED))).await;
                                }
                            }
                            ClientMessage::Resize { cols, rows } => {
                                if initialized {
                                    state.dev.resize(cols, rows).await;
                                }
                            }
                            ClientMessage::Ping => {
                                let _ = tx.send(Outbound::Msg(ServerMessage::Pong)).await;
                            }
                            ClientMessage::Kill => {
                                state.dev.kill().await;
                                let _ = tx.send(Outbound::Msg(ServerMessage::Killed)).await;
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
            event = next_event(&mut events) => {
                match event {
                    Ok(SessionEvent::Exit(exit)) => {
                        let _ = tx.send(Outbound::Msg(ServerMessage::Exit {
                            code: exit.code,
                            signal: exit.signal,
                        })).await;
                        schedule_close(&mut close_scheduled, &close_tx);
                    }
                    Ok(SessionEvent::Status(status)) => {
                        let _ = tx.send(Outbound::Msg(ServerMessage::Status {
                            status: status.as_str(),
                            session_id: None,
                        })).await;
                    }
                    Ok(SessionEvent::Error(message)) => {
                        let _ = tx.send(Outbound::Msg(ServerMessage::Error { message })).await;
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        debug!("Dev terminal: client lagged {n} events");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        schedule_close(&mut close_scheduled, &close_tx);
                        events = None;
                    }
                }
            }
            _ = close_rx.recv() => {
                let _ = tx.send(Outbound::Close {
                    code: close_code::NORMAL,
                    reason: "terminal ended",
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

    if let Some(task) = output_task {
        task.abort();
    }
    drop(tx);
    let _ = writer.await;
    info!("Dev terminal: client disconnected");
}
