//! The JSON wire protocol spoken over `/ws` and `/ws/dev`.
//!
//! Every frame is a UTF-8 JSON text object tagged by `"type"`. Both
//! directions use a closed set of tags — an unknown tag fails to parse and
//! earns the sender an `error` frame. Binary frames are not part of the
//! protocol.

use serde::{Deserialize, Serialize};

/// Frames a browser may send.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientMessage {
    /// Must be the first message: carries the terminal dimensions and, for
    /// session terminals, triggers the PTY spawn.
    Init { cols: u16, rows: u16 },
    /// Keystrokes, forwarded verbatim to the PTY.
    Input { data: String },
    /// Terminal window resize.
    Resize { cols: u16, rows: u16 },
    /// Application-level heartbeat.
    Ping,
    /// Tear down the shared dev shell (`/ws/dev` only).
    Kill,
}

/// Frames the server sends.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerMessage {
    /// Acknowledges `init`.
    #[serde(rename_all = "camelCase")]
    Ready {
        #[serde(skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
        /// Dev terminal only: whether this `init` spawned the shell.
        #[serde(skip_serializing_if = "Option::is_none")]
        is_new: Option<bool>,
    },
    /// One PTY output chunk.
    Output { data: String },
    /// Scroll-back replay, sent once right after `ready`.
    History { data: Vec<String> },
    /// Session status change broadcast.
    #[serde(rename_all = "camelCase")]
    Status {
        status: &'static str,
        #[serde(skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
    },
    /// The PTY child exited; the socket closes shortly after.
    Exit {
        code: i32,
        #[serde(skip_serializing_if = "Option::is_none")]
        signal: Option<i32>,
    },
    Error { message: String },
    Pong,
    /// Acknowledges a dev-terminal `kill`.
    Killed,
}

impl ServerMessage {
    pub fn ready(session_id: &str) -> Self {
        Self::Ready {
            session_id: Some(session_id.to_string()),
            is_new: None,
        }
    }

    pub fn ready_dev(is_new: bool) -> Self {
        Self::Ready {
            session_id: None,
            is_new: Some(is_new),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    /// Serialize to the JSON text put on the wire.
    pub fn to_text(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            r#"{"type":"error","message":"internal serialization error"}"#.to_string()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_init() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"init","cols":80,"rows":24}"#).unwrap();
        assert_eq!(msg, ClientMessage::Init { cols: 80, rows: 24 });
    }

    #[test]
    fn parses_input_and_ping() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"input","data":"ls\r"}"#).unwrap();
        assert_eq!(
            msg,
            ClientMessage::Input {
                data: "ls\r".to_string()
            }
        );
        let msg: ClientMessage = serde_json::from_str(r#"{"type":"ping"}"#).unwrap();
        assert_eq!(msg, ClientMessage::Ping);
    }

    #[test]
    fn rejects_unknown_tag() {
        assert!(serde_json::from_str::<ClientMessage>(r#"{"type":"sudo"}"#).is_err());
        assert!(serde_json::from_str::<ClientMessage>(r#"{"data":"x"}"#).is_err());
    }

    #[test]
    fn tolerates_extra_fields() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"ping","requestId":"abc"}"#).unwrap();
        assert_eq!(msg, ClientMessage::Ping);
    }

    #[test]
    fn serializes_ready_with_session_id() {
        let text = ServerMessage::ready("abc-123").to_text();
        assert_eq!(text, r#"{"type":"ready","sessionId":"abc-123"}"#);
        let text = ServerMessage::ready_dev(false).to_text();
        assert_eq!(text, r#"{"type":"ready","isNew":false}"#);
    }

    #[test]
    fn serializes_exit_without_null_signal() {
        let text = ServerMessage::Exit {
            code: 0,
            signal: None,
        }
        .to_text();
        assert_eq!(text, r#"{"type":"exit","code":0}"#);
        let text = ServerMessage::Exit {
            code: -1,
            signal: Some(15),
        }
        .to_text();
        assert_eq!(text, r#"{"type":"exit","code":-1,"signal":15}"#);
    }

    #[test]
    fn serializes_status_broadcast() {
        let text = ServerMessage::Status {
            status: "terminated",
            session_id: Some("abc".to_string()),
        }
        .to_text();
        assert_eq!(
            text,
            r#"{"type":"status","status":"terminated","sessionId":"abc"}"#
        );
    }
}
