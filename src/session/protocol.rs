//! Wire messages. JSON text frames discriminated by `type`.

use serde::{Deserialize, Serialize};

/// Client to server
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Hello {
        #[serde(default)]
        token: String,
    },
    Run {
        language: String,
        code: String,
        #[serde(default)]
        cols: Option<u16>,
        #[serde(default)]
        rows: Option<u16>,
    },
    Stdin {
        data: String,
    },
    Resize {
        cols: u16,
        rows: u16,
    },
    Kill,
}

/// Lifecycle markers sent between `run` and the first output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Compiling,
    Started,
}

/// Server to client
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Hello {
        ok: bool,
    },
    Status {
        status: RunStatus,
    },
    Stdout {
        data: String,
    },
    Stderr {
        data: String,
    },
    Exit {
        /// Absent when the run was killed
        #[serde(default, skip_serializing_if = "Option::is_none")]
        code: Option<i32>,
        time_ms: u64,
    },
    Error {
        error: String,
    },
}

impl ServerMessage {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            error: message.into(),
        }
    }

    pub fn to_json(&self) -> String {
        // Serializing these enums cannot fail: only strings, integers and bools.
        serde_json::to_string(self).unwrap_or_else(|_| {
            r#"{"type":"error","error":"internal serialization failure"}"#.to_string()
        })
    }
}

/// Parse an inbound text frame, describing why it was rejected otherwise.
pub fn parse_client_message(text: &str) -> Result<ClientMessage, String> {
    serde_json::from_str(text).map_err(|e| format!("malformed message: {}", e))
}
