//! Real-time channel messages.
//!
//! Every frame is a JSON text frame tagged by `type`. Clients send
//! [`ClientMessage`]; the server answers the originator with an `*_ok`
//! acknowledgement and relays the change to the player's other connections.

use crate::entry::{EntryInput, FileEntry};
use crate::error::{ErrorCode, ProtocolError};
use crate::scene::MASTER_CONFIG;
use serde::{Deserialize, Serialize};
use serde_json::Value;

const CLIENT_TYPES: &[&str] = &[
    "auth",
    "ping",
    "pong",
    "file_change",
    "file_delete",
    "mkdir",
    "rmdir",
    "request_sync",
    "scene_update",
    "scene_save_default",
    "scene_load",
];

fn default_config_name() -> String {
    MASTER_CONFIG.to_string()
}

/// Messages a client may send.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Must be the first message on a connection.
    Auth { token: String },
    Ping,
    Pong,
    FileChange { entry: EntryInput },
    FileDelete { path: String },
    Mkdir { path: String },
    Rmdir { path: String },
    /// Pull entries changed after `since`; `None` pulls everything.
    RequestSync {
        #[serde(default)]
        since: Option<i64>,
    },
    /// Scene write; `document.is_delta` selects delta merge over replacement.
    SceneUpdate {
        #[serde(default = "default_config_name")]
        config_name: String,
        document: Value,
    },
    SceneSaveDefault {
        #[serde(default = "default_config_name")]
        config_name: String,
        document: Value,
    },
    SceneLoad {
        #[serde(default = "default_config_name")]
        config_name: String,
    },
}

impl ClientMessage {
    /// Decode a text frame, distinguishing malformed JSON from an unknown type.
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let value: Value =
            serde_json::from_str(text).map_err(|e| ProtocolError::Malformed(e.to_string()))?;

        let kind = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or(ProtocolError::MissingType)?;
        if !CLIENT_TYPES.contains(&kind) {
            return Err(ProtocolError::UnknownType(kind.to_string()));
        }

        serde_json::from_value(value).map_err(|e| ProtocolError::Malformed(e.to_string()))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            ClientMessage::Auth { .. } => "auth",
            ClientMessage::Ping => "ping",
            ClientMessage::Pong => "pong",
            ClientMessage::FileChange { .. } => "file_change",
            ClientMessage::FileDelete { .. } => "file_delete",
            ClientMessage::Mkdir { .. } => "mkdir",
            ClientMessage::Rmdir { .. } => "rmdir",
            ClientMessage::RequestSync { .. } => "request_sync",
            ClientMessage::SceneUpdate { .. } => "scene_update",
            ClientMessage::SceneSaveDefault { .. } => "scene_save_default",
            ClientMessage::SceneLoad { .. } => "scene_load",
        }
    }
}

/// Messages the server sends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    AuthOk {
        player_id: String,
        display_name: String,
        connection_id: String,
        server_time: i64,
    },
    Ping {
        server_time: i64,
    },
    Pong {
        server_time: i64,
    },
    FileChangeOk {
        path: String,
        content_hash: Option<String>,
        updated_at: i64,
    },
    FileDeleteOk {
        path: String,
    },
    MkdirOk {
        path: String,
        /// `false` when the directory already existed.
        created: bool,
    },
    RmdirOk {
        path: String,
    },
    /// Relayed to sibling connections after a write.
    FileChanged {
        entry: FileEntry,
        origin: String,
    },
    FileDeleted {
        path: String,
        origin: String,
    },
    SyncData {
        entries: Vec<FileEntry>,
        server_time: i64,
        full: bool,
    },
    SceneUpdateOk {
        config_name: String,
        updated_at: i64,
    },
    SceneSaveDefaultOk {
        config_name: String,
    },
    SceneChanged {
        config_name: String,
        document: Value,
        origin: String,
    },
    SceneData {
        config_name: String,
        document: Option<Value>,
        is_default: bool,
    },
    Error {
        code: ErrorCode,
        message: String,
    },
}

impl ServerMessage {
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        ServerMessage::Error {
            code,
            message: message.into(),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

impl From<&ProtocolError> for ServerMessage {
    fn from(err: &ProtocolError) -> Self {
        ServerMessage::error(ErrorCode::Protocol, err.to_string())
    }
}
