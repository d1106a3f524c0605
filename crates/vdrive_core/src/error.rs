use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Machine-readable error codes shared by the HTTP API, batch results and
/// channel error frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Missing, invalid or expired session credential.
    Authentication,
    /// Missing or malformed field.
    Validation,
    /// Unknown path, version or directory.
    NotFound,
    /// The target already exists in an incompatible form.
    Conflict,
    /// The target is in a state that forbids the operation.
    State,
    /// The storage transaction failed.
    Persistence,
    /// Unparseable or unknown real-time message.
    Protocol,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::Authentication => "authentication",
            ErrorCode::Validation => "validation",
            ErrorCode::NotFound => "not_found",
            ErrorCode::Conflict => "conflict",
            ErrorCode::State => "state",
            ErrorCode::Persistence => "persistence",
            ErrorCode::Protocol => "protocol",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors raised while normalizing a drive path.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PathError {
    #[error("path is empty")]
    Empty,

    #[error("path '{0}' is not rooted at a drive (expected e.g. C:\\DIR\\FILE)")]
    NotDriveRooted(String),

    #[error("path '{path}' contains invalid component '{component}'")]
    InvalidComponent { path: String, component: String },

    #[error("path '{0}' is a drive root placeholder")]
    DriveRoot(String),
}

/// Errors raised while decoding a real-time channel frame.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("malformed message: {0}")]
    Malformed(String),

    #[error("message has no 'type' field")]
    MissingType,

    #[error("unknown message type '{0}'")]
    UnknownType(String),

    #[error("binary frames are not supported")]
    BinaryFrame,
}
