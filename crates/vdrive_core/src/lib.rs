//! # vdrive core
//!
//! Shared types for the vdrive file store and its sync server.
//!
//! This crate provides:
//! - **Paths**: drive-rooted backslash path rules (`C:\DIR\FILE.EXT`)
//! - **Entries**: file/directory entries, version snapshots and content hashing
//! - **Batches**: the closed set of batch operations and their per-item results
//! - **Protocol**: real-time channel messages exchanged over the WebSocket
//! - **Scenes**: the delta-merge algorithm for editor-layout documents
//!
//! Nothing in here performs I/O; storage and transport live in
//! `vdrive_sync_server`.

pub mod batch;
pub mod entry;
pub mod error;
pub mod path;
pub mod protocol;
pub mod scene;

pub use batch::{BatchItemError, BatchItemResult, BatchOp, BatchResult, ItemError};
pub use entry::{
    EntryBody, EntryInput, EntryKind, EntrySummary, FileEntry, VersionSnapshot, content_hash,
};
pub use error::{ErrorCode, PathError, ProtocolError};
pub use protocol::{ClientMessage, ServerMessage};
