//! Per-player virtual drive server.
//!
//! Each player owns a tree of files and directories stored in SQLite. Every
//! overwrite of a file is snapshotted into a five-slot version ledger, batches
//! of operations apply atomically, and clients pull incremental changes with a
//! `since` cursor. Connected clients of the same player receive change
//! notifications over a WebSocket channel, and scene configuration updates
//! sent on that channel are debounced and delta-merged before they are stored.

pub mod auth;
pub mod channel;
pub mod config;
pub mod db;
pub mod handlers;
pub mod scene_engine;
