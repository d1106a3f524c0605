//! Trailing-debounce stage for scene updates arriving over the channel.
//!
//! Each owner has at most one pending write. A newer update replaces it and
//! restarts the window; when the window elapses the latest update is merged
//! into storage, its sender is acknowledged and the update as sent is relayed
//! to the owner's other connections.

use crate::channel::ChannelRegistry;
use crate::db::Repo;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};
use vdrive_core::ServerMessage;

/// A scene update waiting for its debounce window
#[derive(Debug, Clone)]
pub struct SceneWrite {
    pub owner_id: String,
    pub connection_id: String,
    pub config_name: String,
    pub document: Value,
}

struct PendingWrite {
    token: u64,
    write: SceneWrite,
    task: JoinHandle<()>,
}

pub struct SceneEngine {
    repo: Repo,
    registry: Arc<ChannelRegistry>,
    window: Duration,
    pending: Mutex<HashMap<String, PendingWrite>>,
    next_token: AtomicU64,
}

impl SceneEngine {
    pub fn new(repo: Repo, registry: Arc<ChannelRegistry>, window: Duration) -> Arc<Self> {
        Arc::new(Self {
            repo,
            registry,
            window,
            pending: Mutex::new(HashMap::new()),
            next_token: AtomicU64::new(0),
        })
    }

    fn lock_pending(&self) -> MutexGuard<'_, HashMap<String, PendingWrite>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue an update, replacing (and cancelling) any pending one for the same owner.
    pub fn submit(self: &Arc<Self>, write: SceneWrite) {
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        let owner_id = write.owner_id.clone();

        let mut pending = self.lock_pending();
        let task = {
            let engine = Arc::clone(self);
            let owner_id = owner_id.clone();
            let window = self.window;
            tokio::spawn(async move {
                tokio::time::sleep(window).await;
                engine.fire(&owner_id, token);
            })
        };

        if let Some(previous) = pending.insert(owner_id, PendingWrite { token, write, task }) {
            previous.task.abort();
            debug!(
                "Scene update for {} superseded by a newer one",
                previous.write.owner_id
            );
        }
    }

    /// Commit the pending write for `owner_id` if it is still the one `token` was issued for.
    fn fire(&self, owner_id: &str, token: u64) {
        let write = {
            let mut pending = self.lock_pending();
            match pending.get(owner_id) {
                Some(p) if p.token == token => pending.remove(owner_id).map(|p| p.write),
                _ => None,
            }
        };
        if let Some(write) = write {
            self.commit(write);
        }
    }

    fn commit(&self, write: SceneWrite) {
        match self
            .repo
            .apply_scene_update(&write.owner_id, &write.config_name, &write.document)
        {
            Ok(result) => {
                info!(
                    "Scene '{}' committed for {}",
                    write.config_name, write.owner_id
                );
                self.registry.send_to(
                    &write.owner_id,
                    &write.connection_id,
                    ServerMessage::SceneUpdateOk {
                        config_name: write.config_name.clone(),
                        updated_at: result.updated_at,
                    },
                );
                self.registry.broadcast_except(
                    &write.owner_id,
                    &write.connection_id,
                    &ServerMessage::SceneChanged {
                        config_name: write.config_name,
                        document: write.document,
                        origin: write.connection_id.clone(),
                    },
                );
            }
            Err(e) => {
                if !e.is_soft() {
                    error!("Scene commit failed for {}: {}", write.owner_id, e);
                }
                self.registry.send_to(
                    &write.owner_id,
                    &write.connection_id,
                    ServerMessage::error(e.code(), e.public_message()),
                );
            }
        }
    }

    /// Commit every pending write now. Used at shutdown.
    pub fn flush(&self) -> usize {
        let drained: Vec<PendingWrite> = self.lock_pending().drain().map(|(_, p)| p).collect();
        let count = drained.len();
        for pending in drained {
            pending.task.abort();
            self.commit(pending.write);
        }
        count
    }

    pub fn pending_count(&self) -> usize {
        self.lock_pending().len()
    }
}
