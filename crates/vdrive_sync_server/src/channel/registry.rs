use chrono::Utc;
use dashmap::DashMap;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use tokio::sync::{Notify, mpsc};
use tracing::{debug, warn};
use vdrive_core::ServerMessage;

pub type ConnectionId = String;

/// Messages queued per connection before it is treated as lagging.
pub const OUTBOUND_CAPACITY: usize = 256;

/// Bounded outbound queue of one connection plus its close signal.
///
/// A push into a full queue drops the message and signals close, so a peer
/// that stops reading is disconnected instead of buffering without limit.
#[derive(Debug, Clone)]
pub struct Outbox {
    sender: mpsc::Sender<ServerMessage>,
    close: Arc<Notify>,
}

impl Outbox {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<ServerMessage>) {
        let (sender, receiver) = mpsc::channel(capacity);
        (
            Self {
                sender,
                close: Arc::new(Notify::new()),
            },
            receiver,
        )
    }

    /// Queue a message; returns `false` if it was dropped.
    pub fn push(&self, connection_id: &str, msg: ServerMessage) -> bool {
        match self.sender.try_send(msg) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(
                    "Outbound queue full for connection {}; closing it",
                    connection_id
                );
                self.close();
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// Ask the socket task to close the connection.
    pub fn close(&self) {
        self.close.notify_one();
    }

    /// Resolves once a close was requested.
    pub async fn closed(&self) {
        self.close.notified().await;
    }

    pub fn is_open(&self) -> bool {
        !self.sender.is_closed()
    }
}

/// Outbound half of a live connection
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    pub id: ConnectionId,
    outbox: Outbox,
    last_seen: Arc<AtomicI64>,
}

impl ConnectionHandle {
    pub fn new(id: ConnectionId, outbox: Outbox) -> Self {
        Self {
            id,
            outbox,
            last_seen: Arc::new(AtomicI64::new(Utc::now().timestamp_millis())),
        }
    }

    /// Queue a message; returns `false` if the socket task is gone or lagging.
    pub fn send(&self, msg: ServerMessage) -> bool {
        self.outbox.push(&self.id, msg)
    }

    pub fn touch(&self) {
        self.last_seen
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    pub fn last_seen(&self) -> i64 {
        self.last_seen.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RegistryStats {
    pub owners: usize,
    pub connections: usize,
}

/// Owner id to the owner's open connections.
///
/// An owner with no connections has no entry at all.
#[derive(Debug, Default)]
pub struct ChannelRegistry {
    owners: DashMap<String, HashMap<ConnectionId, ConnectionHandle>>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, owner_id: &str, handle: ConnectionHandle) {
        let mut conns = self.owners.entry(owner_id.to_string()).or_default();
        conns.insert(handle.id.clone(), handle);
        debug!(
            "Registered connection for {} ({} open)",
            owner_id,
            conns.len()
        );
    }

    /// Remove a connection, dropping the owner's set once it is empty.
    pub fn remove(&self, owner_id: &str, connection_id: &str) -> bool {
        let removed = match self.owners.get_mut(owner_id) {
            Some(mut conns) => conns.remove(connection_id).is_some(),
            None => false,
        };
        self.owners.remove_if(owner_id, |_, conns| conns.is_empty());
        removed
    }

    /// Send to one connection of an owner.
    pub fn send_to(&self, owner_id: &str, connection_id: &str, msg: ServerMessage) -> bool {
        self.owners
            .get(owner_id)
            .and_then(|conns| conns.get(connection_id).map(|h| h.send(msg)))
            .unwrap_or(false)
    }

    /// Send to every connection of `owner_id` except `origin`. Returns how many were reached.
    pub fn broadcast_except(&self, owner_id: &str, origin: &str, msg: &ServerMessage) -> usize {
        let Some(conns) = self.owners.get(owner_id) else {
            return 0;
        };
        conns
            .values()
            .filter(|h| h.id != origin)
            .filter(|h| h.send(msg.clone()))
            .count()
    }

    pub fn touch(&self, owner_id: &str, connection_id: &str) {
        if let Some(conns) = self.owners.get(owner_id) {
            if let Some(handle) = conns.get(connection_id) {
                handle.touch();
            }
        }
    }

    /// Last heartbeat response (or registration) time of a connection, in ms.
    pub fn last_seen(&self, owner_id: &str, connection_id: &str) -> Option<i64> {
        self.owners
            .get(owner_id)
            .and_then(|conns| conns.get(connection_id).map(ConnectionHandle::last_seen))
    }

    pub fn connection_count(&self, owner_id: &str) -> usize {
        self.owners.get(owner_id).map_or(0, |conns| conns.len())
    }

    pub fn stats(&self) -> RegistryStats {
        let mut stats = RegistryStats {
            owners: 0,
            connections: 0,
        };
        for conns in self.owners.iter() {
            stats.owners += 1;
            stats.connections += conns.len();
        }
        stats
    }

    /// Ask every socket task to close. Used at shutdown.
    pub fn close_all(&self) -> usize {
        let mut closed = 0;
        for conns in self.owners.iter() {
            for handle in conns.values() {
                if handle.outbox.is_open() {
                    handle.outbox.close();
                    closed += 1;
                }
            }
        }
        closed
    }
}
