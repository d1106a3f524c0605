//! Real-time channel: per-owner connection registry and per-connection message handling.

mod registry;
mod session;

pub use registry::{
    ChannelRegistry, ConnectionHandle, ConnectionId, OUTBOUND_CAPACITY, Outbox, RegistryStats,
};
pub use session::{ChannelSession, ChannelState};
