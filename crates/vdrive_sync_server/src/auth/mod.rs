//! Session authority and request authentication.
//!
//! Session issuance lives elsewhere; this server only resolves bearer
//! credentials to an existing player.

mod middleware;

pub use middleware::{AuthExtractor, RequireAuth};

use crate::db::{Repo, StoreError};
use thiserror::Error;

/// Authenticated player
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub player_id: String,
    pub display_name: String,
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("session lookup failed: {0}")]
    Lookup(#[from] StoreError),
}

/// Resolves a session credential to a player.
pub trait SessionAuthority: Send + Sync {
    /// `Ok(None)` for unknown or expired credentials.
    fn resolve(&self, credential: &str) -> Result<Option<Identity>, AuthError>;
}

/// Session authority backed by the `sessions` table
#[derive(Clone)]
pub struct SqliteSessionAuthority {
    repo: Repo,
}

impl SqliteSessionAuthority {
    pub fn new(repo: Repo) -> Self {
        Self { repo }
    }
}

impl SessionAuthority for SqliteSessionAuthority {
    fn resolve(&self, credential: &str) -> Result<Option<Identity>, AuthError> {
        Ok(self.repo.resolve_session(credential)?.map(|player| Identity {
            player_id: player.id,
            display_name: player.display_name,
        }))
    }
}
