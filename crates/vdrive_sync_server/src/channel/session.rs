use super::registry::{ChannelRegistry, ConnectionHandle, Outbox};
use crate::auth::{Identity, SessionAuthority};
use crate::db::{Repo, StoreError, validate_config_name};
use crate::scene_engine::{SceneEngine, SceneWrite};
use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use vdrive_core::{ClientMessage, EntryInput, ErrorCode, ProtocolError, ServerMessage};

/// Shared state for channel connections
#[derive(Clone)]
pub struct ChannelState {
    pub repo: Repo,
    pub authority: Arc<dyn SessionAuthority>,
    pub registry: Arc<ChannelRegistry>,
    pub scenes: Arc<SceneEngine>,
    pub heartbeat_interval: Duration,
}

/// One channel connection, from handshake to close.
///
/// Messages are handled in arrival order. Replies go straight to this
/// connection's outbound queue; change notifications go to the owner's other
/// connections through the registry.
pub struct ChannelSession {
    state: ChannelState,
    connection_id: String,
    outbox: Outbox,
    identity: Option<Identity>,
}

impl ChannelSession {
    pub fn new(state: ChannelState, outbox: Outbox) -> Self {
        Self {
            state,
            connection_id: uuid::Uuid::new_v4().to_string(),
            outbox,
            identity: None,
        }
    }

    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    fn reply(&self, msg: ServerMessage) {
        self.outbox.push(&self.connection_id, msg);
    }

    fn broadcast(&self, owner_id: &str, msg: ServerMessage) {
        let reached = self
            .state
            .registry
            .broadcast_except(owner_id, &self.connection_id, &msg);
        debug!("Relayed change from {} to {} connection(s)", self.connection_id, reached);
    }

    /// Mark the connection alive after a heartbeat response.
    pub fn touch(&self) {
        if let Some(identity) = &self.identity {
            self.state
                .registry
                .touch(&identity.player_id, &self.connection_id);
        }
    }

    pub fn handle_text(&mut self, text: &str) {
        match ClientMessage::parse(text) {
            Ok(msg) => self.handle_message(msg),
            Err(e) => {
                debug!("Protocol error on {}: {}", self.connection_id, e);
                self.reply((&e).into());
            }
        }
    }

    pub fn handle_binary(&self) {
        self.reply((&ProtocolError::BinaryFrame).into());
    }

    pub fn handle_message(&mut self, msg: ClientMessage) {
        let Some(identity) = self.identity.clone() else {
            match &msg {
                ClientMessage::Auth { token } => self.authenticate(token),
                other => self.reply(ServerMessage::error(
                    ErrorCode::Authentication,
                    format!("authenticate before sending '{}'", other.type_name()),
                )),
            }
            return;
        };

        if let Err(e) = self.dispatch(&identity.player_id, msg) {
            if !e.is_soft() {
                error!(
                    "Channel operation failed for {} on {}: {}",
                    identity.player_id, self.connection_id, e
                );
            }
            self.reply(ServerMessage::error(e.code(), e.public_message()));
        }
    }

    fn authenticate(&mut self, token: &str) {
        match self.state.authority.resolve(token) {
            Ok(Some(identity)) => {
                let handle = ConnectionHandle::new(self.connection_id.clone(), self.outbox.clone());
                self.state.registry.add(&identity.player_id, handle);
                info!(
                    "Channel authenticated: player={}, connection={}, connections={}",
                    identity.player_id,
                    self.connection_id,
                    self.state.registry.connection_count(&identity.player_id)
                );
                self.reply(ServerMessage::AuthOk {
                    player_id: identity.player_id.clone(),
                    display_name: identity.display_name.clone(),
                    connection_id: self.connection_id.clone(),
                    server_time: Utc::now().timestamp_millis(),
                });
                self.identity = Some(identity);
            }
            Ok(None) => {
                warn!("Channel auth rejected on {}", self.connection_id);
                self.reply(ServerMessage::error(
                    ErrorCode::Authentication,
                    "invalid or expired session",
                ));
            }
            Err(e) => {
                error!("Channel auth lookup failed: {}", e);
                self.reply(ServerMessage::error(ErrorCode::Persistence, "storage failure"));
            }
        }
    }

    fn dispatch(&self, owner_id: &str, msg: ClientMessage) -> Result<(), StoreError> {
        let writer = Some(self.connection_id.as_str());
        match msg {
            ClientMessage::Auth { .. } => {
                return Err(StoreError::Validation(
                    "connection is already authenticated".to_string(),
                ));
            }
            ClientMessage::Ping => self.reply(ServerMessage::Pong {
                server_time: Utc::now().timestamp_millis(),
            }),
            ClientMessage::Pong => self.touch(),
            ClientMessage::FileChange { entry } => self.file_change(owner_id, entry)?,
            ClientMessage::FileDelete { path } => {
                let deleted = self.state.repo.delete_entry(owner_id, &path)?;
                self.reply(ServerMessage::FileDeleteOk {
                    path: deleted.path.clone(),
                });
                self.broadcast(
                    owner_id,
                    ServerMessage::FileDeleted {
                        path: deleted.path,
                        origin: self.connection_id.clone(),
                    },
                );
            }
            ClientMessage::Mkdir { path } => {
                let outcome = self.state.repo.make_dir(owner_id, &path, writer)?;
                self.reply(ServerMessage::MkdirOk {
                    path: outcome.entry.path.clone(),
                    created: outcome.created,
                });
                if outcome.created {
                    self.broadcast(
                        owner_id,
                        ServerMessage::FileChanged {
                            entry: outcome.entry,
                            origin: self.connection_id.clone(),
                        },
                    );
                }
            }
            ClientMessage::Rmdir { path } => {
                let removed = self.state.repo.remove_dir(owner_id, &path)?;
                self.reply(ServerMessage::RmdirOk {
                    path: removed.path.clone(),
                });
                self.broadcast(
                    owner_id,
                    ServerMessage::FileDeleted {
                        path: removed.path,
                        origin: self.connection_id.clone(),
                    },
                );
            }
            ClientMessage::RequestSync { since } => {
                let sync = self.state.repo.sync(owner_id, since)?;
                self.reply(ServerMessage::SyncData {
                    entries: sync.entries,
                    server_time: sync.server_time,
                    full: sync.full,
                });
            }
            ClientMessage::SceneUpdate {
                config_name,
                document,
            } => self.scene_update(owner_id, &config_name, document)?,
            ClientMessage::SceneSaveDefault {
                config_name,
                document,
            } => {
                let config_name = validate_config_name(&config_name)?;
                self.state.repo.save_default_scene(&config_name, &document)?;
                info!("Default scene '{}' saved by {}", config_name, owner_id);
                self.reply(ServerMessage::SceneSaveDefaultOk { config_name });
            }
            ClientMessage::SceneLoad { config_name } => {
                let scene = self.state.repo.load_scene(owner_id, &config_name)?;
                self.reply(ServerMessage::SceneData {
                    config_name: scene.config_name,
                    document: scene.document,
                    is_default: scene.is_default,
                });
            }
        }
        Ok(())
    }

    fn file_change(&self, owner_id: &str, entry: EntryInput) -> Result<(), StoreError> {
        let (path, body) = entry.into_parts();
        let saved = self
            .state
            .repo
            .put_entry(owner_id, &path, &body, Some(self.connection_id.as_str()))?;
        self.reply(ServerMessage::FileChangeOk {
            path: saved.path.clone(),
            content_hash: saved.content_hash.clone(),
            updated_at: saved.updated_at,
        });
        self.broadcast(
            owner_id,
            ServerMessage::FileChanged {
                entry: saved,
                origin: self.connection_id.clone(),
            },
        );
        Ok(())
    }

    /// Validate now, persist after the debounce window.
    fn scene_update(
        &self,
        owner_id: &str,
        config_name: &str,
        document: Value,
    ) -> Result<(), StoreError> {
        let config_name = validate_config_name(config_name)?;
        if !document.is_object() {
            return Err(StoreError::Validation(
                "scene document must be a JSON object".to_string(),
            ));
        }
        self.state.scenes.submit(SceneWrite {
            owner_id: owner_id.to_string(),
            connection_id: self.connection_id.clone(),
            config_name,
            document,
        });
        Ok(())
    }
}

impl Drop for ChannelSession {
    fn drop(&mut self) {
        if let Some(identity) = &self.identity {
            self.state
                .registry
                .remove(&identity.player_id, &self.connection_id);
            info!(
                "Channel closed: player={}, connection={}",
                identity.player_id, self.connection_id
            );
        }
    }
}
