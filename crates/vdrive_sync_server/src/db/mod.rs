mod batch;
mod files;
mod ledger;
mod repo;
mod scenes;
mod schema;
mod sessions;

pub use files::{MkdirOutcome, PatchResult, SyncResult};
pub use ledger::{LEDGER_DEPTH, VersionList, next_slot};
pub use repo::{Repo, StoreError};
pub use scenes::{SceneDocument, SceneSummary, SceneWriteResult, validate_config_name};
pub use schema::init_database;
pub use sessions::PlayerInfo;
