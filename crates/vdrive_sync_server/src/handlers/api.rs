use super::ApiError;
use crate::auth::RequireAuth;
use crate::channel::ChannelRegistry;
use crate::db::{PatchResult, Repo, SceneDocument, SceneSummary, SyncResult, VersionList};
use axum::{
    Router,
    extract::{Path, Query, State, rejection::JsonRejection},
    response::Json,
    routing::{get, post, put},
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;
use vdrive_core::{BatchResult, EntryBody, EntryInput, FileEntry};

/// Writer id stamped on entries changed through the HTTP API
pub const HTTP_WRITER: &str = "http";

/// Shared state for API handlers
#[derive(Clone)]
pub struct ApiState {
    pub repo: Repo,
    pub registry: Arc<ChannelRegistry>,
    pub max_batch_operations: usize,
}

type ApiResult<T> = Result<Json<T>, ApiError>;

/// Unwrap a JSON body, turning axum's rejection into our error shape.
fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    payload
        .map(|Json(body)| body)
        .map_err(|e| ApiError::validation(e.body_text()))
}

#[derive(Debug, Deserialize)]
pub struct PathQuery {
    pub path: Option<String>,
}

impl PathQuery {
    fn require(self) -> Result<String, ApiError> {
        self.path
            .filter(|p| !p.trim().is_empty())
            .ok_or_else(|| ApiError::validation("missing 'path' query parameter"))
    }
}

#[derive(Debug, Deserialize)]
pub struct SyncQuery {
    pub since: Option<i64>,
}

/// Server status response
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: String,
    pub version: String,
    pub connected_owners: usize,
    pub open_connections: usize,
}

#[derive(Debug, Serialize)]
pub struct EntriesResponse {
    pub entries: Vec<FileEntry>,
}

#[derive(Debug, Deserialize)]
pub struct ReplaceRequest {
    pub entries: Vec<EntryInput>,
}

#[derive(Debug, Serialize)]
pub struct ReplaceResponse {
    pub replaced: usize,
}

#[derive(Debug, Serialize)]
pub struct DeleteResponse {
    pub path: String,
    pub deleted: bool,
}

#[derive(Debug, Deserialize)]
pub struct MkdirRequest {
    pub path: String,
}

#[derive(Debug, Serialize)]
pub struct MkdirResponse {
    pub path: String,
    pub created: bool,
}

#[derive(Debug, Deserialize)]
pub struct RestoreRequest {
    pub path: String,
    pub version: i64,
}

#[derive(Debug, Deserialize)]
pub struct BatchRequest {
    pub operations: Vec<Value>,
}

#[derive(Debug, Serialize)]
pub struct ScenesResponse {
    pub scenes: Vec<SceneSummary>,
}

#[derive(Debug, Serialize)]
pub struct SceneSaveResponse {
    pub config_name: String,
    pub document: Value,
    pub updated_at: i64,
}

#[derive(Debug, Serialize)]
pub struct SceneResetResponse {
    pub config_name: String,
    pub reset: bool,
}

/// GET /api/status - Public server status
async fn get_status(State(state): State<ApiState>) -> Json<StatusResponse> {
    let stats = state.registry.stats();
    Json(StatusResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        connected_owners: stats.owners,
        open_connections: stats.connections,
    })
}

// ===== Files =====

/// GET /api/files - Full tree
async fn list_files(
    State(state): State<ApiState>,
    RequireAuth(auth): RequireAuth,
) -> ApiResult<EntriesResponse> {
    let entries = state.repo.list_entries(&auth.player_id)?;
    Ok(Json(EntriesResponse { entries }))
}

/// PUT /api/files - Replace the whole tree (unversioned)
async fn replace_files(
    State(state): State<ApiState>,
    RequireAuth(auth): RequireAuth,
    payload: Result<Json<ReplaceRequest>, JsonRejection>,
) -> ApiResult<ReplaceResponse> {
    let body = json_body(payload)?;
    let replaced = state
        .repo
        .replace_all(&auth.player_id, body.entries, Some(HTTP_WRITER))?;
    info!("Replaced drive for {} with {} entries", auth.player_id, replaced);
    Ok(Json(ReplaceResponse { replaced }))
}

/// PATCH /api/files - Apply a path to entry-or-null map
async fn patch_files(
    State(state): State<ApiState>,
    RequireAuth(auth): RequireAuth,
    payload: Result<Json<BTreeMap<String, Option<EntryBody>>>, JsonRejection>,
) -> ApiResult<PatchResult> {
    let changes = json_body(payload)?;
    let result = state
        .repo
        .patch_entries(&auth.player_id, changes, Some(HTTP_WRITER))?;
    Ok(Json(result))
}

/// GET /api/file?path= - Single entry
async fn get_file(
    State(state): State<ApiState>,
    RequireAuth(auth): RequireAuth,
    Query(query): Query<PathQuery>,
) -> ApiResult<FileEntry> {
    let path = query.require()?;
    Ok(Json(state.repo.get_entry(&auth.player_id, &path)?))
}

/// PUT /api/file - Create or update an entry
async fn put_file(
    State(state): State<ApiState>,
    RequireAuth(auth): RequireAuth,
    payload: Result<Json<EntryInput>, JsonRejection>,
) -> ApiResult<FileEntry> {
    let (path, body) = json_body(payload)?.into_parts();
    let entry = state
        .repo
        .put_entry(&auth.player_id, &path, &body, Some(HTTP_WRITER))?;
    Ok(Json(entry))
}

/// DELETE /api/file?path= - Delete an entry
async fn delete_file(
    State(state): State<ApiState>,
    RequireAuth(auth): RequireAuth,
    Query(query): Query<PathQuery>,
) -> ApiResult<DeleteResponse> {
    let path = query.require()?;
    let deleted = state.repo.delete_entry(&auth.player_id, &path)?;
    Ok(Json(DeleteResponse {
        path: deleted.path,
        deleted: true,
    }))
}

// ===== Directories =====

/// POST /api/dirs - mkdir
async fn make_dir(
    State(state): State<ApiState>,
    RequireAuth(auth): RequireAuth,
    payload: Result<Json<MkdirRequest>, JsonRejection>,
) -> ApiResult<MkdirResponse> {
    let body = json_body(payload)?;
    let outcome = state
        .repo
        .make_dir(&auth.player_id, &body.path, Some(HTTP_WRITER))?;
    Ok(Json(MkdirResponse {
        path: outcome.entry.path,
        created: outcome.created,
    }))
}

/// DELETE /api/dirs?path= - rmdir
async fn remove_dir(
    State(state): State<ApiState>,
    RequireAuth(auth): RequireAuth,
    Query(query): Query<PathQuery>,
) -> ApiResult<DeleteResponse> {
    let path = query.require()?;
    let removed = state.repo.remove_dir(&auth.player_id, &path)?;
    Ok(Json(DeleteResponse {
        path: removed.path,
        deleted: true,
    }))
}

// ===== Versions =====

/// GET /api/versions?path= - Ledger contents for a path
async fn list_versions(
    State(state): State<ApiState>,
    RequireAuth(auth): RequireAuth,
    Query(query): Query<PathQuery>,
) -> ApiResult<VersionList> {
    let path = query.require()?;
    Ok(Json(state.repo.list_versions(&auth.player_id, &path)?))
}

/// POST /api/versions/restore - Restore a snapshot over the live entry
async fn restore_version(
    State(state): State<ApiState>,
    RequireAuth(auth): RequireAuth,
    payload: Result<Json<RestoreRequest>, JsonRejection>,
) -> ApiResult<FileEntry> {
    let body = json_body(payload)?;
    let entry = state.repo.restore_version(
        &auth.player_id,
        &body.path,
        body.version,
        Some(HTTP_WRITER),
    )?;
    info!(
        "Restored {} to version {} for {}",
        entry.path, body.version, auth.player_id
    );
    Ok(Json(entry))
}

// ===== Batch & sync =====

/// POST /api/batch - Atomic batch of operations
async fn execute_batch(
    State(state): State<ApiState>,
    RequireAuth(auth): RequireAuth,
    payload: Result<Json<BatchRequest>, JsonRejection>,
) -> ApiResult<BatchResult> {
    let body = json_body(payload)?;
    if body.operations.len() > state.max_batch_operations {
        return Err(ApiError::validation(format!(
            "batch has {} operations; the limit is {}",
            body.operations.len(),
            state.max_batch_operations
        )));
    }
    let result = state
        .repo
        .execute_batch(&auth.player_id, body.operations, Some(HTTP_WRITER))?;
    Ok(Json(result))
}

/// GET /api/sync?since= - Entries changed after the cursor
async fn sync(
    State(state): State<ApiState>,
    RequireAuth(auth): RequireAuth,
    Query(query): Query<SyncQuery>,
) -> ApiResult<SyncResult> {
    Ok(Json(state.repo.sync(&auth.player_id, query.since)?))
}

// ===== Scenes =====

/// GET /api/scenes - The player's own scenes
async fn list_scenes(
    State(state): State<ApiState>,
    RequireAuth(auth): RequireAuth,
) -> ApiResult<ScenesResponse> {
    let scenes = state.repo.list_scenes(&auth.player_id)?;
    Ok(Json(ScenesResponse { scenes }))
}

/// GET /api/scenes/{name} - Load with fallback to the default
async fn load_scene(
    State(state): State<ApiState>,
    RequireAuth(auth): RequireAuth,
    Path(name): Path<String>,
) -> ApiResult<SceneDocument> {
    Ok(Json(state.repo.load_scene(&auth.player_id, &name)?))
}

/// PUT /api/scenes/{name} - Save a full or delta document immediately
async fn save_scene(
    State(state): State<ApiState>,
    RequireAuth(auth): RequireAuth,
    Path(name): Path<String>,
    payload: Result<Json<Value>, JsonRejection>,
) -> ApiResult<SceneSaveResponse> {
    let update = json_body(payload)?;
    let result = state
        .repo
        .apply_scene_update(&auth.player_id, &name, &update)?;
    Ok(Json(SceneSaveResponse {
        config_name: name.trim().to_string(),
        document: result.document,
        updated_at: result.updated_at,
    }))
}

/// DELETE /api/scenes/{name} - Drop the player's copy
async fn reset_scene(
    State(state): State<ApiState>,
    RequireAuth(auth): RequireAuth,
    Path(name): Path<String>,
) -> ApiResult<SceneResetResponse> {
    let reset = state.repo.reset_scene(&auth.player_id, &name)?;
    Ok(Json(SceneResetResponse {
        config_name: name.trim().to_string(),
        reset,
    }))
}

/// PUT /api/scenes/{name}/default - Write the global default
async fn save_default_scene(
    State(state): State<ApiState>,
    RequireAuth(auth): RequireAuth,
    Path(name): Path<String>,
    payload: Result<Json<Value>, JsonRejection>,
) -> ApiResult<SceneSaveResponse> {
    let update = json_body(payload)?;
    let result = state.repo.save_default_scene(&name, &update)?;
    info!("Default scene '{}' saved by {}", name.trim(), auth.player_id);
    Ok(Json(SceneSaveResponse {
        config_name: name.trim().to_string(),
        document: result.document,
        updated_at: result.updated_at,
    }))
}

/// Create API routes
pub fn api_routes(state: ApiState) -> Router {
    Router::new()
        .route("/status", get(get_status))
        .route(
            "/files",
            get(list_files).put(replace_files).patch(patch_files),
        )
        .route("/file", get(get_file).put(put_file).delete(delete_file))
        .route("/dirs", post(make_dir).delete(remove_dir))
        .route("/versions", get(list_versions))
        .route("/versions/restore", post(restore_version))
        .route("/batch", post(execute_batch))
        .route("/sync", get(sync))
        .route("/scenes", get(list_scenes))
        .route(
            "/scenes/{name}",
            get(load_scene).put(save_scene).delete(reset_scene),
        )
        .route("/scenes/{name}/default", put(save_default_scene))
        .with_state(state)
}
