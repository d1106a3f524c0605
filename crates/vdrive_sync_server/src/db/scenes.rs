use super::repo::{Repo, StoreClock, StoreError};
use rusqlite::{Connection, OptionalExtension, params};
use serde::Serialize;
use serde_json::Value;
use vdrive_core::scene::apply_update;

const MAX_CONFIG_NAME_LEN: usize = 100;

/// A scene as seen by one owner, after falling back to the global default.
#[derive(Debug, Clone, Serialize)]
pub struct SceneDocument {
    pub config_name: String,
    /// `None` when neither the owner nor the global default has this scene.
    pub document: Option<Value>,
    /// Whether `document` came from the global default row.
    pub is_default: bool,
    pub updated_at: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SceneSummary {
    pub config_name: String,
    pub updated_at: i64,
}

/// Result of a committed scene write.
#[derive(Debug, Clone)]
pub struct SceneWriteResult {
    pub document: Value,
    pub updated_at: i64,
}

pub fn validate_config_name(raw: &str) -> Result<String, StoreError> {
    let name = raw.trim();
    if name.is_empty() {
        return Err(StoreError::Validation("config name is empty".to_string()));
    }
    if name.chars().count() > MAX_CONFIG_NAME_LEN {
        return Err(StoreError::Validation(format!(
            "config name longer than {} characters",
            MAX_CONFIG_NAME_LEN
        )));
    }
    Ok(name.to_string())
}

fn validate_document(document: &Value) -> Result<(), StoreError> {
    if document.is_object() {
        Ok(())
    } else {
        Err(StoreError::Validation(
            "scene document must be a JSON object".to_string(),
        ))
    }
}

/// Row for exactly `owner_id` (`None` = global default).
fn load_row(
    conn: &Connection,
    owner_id: Option<&str>,
    config_name: &str,
) -> Result<Option<(Value, i64)>, StoreError> {
    let row: Option<(String, i64)> = conn
        .query_row(
            "SELECT document, updated_at FROM scene_configs
             WHERE owner_id IS ? AND config_name = ?",
            params![owner_id, config_name],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;
    match row {
        Some((document, updated_at)) => Ok(Some((serde_json::from_str(&document)?, updated_at))),
        None => Ok(None),
    }
}

fn store_row(
    conn: &Connection,
    clock: &mut StoreClock,
    owner_id: Option<&str>,
    config_name: &str,
    document: &Value,
) -> Result<i64, StoreError> {
    let now = clock.tick();
    let text = serde_json::to_string(document)?;
    let changed = conn.execute(
        "UPDATE scene_configs SET document = ?, updated_at = ?
         WHERE owner_id IS ? AND config_name = ?",
        params![text, now, owner_id, config_name],
    )?;
    if changed == 0 {
        conn.execute(
            "INSERT INTO scene_configs (owner_id, config_name, document, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?)",
            params![owner_id, config_name, text, now, now],
        )?;
    }
    Ok(now)
}

impl Repo {
    /// Load a scene, falling back to the global default.
    pub fn load_scene(&self, owner_id: &str, config_name: &str) -> Result<SceneDocument, StoreError> {
        let config_name = validate_config_name(config_name)?;
        self.with_conn(|conn, _| {
            if let Some((document, updated_at)) = load_row(conn, Some(owner_id), &config_name)? {
                return Ok(SceneDocument {
                    config_name,
                    document: Some(document),
                    is_default: false,
                    updated_at: Some(updated_at),
                });
            }
            let global = load_row(conn, None, &config_name)?;
            Ok(SceneDocument {
                config_name,
                is_default: global.is_some(),
                updated_at: global.as_ref().map(|(_, t)| *t),
                document: global.map(|(d, _)| d),
            })
        })
    }

    /// Apply a full or delta update to the owner's scene.
    ///
    /// A delta merges over the owner's document, or over the global default
    /// when the owner has none yet.
    pub fn apply_scene_update(
        &self,
        owner_id: &str,
        config_name: &str,
        update: &Value,
    ) -> Result<SceneWriteResult, StoreError> {
        let config_name = validate_config_name(config_name)?;
        validate_document(update)?;
        self.with_tx(|tx, clock| {
            let base = match load_row(tx, Some(owner_id), &config_name)? {
                Some((document, _)) => Some(document),
                None => load_row(tx, None, &config_name)?.map(|(d, _)| d),
            };
            let document = apply_update(base.as_ref(), update);
            let updated_at = store_row(tx, clock, Some(owner_id), &config_name, &document)?;
            Ok(SceneWriteResult {
                document,
                updated_at,
            })
        })
    }

    /// Write the global default row that owners fall back to.
    pub fn save_default_scene(
        &self,
        config_name: &str,
        update: &Value,
    ) -> Result<SceneWriteResult, StoreError> {
        let config_name = validate_config_name(config_name)?;
        validate_document(update)?;
        self.with_tx(|tx, clock| {
            let base = load_row(tx, None, &config_name)?.map(|(d, _)| d);
            let document = apply_update(base.as_ref(), update);
            let updated_at = store_row(tx, clock, None, &config_name, &document)?;
            Ok(SceneWriteResult {
                document,
                updated_at,
            })
        })
    }

    /// Delete the owner's row so reads fall back to the default. Returns whether a row existed.
    pub fn reset_scene(&self, owner_id: &str, config_name: &str) -> Result<bool, StoreError> {
        let config_name = validate_config_name(config_name)?;
        self.with_conn(|conn, _| {
            let deleted = conn.execute(
                "DELETE FROM scene_configs WHERE owner_id = ? AND config_name = ?",
                params![owner_id, config_name],
            )?;
            Ok(deleted > 0)
        })
    }

    /// The owner's own scenes, by name.
    pub fn list_scenes(&self, owner_id: &str) -> Result<Vec<SceneSummary>, StoreError> {
        self.with_conn(|conn, _| {
            let mut stmt = conn.prepare(
                "SELECT config_name, updated_at FROM scene_configs
                 WHERE owner_id = ? ORDER BY config_name",
            )?;
            let scenes = stmt
                .query_map([owner_id], |row| {
                    Ok(SceneSummary {
                        config_name: row.get(0)?,
                        updated_at: row.get(1)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(scenes)
        })
    }
}
