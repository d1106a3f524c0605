//! Drive entries: get, upsert, delete, directories, bulk replace, patch and sync.
//!
//! The free functions take a bare connection so the batch executor can run
//! several of them inside one transaction.

use super::ledger::snapshot;
use super::repo::{ENTRY_COLUMNS, Repo, StoreClock, StoreError, entry_from_row};
use rusqlite::{Connection, OptionalExtension, params};
use serde::Serialize;
use std::collections::BTreeMap;
use vdrive_core::path::{child_prefix, is_placeholder, normalize_entry_path};
use vdrive_core::{EntryBody, EntryInput, EntryKind, FileEntry, content_hash};

/// Outcome of a mkdir.
#[derive(Debug, Clone)]
pub struct MkdirOutcome {
    pub entry: FileEntry,
    /// `false` when the directory was already there.
    pub created: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PatchResult {
    pub updated: usize,
    pub deleted: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncResult {
    pub entries: Vec<FileEntry>,
    /// Cursor for the next incremental sync.
    pub server_time: i64,
    /// Whether this was a bootstrap (no cursor) sync.
    pub full: bool,
}

pub(crate) fn load_entry(
    conn: &Connection,
    owner_id: &str,
    path: &str,
) -> Result<Option<FileEntry>, StoreError> {
    let sql = format!(
        "SELECT {} FROM file_entries WHERE owner_id = ? AND path = ?",
        ENTRY_COLUMNS
    );
    Ok(conn
        .query_row(&sql, params![owner_id, path], entry_from_row)
        .optional()?)
}

/// Number of entries strictly below `dir`.
pub(crate) fn count_descendants(
    conn: &Connection,
    owner_id: &str,
    dir: &str,
) -> Result<i64, StoreError> {
    let prefix = child_prefix(dir);
    let n = prefix.chars().count() as i64;
    Ok(conn.query_row(
        "SELECT COUNT(*) FROM file_entries
         WHERE owner_id = ?1 AND substr(path, 1, ?2) = ?3 AND length(path) > ?2",
        params![owner_id, n, prefix],
        |row| row.get(0),
    )?)
}

/// A directory with children can never become a file.
pub(crate) fn ensure_kind_change_allowed(
    conn: &Connection,
    existing: &FileEntry,
    new_kind: EntryKind,
) -> Result<(), StoreError> {
    if existing.kind == EntryKind::Dir
        && new_kind == EntryKind::File
        && count_descendants(conn, &existing.owner_id, &existing.path)? > 0
    {
        return Err(StoreError::State(format!(
            "directory '{}' is not empty",
            existing.path
        )));
    }
    Ok(())
}

/// Insert or overwrite the row for `entry`, keeping the stored `created_at`.
pub(crate) fn upsert_entry(conn: &Connection, entry: &FileEntry) -> Result<(), StoreError> {
    let metadata = serde_json::to_string(&entry.metadata)?;
    conn.execute(
        "INSERT INTO file_entries
         (owner_id, path, kind, content, content_hash, size, program, metadata, created_at, updated_at, updated_by)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(owner_id, path) DO UPDATE SET
           kind = excluded.kind,
           content = excluded.content,
           content_hash = excluded.content_hash,
           size = excluded.size,
           program = excluded.program,
           metadata = excluded.metadata,
           updated_at = excluded.updated_at,
           updated_by = excluded.updated_by",
        params![
            entry.owner_id,
            entry.path,
            entry.kind.as_str(),
            entry.content,
            entry.content_hash,
            entry.size as i64,
            entry.program,
            metadata,
            entry.created_at,
            entry.updated_at,
            entry.updated_by
        ],
    )?;
    Ok(())
}

fn build_entry(
    owner_id: &str,
    path: String,
    body: &EntryBody,
    created_at: i64,
    now: i64,
    writer: Option<&str>,
) -> FileEntry {
    let content = body.stored_content();
    FileEntry {
        owner_id: owner_id.to_string(),
        path,
        kind: body.kind,
        content: content.map(str::to_owned),
        content_hash: content_hash(content),
        size: content.map_or(0, |c| c.len() as u64),
        program: body.program.clone(),
        metadata: body.metadata.clone(),
        created_at,
        updated_at: now,
        updated_by: writer.map(str::to_owned),
    }
}

/// Create or overwrite an entry, snapshotting the previous state if there was one.
pub(crate) fn write_entry(
    conn: &Connection,
    clock: &mut StoreClock,
    owner_id: &str,
    raw_path: &str,
    body: &EntryBody,
    writer: Option<&str>,
) -> Result<FileEntry, StoreError> {
    let path = normalize_entry_path(raw_path)?;
    let existing = load_entry(conn, owner_id, &path)?;

    if let Some(existing) = &existing {
        ensure_kind_change_allowed(conn, existing, body.kind)?;
    }

    let now = clock.tick();
    if let Some(existing) = &existing {
        snapshot(conn, existing, now)?;
    }

    let created_at = existing.as_ref().map_or(now, |e| e.created_at);
    let entry = build_entry(owner_id, path, body, created_at, now, writer);
    upsert_entry(conn, &entry)?;
    Ok(entry)
}

/// Delete an entry of either kind; directories must be empty.
pub(crate) fn delete_entry(
    conn: &Connection,
    clock: &mut StoreClock,
    owner_id: &str,
    raw_path: &str,
) -> Result<FileEntry, StoreError> {
    let path = normalize_entry_path(raw_path)?;
    let existing = load_entry(conn, owner_id, &path)?.ok_or(StoreError::NotFound(path))?;

    if existing.kind == EntryKind::Dir && count_descendants(conn, owner_id, &existing.path)? > 0 {
        return Err(StoreError::State(format!(
            "directory '{}' is not empty",
            existing.path
        )));
    }

    let now = clock.tick();
    snapshot(conn, &existing, now)?;
    conn.execute(
        "DELETE FROM file_entries WHERE owner_id = ? AND path = ?",
        params![owner_id, existing.path],
    )?;
    Ok(existing)
}

/// Create a directory. An existing directory is a successful no-op.
pub(crate) fn make_dir(
    conn: &Connection,
    clock: &mut StoreClock,
    owner_id: &str,
    raw_path: &str,
    writer: Option<&str>,
) -> Result<MkdirOutcome, StoreError> {
    let path = normalize_entry_path(raw_path)?;
    match load_entry(conn, owner_id, &path)? {
        Some(entry) if entry.kind == EntryKind::Dir => Ok(MkdirOutcome {
            entry,
            created: false,
        }),
        Some(_) => Err(StoreError::Conflict(format!(
            "a file already exists at '{}'",
            path
        ))),
        None => {
            let now = clock.tick();
            let entry = build_entry(owner_id, path, &EntryBody::dir(), now, now, writer);
            upsert_entry(conn, &entry)?;
            Ok(MkdirOutcome {
                entry,
                created: true,
            })
        }
    }
}

/// Remove an empty directory.
pub(crate) fn remove_dir(
    conn: &Connection,
    clock: &mut StoreClock,
    owner_id: &str,
    raw_path: &str,
) -> Result<FileEntry, StoreError> {
    let path = normalize_entry_path(raw_path)?;
    let existing = load_entry(conn, owner_id, &path)?
        .ok_or_else(|| StoreError::NotFound(path.clone()))?;
    if existing.kind != EntryKind::Dir {
        return Err(StoreError::Validation(format!(
            "'{}' is a file, not a directory",
            path
        )));
    }
    delete_entry(conn, clock, owner_id, &path)
}

impl Repo {
    /// Get a single entry
    pub fn get_entry(&self, owner_id: &str, raw_path: &str) -> Result<FileEntry, StoreError> {
        let path = normalize_entry_path(raw_path)?;
        self.with_conn(|conn, _| {
            load_entry(conn, owner_id, &path)?.ok_or(StoreError::NotFound(path.clone()))
        })
    }

    /// Full tree for an owner, ordered by path
    pub fn list_entries(&self, owner_id: &str) -> Result<Vec<FileEntry>, StoreError> {
        self.with_conn(|conn, _| {
            let sql = format!(
                "SELECT {} FROM file_entries WHERE owner_id = ? ORDER BY path",
                ENTRY_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let entries = stmt
                .query_map([owner_id], entry_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(entries)
        })
    }

    /// Create or update an entry (upsert)
    pub fn put_entry(
        &self,
        owner_id: &str,
        raw_path: &str,
        body: &EntryBody,
        writer: Option<&str>,
    ) -> Result<FileEntry, StoreError> {
        self.with_tx(|tx, clock| write_entry(tx, clock, owner_id, raw_path, body, writer))
    }

    /// Delete an entry, returning its last state
    pub fn delete_entry(&self, owner_id: &str, raw_path: &str) -> Result<FileEntry, StoreError> {
        self.with_tx(|tx, clock| delete_entry(tx, clock, owner_id, raw_path))
    }

    pub fn make_dir(
        &self,
        owner_id: &str,
        raw_path: &str,
        writer: Option<&str>,
    ) -> Result<MkdirOutcome, StoreError> {
        self.with_tx(|tx, clock| make_dir(tx, clock, owner_id, raw_path, writer))
    }

    pub fn remove_dir(&self, owner_id: &str, raw_path: &str) -> Result<FileEntry, StoreError> {
        self.with_tx(|tx, clock| remove_dir(tx, clock, owner_id, raw_path))
    }

    /// Replace the owner's whole tree. Unversioned and all-or-nothing.
    ///
    /// Drive-root placeholders are dropped; a duplicate path aborts the replace.
    pub fn replace_all(
        &self,
        owner_id: &str,
        entries: Vec<EntryInput>,
        writer: Option<&str>,
    ) -> Result<usize, StoreError> {
        self.with_tx(|tx, clock| {
            tx.execute("DELETE FROM file_entries WHERE owner_id = ?", [owner_id])?;

            let now = clock.tick();
            let mut inserted = 0;
            for input in entries {
                if is_placeholder(&input.path) {
                    continue;
                }
                let (raw_path, body) = input.into_parts();
                let path = normalize_entry_path(&raw_path)?;
                let entry = build_entry(owner_id, path, &body, now, now, writer);
                let metadata = serde_json::to_string(&entry.metadata)?;
                tx.execute(
                    "INSERT INTO file_entries
                     (owner_id, path, kind, content, content_hash, size, program, metadata, created_at, updated_at, updated_by)
                     VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                    params![
                        entry.owner_id,
                        entry.path,
                        entry.kind.as_str(),
                        entry.content,
                        entry.content_hash,
                        entry.size as i64,
                        entry.program,
                        metadata,
                        entry.created_at,
                        entry.updated_at,
                        entry.updated_by
                    ],
                )
                .map_err(|e| match e {
                    rusqlite::Error::SqliteFailure(err, _)
                        if err.code == rusqlite::ErrorCode::ConstraintViolation =>
                    {
                        StoreError::Validation(format!("duplicate path '{}'", entry.path))
                    }
                    other => StoreError::Persistence(other),
                })?;
                inserted += 1;
            }
            Ok(inserted)
        })
    }

    /// Apply a map of path to entry (or `None` for delete) atomically.
    ///
    /// Every change is versioned; deleting a path that does not exist is skipped.
    pub fn patch_entries(
        &self,
        owner_id: &str,
        changes: BTreeMap<String, Option<EntryBody>>,
        writer: Option<&str>,
    ) -> Result<PatchResult, StoreError> {
        self.with_tx(|tx, clock| {
            let mut result = PatchResult::default();
            for (raw_path, change) in &changes {
                if is_placeholder(raw_path) {
                    continue;
                }
                match change {
                    Some(body) => {
                        write_entry(tx, clock, owner_id, raw_path, body, writer)?;
                        result.updated += 1;
                    }
                    None => match delete_entry(tx, clock, owner_id, raw_path) {
                        Ok(_) => result.deleted += 1,
                        Err(StoreError::NotFound(_)) => {}
                        Err(e) => return Err(e),
                    },
                }
            }
            Ok(result)
        })
    }

    /// Entries changed after `since`, or everything when `since` is `None`.
    pub fn sync(&self, owner_id: &str, since: Option<i64>) -> Result<SyncResult, StoreError> {
        self.with_conn(|conn, clock| {
            let server_time = clock.tick();
            let sql = format!(
                "SELECT {} FROM file_entries
                 WHERE owner_id = ? AND updated_at > ?
                 ORDER BY updated_at, path",
                ENTRY_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let entries = stmt
                .query_map(params![owner_id, since.unwrap_or(i64::MIN)], entry_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(SyncResult {
                entries,
                server_time,
                full: since.is_none(),
            })
        })
    }
}
