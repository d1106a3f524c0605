//! Version ledger: a five-slot ring of pre-mutation snapshots per path.

use super::files::{ensure_kind_change_allowed, load_entry, upsert_entry};
use super::repo::{Repo, StoreClock, StoreError, parse_kind};
use rusqlite::{Connection, OptionalExtension, Row, params};
use serde::Serialize;
use vdrive_core::path::normalize_entry_path;
use vdrive_core::{EntrySummary, FileEntry, VersionSnapshot};

/// Snapshots kept per (owner, path).
pub const LEDGER_DEPTH: u8 = 5;

/// Slot that follows `previous` in the ring; the first snapshot lands in slot 1.
pub fn next_slot(previous: Option<u8>) -> u8 {
    previous.map_or(1, |p| p % LEDGER_DEPTH + 1)
}

/// Retained snapshots for a path, newest first, with the live entry for comparison.
#[derive(Debug, Clone, Serialize)]
pub struct VersionList {
    pub path: String,
    pub current: Option<EntrySummary>,
    pub versions: Vec<VersionSnapshot>,
}

const SNAPSHOT_COLUMNS: &str =
    "owner_id, path, version_number, kind, content, content_hash, size, created_at";

fn snapshot_from_row(row: &Row<'_>) -> Result<VersionSnapshot, rusqlite::Error> {
    Ok(VersionSnapshot {
        owner_id: row.get(0)?,
        path: row.get(1)?,
        version_number: row.get::<_, i64>(2)? as u8,
        kind: parse_kind(3, row.get(3)?)?,
        content: row.get(4)?,
        content_hash: row.get(5)?,
        size: row.get::<_, i64>(6)? as u64,
        created_at: row.get(7)?,
    })
}

/// Slot of the most recent snapshot for a path.
fn latest_slot(conn: &Connection, owner_id: &str, path: &str) -> Result<Option<u8>, StoreError> {
    let slot: Option<i64> = conn
        .query_row(
            "SELECT version_number FROM file_versions
             WHERE owner_id = ? AND path = ?
             ORDER BY created_at DESC LIMIT 1",
            params![owner_id, path],
            |row| row.get(0),
        )
        .optional()?;
    Ok(slot.map(|s| s as u8))
}

/// Record `entry` as it is right now, before it gets overwritten or removed.
pub(crate) fn snapshot(conn: &Connection, entry: &FileEntry, now: i64) -> Result<u8, StoreError> {
    let slot = next_slot(latest_slot(conn, &entry.owner_id, &entry.path)?);
    conn.execute(
        "INSERT OR REPLACE INTO file_versions
         (owner_id, path, version_number, kind, content, content_hash, size, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        params![
            entry.owner_id,
            entry.path,
            slot as i64,
            entry.kind.as_str(),
            entry.content,
            entry.content_hash,
            entry.size as i64,
            now
        ],
    )?;
    Ok(slot)
}

fn load_snapshot(
    conn: &Connection,
    owner_id: &str,
    path: &str,
    version: u8,
) -> Result<Option<VersionSnapshot>, StoreError> {
    let sql = format!(
        "SELECT {} FROM file_versions WHERE owner_id = ? AND path = ? AND version_number = ?",
        SNAPSHOT_COLUMNS
    );
    Ok(conn
        .query_row(&sql, params![owner_id, path, version as i64], snapshot_from_row)
        .optional()?)
}

pub(crate) fn restore(
    conn: &Connection,
    clock: &mut StoreClock,
    owner_id: &str,
    raw_path: &str,
    version: i64,
    writer: Option<&str>,
) -> Result<FileEntry, StoreError> {
    let path = normalize_entry_path(raw_path)?;
    if !(1..=LEDGER_DEPTH as i64).contains(&version) {
        return Err(StoreError::Validation(format!(
            "version must be between 1 and {}",
            LEDGER_DEPTH
        )));
    }

    let snap = load_snapshot(conn, owner_id, &path, version as u8)?
        .ok_or_else(|| StoreError::VersionNotFound {
            path: path.clone(),
            version,
        })?;

    let live = load_entry(conn, owner_id, &path)?;
    if let Some(live) = &live {
        ensure_kind_change_allowed(conn, live, snap.kind)?;
    }

    let now = clock.tick();
    if let Some(live) = &live {
        snapshot(conn, live, now)?;
    }

    let restored = FileEntry {
        owner_id: owner_id.to_string(),
        path,
        kind: snap.kind,
        content: snap.content,
        content_hash: snap.content_hash,
        size: snap.size,
        program: live.as_ref().and_then(|e| e.program.clone()),
        metadata: live
            .as_ref()
            .map(|e| e.metadata.clone())
            .unwrap_or_default(),
        created_at: live.as_ref().map_or(now, |e| e.created_at),
        updated_at: now,
        updated_by: writer.map(str::to_owned),
    };
    upsert_entry(conn, &restored)?;
    Ok(restored)
}

impl Repo {
    /// List retained snapshots for a path, newest first.
    pub fn list_versions(&self, owner_id: &str, raw_path: &str) -> Result<VersionList, StoreError> {
        let path = normalize_entry_path(raw_path)?;
        self.with_conn(|conn, _| {
            let sql = format!(
                "SELECT {} FROM file_versions
                 WHERE owner_id = ? AND path = ?
                 ORDER BY created_at DESC",
                SNAPSHOT_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let versions = stmt
                .query_map(params![owner_id, path], snapshot_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            let current = load_entry(conn, owner_id, &path)?.map(|e| e.summary());
            Ok(VersionList {
                path,
                current,
                versions,
            })
        })
    }

    /// Overwrite the live entry with snapshot `version`, snapshotting the live state first.
    pub fn restore_version(
        &self,
        owner_id: &str,
        raw_path: &str,
        version: i64,
        writer: Option<&str>,
    ) -> Result<FileEntry, StoreError> {
        self.with_tx(|tx, clock| restore(tx, clock, owner_id, raw_path, version, writer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_database;
    use vdrive_core::{EntryBody, EntryKind, content_hash};

    fn setup_test_db() -> Repo {
        let conn = Connection::open_in_memory().unwrap();
        init_database(&conn).unwrap();
        Repo::new(conn).unwrap()
    }

    #[test]
    fn test_next_slot_wraps() {
        assert_eq!(next_slot(None), 1);
        assert_eq!(next_slot(Some(1)), 2);
        assert_eq!(next_slot(Some(4)), 5);
        assert_eq!(next_slot(Some(5)), 1);
    }

    #[test]
    fn test_first_write_records_no_snapshot() {
        let repo = setup_test_db();
        repo.put_entry("p1", "C:\\A.TXT", &EntryBody::file("v0"), None)
            .unwrap();
        let list = repo.list_versions("p1", "C:\\A.TXT").unwrap();
        assert!(list.versions.is_empty());
        assert!(list.current.is_some());
    }

    #[test]
    fn test_six_overwrites_keep_five_snapshots() {
        let repo = setup_test_db();
        // Initial write plus six overwrites: snapshots of v0..v5, v0 evicted.
        for i in 0..7 {
            repo.put_entry("p1", "C:\\A.TXT", &EntryBody::file(format!("v{}", i)), None)
                .unwrap();
        }

        let list = repo.list_versions("p1", "C:\\A.TXT").unwrap();
        assert_eq!(list.versions.len(), 5);
        let contents: Vec<_> = list
            .versions
            .iter()
            .map(|v| v.content.clone().unwrap())
            .collect();
        assert_eq!(contents, vec!["v5", "v4", "v3", "v2", "v1"]);

        // v5 went into slot 1 after the ring wrapped.
        assert_eq!(list.versions[0].version_number, 1);
        assert_eq!(
            list.current.unwrap().content_hash,
            content_hash(Some("v6"))
        );
    }

    #[test]
    fn test_ring_keeps_rotating() {
        let repo = setup_test_db();
        for i in 0..12 {
            repo.put_entry("p1", "C:\\A.TXT", &EntryBody::file(format!("v{}", i)), None)
                .unwrap();
        }
        let list = repo.list_versions("p1", "C:\\A.TXT").unwrap();
        assert_eq!(list.versions.len(), 5);
        assert_eq!(list.versions[0].content.as_deref(), Some("v10"));
        assert_eq!(list.versions[4].content.as_deref(), Some("v6"));
    }

    #[test]
    fn test_restore_is_undoable() {
        let repo = setup_test_db();
        repo.put_entry("p1", "C:\\A.TXT", &EntryBody::file("first"), None)
            .unwrap();
        repo.put_entry("p1", "C:\\A.TXT", &EntryBody::file("second"), None)
            .unwrap();

        // Slot 1 holds "first".
        let restored = repo
            .restore_version("p1", "C:\\A.TXT", 1, Some("conn-a"))
            .unwrap();
        assert_eq!(restored.content.as_deref(), Some("first"));
        assert_eq!(restored.updated_by.as_deref(), Some("conn-a"));

        let list = repo.list_versions("p1", "C:\\A.TXT").unwrap();
        assert_eq!(list.versions.len(), 2);
        assert_eq!(list.versions[0].content.as_deref(), Some("second"));
        assert_eq!(list.versions[0].version_number, 2);

        // Undo the restore.
        let undone = repo.restore_version("p1", "C:\\A.TXT", 2, None).unwrap();
        assert_eq!(undone.content.as_deref(), Some("second"));
    }

    #[test]
    fn test_restore_recreates_deleted_entry() {
        let repo = setup_test_db();
        repo.put_entry("p1", "C:\\A.TXT", &EntryBody::file("keep me"), None)
            .unwrap();
        repo.delete_entry("p1", "C:\\A.TXT").unwrap();

        let restored = repo.restore_version("p1", "C:\\A.TXT", 1, None).unwrap();
        assert_eq!(restored.kind, EntryKind::File);
        assert_eq!(
            repo.get_entry("p1", "C:\\A.TXT").unwrap().content.as_deref(),
            Some("keep me")
        );
    }

    #[test]
    fn test_restore_refuses_file_over_populated_dir() {
        let repo = setup_test_db();
        repo.put_entry("p1", "C:\\X", &EntryBody::file("was a file"), None)
            .unwrap();
        repo.delete_entry("p1", "C:\\X").unwrap();
        repo.make_dir("p1", "C:\\X", None).unwrap();
        repo.put_entry("p1", "C:\\X\\CHILD", &EntryBody::file("c"), None)
            .unwrap();

        assert!(matches!(
            repo.restore_version("p1", "C:\\X", 1, None),
            Err(StoreError::State(_))
        ));
        assert_eq!(repo.get_entry("p1", "C:\\X").unwrap().kind, EntryKind::Dir);
        assert!(repo.get_entry("p1", "C:\\X\\CHILD").is_ok());
        // The refused restore leaves the ledger untouched.
        assert_eq!(repo.list_versions("p1", "C:\\X").unwrap().versions.len(), 1);

        // Once the directory is empty the restore goes through.
        repo.delete_entry("p1", "C:\\X\\CHILD").unwrap();
        let restored = repo.restore_version("p1", "C:\\X", 1, None).unwrap();
        assert_eq!(restored.kind, EntryKind::File);
        assert_eq!(restored.content.as_deref(), Some("was a file"));
    }

    #[test]
    fn test_restore_errors() {
        let repo = setup_test_db();
        repo.put_entry("p1", "C:\\A.TXT", &EntryBody::file("x"), None)
            .unwrap();

        assert!(matches!(
            repo.restore_version("p1", "C:\\A.TXT", 3, None),
            Err(StoreError::VersionNotFound { version: 3, .. })
        ));
        assert!(matches!(
            repo.restore_version("p1", "C:\\A.TXT", 6, None),
            Err(StoreError::Validation(_))
        ));
        assert!(matches!(
            repo.restore_version("p1", "C:\\A.TXT", 0, None),
            Err(StoreError::Validation(_))
        ));
    }
}
