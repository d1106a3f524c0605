use chrono::Utc;
use rusqlite::types::Type;
use rusqlite::{Connection, Row, Transaction};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use vdrive_core::{EntryKind, ErrorCode, FileEntry, PathError};

/// Errors raised by the drive repository.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0}")]
    Validation(String),

    #[error(transparent)]
    Path(#[from] PathError),

    #[error("no entry at '{0}'")]
    NotFound(String),

    #[error("no version {version} for '{path}'")]
    VersionNotFound { path: String, version: i64 },

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    State(String),

    #[error("storage error: {0}")]
    Persistence(#[from] rusqlite::Error),

    #[error("stored document is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),
}

impl StoreError {
    pub fn code(&self) -> ErrorCode {
        match self {
            StoreError::Validation(_) | StoreError::Path(_) => ErrorCode::Validation,
            StoreError::NotFound(_) | StoreError::VersionNotFound { .. } => ErrorCode::NotFound,
            StoreError::Conflict(_) => ErrorCode::Conflict,
            StoreError::State(_) => ErrorCode::State,
            StoreError::Persistence(_) | StoreError::Corrupt(_) => ErrorCode::Persistence,
        }
    }

    /// Soft errors describe the request; the rest are storage faults.
    pub fn is_soft(&self) -> bool {
        !matches!(self, StoreError::Persistence(_) | StoreError::Corrupt(_))
    }

    /// Message safe to show a client.
    pub fn public_message(&self) -> String {
        if self.is_soft() {
            self.to_string()
        } else {
            "storage failure".to_string()
        }
    }
}

/// Strictly increasing millisecond clock for write stamps and sync cursors.
#[derive(Debug)]
pub struct StoreClock {
    last: i64,
}

impl StoreClock {
    /// Resume after the newest stamp already on disk.
    fn resume(conn: &Connection) -> Result<Self, rusqlite::Error> {
        let last: Option<i64> = conn.query_row(
            "SELECT MAX(ts) FROM (
                 SELECT MAX(updated_at) AS ts FROM file_entries
                 UNION ALL SELECT MAX(created_at) FROM file_versions
                 UNION ALL SELECT MAX(updated_at) FROM scene_configs
             )",
            [],
            |row| row.get(0),
        )?;
        Ok(Self {
            last: last.unwrap_or(0),
        })
    }

    pub fn tick(&mut self) -> i64 {
        let now = Utc::now().timestamp_millis();
        self.last = now.max(self.last + 1);
        self.last
    }
}

struct RepoInner {
    conn: Connection,
    clock: StoreClock,
}

/// Drive repository for database operations
#[derive(Clone)]
pub struct Repo {
    inner: Arc<Mutex<RepoInner>>,
}

impl Repo {
    /// Create a new Repo over an initialized connection
    pub fn new(conn: Connection) -> Result<Self, rusqlite::Error> {
        let clock = StoreClock::resume(&conn)?;
        Ok(Self {
            inner: Arc::new(Mutex::new(RepoInner { conn, clock })),
        })
    }

    fn lock(&self) -> MutexGuard<'_, RepoInner> {
        // A panic mid-transaction rolls the transaction back, so the
        // connection is still consistent.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run a read against the connection.
    pub(crate) fn with_conn<T>(
        &self,
        f: impl FnOnce(&Connection, &mut StoreClock) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut guard = self.lock();
        let RepoInner { conn, clock } = &mut *guard;
        f(conn, clock)
    }

    /// Run `f` inside one transaction; any error rolls everything back.
    pub(crate) fn with_tx<T>(
        &self,
        f: impl FnOnce(&Transaction<'_>, &mut StoreClock) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut guard = self.lock();
        let RepoInner { conn, clock } = &mut *guard;
        let tx = conn.transaction()?;
        let out = f(&tx, clock)?;
        tx.commit()?;
        Ok(out)
    }

    /// Current store time without recording a write.
    pub fn now(&self) -> i64 {
        self.lock().clock.tick()
    }
}

pub(crate) const ENTRY_COLUMNS: &str = "owner_id, path, kind, content, content_hash, size, program, metadata, created_at, updated_at, updated_by";

pub(crate) fn parse_kind(idx: usize, raw: String) -> Result<EntryKind, rusqlite::Error> {
    EntryKind::parse(&raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            Type::Text,
            format!("unknown entry kind '{}'", raw).into(),
        )
    })
}

/// Map a row selected with [`ENTRY_COLUMNS`].
pub(crate) fn entry_from_row(row: &Row<'_>) -> Result<FileEntry, rusqlite::Error> {
    let metadata: String = row.get(7)?;
    let metadata = serde_json::from_str(&metadata)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(7, Type::Text, Box::new(e)))?;
    Ok(FileEntry {
        owner_id: row.get(0)?,
        path: row.get(1)?,
        kind: parse_kind(2, row.get(2)?)?,
        content: row.get(3)?,
        content_hash: row.get(4)?,
        size: row.get::<_, i64>(5)? as u64,
        program: row.get(6)?,
        metadata,
        created_at: row.get(8)?,
        updated_at: row.get(9)?,
        updated_by: row.get(10)?,
    })
}
