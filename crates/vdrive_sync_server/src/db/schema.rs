use rusqlite::Connection;

/// SQL schema for the drive store
const SCHEMA: &str = r#"
PRAGMA foreign_keys = ON;

-- Players (identities that own a drive)
CREATE TABLE IF NOT EXISTS players (
    id TEXT PRIMARY KEY,
    display_name TEXT NOT NULL,
    created_at INTEGER NOT NULL
);

-- Bearer sessions
CREATE TABLE IF NOT EXISTS sessions (
    token TEXT PRIMARY KEY,
    player_id TEXT NOT NULL REFERENCES players(id) ON DELETE CASCADE,
    expires_at INTEGER NOT NULL,
    created_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_sessions_player_id ON sessions(player_id);
CREATE INDEX IF NOT EXISTS idx_sessions_expires ON sessions(expires_at);

-- Live drive entries; timestamps are store-clock milliseconds.
CREATE TABLE IF NOT EXISTS file_entries (
    owner_id TEXT NOT NULL,
    path TEXT NOT NULL,
    kind TEXT NOT NULL CHECK (kind IN ('file', 'dir')),
    content TEXT,
    content_hash TEXT,
    size INTEGER NOT NULL DEFAULT 0,
    program TEXT,
    metadata TEXT NOT NULL DEFAULT 'null',
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    PRIMARY KEY (owner_id, path),
    CHECK (kind = 'file' OR content IS NULL)
);

CREATE INDEX IF NOT EXISTS idx_file_entries_updated ON file_entries(owner_id, updated_at);

-- Version ledger: at most five pre-mutation snapshots per (owner, path).
CREATE TABLE IF NOT EXISTS file_versions (
    owner_id TEXT NOT NULL,
    path TEXT NOT NULL,
    version_number INTEGER NOT NULL CHECK (version_number BETWEEN 1 AND 5),
    kind TEXT NOT NULL CHECK (kind IN ('file', 'dir')),
    content TEXT,
    content_hash TEXT,
    size INTEGER NOT NULL DEFAULT 0,
    created_at INTEGER NOT NULL,
    PRIMARY KEY (owner_id, path, version_number)
);

-- Scene documents; owner_id NULL marks the global default row.
CREATE TABLE IF NOT EXISTS scene_configs (
    owner_id TEXT,
    config_name TEXT NOT NULL,
    document TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_scene_configs_key
    ON scene_configs(IFNULL(owner_id, ''), config_name);
"#;

/// Initialize the database with the drive schema
pub fn init_database(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA)?;

    // Forward migration: add updated_by column to file_entries.
    let has_updated_by_col: bool = conn
        .prepare("PRAGMA table_info(file_entries)")?
        .query_map([], |row| row.get::<_, String>(1))?
        .filter_map(Result::ok)
        .any(|name| name == "updated_by");
    if !has_updated_by_col {
        conn.execute("ALTER TABLE file_entries ADD COLUMN updated_by TEXT", [])?;
    }

    Ok(())
}
