//! File store entries and version snapshots.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Whether an entry is a file or a directory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    #[default]
    File,
    Dir,
}

impl EntryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryKind::File => "file",
            EntryKind::Dir => "dir",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "file" => Some(EntryKind::File),
            "dir" => Some(EntryKind::Dir),
            _ => None,
        }
    }
}

/// A stored file or directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileEntry {
    pub owner_id: String,
    pub path: String,
    #[serde(rename = "type")]
    pub kind: EntryKind,
    /// Opaque content; always `None` for directories.
    pub content: Option<String>,
    /// SHA-256 of `content`, `None` when there is no content.
    pub content_hash: Option<String>,
    pub size: u64,
    /// Optional program classification tag.
    pub program: Option<String>,
    pub metadata: Value,
    pub created_at: i64,
    pub updated_at: i64,
    /// Connection (or surface) that last wrote the entry.
    pub updated_by: Option<String>,
}

impl FileEntry {
    pub fn summary(&self) -> EntrySummary {
        EntrySummary {
            path: self.path.clone(),
            kind: self.kind,
            content_hash: self.content_hash.clone(),
            size: self.size,
            updated_at: self.updated_at,
            updated_by: self.updated_by.clone(),
        }
    }
}

/// Content-free view of an entry, used to compare against version snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntrySummary {
    pub path: String,
    #[serde(rename = "type")]
    pub kind: EntryKind,
    pub content_hash: Option<String>,
    pub size: u64,
    pub updated_at: i64,
    pub updated_by: Option<String>,
}

/// Writable fields of an entry, without its path.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntryBody {
    #[serde(rename = "type", default)]
    pub kind: EntryKind,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub program: Option<String>,
    #[serde(default)]
    pub metadata: Value,
}

impl EntryBody {
    pub fn dir() -> Self {
        Self {
            kind: EntryKind::Dir,
            ..Default::default()
        }
    }

    pub fn file(content: impl Into<String>) -> Self {
        Self {
            kind: EntryKind::File,
            content: Some(content.into()),
            ..Default::default()
        }
    }

    /// Content as it will be stored: directories never carry content.
    pub fn stored_content(&self) -> Option<&str> {
        match self.kind {
            EntryKind::File => self.content.as_deref(),
            EntryKind::Dir => None,
        }
    }
}

/// A client-supplied entry: a path plus its writable fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntryInput {
    pub path: String,
    #[serde(rename = "type", default)]
    pub kind: EntryKind,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub program: Option<String>,
    #[serde(default)]
    pub metadata: Value,
}

impl EntryInput {
    pub fn new(path: impl Into<String>, body: EntryBody) -> Self {
        Self {
            path: path.into(),
            kind: body.kind,
            content: body.content,
            program: body.program,
            metadata: body.metadata,
        }
    }

    pub fn into_parts(self) -> (String, EntryBody) {
        (
            self.path,
            EntryBody {
                kind: self.kind,
                content: self.content,
                program: self.program,
                metadata: self.metadata,
            },
        )
    }
}

/// Pre-mutation copy of an entry held in one of the five ledger slots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionSnapshot {
    pub owner_id: String,
    pub path: String,
    pub version_number: u8,
    #[serde(rename = "type")]
    pub kind: EntryKind,
    pub content: Option<String>,
    pub content_hash: Option<String>,
    pub size: u64,
    pub created_at: i64,
}

/// Hex SHA-256 digest of the raw content bytes; `None` when there is no content.
pub fn content_hash(content: Option<&str>) -> Option<String> {
    content.map(|c| format!("{:x}", Sha256::digest(c.as_bytes())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_content_hash_is_deterministic() {
        let a = content_hash(Some("hello"));
        let b = content_hash(Some("hello"));
        assert_eq!(a, b);
        assert_eq!(
            a.as_deref(),
            Some("2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824")
        );
        assert_ne!(a, content_hash(Some("hello!")));
        assert_eq!(content_hash(None), None);
    }

    #[test]
    fn test_dir_body_drops_content() {
        let body = EntryBody {
            kind: EntryKind::Dir,
            content: Some("ignored".to_string()),
            ..Default::default()
        };
        assert_eq!(body.stored_content(), None);
        assert_eq!(EntryBody::file("x").stored_content(), Some("x"));
    }

    #[test]
    fn test_entry_input_defaults_to_file() {
        let input: EntryInput = serde_json::from_value(json!({
            "path": "C:\\README.TXT",
            "content": "hi"
        }))
        .unwrap();
        assert_eq!(input.kind, EntryKind::File);
        assert_eq!(input.metadata, Value::Null);

        let (path, body) = input.into_parts();
        assert_eq!(path, "C:\\README.TXT");
        assert_eq!(body.content.as_deref(), Some("hi"));
    }

    #[test]
    fn test_entry_kind_wire_names() {
        assert_eq!(serde_json::to_value(EntryKind::Dir).unwrap(), json!("dir"));
        assert_eq!(EntryKind::parse("file"), Some(EntryKind::File));
        assert_eq!(EntryKind::parse("folder"), None);
    }
}
