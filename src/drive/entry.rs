//! Entry data contracts shared by every drive variant.
//! Keep this module purely about types/serde and light helpers.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::path::path_name;

/// Metadata key injected by the permission wrapper on every returned entry.
pub const META_CAN_WRITE: &str = "can_write";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    File,
    Dir,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    pub path: String,
    pub kind: EntryKind,
    pub size: u64,
    pub meta: Map<String, Value>,
    /// Epoch milliseconds.
    pub created_at: i64,
    /// Epoch milliseconds.
    pub updated_at: i64,
}

impl Entry {
    pub fn file(path: impl Into<String>, size: u64, created_at: i64, updated_at: i64) -> Self {
        Self { path: path.into(), kind: EntryKind::File, size, meta: Map::new(), created_at, updated_at }
    }

    pub fn dir(path: impl Into<String>, created_at: i64, updated_at: i64) -> Self {
        Self { path: path.into(), kind: EntryKind::Dir, size: 0, meta: Map::new(), created_at, updated_at }
    }

    /// Last path segment; derived, never stored.
    pub fn name(&self) -> &str {
        path_name(&self.path)
    }

    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Dir
    }

    pub fn is_file(&self) -> bool {
        self.kind == EntryKind::File
    }

    pub fn can_write(&self) -> Option<bool> {
        self.meta.get(META_CAN_WRITE).and_then(|v| v.as_bool())
    }

    pub fn with_meta(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.meta.insert(key.to_string(), value.into());
        self
    }
}

/// Wire form of an entry: `name` is materialized and `type` replaces `kind`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EntryJson {
    pub path: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: EntryKind,
    pub size: u64,
    pub meta: Map<String, Value>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl From<&Entry> for EntryJson {
    fn from(e: &Entry) -> Self {
        Self {
            path: e.path.clone(),
            name: e.name().to_string(),
            kind: e.kind,
            size: e.size,
            meta: e.meta.clone(),
            created_at: e.created_at,
            updated_at: e.updated_at,
        }
    }
}

impl From<Entry> for EntryJson {
    fn from(e: Entry) -> Self {
        let name = e.name().to_string();
        Self { path: e.path, name, kind: e.kind, size: e.size, meta: e.meta, created_at: e.created_at, updated_at: e.updated_at }
    }
}
