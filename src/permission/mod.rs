//! Path permission records, the store contract and hierarchical resolution.
//!
//! A record grants one subject (`u:<id>`, `g:<id>` or `ANY`) a level at a
//! path. Inheriting records also cover every descendant; the deepest
//! matching record wins, and ties at that depth take the highest level.

pub mod memory;
pub mod cache;
pub mod resolver;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::DriveResult;

pub use memory::MemoryPermissionStore;
pub use cache::CachedPermissionStore;
pub use resolver::{effective_level, PermissionResolver, ResolvedPermissions};

/// Ordered access levels; comparison follows declaration order.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum PermissionLevel {
    #[default]
    None,
    Read,
    ReadWrite,
    Manage,
}

impl PermissionLevel {
    pub fn can_read(self) -> bool { self >= PermissionLevel::Read }
    pub fn can_write(self) -> bool { self >= PermissionLevel::ReadWrite }
    pub fn as_str(self) -> &'static str {
        match self {
            PermissionLevel::None => "none",
            PermissionLevel::Read => "read",
            PermissionLevel::ReadWrite => "read-write",
            PermissionLevel::Manage => "manage",
        }
    }
}

fn default_inherit() -> bool { true }

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PathPermission {
    pub subject: String,
    pub path: String,
    pub level: PermissionLevel,
    /// When false the record applies to `path` only, not its descendants.
    #[serde(default = "default_inherit")]
    pub inherit: bool,
}

impl PathPermission {
    pub fn new(subject: impl Into<String>, path: impl Into<String>, level: PermissionLevel) -> Self {
        Self { subject: subject.into(), path: path.into(), level, inherit: true }
    }

    /// Record that applies to the exact path only.
    pub fn direct(subject: impl Into<String>, path: impl Into<String>, level: PermissionLevel) -> Self {
        Self { inherit: false, ..Self::new(subject, path, level) }
    }
}

/// Persistence boundary for permission records.
#[async_trait]
pub trait PermissionStore: Send + Sync {
    /// Records for any of `subjects` stored at exactly one of `paths`.
    async fn get_by_paths(&self, subjects: &[String], paths: &[String]) -> DriveResult<Vec<PathPermission>>;

    /// Records for any of `subjects` at or below `path`. `depth = -1` returns
    /// the whole subtree; `depth = N` only records whose path depth is N.
    async fn get_children_by_path(&self, subjects: &[String], path: &str, depth: i32) -> DriveResult<Vec<PathPermission>>;

    /// Every record stored at exactly `path`, for all subjects.
    async fn list_by_path(&self, path: &str) -> DriveResult<Vec<PathPermission>>;

    /// Replace every record stored at `path` with `records`.
    async fn save_path(&self, path: &str, records: Vec<PathPermission>) -> DriveResult<()>;
}
