//! In-memory permission store.

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::drive::path::{clean_path, is_ancestor_or_self, path_depth};
use crate::error::{DriveError, DriveResult};
use crate::identity::Subject;

use super::{PathPermission, PermissionStore};

#[derive(Default)]
pub struct MemoryPermissionStore {
    records: RwLock<Vec<PathPermission>>,
}

impl MemoryPermissionStore {
    pub fn new() -> Self { Self::default() }

    /// Seed records, replacing any existing record for the same (subject, path).
    pub fn with_records(records: Vec<PathPermission>) -> DriveResult<Self> {
        let store = Self::new();
        for r in records {
            store.upsert(r)?;
        }
        Ok(store)
    }

    /// Insert or replace the record keyed by (subject, path).
    pub fn upsert(&self, mut record: PathPermission) -> DriveResult<()> {
        record.subject.parse::<Subject>().map_err(DriveError::bad_request)?;
        record.path = clean_path(&record.path);
        let mut w = self.records.write();
        w.retain(|r| !(r.subject == record.subject && r.path == record.path));
        w.push(record);
        Ok(())
    }

    pub fn len(&self) -> usize { self.records.read().len() }

    pub fn is_empty(&self) -> bool { self.records.read().is_empty() }
}

#[async_trait]
impl PermissionStore for MemoryPermissionStore {
    async fn get_by_paths(&self, subjects: &[String], paths: &[String]) -> DriveResult<Vec<PathPermission>> {
        let r = self.records.read();
        Ok(r.iter()
            .filter(|p| subjects.contains(&p.subject) && paths.contains(&p.path))
            .cloned()
            .collect())
    }

    async fn get_children_by_path(&self, subjects: &[String], path: &str, depth: i32) -> DriveResult<Vec<PathPermission>> {
        let r = self.records.read();
        Ok(r.iter()
            .filter(|p| subjects.contains(&p.subject) && is_ancestor_or_self(path, &p.path))
            .filter(|p| depth < 0 || path_depth(&p.path) as i32 == depth)
            .cloned()
            .collect())
    }

    async fn list_by_path(&self, path: &str) -> DriveResult<Vec<PathPermission>> {
        let r = self.records.read();
        Ok(r.iter().filter(|p| p.path == path).cloned().collect())
    }

    async fn save_path(&self, path: &str, records: Vec<PathPermission>) -> DriveResult<()> {
        let mut seen = std::collections::HashSet::new();
        for rec in records.iter() {
            rec.subject.parse::<Subject>().map_err(DriveError::bad_request)?;
            if clean_path(&rec.path) != path {
                return Err(DriveError::bad_request(format!("record path {} does not match {}", rec.path, path)));
            }
            if !seen.insert(rec.subject.clone()) {
                return Err(DriveError::bad_request(format!("duplicate subject {} at {}", rec.subject, path)));
            }
        }
        let mut w = self.records.write();
        w.retain(|p| p.path != path);
        w.extend(records.into_iter().map(|rec| PathPermission { path: path.to_string(), ..rec }));
        Ok(())
    }
}
