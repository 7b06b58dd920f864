//! Permission-enforcing drive decorator.
//!
//! Every capability call is checked against the acting principal's effective
//! level before the wrapped drive is touched, so a rejected call never has
//! side effects. Returned entries carry a freshly computed `can_write`.
//! Read-only calls that fail the check report NotFound to avoid revealing
//! that the path exists; mutating calls report Forbidden.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::error::{DriveError, DriveResult};
use crate::identity::Principal;
use crate::permission::{PathPermission, PermissionLevel, PermissionResolver};

use super::{Content, Drive, Entry, ProgressSink, UploadPlan, META_CAN_WRITE};

/// Operation kinds with a fixed minimum level at the path they touch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DriveOp {
    List,
    Get,
    Read,
    MakeDir,
    CopySource,
    CopyDest,
    MoveSource,
    MoveDest,
    Delete,
    Upload,
    Save,
    ManagePermissions,
}

impl DriveOp {
    pub fn required_level(self) -> PermissionLevel {
        match self {
            DriveOp::List | DriveOp::Get | DriveOp::Read | DriveOp::CopySource => PermissionLevel::Read,
            DriveOp::MakeDir
            | DriveOp::CopyDest
            | DriveOp::MoveSource
            | DriveOp::MoveDest
            | DriveOp::Delete
            | DriveOp::Upload
            | DriveOp::Save => PermissionLevel::ReadWrite,
            DriveOp::ManagePermissions => PermissionLevel::Manage,
        }
    }

    /// Operations whose denial is reported as NotFound.
    pub fn hides_existence(self) -> bool {
        matches!(self, DriveOp::List | DriveOp::Get | DriveOp::Read)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DriveOp::List => "list",
            DriveOp::Get => "get",
            DriveOp::Read => "read",
            DriveOp::MakeDir => "make_dir",
            DriveOp::CopySource => "copy_source",
            DriveOp::CopyDest => "copy_dest",
            DriveOp::MoveSource => "move_source",
            DriveOp::MoveDest => "move_dest",
            DriveOp::Delete => "delete",
            DriveOp::Upload => "upload",
            DriveOp::Save => "save",
            DriveOp::ManagePermissions => "manage_permissions",
        }
    }
}

fn mark(mut entry: Entry, level: PermissionLevel) -> Entry {
    entry.meta.insert(META_CAN_WRITE.to_string(), level.can_write().into());
    entry
}

pub struct PermissionWrapperDrive {
    principal: Principal,
    inner: Arc<dyn Drive>,
    resolver: PermissionResolver,
}

impl PermissionWrapperDrive {
    pub fn new(principal: Principal, inner: Arc<dyn Drive>, resolver: PermissionResolver) -> Self {
        Self { principal, inner, resolver }
    }

    /// Resolve the principal's level at `path` and fail fast when `op` needs more.
    pub async fn check(&self, op: DriveOp, path: &str) -> DriveResult<PermissionLevel> {
        let level = self.resolver.resolve(&self.principal, path).await?;
        if level >= op.required_level() {
            return Ok(level);
        }
        debug!(
            target: "drivegate::permission",
            user = self.principal.display_name(),
            op = op.as_str(),
            path,
            level = level.as_str(),
            "permission denied"
        );
        if op.hides_existence() {
            Err(DriveError::not_found(path))
        } else {
            Err(DriveError::forbidden(path))
        }
    }

    /// Records stored at `path`; requires `manage` there.
    pub async fn list_permissions(&self, path: &str) -> DriveResult<Vec<PathPermission>> {
        self.check(DriveOp::ManagePermissions, path).await?;
        self.resolver.store().list_by_path(path).await
    }

    /// Replace the records stored at `path`; requires `manage` there.
    pub async fn save_permissions(&self, path: &str, records: Vec<PathPermission>) -> DriveResult<()> {
        self.check(DriveOp::ManagePermissions, path).await?;
        self.resolver.store().save_path(path, records).await
    }
}

#[async_trait]
impl Drive for PermissionWrapperDrive {
    async fn list(&self, path: &str) -> DriveResult<Vec<Entry>> {
        self.check(DriveOp::List, path).await?;
        let entries = self.inner.list(path).await?;
        let resolved = self.resolver.resolve_children(&self.principal, path, true).await?;
        Ok(entries
            .into_iter()
            .filter_map(|e| {
                let level = resolved.level_for(&e.path);
                level.can_read().then(|| mark(e, level))
            })
            .collect())
    }

    async fn get(&self, path: &str) -> DriveResult<Entry> {
        let level = self.check(DriveOp::Get, path).await?;
        Ok(mark(self.inner.get(path).await?, level))
    }

    async fn make_dir(&self, path: &str) -> DriveResult<Entry> {
        let level = self.check(DriveOp::MakeDir, path).await?;
        Ok(mark(self.inner.make_dir(path).await?, level))
    }

    async fn copy(&self, from: &Entry, to: &str, overwrite: bool, progress: &dyn ProgressSink) -> DriveResult<Entry> {
        self.check(DriveOp::CopySource, &from.path).await?;
        let level = self.check(DriveOp::CopyDest, to).await?;
        Ok(mark(self.inner.copy(from, to, overwrite, progress).await?, level))
    }

    async fn move_entry(&self, from: &str, to: &str) -> DriveResult<Entry> {
        self.check(DriveOp::MoveSource, from).await?;
        let level = self.check(DriveOp::MoveDest, to).await?;
        Ok(mark(self.inner.move_entry(from, to).await?, level))
    }

    async fn delete(&self, path: &str) -> DriveResult<()> {
        self.check(DriveOp::Delete, path).await?;
        self.inner.delete(path).await
    }

    async fn upload(&self, path: &str, size: i64, overwrite: bool) -> DriveResult<UploadPlan> {
        if size < 0 {
            return Err(DriveError::bad_request("invalid file size"));
        }
        self.check(DriveOp::Upload, path).await?;
        self.inner.upload(path, size, overwrite).await
    }

    async fn save(&self, path: &str, content: Content, progress: &dyn ProgressSink) -> DriveResult<Entry> {
        let level = self.check(DriveOp::Save, path).await?;
        Ok(mark(self.inner.save(path, content, progress).await?, level))
    }

    async fn read(&self, path: &str) -> DriveResult<Content> {
        self.check(DriveOp::Read, path).await?;
        self.inner.read(path).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drive::{content_from_bytes, no_progress, MemoryDrive};
    use crate::permission::{MemoryPermissionStore, PermissionLevel::*};

    fn wrap(records: Vec<PathPermission>, backend: Arc<MemoryDrive>) -> PermissionWrapperDrive {
        let store = Arc::new(MemoryPermissionStore::with_records(records).unwrap());
        PermissionWrapperDrive::new(
            Principal::user("alice", vec!["staff".into()]),
            backend,
            PermissionResolver::new(store),
        )
    }

    #[test]
    fn threshold_table() {
        assert_eq!(DriveOp::List.required_level(), Read);
        assert_eq!(DriveOp::CopySource.required_level(), Read);
        assert_eq!(DriveOp::CopyDest.required_level(), ReadWrite);
        assert_eq!(DriveOp::Delete.required_level(), ReadWrite);
        assert_eq!(DriveOp::ManagePermissions.required_level(), Manage);
        assert!(DriveOp::Get.hides_existence());
        assert!(!DriveOp::Save.hides_existence());
    }

    #[tokio::test]
    async fn get_injects_can_write_over_backend_key() {
        let backend = Arc::new(MemoryDrive::new());
        backend.put_file("/a/f.txt", b"x");
        let d = wrap(vec![PathPermission::new("u:alice", "/a", Read)], backend);
        let e = d.get("/a/f.txt").await.unwrap();
        assert_eq!(e.can_write(), Some(false));
    }

    #[tokio::test]
    async fn get_without_permission_is_not_found() {
        let backend = Arc::new(MemoryDrive::new());
        backend.put_file("/a/f.txt", b"x");
        let d = wrap(vec![], backend);
        assert!(matches!(d.get("/a/f.txt").await, Err(DriveError::NotFound(_))));
        assert!(matches!(d.read("/a/f.txt").await, Err(DriveError::NotFound(_))));
    }

    #[tokio::test]
    async fn mutations_without_permission_are_forbidden_and_side_effect_free() {
        let backend = Arc::new(MemoryDrive::new());
        backend.put_file("/a/f.txt", b"x");
        let d = wrap(vec![PathPermission::new("u:alice", "/", Read)], backend.clone());
        assert!(matches!(d.make_dir("/a/new").await, Err(DriveError::Forbidden(_))));
        assert!(matches!(d.delete("/a/f.txt").await, Err(DriveError::Forbidden(_))));
        assert!(matches!(d.move_entry("/a/f.txt", "/g.txt").await, Err(DriveError::Forbidden(_))));
        assert!(matches!(
            d.save("/a/f.txt", content_from_bytes(b"y".to_vec()), &no_progress).await,
            Err(DriveError::Forbidden(_))
        ));
        assert!(!backend.exists("/a/new"));
        assert_eq!(backend.file_bytes("/a/f.txt").unwrap(), b"x");
    }

    #[tokio::test]
    async fn upload_negative_size_is_bad_request_before_permission() {
        let d = wrap(vec![], Arc::new(MemoryDrive::new()));
        assert!(matches!(d.upload("/f", -1, false).await, Err(DriveError::BadRequest(_))));
        assert!(matches!(d.upload("/f", 1, false).await, Err(DriveError::Forbidden(_))));
    }

    #[tokio::test]
    async fn manage_gates_permission_admin() {
        let backend = Arc::new(MemoryDrive::new());
        let d = wrap(vec![
            PathPermission::new("u:alice", "/", ReadWrite),
            PathPermission::new("g:staff", "/team", Manage),
        ], backend);
        assert!(matches!(d.list_permissions("/").await, Err(DriveError::Forbidden(_))));
        d.save_permissions("/team/x", vec![PathPermission::new("u:bob", "/team/x", Read)]).await.unwrap();
        let recs = d.list_permissions("/team/x").await.unwrap();
        assert_eq!(recs.len(), 1);
    }
}
