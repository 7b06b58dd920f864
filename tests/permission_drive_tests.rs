//! Permission-enforcing drive over a mounted composite: listings, copy/move
//! gates, upload declaration and the admin surface.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use drivegate::drive::{
    content_from_bytes, no_progress, Content, DispatcherDrive, Drive, Entry, MemoryDrive, Mount, PermissionWrapperDrive,
    ProgressSink, UploadPlan,
};
use drivegate::error::{DriveError, DriveResult};
use drivegate::identity::Principal;
use drivegate::permission::{
    CachedPermissionStore, MemoryPermissionStore, PathPermission, PermissionLevel, PermissionResolver, PermissionStore,
};

/// Counts every call that reaches the backend.
struct CountingDrive {
    inner: MemoryDrive,
    calls: AtomicUsize,
}

impl CountingDrive {
    fn new(inner: MemoryDrive) -> Self {
        Self { inner, calls: AtomicUsize::new(0) }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn hit(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Drive for CountingDrive {
    async fn list(&self, path: &str) -> DriveResult<Vec<Entry>> { self.hit(); self.inner.list(path).await }
    async fn get(&self, path: &str) -> DriveResult<Entry> { self.hit(); self.inner.get(path).await }
    async fn make_dir(&self, path: &str) -> DriveResult<Entry> { self.hit(); self.inner.make_dir(path).await }
    async fn copy(&self, from: &Entry, to: &str, overwrite: bool, progress: &dyn ProgressSink) -> DriveResult<Entry> {
        self.hit();
        self.inner.copy(from, to, overwrite, progress).await
    }
    async fn move_entry(&self, from: &str, to: &str) -> DriveResult<Entry> { self.hit(); self.inner.move_entry(from, to).await }
    async fn delete(&self, path: &str) -> DriveResult<()> { self.hit(); self.inner.delete(path).await }
    async fn upload(&self, path: &str, size: i64, overwrite: bool) -> DriveResult<UploadPlan> {
        self.hit();
        self.inner.upload(path, size, overwrite).await
    }
    async fn save(&self, path: &str, content: Content, progress: &dyn ProgressSink) -> DriveResult<Entry> {
        self.hit();
        self.inner.save(path, content, progress).await
    }
    async fn read(&self, path: &str) -> DriveResult<Content> { self.hit(); self.inner.read(path).await }
}

fn alice() -> Principal {
    Principal::user("alice", vec!["staff".to_string()])
}

fn seeded_memory() -> MemoryDrive {
    let mem = MemoryDrive::new();
    mem.put_file("/a/b/notes.txt", b"notes");
    mem.put_file("/a/hidden/secret.txt", b"secret");
    mem.put_file("/a/readme.md", b"readme");
    mem.put_file("/ro/source.txt", b"source-bytes");
    mem.put_file("/none/private.txt", b"private");
    mem
}

fn records() -> Vec<PathPermission> {
    vec![
        PathPermission::new("u:alice", "/a", PermissionLevel::ReadWrite),
        PathPermission::new("u:alice", "/a/hidden", PermissionLevel::None),
        PathPermission::new("g:staff", "/ro", PermissionLevel::Read),
        PathPermission::new("g:staff", "/w", PermissionLevel::ReadWrite),
    ]
}

fn wrapped(backend: Arc<dyn Drive>, records: Vec<PathPermission>) -> PermissionWrapperDrive {
    let store = Arc::new(MemoryPermissionStore::with_records(records).unwrap());
    PermissionWrapperDrive::new(alice(), backend, PermissionResolver::new(store))
}

#[tokio::test]
async fn listing_hides_none_children_and_marks_writability() {
    let drive = wrapped(Arc::new(seeded_memory()), records());
    let entries = drive.list("/a").await.unwrap();
    let paths: Vec<&str> = entries.iter().map(|e| e.path.as_str()).collect();
    assert_eq!(paths, vec!["/a/b", "/a/readme.md"]);
    assert!(entries.iter().all(|e| e.can_write() == Some(true)));

    // Hidden child is invisible through every read path
    assert!(matches!(drive.get("/a/hidden").await, Err(DriveError::NotFound(_))));
    assert!(matches!(drive.list("/a/hidden").await, Err(DriveError::NotFound(_))));
}

#[tokio::test]
async fn read_only_listing_reports_can_write_false() {
    let drive = wrapped(Arc::new(seeded_memory()), records());
    let entries = drive.list("/ro").await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].can_write(), Some(false));
}

#[tokio::test]
async fn root_listing_shows_only_reachable_children() {
    let mem = seeded_memory();
    mem.put_file("/w/.keep", b"");
    let drive = wrapped(Arc::new(mem), records());
    // No grant at the root itself
    assert!(matches!(drive.list("/").await, Err(DriveError::NotFound(_))));

    let mut recs = records();
    recs.push(PathPermission::direct("ANY", "/", PermissionLevel::Read));
    let mem = seeded_memory();
    let drive = wrapped(Arc::new(mem), recs);
    let names: Vec<String> = drive.list("/").await.unwrap().iter().map(|e| e.name().to_string()).collect();
    assert_eq!(names, vec!["a", "ro"]);
}

#[tokio::test]
async fn copy_from_read_only_source_into_writable_dest() {
    let mem = seeded_memory();
    mem.put_file("/w/.keep", b"");
    let backend = Arc::new(mem);
    let drive = wrapped(backend.clone(), records());

    let src = drive.get("/ro/source.txt").await.unwrap();
    let copied = drive.copy(&src, "/w/copy.txt", false, &no_progress).await.unwrap();
    assert_eq!(copied.size, 12);
    assert_eq!(copied.can_write(), Some(true));
    assert_eq!(backend.file_bytes("/w/copy.txt").unwrap(), b"source-bytes");
}

#[tokio::test]
async fn copy_from_unreadable_source_is_forbidden_and_dest_untouched() {
    let mem = seeded_memory();
    mem.put_file("/w/.keep", b"");
    let backend = Arc::new(CountingDrive::new(mem));
    let drive = wrapped(backend.clone(), records());

    let src = Entry::file("/none/private.txt", 7, 0, 0);
    let err = drive.copy(&src, "/w/leak.txt", false, &no_progress).await.unwrap_err();
    assert!(matches!(err, DriveError::Forbidden(_)));
    assert_eq!(backend.calls(), 0);
    assert!(!backend.inner.exists("/w/leak.txt"));
}

#[tokio::test]
async fn copy_into_read_only_dest_is_forbidden() {
    let drive = wrapped(Arc::new(seeded_memory()), records());
    let src = drive.get("/a/readme.md").await.unwrap();
    assert!(matches!(
        drive.copy(&src, "/ro/readme.md", false, &no_progress).await,
        Err(DriveError::Forbidden(_))
    ));
}

#[tokio::test]
async fn move_needs_write_on_both_ends() {
    let mem = seeded_memory();
    mem.put_file("/w/.keep", b"");
    let backend = Arc::new(mem);
    let drive = wrapped(backend.clone(), records());

    assert!(matches!(drive.move_entry("/ro/source.txt", "/w/s.txt").await, Err(DriveError::Forbidden(_))));
    let moved = drive.move_entry("/a/readme.md", "/w/readme.md").await.unwrap();
    assert_eq!(moved.path, "/w/readme.md");
    assert!(!backend.exists("/a/readme.md"));
}

#[tokio::test]
async fn negative_upload_size_never_reaches_backend() {
    let backend = Arc::new(CountingDrive::new(seeded_memory()));
    let drive = wrapped(backend.clone(), records());
    assert!(matches!(drive.upload("/a/new.bin", -1, false).await, Err(DriveError::BadRequest(_))));
    assert_eq!(backend.calls(), 0);

    let plan = drive.upload("/a/new.bin", 4, false).await.unwrap();
    assert!(plan.is_direct());
    assert_eq!(plan.config["url"], "/content/a/new.bin");
    assert_eq!(backend.calls(), 1);
}

#[tokio::test]
async fn upload_then_save_round_trip() {
    let backend = Arc::new(seeded_memory());
    let drive = wrapped(backend.clone(), records());
    drive.upload("/a/data.bin", 3, false).await.unwrap();
    let saved = drive.save("/a/data.bin", content_from_bytes(vec![1, 2, 3]), &no_progress).await.unwrap();
    assert_eq!(saved.size, 3);
    assert_eq!(saved.can_write(), Some(true));
    assert!(matches!(drive.upload("/a/data.bin", 3, false).await, Err(DriveError::Conflict(_))));
}

#[tokio::test]
async fn mounted_composite_respects_permissions_across_mounts() {
    let home = Arc::new(seeded_memory());
    let team = Arc::new(MemoryDrive::new());
    team.put_file("/plan.txt", b"plan");
    let root = DispatcherDrive::new(vec![Mount::new("/", home.clone()), Mount::new("/w/team", team.clone())]).unwrap();
    let drive = wrapped(Arc::new(root), records());

    let listed = drive.list("/w").await.unwrap();
    assert_eq!(listed.iter().map(|e| e.path.as_str()).collect::<Vec<_>>(), vec!["/w/team"]);

    let moved = drive.move_entry("/a/b/notes.txt", "/w/team/notes.txt").await.unwrap();
    assert_eq!(moved.path, "/w/team/notes.txt");
    assert_eq!(team.file_bytes("/notes.txt").unwrap(), b"notes");
    assert!(!home.exists("/a/b/notes.txt"));
}

#[tokio::test]
async fn cached_store_sees_admin_writes() {
    let mem = Arc::new(MemoryPermissionStore::with_records(vec![
        PathPermission::new("u:alice", "/", PermissionLevel::Manage),
    ]).unwrap());
    let store: Arc<dyn PermissionStore> = Arc::new(CachedPermissionStore::new(mem, Duration::from_secs(60)));
    let backend = Arc::new(seeded_memory());
    let drive = PermissionWrapperDrive::new(alice(), backend, PermissionResolver::new(store));

    assert!(drive.get("/a/readme.md").await.is_ok());
    drive
        .save_permissions("/a", vec![PathPermission::new("u:alice", "/a", PermissionLevel::None)])
        .await
        .unwrap();
    assert!(matches!(drive.get("/a/readme.md").await, Err(DriveError::NotFound(_))));
    // Manage at the root survives the restriction below it
    assert_eq!(drive.list_permissions("/").await.unwrap().len(), 1);
    assert!(matches!(drive.list_permissions("/a").await, Err(DriveError::Forbidden(_))));
}

#[tokio::test]
async fn concurrent_requests_resolve_consistently() {
    let backend: Arc<dyn Drive> = Arc::new(seeded_memory());
    let store = Arc::new(MemoryPermissionStore::with_records(records()).unwrap());
    let resolver = PermissionResolver::new(store);
    let futs = (0..16).map(|_| {
        let drive = PermissionWrapperDrive::new(alice(), backend.clone(), resolver.clone());
        async move { drive.list("/a").await.map(|v| v.len()) }
    });
    let results = futures::future::join_all(futs).await;
    assert!(results.into_iter().all(|r| r == Ok(2)));
}
