//! Local filesystem drive: maps drive paths beneath a host root directory.

use std::fs::Metadata;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use path_absolutize::Absolutize;
use tokio::fs;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::error::{DriveError, DriveResult};

use super::path::{is_ancestor_or_self, is_root, path_join, path_parent};
use super::{pump, Content, Drive, Entry, ProgressSink, UploadPlan};

fn millis(t: std::io::Result<SystemTime>) -> i64 {
    t.map(|st| DateTime::<Utc>::from(st).timestamp_millis()).unwrap_or(0)
}

fn to_entry(path: &str, md: &Metadata) -> Entry {
    let updated = millis(md.modified());
    // Not every filesystem records a birth time
    let created = md.created().ok().map(|c| millis(Ok(c))).unwrap_or(updated);
    if md.is_dir() {
        Entry::dir(path, created, updated)
    } else {
        Entry::file(path, md.len(), created, updated)
    }
}

pub struct LocalDrive {
    root: PathBuf,
}

impl LocalDrive {
    /// Root is absolutized without touching the filesystem and created if missing.
    pub fn new<P: AsRef<Path>>(root: P) -> DriveResult<Self> {
        let root = root.as_ref().absolutize()?.to_path_buf();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    fn host_path(&self, path: &str) -> DriveResult<PathBuf> {
        let joined = self.root.join(path.trim_start_matches('/'));
        let abs = joined.absolutize()?.to_path_buf();
        if !abs.starts_with(&self.root) {
            return Err(DriveError::bad_request(format!("path escapes drive root: {}", path)));
        }
        Ok(abs)
    }

    async fn metadata(&self, path: &str) -> DriveResult<Option<Metadata>> {
        match fs::metadata(self.host_path(path)?).await {
            Ok(md) => Ok(Some(md)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn require_parent_dir(&self, path: &str) -> DriveResult<()> {
        let parent = path_parent(path).ok_or_else(|| DriveError::not_allowed("root has no parent"))?;
        match self.metadata(&parent).await? {
            Some(md) if md.is_dir() => Ok(()),
            Some(_) => Err(DriveError::not_a_directory(parent)),
            None => Err(DriveError::not_found(parent)),
        }
    }

    async fn remove(&self, path: &str, md: &Metadata) -> DriveResult<()> {
        let hp = self.host_path(path)?;
        if md.is_dir() { fs::remove_dir_all(hp).await? } else { fs::remove_file(hp).await? }
        Ok(())
    }

    async fn copy_file(&self, src: &Path, dest: &Path, base: u64, progress: &dyn ProgressSink) -> DriveResult<u64> {
        let mut reader = fs::File::open(src).await?;
        let mut writer = fs::File::create(dest).await?;
        Ok(pump(&mut reader, &mut writer, base, progress).await?)
    }
}

#[async_trait]
impl Drive for LocalDrive {
    async fn list(&self, path: &str) -> DriveResult<Vec<Entry>> {
        let md = self.metadata(path).await?.ok_or_else(|| DriveError::not_found(path))?;
        if !md.is_dir() {
            return Err(DriveError::not_a_directory(path));
        }
        let mut rd = fs::read_dir(self.host_path(path)?).await?;
        let mut out = Vec::new();
        while let Some(de) = rd.next_entry().await? {
            let name = match de.file_name().into_string() {
                Ok(name) => name,
                Err(raw) => {
                    warn!(target: "drivegate::local", "skipping non-UTF-8 name {:?} under {}", raw, path);
                    continue;
                }
            };
            let md = de.metadata().await?;
            out.push(to_entry(&path_join(path, &name), &md));
        }
        out.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(out)
    }

    async fn get(&self, path: &str) -> DriveResult<Entry> {
        let md = self.metadata(path).await?.ok_or_else(|| DriveError::not_found(path))?;
        Ok(to_entry(path, &md))
    }

    async fn make_dir(&self, path: &str) -> DriveResult<Entry> {
        if self.metadata(path).await?.is_some() {
            return Err(DriveError::already_exists(path));
        }
        self.require_parent_dir(path).await?;
        fs::create_dir(self.host_path(path)?).await?;
        self.get(path).await
    }

    async fn copy(&self, from: &Entry, to: &str, overwrite: bool, progress: &dyn ProgressSink) -> DriveResult<Entry> {
        if is_ancestor_or_self(&from.path, to) {
            return Err(DriveError::bad_request(format!("cannot copy {} into itself", from.path)));
        }
        if is_ancestor_or_self(to, &from.path) {
            return Err(DriveError::bad_request(format!("cannot copy {} over its ancestor {}", from.path, to)));
        }
        let src_md = self.metadata(&from.path).await?.ok_or_else(|| DriveError::not_found(from.path.clone()))?;
        if let Some(md) = self.metadata(to).await? {
            if !overwrite {
                return Err(DriveError::conflict(to));
            }
            self.remove(to, &md).await?;
        }
        self.require_parent_dir(to).await?;

        let src = self.host_path(&from.path)?;
        let dest = self.host_path(to)?;
        if !src_md.is_dir() {
            self.copy_file(&src, &dest, 0, progress).await?;
            return self.get(to).await;
        }

        let mut loaded = 0u64;
        for item in WalkDir::new(&src).sort_by_file_name() {
            let item = item.map_err(|e| DriveError::internal(e.to_string()))?;
            let rel = item.path().strip_prefix(&src).map_err(|e| DriveError::internal(e.to_string()))?;
            let target = dest.join(rel);
            if item.file_type().is_dir() {
                fs::create_dir_all(&target).await?;
            } else {
                loaded += self.copy_file(item.path(), &target, loaded, progress).await?;
            }
        }
        debug!(target: "drivegate::local", "copied {} -> {} ({} bytes)", from.path, to, loaded);
        self.get(to).await
    }

    async fn move_entry(&self, from: &str, to: &str) -> DriveResult<Entry> {
        if is_root(from) {
            return Err(DriveError::not_allowed("cannot move the root"));
        }
        if is_ancestor_or_self(from, to) {
            return Err(DriveError::bad_request(format!("cannot move {} into itself", from)));
        }
        if self.metadata(from).await?.is_none() {
            return Err(DriveError::not_found(from));
        }
        if self.metadata(to).await?.is_some() {
            return Err(DriveError::conflict(to));
        }
        self.require_parent_dir(to).await?;
        fs::rename(self.host_path(from)?, self.host_path(to)?).await?;
        self.get(to).await
    }

    async fn delete(&self, path: &str) -> DriveResult<()> {
        if is_root(path) {
            return Err(DriveError::not_allowed("cannot delete the root"));
        }
        let md = self.metadata(path).await?.ok_or_else(|| DriveError::not_found(path))?;
        self.remove(path, &md).await
    }

    async fn upload(&self, path: &str, size: i64, overwrite: bool) -> DriveResult<UploadPlan> {
        if size < 0 {
            return Err(DriveError::bad_request("invalid file size"));
        }
        match self.metadata(path).await? {
            Some(md) if md.is_dir() => return Err(DriveError::not_a_file(path)),
            Some(_) if !overwrite => return Err(DriveError::conflict(path)),
            _ => {}
        }
        self.require_parent_dir(path).await?;
        Ok(UploadPlan::direct(path, overwrite))
    }

    async fn save(&self, path: &str, mut content: Content, progress: &dyn ProgressSink) -> DriveResult<Entry> {
        if matches!(self.metadata(path).await?, Some(md) if md.is_dir()) {
            return Err(DriveError::not_a_file(path));
        }
        self.require_parent_dir(path).await?;
        let host = self.host_path(path)?;
        let mut file = fs::File::create(&host).await?;
        if let Err(e) = pump(&mut content, &mut file, 0, progress).await {
            drop(file);
            // Leave no truncated file behind when the incoming stream fails
            if let Err(rm) = fs::remove_file(&host).await {
                warn!(target: "drivegate::local", "could not remove partial {}: {}", host.display(), rm);
            }
            return Err(e.into());
        }
        self.get(path).await
    }

    async fn read(&self, path: &str) -> DriveResult<Content> {
        let md = self.metadata(path).await?.ok_or_else(|| DriveError::not_found(path))?;
        if md.is_dir() {
            return Err(DriveError::not_allowed(format!("{} is a directory", path)));
        }
        let file = fs::File::open(self.host_path(path)?).await?;
        Ok(Box::pin(file))
    }
}
