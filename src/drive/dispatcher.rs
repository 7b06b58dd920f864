//! Composite drive that routes each path to the backend mounted at its
//! longest matching prefix. Ancestors of mount points that no backend owns
//! are presented as read-only virtual directories.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{DriveError, DriveResult};

use super::path::{ancestors_and_self, clean_path, is_ancestor_or_self, path_depth, path_join, path_name, rebase, ROOT};
use super::{Content, Drive, Entry, EntryKind, ProgressSink, UploadPlan};

#[derive(Clone)]
pub struct Mount {
    pub prefix: String,
    pub drive: Arc<dyn Drive>,
}

impl Mount {
    pub fn new(prefix: &str, drive: Arc<dyn Drive>) -> Self {
        Self { prefix: clean_path(prefix), drive }
    }
}

/// Reports `base + loaded` to the wrapped sink so multi-file transfers stay cumulative.
struct OffsetProgress<'a> {
    base: u64,
    inner: &'a dyn ProgressSink,
}

impl ProgressSink for OffsetProgress<'_> {
    fn report(&self, loaded: u64) {
        self.inner.report(self.base + loaded);
    }
}

pub struct DispatcherDrive {
    /// Sorted by prefix depth, deepest first.
    mounts: Vec<Mount>,
}

impl DispatcherDrive {
    pub fn new(mut mounts: Vec<Mount>) -> DriveResult<Self> {
        let mut seen = HashSet::new();
        for m in mounts.iter() {
            if !seen.insert(m.prefix.clone()) {
                return Err(DriveError::bad_request(format!("duplicate mount: {}", m.prefix)));
            }
        }
        mounts.sort_by(|a, b| path_depth(&b.prefix).cmp(&path_depth(&a.prefix)));
        Ok(Self { mounts })
    }

    pub fn mount_prefixes(&self) -> Vec<&str> {
        self.mounts.iter().map(|m| m.prefix.as_str()).collect()
    }

    fn resolve(&self, path: &str) -> Option<(&Mount, String)> {
        self.mounts
            .iter()
            .find(|m| is_ancestor_or_self(&m.prefix, path))
            .map(|m| (m, rebase(path, &m.prefix, ROOT)))
    }

    fn route(&self, path: &str) -> DriveResult<(&Mount, String)> {
        self.resolve(path).ok_or_else(|| DriveError::not_found(path))
    }

    fn is_mount_point(&self, path: &str) -> bool {
        self.mounts.iter().any(|m| m.prefix == path)
    }

    /// True when `path` is a strict ancestor of some mount point.
    fn is_virtual(&self, path: &str) -> bool {
        self.mounts.iter().any(|m| m.prefix != path && is_ancestor_or_self(path, &m.prefix))
    }

    fn virtual_entry(path: &str) -> Entry {
        Entry::dir(path, 0, 0)
    }

    /// Mount-derived child directories directly under `path`.
    fn virtual_children(&self, path: &str) -> Vec<String> {
        let depth = path_depth(path);
        let mut out: Vec<String> = self
            .mounts
            .iter()
            .filter(|m| m.prefix != path && is_ancestor_or_self(path, &m.prefix))
            .filter_map(|m| ancestors_and_self(&m.prefix).into_iter().nth(depth + 1))
            .collect();
        out.sort();
        out.dedup();
        out
    }

    fn outer(mount: &Mount, mut e: Entry) -> Entry {
        e.path = rebase(&e.path, ROOT, &mount.prefix);
        e
    }

    async fn exists(&self, path: &str) -> DriveResult<bool> {
        match self.get(path).await {
            Ok(_) => Ok(true),
            Err(DriveError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Copy between two different mounts by streaming content through this layer.
    async fn copy_across(&self, from: &Entry, to: &str, progress: &dyn ProgressSink) -> DriveResult<Entry> {
        let mut loaded = 0u64;
        let mut work: Vec<(Entry, String)> = vec![(from.clone(), to.to_string())];
        while let Some((src, dest)) = work.pop() {
            if src.kind == EntryKind::Dir {
                self.make_dir(&dest).await?;
                for child in self.list(&src.path).await? {
                    let child_dest = path_join(&dest, child.name());
                    work.push((child, child_dest));
                }
            } else {
                let content = self.read(&src.path).await?;
                let sink = OffsetProgress { base: loaded, inner: progress };
                let saved = self.save(&dest, content, &sink).await?;
                loaded += saved.size;
            }
        }
        self.get(to).await
    }
}

#[async_trait]
impl Drive for DispatcherDrive {
    async fn list(&self, path: &str) -> DriveResult<Vec<Entry>> {
        let mut out = match self.resolve(path) {
            Some((m, inner)) => match m.drive.list(&inner).await {
                Ok(list) => list.into_iter().map(|e| Self::outer(m, e)).collect(),
                Err(DriveError::NotFound(_)) if self.is_virtual(path) => Vec::new(),
                Err(e) => return Err(e),
            },
            None if self.is_virtual(path) => Vec::new(),
            None => return Err(DriveError::not_found(path)),
        };
        // Mount points shadow same-named backend entries
        let virtuals = self.virtual_children(path);
        out.retain(|e| !virtuals.contains(&e.path));
        out.extend(virtuals.iter().map(|p| Self::virtual_entry(p)));
        out.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(out)
    }

    async fn get(&self, path: &str) -> DriveResult<Entry> {
        match self.resolve(path) {
            Some((m, inner)) => match m.drive.get(&inner).await {
                Ok(e) if m.prefix == path => Ok(Entry { path: path.to_string(), ..e }),
                Ok(e) => Ok(Self::outer(m, e)),
                Err(DriveError::NotFound(_)) if self.is_virtual(path) => Ok(Self::virtual_entry(path)),
                Err(e) => Err(e),
            },
            None if self.is_virtual(path) => Ok(Self::virtual_entry(path)),
            None => Err(DriveError::not_found(path)),
        }
    }

    async fn make_dir(&self, path: &str) -> DriveResult<Entry> {
        if self.is_mount_point(path) || self.is_virtual(path) {
            return Err(DriveError::already_exists(path));
        }
        let (m, inner) = self.route(path)?;
        Ok(Self::outer(m, m.drive.make_dir(&inner).await?))
    }

    async fn copy(&self, from: &Entry, to: &str, overwrite: bool, progress: &dyn ProgressSink) -> DriveResult<Entry> {
        if self.is_mount_point(to) || self.is_virtual(to) {
            return Err(DriveError::not_allowed(format!("{} is a mount point", to)));
        }
        let (src_m, src_inner) = self.route(&from.path)?;
        let (dst_m, dst_inner) = self.route(to)?;
        if src_m.prefix == dst_m.prefix && !self.is_virtual(&from.path) {
            let inner_entry = Entry { path: src_inner, ..from.clone() };
            let e = dst_m.drive.copy(&inner_entry, &dst_inner, overwrite, progress).await?;
            return Ok(Self::outer(dst_m, e));
        }
        if is_ancestor_or_self(&from.path, to) {
            return Err(DriveError::bad_request(format!("cannot copy {} into itself", from.path)));
        }
        if self.exists(to).await? {
            if !overwrite {
                return Err(DriveError::conflict(to));
            }
            self.delete(to).await?;
        }
        self.copy_across(from, to, progress).await
    }

    async fn move_entry(&self, from: &str, to: &str) -> DriveResult<Entry> {
        if self.is_mount_point(from) || self.is_virtual(from) {
            return Err(DriveError::not_allowed(format!("{} is a mount point", from)));
        }
        if self.is_mount_point(to) || self.is_virtual(to) {
            return Err(DriveError::conflict(to));
        }
        let (src_m, src_inner) = self.route(from)?;
        let (dst_m, dst_inner) = self.route(to)?;
        if src_m.prefix == dst_m.prefix {
            return Ok(Self::outer(dst_m, src_m.drive.move_entry(&src_inner, &dst_inner).await?));
        }
        let source = self.get(from).await?;
        if self.exists(to).await? {
            return Err(DriveError::conflict(to));
        }
        let moved = self.copy_across(&source, to, &super::no_progress).await?;
        self.delete(from).await?;
        Ok(moved)
    }

    async fn delete(&self, path: &str) -> DriveResult<()> {
        if self.is_mount_point(path) || self.is_virtual(path) {
            return Err(DriveError::not_allowed(format!("{} is a mount point", path)));
        }
        let (m, inner) = self.route(path)?;
        m.drive.delete(&inner).await
    }

    async fn upload(&self, path: &str, size: i64, overwrite: bool) -> DriveResult<UploadPlan> {
        if self.is_virtual(path) || self.is_mount_point(path) {
            return Err(DriveError::not_a_file(path));
        }
        let (m, inner) = self.route(path)?;
        let mut plan = m.drive.upload(&inner, size, overwrite).await?;
        // Direct plans name a route on this service, which speaks outer paths
        if plan.is_direct() {
            plan = UploadPlan::direct(path, overwrite);
        }
        Ok(plan)
    }

    async fn save(&self, path: &str, content: Content, progress: &dyn ProgressSink) -> DriveResult<Entry> {
        if self.is_virtual(path) || self.is_mount_point(path) {
            return Err(DriveError::not_a_file(path));
        }
        let (m, inner) = self.route(path)?;
        Ok(Self::outer(m, m.drive.save(&inner, content, progress).await?))
    }

    async fn read(&self, path: &str) -> DriveResult<Content> {
        if self.is_virtual(path) && self.resolve(path).is_none() {
            return Err(DriveError::not_allowed(format!("{} is a directory", path_name(path))));
        }
        let (m, inner) = self.route(path)?;
        m.drive.read(&inner).await
    }
}
