//! In-memory drive backend: a path-keyed tree guarded by one lock.
//! Used for ephemeral mounts and as the reference backend in tests.

use std::collections::BTreeMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::io::AsyncReadExt;
use xxhash_rust::xxh3::xxh3_64;

use crate::error::{DriveError, DriveResult};

use super::path::{is_ancestor_or_self, is_root, path_parent, rebase, ROOT};
use super::{content_from_bytes, now_ms, Content, Drive, Entry, EntryKind, ProgressSink, UploadPlan, CHUNK_SIZE};

#[derive(Debug, Clone)]
struct Node {
    kind: EntryKind,
    data: Vec<u8>,
    created_at: i64,
    updated_at: i64,
}

impl Node {
    fn dir(now: i64) -> Self {
        Self { kind: EntryKind::Dir, data: Vec::new(), created_at: now, updated_at: now }
    }
}

/// Hex xxh3 content tag exposed as the `etag` metadata key.
pub fn etag_for_bytes(bytes: &[u8]) -> String {
    format!("{:016x}", xxh3_64(bytes))
}

fn to_entry(path: &str, node: &Node) -> Entry {
    match node.kind {
        EntryKind::Dir => Entry::dir(path, node.created_at, node.updated_at),
        EntryKind::File => Entry::file(path, node.data.len() as u64, node.created_at, node.updated_at)
            .with_meta("etag", etag_for_bytes(&node.data)),
    }
}

/// Keys of `path` and everything beneath it, in path order.
fn subtree_keys(nodes: &BTreeMap<String, Node>, path: &str) -> Vec<String> {
    nodes
        .range(path.to_string()..)
        .take_while(|(k, _)| is_root(path) || k.starts_with(path))
        .filter(|(k, _)| is_ancestor_or_self(path, k))
        .map(|(k, _)| k.clone())
        .collect()
}

fn require_parent_dir(nodes: &BTreeMap<String, Node>, path: &str) -> DriveResult<()> {
    let parent = path_parent(path).ok_or_else(|| DriveError::not_allowed("root has no parent"))?;
    match nodes.get(&parent) {
        Some(n) if n.kind == EntryKind::Dir => Ok(()),
        Some(_) => Err(DriveError::not_a_directory(parent)),
        None => Err(DriveError::not_found(parent)),
    }
}

pub struct MemoryDrive {
    nodes: RwLock<BTreeMap<String, Node>>,
}

impl Default for MemoryDrive {
    fn default() -> Self { Self::new() }
}

impl MemoryDrive {
    pub fn new() -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert(ROOT.to_string(), Node::dir(now_ms()));
        Self { nodes: RwLock::new(nodes) }
    }

    /// Seed a file, creating missing parent directories. Test and bootstrap helper.
    pub fn put_file(&self, path: &str, data: &[u8]) {
        let now = now_ms();
        let mut w = self.nodes.write();
        let mut cur = path_parent(path);
        while let Some(p) = cur {
            w.entry(p.clone()).or_insert_with(|| Node::dir(now));
            cur = path_parent(&p);
        }
        w.insert(path.to_string(), Node { kind: EntryKind::File, data: data.to_vec(), created_at: now, updated_at: now });
    }

    pub fn exists(&self, path: &str) -> bool {
        self.nodes.read().contains_key(path)
    }

    pub fn file_bytes(&self, path: &str) -> Option<Vec<u8>> {
        self.nodes.read().get(path).filter(|n| n.kind == EntryKind::File).map(|n| n.data.clone())
    }
}

#[async_trait]
impl Drive for MemoryDrive {
    async fn list(&self, path: &str) -> DriveResult<Vec<Entry>> {
        let r = self.nodes.read();
        let node = r.get(path).ok_or_else(|| DriveError::not_found(path))?;
        if node.kind != EntryKind::Dir {
            return Err(DriveError::not_a_directory(path));
        }
        let out = subtree_keys(&r, path)
            .into_iter()
            .filter(|k| path_parent(k).as_deref() == Some(path))
            .filter_map(|k| r.get(&k).map(|n| to_entry(&k, n)))
            .collect();
        Ok(out)
    }

    async fn get(&self, path: &str) -> DriveResult<Entry> {
        let r = self.nodes.read();
        r.get(path).map(|n| to_entry(path, n)).ok_or_else(|| DriveError::not_found(path))
    }

    async fn make_dir(&self, path: &str) -> DriveResult<Entry> {
        let mut w = self.nodes.write();
        if w.contains_key(path) {
            return Err(DriveError::already_exists(path));
        }
        require_parent_dir(&w, path)?;
        let node = Node::dir(now_ms());
        let entry = to_entry(path, &node);
        w.insert(path.to_string(), node);
        Ok(entry)
    }

    async fn copy(&self, from: &Entry, to: &str, overwrite: bool, progress: &dyn ProgressSink) -> DriveResult<Entry> {
        if is_ancestor_or_self(&from.path, to) {
            return Err(DriveError::bad_request(format!("cannot copy {} into itself", from.path)));
        }
        if is_ancestor_or_self(to, &from.path) {
            return Err(DriveError::bad_request(format!("cannot copy {} over its ancestor {}", from.path, to)));
        }
        let mut w = self.nodes.write();
        if !w.contains_key(&from.path) {
            return Err(DriveError::not_found(from.path.clone()));
        }
        if w.contains_key(to) {
            if !overwrite {
                return Err(DriveError::conflict(to));
            }
            for k in subtree_keys(&w, to) { w.remove(&k); }
        }
        require_parent_dir(&w, to)?;

        let now = now_ms();
        let mut loaded = 0u64;
        for k in subtree_keys(&w, &from.path) {
            let Some(src) = w.get(&k).cloned() else { continue };
            let dest = rebase(&k, &from.path, to);
            if src.kind == EntryKind::File {
                loaded += src.data.len() as u64;
                progress.report(loaded);
            }
            w.insert(dest, Node { created_at: now, updated_at: now, ..src });
        }
        w.get(to).map(|n| to_entry(to, n)).ok_or_else(|| DriveError::internal("copy produced no entry"))
    }

    async fn move_entry(&self, from: &str, to: &str) -> DriveResult<Entry> {
        if is_root(from) {
            return Err(DriveError::not_allowed("cannot move the root"));
        }
        if is_ancestor_or_self(from, to) {
            return Err(DriveError::bad_request(format!("cannot move {} into itself", from)));
        }
        let mut w = self.nodes.write();
        if !w.contains_key(from) {
            return Err(DriveError::not_found(from));
        }
        if w.contains_key(to) {
            return Err(DriveError::conflict(to));
        }
        require_parent_dir(&w, to)?;
        let now = now_ms();
        for k in subtree_keys(&w, from) {
            if let Some(node) = w.remove(&k) {
                w.insert(rebase(&k, from, to), node);
            }
        }
        let node = w.get_mut(to).ok_or_else(|| DriveError::internal("move produced no entry"))?;
        node.updated_at = now;
        Ok(to_entry(to, node))
    }

    async fn delete(&self, path: &str) -> DriveResult<()> {
        if is_root(path) {
            return Err(DriveError::not_allowed("cannot delete the root"));
        }
        let mut w = self.nodes.write();
        if !w.contains_key(path) {
            return Err(DriveError::not_found(path));
        }
        for k in subtree_keys(&w, path) { w.remove(&k); }
        Ok(())
    }

    async fn upload(&self, path: &str, size: i64, overwrite: bool) -> DriveResult<UploadPlan> {
        if size < 0 {
            return Err(DriveError::bad_request("invalid file size"));
        }
        let r = self.nodes.read();
        match r.get(path) {
            Some(n) if n.kind == EntryKind::Dir => return Err(DriveError::not_a_file(path)),
            Some(_) if !overwrite => return Err(DriveError::conflict(path)),
            _ => {}
        }
        require_parent_dir(&r, path)?;
        Ok(UploadPlan::direct(path, overwrite))
    }

    async fn save(&self, path: &str, mut content: Content, progress: &dyn ProgressSink) -> DriveResult<Entry> {
        {
            let r = self.nodes.read();
            if matches!(r.get(path), Some(n) if n.kind == EntryKind::Dir) {
                return Err(DriveError::not_a_file(path));
            }
            require_parent_dir(&r, path)?;
        }
        let mut data = Vec::new();
        let mut buf = vec![0u8; CHUNK_SIZE];
        loop {
            let n = content.read(&mut buf).await?;
            if n == 0 { break; }
            data.extend_from_slice(&buf[..n]);
            progress.report(data.len() as u64);
        }

        let now = now_ms();
        let mut w = self.nodes.write();
        // The parent may have vanished while the body was streaming
        require_parent_dir(&w, path)?;
        let created_at = w.get(path).map(|n| n.created_at).unwrap_or(now);
        let node = Node { kind: EntryKind::File, data, created_at, updated_at: now };
        let entry = to_entry(path, &node);
        w.insert(path.to_string(), node);
        Ok(entry)
    }

    async fn read(&self, path: &str) -> DriveResult<Content> {
        let r = self.nodes.read();
        let node = r.get(path).ok_or_else(|| DriveError::not_found(path))?;
        if node.kind == EntryKind::Dir {
            return Err(DriveError::not_allowed(format!("{} is a directory", path)));
        }
        Ok(content_from_bytes(node.data.clone()))
    }
}
