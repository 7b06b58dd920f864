//! TTL cache in front of a permission store.
//! Lookups are cached per (query, subjects, paths); any write through
//! `save_path` drops every cached answer so reads after a write are fresh.
//! A lookup that started before a write never repopulates the cache with
//! what it read: fills carry the write generation observed before the
//! inner query and are discarded when it has moved on.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::trace;

use crate::error::DriveResult;

use super::{PathPermission, PermissionStore};

// Basic guardrails for cache size
const CACHE_MAX: usize = 10_000;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum CacheKey {
    ByPaths { subjects: Vec<String>, paths: Vec<String> },
    Children { subjects: Vec<String>, path: String, depth: i32 },
}

#[derive(Debug, Clone)]
struct CacheEntry {
    records: Vec<PathPermission>,
    expires_at: Instant,
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

pub struct CachedPermissionStore {
    inner: Arc<dyn PermissionStore>,
    ttl: Duration,
    entries: RwLock<HashMap<CacheKey, CacheEntry>>,
    generation: AtomicU64,
    counters: Counters,
}

impl CachedPermissionStore {
    pub fn new(inner: Arc<dyn PermissionStore>, ttl: Duration) -> Self {
        Self {
            inner,
            ttl,
            entries: RwLock::new(HashMap::new()),
            generation: AtomicU64::new(0),
            counters: Counters::default(),
        }
    }

    /// (hits, misses, evictions)
    pub fn stats(&self) -> (u64, u64, u64) {
        (
            self.counters.hits.load(Ordering::Relaxed),
            self.counters.misses.load(Ordering::Relaxed),
            self.counters.evictions.load(Ordering::Relaxed),
        )
    }

    pub fn invalidate(&self) {
        let mut w = self.entries.write();
        self.generation.fetch_add(1, Ordering::SeqCst);
        w.clear();
    }

    fn current_generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    fn lookup(&self, key: &CacheKey) -> Option<Vec<PathPermission>> {
        if let Some(hit) = self.entries.read().get(key) {
            if hit.expires_at > Instant::now() {
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                return Some(hit.records.clone());
            }
        }
        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    fn store(&self, key: CacheKey, records: &[PathPermission], generation: u64) {
        let now = Instant::now();
        let mut w = self.entries.write();
        if self.current_generation() != generation {
            trace!(target: "drivegate::permission", "permission cache fill skipped after concurrent write");
            return;
        }
        // Sweep expired
        w.retain(|_, v| v.expires_at > now);
        // If over capacity, evict arbitrary entries (HashMap iteration order is fine here)
        if w.len() >= CACHE_MAX {
            // Evict up to 5% of capacity to reduce churn
            let evict_n = CACHE_MAX / 20 + 1;
            let keys: Vec<CacheKey> = w.keys().take(evict_n).cloned().collect();
            let removed = keys.iter().filter(|k| w.remove(*k).is_some()).count();
            self.counters.evictions.fetch_add(removed as u64, Ordering::Relaxed);
        }
        w.insert(key, CacheEntry { records: records.to_vec(), expires_at: now + self.ttl });
        let (hits, misses, evictions) = self.stats();
        trace!(target: "drivegate::permission", hits, misses, evictions, size = w.len(), "permission cache fill");
    }
}

#[async_trait]
impl PermissionStore for CachedPermissionStore {
    async fn get_by_paths(&self, subjects: &[String], paths: &[String]) -> DriveResult<Vec<PathPermission>> {
        let key = CacheKey::ByPaths { subjects: subjects.to_vec(), paths: paths.to_vec() };
        if let Some(hit) = self.lookup(&key) {
            return Ok(hit);
        }
        let generation = self.current_generation();
        let records = self.inner.get_by_paths(subjects, paths).await?;
        self.store(key, &records, generation);
        Ok(records)
    }

    async fn get_children_by_path(&self, subjects: &[String], path: &str, depth: i32) -> DriveResult<Vec<PathPermission>> {
        let key = CacheKey::Children { subjects: subjects.to_vec(), path: path.to_string(), depth };
        if let Some(hit) = self.lookup(&key) {
            return Ok(hit);
        }
        let generation = self.current_generation();
        let records = self.inner.get_children_by_path(subjects, path, depth).await?;
        self.store(key, &records, generation);
        Ok(records)
    }

    async fn list_by_path(&self, path: &str) -> DriveResult<Vec<PathPermission>> {
        self.inner.list_by_path(path).await
    }

    async fn save_path(&self, path: &str, records: Vec<PathPermission>) -> DriveResult<()> {
        let res = self.inner.save_path(path, records).await;
        self.invalidate();
        res
    }
}
