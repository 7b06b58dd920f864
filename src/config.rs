//! Service configuration.
//!
//! Settings are layered: built-in defaults, then an optional JSON file named
//! by `DRIVE_CONFIG`, then individual environment overrides. The resolved
//! config knows how to build the root drive, the permission store and the
//! session table it describes.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};

use crate::drive::path::clean_path;
use crate::drive::{DispatcherDrive, Drive, LocalDrive, MemoryDrive, Mount};
use crate::identity::{Principal, SessionManager};
use crate::permission::{CachedPermissionStore, MemoryPermissionStore, PathPermission, PermissionStore};

pub const ENV_CONFIG_FILE: &str = "DRIVE_CONFIG";
pub const ENV_HTTP_PORT: &str = "DRIVE_HTTP_PORT";
pub const ENV_ALLOW_ANONYMOUS: &str = "DRIVE_ALLOW_ANONYMOUS";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MountKind {
    Memory,
    Local,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MountConfig {
    pub path: String,
    pub kind: MountKind,
    /// Host directory; required for `local` mounts.
    #[serde(default)]
    pub root: Option<String>,
}

/// A configured caller and the fixed bearer token that identifies it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserConfig {
    pub id: String,
    #[serde(default)]
    pub groups: Vec<String>,
    pub token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DriveConfig {
    pub http_port: u16,
    /// Serve requests without credentials as the anonymous principal.
    pub allow_anonymous: bool,
    pub mounts: Vec<MountConfig>,
    pub users: Vec<UserConfig>,
    pub permissions: Vec<PathPermission>,
    /// 0 disables the permission cache.
    pub permission_cache_ttl_ms: u64,
    /// Largest accepted upload in bytes; 0 means unlimited.
    pub max_upload_bytes: u64,
}

impl Default for DriveConfig {
    fn default() -> Self {
        Self {
            http_port: 8089,
            allow_anonymous: false,
            mounts: vec![MountConfig { path: "/".to_string(), kind: MountKind::Memory, root: None }],
            users: Vec::new(),
            permissions: Vec::new(),
            permission_cache_ttl_ms: 5_000,
            max_upload_bytes: 0,
        }
    }
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

impl DriveConfig {
    pub fn from_json(text: &str) -> anyhow::Result<Self> {
        serde_json::from_str(text).context("invalid drive config JSON")
    }

    /// Resolve defaults, file and process environment, then validate.
    pub fn load() -> anyhow::Result<Self> {
        Self::from_layers(|key| std::env::var(key).ok())
    }

    /// Same as `load` with an injectable environment lookup.
    pub fn from_layers<F>(env: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = match env(ENV_CONFIG_FILE) {
            Some(file) => {
                let text = std::fs::read_to_string(&file)
                    .with_context(|| format!("While reading drive config file: {}", file))?;
                Self::from_json(&text).with_context(|| format!("While parsing drive config file: {}", file))?
            }
            None => Self::default(),
        };
        cfg.apply_env(&env)?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn apply_env<F>(&mut self, env: &F) -> anyhow::Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(port) = env(ENV_HTTP_PORT) {
            self.http_port = port.trim().parse().with_context(|| format!("{} must be a port number", ENV_HTTP_PORT))?;
        }
        if let Some(flag) = env(ENV_ALLOW_ANONYMOUS) {
            match parse_bool(&flag) {
                Some(b) => self.allow_anonymous = b,
                None => bail!("{} must be a boolean, got '{}'", ENV_ALLOW_ANONYMOUS, flag),
            }
        }
        Ok(())
    }

    /// Clean every configured path and reject inconsistent mounts.
    pub fn validate(&mut self) -> anyhow::Result<()> {
        let mut seen = HashSet::new();
        for m in self.mounts.iter_mut() {
            m.path = clean_path(&m.path);
            if !seen.insert(m.path.clone()) {
                bail!("duplicate mount path: {}", m.path);
            }
            if m.kind == MountKind::Local && m.root.as_deref().map(str::trim).unwrap_or("").is_empty() {
                bail!("local mount {} requires a root directory", m.path);
            }
        }
        for p in self.permissions.iter_mut() {
            p.path = clean_path(&p.path);
        }
        Ok(())
    }

    pub fn permission_cache_ttl(&self) -> Option<Duration> {
        (self.permission_cache_ttl_ms > 0).then(|| Duration::from_millis(self.permission_cache_ttl_ms))
    }

    pub fn upload_limit(&self) -> Option<u64> {
        (self.max_upload_bytes > 0).then_some(self.max_upload_bytes)
    }

    /// Root drive routing every configured mount.
    pub fn build_root_drive(&self) -> anyhow::Result<DispatcherDrive> {
        let mut mounts = Vec::with_capacity(self.mounts.len());
        for m in &self.mounts {
            let drive: Arc<dyn Drive> = match m.kind {
                MountKind::Memory => Arc::new(MemoryDrive::new()),
                MountKind::Local => {
                    let root = m.root.as_deref().unwrap_or_default();
                    Arc::new(LocalDrive::new(root).with_context(|| format!("While opening local mount {} at {}", m.path, root))?)
                }
            };
            mounts.push(Mount::new(&m.path, drive));
        }
        Ok(DispatcherDrive::new(mounts)?)
    }

    /// Seeded permission store, behind the TTL cache unless disabled.
    pub fn build_permission_store(&self) -> anyhow::Result<Arc<dyn PermissionStore>> {
        let store: Arc<dyn PermissionStore> = Arc::new(MemoryPermissionStore::with_records(self.permissions.clone())?);
        let store: Arc<dyn PermissionStore> = match self.permission_cache_ttl() {
            Some(ttl) => Arc::new(CachedPermissionStore::new(store, ttl)),
            None => store,
        };
        Ok(store)
    }

    pub fn build_sessions(&self) -> SessionManager {
        let sessions = SessionManager::new();
        for u in &self.users {
            sessions.register(&u.token, Principal::user(u.id.clone(), u.groups.clone()));
        }
        sessions
    }
}
