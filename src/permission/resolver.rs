//! Effective permission resolution over the hierarchy of path records.

use std::sync::Arc;

use crate::drive::path::{ancestors_and_self, is_ancestor_or_self, path_depth};
use crate::error::DriveResult;
use crate::identity::Principal;

use super::{PathPermission, PermissionLevel, PermissionStore};

/// Level granted at `path` by `records`, or `None` when no record applies.
///
/// A record applies when it sits at `path`, or at an ancestor and inherits.
/// The deepest applicable depth wins; records tied at that depth (one per
/// subject) combine to their maximum level.
pub fn effective_level(records: &[PathPermission], path: &str) -> Option<PermissionLevel> {
    records
        .iter()
        .filter(|r| r.path == path || (r.inherit && is_ancestor_or_self(&r.path, path)))
        .map(|r| (path_depth(&r.path), r.level))
        .max()
        .map(|(_, level)| level)
}

/// Pre-resolved permissions for the descendants of one directory.
#[derive(Debug, Clone)]
pub struct ResolvedPermissions {
    /// Level children inherit from the parent and its ancestors.
    base: PermissionLevel,
    /// Records strictly below the parent.
    records: Vec<PathPermission>,
}

impl ResolvedPermissions {
    /// Level for a path beneath the resolved parent.
    pub fn level_for(&self, path: &str) -> PermissionLevel {
        effective_level(&self.records, path).unwrap_or(self.base)
    }
}

/// Stateless between calls; every answer comes from the store.
#[derive(Clone)]
pub struct PermissionResolver {
    store: Arc<dyn PermissionStore>,
}

impl PermissionResolver {
    pub fn new(store: Arc<dyn PermissionStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn PermissionStore> {
        &self.store
    }

    async fn ancestor_records(&self, subjects: &[String], path: &str) -> DriveResult<Vec<PathPermission>> {
        self.store.get_by_paths(subjects, &ancestors_and_self(path)).await
    }

    /// Effective level of `principal` at `path`; `none` when nothing applies.
    pub async fn resolve(&self, principal: &Principal, path: &str) -> DriveResult<PermissionLevel> {
        let subjects = principal.subjects();
        let records = self.ancestor_records(&subjects, path).await?;
        Ok(effective_level(&records, path).unwrap_or_default())
    }

    /// Resolve the descendants of `parent` in one pass.
    ///
    /// With `immediate`, only records exactly one level below `parent` are
    /// fetched; grants deeper than a child never change that child's level.
    /// Otherwise the whole subtree is fetched so any descendant can be asked.
    pub async fn resolve_children(&self, principal: &Principal, parent: &str, immediate: bool) -> DriveResult<ResolvedPermissions> {
        let subjects = principal.subjects();
        let inherited: Vec<PathPermission> = self
            .ancestor_records(&subjects, parent)
            .await?
            .into_iter()
            .filter(|r| r.inherit)
            .collect();
        let base = effective_level(&inherited, parent).unwrap_or_default();

        let depth = if immediate { path_depth(parent) as i32 + 1 } else { -1 };
        let records = self
            .store
            .get_children_by_path(&subjects, parent, depth)
            .await?
            .into_iter()
            .filter(|r| r.path != parent)
            .collect();
        Ok(ResolvedPermissions { base, records })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::permission::{MemoryPermissionStore, PermissionLevel::*};

    fn resolver(records: Vec<PathPermission>) -> PermissionResolver {
        PermissionResolver::new(Arc::new(MemoryPermissionStore::with_records(records).unwrap()))
    }

    fn alice() -> Principal {
        Principal::user("alice", vec!["staff".into()])
    }

    #[test]
    fn deepest_record_wins_then_max_on_tie() {
        let recs = vec![
            PathPermission::new("u:alice", "/", Manage),
            PathPermission::new("u:alice", "/a", Read),
            PathPermission::new("g:staff", "/a", ReadWrite),
        ];
        assert_eq!(effective_level(&recs, "/a/b"), Some(ReadWrite));
        assert_eq!(effective_level(&recs, "/z"), Some(Manage));
        assert_eq!(effective_level(&[], "/z"), Option::None);
    }

    #[test]
    fn deeper_restriction_beats_shallower_grant() {
        let recs = vec![
            PathPermission::new("g:staff", "/", ReadWrite),
            PathPermission::new("u:alice", "/secret", None),
        ];
        assert_eq!(effective_level(&recs, "/secret/x"), Some(None));
    }

    #[test]
    fn direct_records_do_not_reach_descendants() {
        let recs = vec![
            PathPermission::new("u:alice", "/", Read),
            PathPermission::direct("u:alice", "/a", ReadWrite),
        ];
        assert_eq!(effective_level(&recs, "/a"), Some(ReadWrite));
        assert_eq!(effective_level(&recs, "/a/b"), Some(Read));
    }

    #[tokio::test]
    async fn no_record_resolves_to_none() {
        let r = resolver(vec![PathPermission::new("u:bob", "/", Manage)]);
        assert_eq!(r.resolve(&alice(), "/a").await.unwrap(), None);
    }

    #[tokio::test]
    async fn any_subject_applies_to_anonymous() {
        let r = resolver(vec![PathPermission::new("ANY", "/public", Read)]);
        assert_eq!(r.resolve(&Principal::anonymous(), "/public/x").await.unwrap(), Read);
        assert_eq!(r.resolve(&alice(), "/public").await.unwrap(), Read);
    }

    #[tokio::test]
    async fn resolve_is_idempotent() {
        let r = resolver(vec![PathPermission::new("g:staff", "/a", ReadWrite)]);
        let first = r.resolve(&alice(), "/a/b/c").await.unwrap();
        let second = r.resolve(&alice(), "/a/b/c").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first, ReadWrite);
    }

    #[tokio::test]
    async fn immediate_children_use_parent_level_and_child_records() {
        let r = resolver(vec![
            PathPermission::new("u:alice", "/a", ReadWrite),
            PathPermission::new("u:alice", "/a/hidden", None),
            PathPermission::new("g:staff", "/a/shared", Manage),
            PathPermission::new("u:alice", "/a/b/deeper", None),
        ]);
        let res = r.resolve_children(&alice(), "/a", true).await.unwrap();
        assert_eq!(res.level_for("/a/unrecorded"), ReadWrite);
        assert_eq!(res.level_for("/a/b"), ReadWrite);
        assert_eq!(res.level_for("/a/hidden"), None);
        assert_eq!(res.level_for("/a/shared"), Manage);
    }

    #[tokio::test]
    async fn subtree_mode_sees_deeper_records() {
        let r = resolver(vec![
            PathPermission::new("u:alice", "/a", Read),
            PathPermission::new("u:alice", "/a/b/c", ReadWrite),
        ]);
        let res = r.resolve_children(&alice(), "/a", false).await.unwrap();
        assert_eq!(res.level_for("/a/b"), Read);
        assert_eq!(res.level_for("/a/b/c/d"), ReadWrite);
    }

    #[tokio::test]
    async fn direct_parent_record_is_not_inherited_by_children() {
        let r = resolver(vec![PathPermission::direct("u:alice", "/a", ReadWrite)]);
        assert_eq!(r.resolve(&alice(), "/a").await.unwrap(), ReadWrite);
        let res = r.resolve_children(&alice(), "/a", true).await.unwrap();
        assert_eq!(res.level_for("/a/x"), None);
    }
}
