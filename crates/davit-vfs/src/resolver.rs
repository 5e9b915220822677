//! Mount resolution
//!
//! Maps a virtual path to the mount that owns it, the sub-path under the
//! mount, and the object-store key, enforcing the principal's allowed
//! prefix before anything touches the object store.

use davit_auth::AuthResult;
use davit_common::{Error, Result, VirtualPath};
use davit_meta::{MetaStore, MountRecord, StorageConfigRecord};
use std::sync::Arc;

/// Sentinel object kept at the storage root so operations targeting an
/// otherwise-empty key have something to address. Never listed, never
/// deleted.
pub const ROOT_MARKER: &str = "_MARK_ROOT_DONT_DELETE_ME/";

/// The outcome of resolving a virtual path.
#[derive(Debug, Clone)]
pub struct ResolvedPath {
    pub mount: MountRecord,
    pub storage: StorageConfigRecord,
    /// The path below the mount point, no leading slash. Keeps the
    /// trailing slash for directories; empty for the mount root.
    pub sub_path: String,
    /// `root_prefix + sub_path`, no leading slash. May be empty when the
    /// path is the mount root itself.
    pub object_key: String,
}

impl ResolvedPath {
    /// The key to address this path as a concrete object. Empty keys
    /// (the storage root) fall back to the sentinel marker.
    #[must_use]
    pub fn effective_object_key(&self) -> String {
        if self.object_key.is_empty() {
            format!("{}{ROOT_MARKER}", self.prefix_base())
        } else {
            self.object_key.clone()
        }
    }

    /// The listing prefix for this path treated as a directory.
    #[must_use]
    pub fn dir_prefix(&self) -> String {
        if self.object_key.is_empty() || self.object_key.ends_with('/') {
            self.object_key.clone()
        } else {
            format!("{}/", self.object_key)
        }
    }

    /// The sub-path in directory form, used as a cache key component and
    /// for the parent-modified table.
    #[must_use]
    pub fn dir_sub_path(&self) -> String {
        if self.sub_path.is_empty() || self.sub_path.ends_with('/') {
            self.sub_path.clone()
        } else {
            format!("{}/", self.sub_path)
        }
    }

    fn prefix_base(&self) -> String {
        normalise_root_prefix(&self.storage.root_prefix)
    }
}

fn normalise_root_prefix(root_prefix: &str) -> String {
    let trimmed = root_prefix.trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("{trimmed}/")
    }
}

/// Compute the object key for a sub-path under a storage root prefix.
#[must_use]
pub fn object_key_for(root_prefix: &str, sub_path: &str) -> String {
    format!("{}{}", normalise_root_prefix(root_prefix), sub_path.trim_start_matches('/'))
}

/// Resolves virtual paths against the mount table.
pub struct PathResolver {
    store: Arc<MetaStore>,
}

impl PathResolver {
    #[must_use]
    pub fn new(store: Arc<MetaStore>) -> Self {
        Self { store }
    }

    /// Resolve a path for a principal.
    ///
    /// Fails with `pathForbidden` when the principal's allowed prefix
    /// does not cover the path, and `mountNotFound` when no mount is a
    /// prefix of it. The longest matching mount path wins; equal-length
    /// matches break toward the most recently created mount.
    pub fn resolve(&self, path: &VirtualPath, auth: &AuthResult) -> Result<ResolvedPath> {
        auth.require_mount()?;
        if !path.has_prefix(&auth.allowed_prefix) {
            return Err(Error::PathForbidden(path.to_string()));
        }

        let mut best: Option<MountRecord> = None;
        for mount in self.store.list_mounts()? {
            if !path.has_prefix(&mount.mount_path) {
                continue;
            }
            let better = match &best {
                None => true,
                Some(current) => {
                    let (len, cur_len) = (
                        mount.mount_path.as_str().len(),
                        current.mount_path.as_str().len(),
                    );
                    len > cur_len || (len == cur_len && mount.created_at > current.created_at)
                }
            };
            if better {
                best = Some(mount);
            }
        }
        let mount = best.ok_or_else(|| Error::MountNotFound(path.to_string()))?;
        let storage = self
            .store
            .get_storage_config(&mount.storage_config_id)?
            .ok_or_else(|| {
                Error::Meta(format!(
                    "mount {} references missing storage config {}",
                    mount.id, mount.storage_config_id
                ))
            })?;

        let sub_path = path
            .strip_prefix(&mount.mount_path)
            .unwrap_or_default();
        let object_key = object_key_for(&storage.root_prefix, &sub_path);
        Ok(ResolvedPath {
            mount,
            storage,
            sub_path,
            object_key,
        })
    }

    /// Resolve and additionally require that the path is not a mount
    /// root or the namespace root. Used by destructive operations.
    pub fn resolve_for_removal(
        &self,
        path: &VirtualPath,
        auth: &AuthResult,
    ) -> Result<ResolvedPath> {
        if path.is_root() {
            return Err(Error::invalid_path("cannot remove the root"));
        }
        let resolved = self.resolve(path, auth)?;
        if resolved.sub_path.is_empty() {
            return Err(Error::invalid_path("cannot remove a mount root"));
        }
        Ok(resolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use davit_meta::{ApiKeyRecord, PermissionSet, ProviderKind};

    fn storage(id: &str, root_prefix: &str) -> StorageConfigRecord {
        StorageConfigRecord {
            id: id.into(),
            name: id.into(),
            provider: ProviderKind::Generic,
            endpoint: None,
            region: "us-east-1".into(),
            bucket: "bkt".into(),
            access_key_id: "AKID".into(),
            secret_access_key: "sealed".into(),
            path_style: true,
            root_prefix: root_prefix.into(),
            default_signed_ttl_secs: 3600,
            total_capacity_bytes: None,
            cache_ttl_secs: 60,
            created_at: 0,
        }
    }

    fn setup() -> (PathResolver, Arc<MetaStore>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MetaStore::open(&dir.path().join("meta.redb")).unwrap());
        store.put_storage_config(&storage("sc1", "")).unwrap();
        store.put_storage_config(&storage("sc2", "data")).unwrap();
        (PathResolver::new(store.clone()), store, dir)
    }

    fn mount_at(store: &MetaStore, path: &str, sc: &str, created_at: i64) -> MountRecord {
        let mut mount =
            MountRecord::generate(VirtualPath::parse(path).unwrap(), sc, false, 60);
        mount.created_at = created_at;
        store.put_mount(&mount).unwrap();
        mount
    }

    fn admin() -> AuthResult {
        AuthResult::admin("admin")
    }

    #[test]
    fn test_longest_prefix_wins() {
        let (resolver, store, _dir) = setup();
        let outer = mount_at(&store, "/data/", "sc1", 1);
        let inner = mount_at(&store, "/data/archive/", "sc2", 1);

        let path = VirtualPath::parse("/data/archive/x.bin").unwrap();
        let resolved = resolver.resolve(&path, &admin()).unwrap();
        assert_eq!(resolved.mount.id, inner.id);
        assert_eq!(resolved.sub_path, "x.bin");
        assert_eq!(resolved.object_key, "data/x.bin");

        let path = VirtualPath::parse("/data/other/x.bin").unwrap();
        let resolved = resolver.resolve(&path, &admin()).unwrap();
        assert_eq!(resolved.mount.id, outer.id);
        assert_eq!(resolved.object_key, "other/x.bin");
    }

    #[test]
    fn test_no_mount_match() {
        let (resolver, store, _dir) = setup();
        mount_at(&store, "/data/", "sc1", 1);
        let path = VirtualPath::parse("/elsewhere/x").unwrap();
        assert!(matches!(
            resolver.resolve(&path, &admin()),
            Err(Error::MountNotFound(_))
        ));
    }

    #[test]
    fn test_allowed_prefix_enforced() {
        let (resolver, store, _dir) = setup();
        mount_at(&store, "/", "sc1", 1);
        let key = ApiKeyRecord::generate(
            "scoped",
            PermissionSet::all(),
            VirtualPath::parse("/team-a/").unwrap(),
        );
        let auth = AuthResult::api_key(key);

        assert!(resolver
            .resolve(&VirtualPath::parse("/team-a/doc.txt").unwrap(), &auth)
            .is_ok());
        assert!(matches!(
            resolver.resolve(&VirtualPath::parse("/team-b/doc.txt").unwrap(), &auth),
            Err(Error::PathForbidden(_))
        ));
        // Sibling with a shared string prefix is still out of bounds
        assert!(matches!(
            resolver.resolve(&VirtualPath::parse("/team-ab/doc.txt").unwrap(), &auth),
            Err(Error::PathForbidden(_))
        ));
    }

    #[test]
    fn test_missing_capability_refused() {
        let (resolver, store, _dir) = setup();
        mount_at(&store, "/", "sc1", 1);
        let key = ApiKeyRecord::generate(
            "no-mount",
            PermissionSet { text: true, file: true, mount: false },
            VirtualPath::root(),
        );
        let auth = AuthResult::api_key(key);
        assert!(matches!(
            resolver.resolve(&VirtualPath::parse("/x").unwrap(), &auth),
            Err(Error::PermissionDenied(_))
        ));
    }

    #[test]
    fn test_root_prefix_prepended() {
        let (resolver, store, _dir) = setup();
        mount_at(&store, "/archive/", "sc2", 1);
        let resolved = resolver
            .resolve(&VirtualPath::parse("/archive/2024/report.pdf").unwrap(), &admin())
            .unwrap();
        assert_eq!(resolved.object_key, "data/2024/report.pdf");
        assert_eq!(resolved.dir_sub_path(), "2024/report.pdf/");
    }

    #[test]
    fn test_mount_root_uses_sentinel() {
        let (resolver, store, _dir) = setup();
        mount_at(&store, "/archive/", "sc2", 1);
        let resolved = resolver
            .resolve(&VirtualPath::parse("/archive/").unwrap(), &admin())
            .unwrap();
        assert_eq!(resolved.object_key, "data/");
        assert_eq!(resolved.dir_prefix(), "data/");

        let (resolver, store, _dir) = setup();
        mount_at(&store, "/plain/", "sc1", 1);
        let resolved = resolver
            .resolve(&VirtualPath::parse("/plain/").unwrap(), &admin())
            .unwrap();
        assert_eq!(resolved.object_key, "");
        assert_eq!(resolved.effective_object_key(), ROOT_MARKER);
    }

    #[test]
    fn test_removal_guards() {
        let (resolver, store, _dir) = setup();
        mount_at(&store, "/data/", "sc1", 1);
        assert!(matches!(
            resolver.resolve_for_removal(&VirtualPath::root(), &admin()),
            Err(Error::InvalidPath(_))
        ));
        assert!(matches!(
            resolver.resolve_for_removal(&VirtualPath::parse("/data/").unwrap(), &admin()),
            Err(Error::InvalidPath(_))
        ));
        assert!(resolver
            .resolve_for_removal(&VirtualPath::parse("/data/x.txt").unwrap(), &admin())
            .is_ok());
    }
}
