//! Directory listing cache
//!
//! Bounded TTL cache for directory snapshots. Keys carry the principal
//! class so partially-visible listings are never served across
//! principals. Eviction is LRU above a soft entry cap; invalidation is
//! predicate-based so mutations can drop exact keys, whole mounts, or
//! ancestor chains.

use crate::types::DirectoryListing;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Cache key: one directory as seen by one principal class.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub mount_id: String,
    /// Directory sub-path under the mount, trailing slash, empty for the
    /// mount root.
    pub sub_path: String,
    /// `admin` or `apikey:<allowed-prefix>`.
    pub principal_class: String,
}

struct CacheEntry {
    listing: Arc<DirectoryListing>,
    inserted: Instant,
    ttl: Duration,
    last_access: AtomicU64,
}

impl CacheEntry {
    fn is_fresh(&self) -> bool {
        self.inserted.elapsed() < self.ttl
    }
}

/// Cache statistics for logging.
#[derive(Debug, Default)]
pub struct CacheStats {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    pub evictions: AtomicU64,
}

/// TTL + LRU bounded cache of directory listings.
pub struct DirectoryCache {
    entries: RwLock<HashMap<CacheKey, CacheEntry>>,
    max_entries: usize,
    clock: AtomicU64,
    stats: CacheStats,
}

impl DirectoryCache {
    #[must_use]
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            max_entries: max_entries.max(1),
            clock: AtomicU64::new(0),
            stats: CacheStats::default(),
        }
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed)
    }

    /// A fresh listing for the key, if present.
    pub fn get(&self, key: &CacheKey) -> Option<Arc<DirectoryListing>> {
        let entries = self.entries.read();
        match entries.get(key) {
            Some(entry) if entry.is_fresh() => {
                entry.last_access.store(self.tick(), Ordering::Relaxed);
                self.stats.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry.listing.clone())
            }
            _ => {
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Store a listing. A zero TTL disables caching for the key.
    pub fn put(&self, key: CacheKey, listing: Arc<DirectoryListing>, ttl: Duration) {
        if ttl.is_zero() {
            return;
        }
        let mut entries = self.entries.write();
        entries.insert(
            key,
            CacheEntry {
                listing,
                inserted: Instant::now(),
                ttl,
                last_access: AtomicU64::new(self.tick()),
            },
        );
        if entries.len() > self.max_entries {
            // Evict the least recently used entry
            if let Some(victim) = entries
                .iter()
                .min_by_key(|(_, e)| e.last_access.load(Ordering::Relaxed))
                .map(|(k, _)| k.clone())
            {
                entries.remove(&victim);
                self.stats.evictions.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Drop every entry matching the predicate.
    pub fn invalidate_where<F: Fn(&CacheKey) -> bool>(&self, predicate: F) {
        self.entries.write().retain(|key, _| !predicate(key));
    }

    /// Drop one directory for every principal class.
    pub fn invalidate_dir(&self, mount_id: &str, sub_path: &str) {
        self.invalidate_where(|key| key.mount_id == mount_id && key.sub_path == sub_path);
    }

    /// Drop everything cached for a mount.
    pub fn invalidate_mount(&self, mount_id: &str) {
        self.invalidate_where(|key| key.mount_id == mount_id);
    }

    /// Drop the directory itself and every ancestor directory under the
    /// same mount. Used after create/delete/rename so parents re-read
    /// their modification times.
    pub fn invalidate_ancestors(&self, mount_id: &str, dir_sub_path: &str) {
        self.invalidate_where(|key| {
            key.mount_id == mount_id
                && (dir_sub_path.starts_with(key.sub_path.as_str()) || key.sub_path == dir_sub_path)
        });
    }

    /// Fresh cached listings for a mount and principal class, used by
    /// search before it falls back to a listing walk.
    pub fn snapshot_for_mount(
        &self,
        mount_id: &str,
        principal_class: &str,
    ) -> Vec<Arc<DirectoryListing>> {
        self.entries
            .read()
            .iter()
            .filter(|(key, entry)| {
                key.mount_id == mount_id
                    && key.principal_class == principal_class
                    && entry.is_fresh()
            })
            .map(|(_, entry)| entry.listing.clone())
            .collect()
    }

    /// Drop everything. Used by the shutdown hook and mount removal.
    pub fn clear(&self) {
        self.entries.write().clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    #[must_use]
    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use davit_common::VirtualPath;

    fn key(mount: &str, sub: &str, class: &str) -> CacheKey {
        CacheKey {
            mount_id: mount.into(),
            sub_path: sub.into(),
            principal_class: class.into(),
        }
    }

    fn listing(path: &str) -> Arc<DirectoryListing> {
        Arc::new(DirectoryListing {
            path: VirtualPath::parse(path).unwrap(),
            entries: Vec::new(),
            refreshed_at: chrono::Utc::now(),
        })
    }

    const TTL: Duration = Duration::from_secs(60);

    #[test]
    fn test_get_put_round_trip() {
        let cache = DirectoryCache::new(16);
        let k = key("m1", "docs/", "admin");
        assert!(cache.get(&k).is_none());
        cache.put(k.clone(), listing("/docs/"), TTL);
        assert!(cache.get(&k).is_some());
        assert_eq!(cache.stats().hits.load(Ordering::Relaxed), 1);
        assert_eq!(cache.stats().misses.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_zero_ttl_disables() {
        let cache = DirectoryCache::new(16);
        let k = key("m1", "docs/", "admin");
        cache.put(k.clone(), listing("/docs/"), Duration::ZERO);
        assert!(cache.get(&k).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_principal_classes_are_partitioned() {
        let cache = DirectoryCache::new(16);
        cache.put(key("m1", "docs/", "admin"), listing("/docs/"), TTL);
        assert!(cache.get(&key("m1", "docs/", "apikey:/team-a/")).is_none());
    }

    #[test]
    fn test_lru_eviction_above_cap() {
        let cache = DirectoryCache::new(2);
        cache.put(key("m1", "a/", "admin"), listing("/a/"), TTL);
        cache.put(key("m1", "b/", "admin"), listing("/b/"), TTL);
        // Touch a/ so b/ is the LRU victim
        assert!(cache.get(&key("m1", "a/", "admin")).is_some());
        cache.put(key("m1", "c/", "admin"), listing("/c/"), TTL);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.stats().evictions.load(Ordering::Relaxed), 1);
        assert!(cache.get(&key("m1", "a/", "admin")).is_some());
        assert!(cache.get(&key("m1", "b/", "admin")).is_none());
    }

    #[test]
    fn test_invalidate_mount() {
        let cache = DirectoryCache::new(16);
        cache.put(key("m1", "a/", "admin"), listing("/a/"), TTL);
        cache.put(key("m2", "a/", "admin"), listing("/a/"), TTL);
        cache.invalidate_mount("m1");
        assert!(cache.get(&key("m1", "a/", "admin")).is_none());
        assert!(cache.get(&key("m2", "a/", "admin")).is_some());
    }

    #[test]
    fn test_invalidate_ancestors() {
        let cache = DirectoryCache::new(16);
        cache.put(key("m1", "", "admin"), listing("/"), TTL);
        cache.put(key("m1", "a/", "admin"), listing("/a/"), TTL);
        cache.put(key("m1", "a/b/", "admin"), listing("/a/b/"), TTL);
        cache.put(key("m1", "other/", "admin"), listing("/other/"), TTL);

        // A mutation in /a/b/ drops the chain up to the mount root
        cache.invalidate_ancestors("m1", "a/b/");
        assert!(cache.get(&key("m1", "", "admin")).is_none());
        assert!(cache.get(&key("m1", "a/", "admin")).is_none());
        assert!(cache.get(&key("m1", "a/b/", "admin")).is_none());
        assert!(cache.get(&key("m1", "other/", "admin")).is_some());
    }

    #[test]
    fn test_snapshot_for_mount() {
        let cache = DirectoryCache::new(16);
        cache.put(key("m1", "a/", "admin"), listing("/a/"), TTL);
        cache.put(key("m1", "b/", "apikey:/x/"), listing("/b/"), TTL);
        let snapshots = cache.snapshot_for_mount("m1", "admin");
        assert_eq!(snapshots.len(), 1);
        assert_eq!(snapshots[0].path.as_str(), "/a/");
    }
}
