//! Advisory WebDAV lock table
//!
//! Process-local, in-memory only. Locks are keyed by normalised virtual
//! path; depth-infinity locks cover every descendant. A background sweep
//! removes expired entries. Scaling beyond one node requires pinning
//! clients to nodes or externalising this table.

use davit_common::config::LockConfig;
use davit_common::{Error, Result};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Lock depth per RFC 4918 (depth 1 is not defined for LOCK).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockDepth {
    Zero,
    Infinity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockScope {
    Exclusive,
    Shared,
}

/// One active lock.
#[derive(Debug, Clone)]
pub struct Lock {
    pub token: String,
    pub path: String,
    pub depth: LockDepth,
    pub scope: LockScope,
    pub owner: Option<String>,
    pub timeout_secs: u64,
    pub expires_at: Instant,
}

impl Lock {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at <= now
    }

    /// Whether this lock covers a path: the lock's own path, or any
    /// descendant for depth-infinity locks.
    #[must_use]
    pub fn covers(&self, path: &str) -> bool {
        if self.path == path {
            return true;
        }
        match self.depth {
            LockDepth::Zero => false,
            LockDepth::Infinity => is_descendant(path, &self.path),
        }
    }
}

fn is_descendant(path: &str, ancestor: &str) -> bool {
    let base = ancestor.trim_end_matches('/');
    match path.strip_prefix(base) {
        Some(rest) => rest.starts_with('/'),
        None => false,
    }
}

/// Two paths overlap when one covers the other.
fn overlaps(lock: &Lock, path: &str, depth: LockDepth) -> bool {
    if lock.covers(path) {
        return true;
    }
    // A new depth-infinity lock also conflicts with locks below it.
    depth == LockDepth::Infinity && is_descendant(&lock.path, path)
}

/// In-memory lock table.
pub struct LockManager {
    locks: RwLock<HashMap<String, Vec<Lock>>>,
    config: LockConfig,
}

impl LockManager {
    #[must_use]
    pub fn new(config: LockConfig) -> Self {
        Self {
            locks: RwLock::new(HashMap::new()),
            config,
        }
    }

    fn clamp_timeout(&self, requested: Option<u64>) -> u64 {
        requested
            .unwrap_or(self.config.default_timeout_secs)
            .clamp(self.config.min_timeout_secs, self.config.max_timeout_secs)
    }

    fn normalise(path: &str) -> String {
        let trimmed = path.trim_end_matches('/');
        if trimmed.is_empty() {
            "/".to_string()
        } else {
            trimmed.to_string()
        }
    }

    /// Acquire a lock, failing with `locked` on any conflicting overlap.
    pub fn acquire(
        &self,
        path: &str,
        owner: Option<&str>,
        depth: LockDepth,
        scope: LockScope,
        timeout_secs: Option<u64>,
    ) -> Result<Lock> {
        let path = Self::normalise(path);
        let now = Instant::now();
        let mut locks = self.locks.write();

        for existing in locks.values().flatten() {
            if existing.is_expired(now) || !overlaps(existing, &path, depth) {
                continue;
            }
            if existing.scope == LockScope::Exclusive || scope == LockScope::Exclusive {
                return Err(Error::Locked(existing.path.clone()));
            }
        }

        let timeout_secs = self.clamp_timeout(timeout_secs);
        let lock = Lock {
            token: format!("opaquelocktoken:{}", Uuid::new_v4()),
            path: path.clone(),
            depth,
            scope,
            owner: owner.map(ToString::to_string),
            timeout_secs,
            expires_at: now + Duration::from_secs(timeout_secs),
        };
        locks.entry(path).or_default().push(lock.clone());
        Ok(lock)
    }

    /// Refresh an existing lock's timeout.
    pub fn refresh(&self, path: &str, token: &str, timeout_secs: Option<u64>) -> Result<Lock> {
        let path = Self::normalise(path);
        let timeout_secs = self.clamp_timeout(timeout_secs);
        let mut locks = self.locks.write();
        let entry = locks
            .get_mut(&path)
            .and_then(|list| list.iter_mut().find(|l| l.token == token))
            .ok_or_else(|| Error::Locked(format!("no lock with that token on {path}")))?;
        entry.timeout_secs = timeout_secs;
        entry.expires_at = Instant::now() + Duration::from_secs(timeout_secs);
        Ok(entry.clone())
    }

    /// Release a lock; a token mismatch is refused.
    pub fn release(&self, path: &str, token: &str) -> Result<()> {
        let path = Self::normalise(path);
        let mut locks = self.locks.write();
        let Some(list) = locks.get_mut(&path) else {
            return Err(Error::PermissionDenied(format!("no lock on {path}")));
        };
        let before = list.len();
        list.retain(|l| l.token != token);
        if list.len() == before {
            return Err(Error::PermissionDenied("lock token mismatch".into()));
        }
        if list.is_empty() {
            locks.remove(&path);
        }
        Ok(())
    }

    /// Gate a mutating request: permitted when no live lock covers the
    /// path, or when a submitted token matches every covering lock.
    pub fn check_write(&self, path: &str, submitted_tokens: &[String]) -> Result<()> {
        let path = Self::normalise(path);
        let now = Instant::now();
        let locks = self.locks.read();
        for lock in locks.values().flatten() {
            if lock.is_expired(now) || !lock.covers(&path) {
                continue;
            }
            if !submitted_tokens.contains(&lock.token) {
                return Err(Error::Locked(lock.path.clone()));
            }
        }
        Ok(())
    }

    /// Live locks covering a path, for `lockdiscovery`.
    #[must_use]
    pub fn find_covering(&self, path: &str) -> Vec<Lock> {
        let path = Self::normalise(path);
        let now = Instant::now();
        self.locks
            .read()
            .values()
            .flatten()
            .filter(|l| !l.is_expired(now) && l.covers(&path))
            .cloned()
            .collect()
    }

    /// Drop expired locks; returns how many were removed.
    pub fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let mut removed = 0;
        let mut locks = self.locks.write();
        locks.retain(|_, list| {
            let before = list.len();
            list.retain(|l| !l.is_expired(now));
            removed += before - list.len();
            !list.is_empty()
        });
        removed
    }

    #[must_use]
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.config.sweep_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> LockManager {
        LockManager::new(LockConfig::default())
    }

    #[test]
    fn test_acquire_and_release() {
        let manager = manager();
        let lock = manager
            .acquire("/x.txt", Some("alice"), LockDepth::Zero, LockScope::Exclusive, None)
            .unwrap();
        assert!(lock.token.starts_with("opaquelocktoken:"));
        assert_eq!(lock.timeout_secs, 600);

        manager.release("/x.txt", &lock.token).unwrap();
        assert!(manager.find_covering("/x.txt").is_empty());
    }

    #[test]
    fn test_exclusive_conflict() {
        let manager = manager();
        manager
            .acquire("/x.txt", None, LockDepth::Zero, LockScope::Exclusive, None)
            .unwrap();
        assert!(matches!(
            manager.acquire("/x.txt", None, LockDepth::Zero, LockScope::Exclusive, None),
            Err(Error::Locked(_))
        ));
        assert!(matches!(
            manager.acquire("/x.txt", None, LockDepth::Zero, LockScope::Shared, None),
            Err(Error::Locked(_))
        ));
    }

    #[test]
    fn test_shared_locks_coexist() {
        let manager = manager();
        manager
            .acquire("/x.txt", None, LockDepth::Zero, LockScope::Shared, None)
            .unwrap();
        manager
            .acquire("/x.txt", None, LockDepth::Zero, LockScope::Shared, None)
            .unwrap();
        assert_eq!(manager.find_covering("/x.txt").len(), 2);
    }

    #[test]
    fn test_depth_infinity_covers_descendants() {
        let manager = manager();
        let lock = manager
            .acquire("/dir", None, LockDepth::Infinity, LockScope::Exclusive, None)
            .unwrap();
        assert!(matches!(
            manager.check_write("/dir/sub/file.txt", &[]),
            Err(Error::Locked(_))
        ));
        assert!(manager
            .check_write("/dir/sub/file.txt", &[lock.token.clone()])
            .is_ok());
        // Sibling trees are unaffected
        assert!(manager.check_write("/dirx/file.txt", &[]).is_ok());
    }

    #[test]
    fn test_infinity_acquire_conflicts_with_descendant_lock() {
        let manager = manager();
        manager
            .acquire("/dir/file.txt", None, LockDepth::Zero, LockScope::Exclusive, None)
            .unwrap();
        assert!(matches!(
            manager.acquire("/dir", None, LockDepth::Infinity, LockScope::Exclusive, None),
            Err(Error::Locked(_))
        ));
        // Depth 0 on the parent is fine
        assert!(manager
            .acquire("/dir", None, LockDepth::Zero, LockScope::Exclusive, None)
            .is_ok());
    }

    #[test]
    fn test_check_write_without_lock() {
        let manager = manager();
        assert!(manager.check_write("/anything", &[]).is_ok());
    }

    #[test]
    fn test_refresh_extends_and_mismatch_fails() {
        let manager = manager();
        let lock = manager
            .acquire("/x.txt", None, LockDepth::Zero, LockScope::Exclusive, Some(120))
            .unwrap();
        assert_eq!(lock.timeout_secs, 120);
        let refreshed = manager.refresh("/x.txt", &lock.token, Some(900)).unwrap();
        assert_eq!(refreshed.timeout_secs, 900);
        assert!(manager.refresh("/x.txt", "opaquelocktoken:bogus", None).is_err());
    }

    #[test]
    fn test_timeout_clamping() {
        let manager = manager();
        let short = manager
            .acquire("/a", None, LockDepth::Zero, LockScope::Exclusive, Some(5))
            .unwrap();
        assert_eq!(short.timeout_secs, 60);
        let long = manager
            .acquire("/b", None, LockDepth::Zero, LockScope::Exclusive, Some(86_400))
            .unwrap();
        assert_eq!(long.timeout_secs, 3600);
    }

    #[test]
    fn test_release_token_mismatch_is_forbidden() {
        let manager = manager();
        manager
            .acquire("/x.txt", None, LockDepth::Zero, LockScope::Exclusive, None)
            .unwrap();
        assert!(matches!(
            manager.release("/x.txt", "opaquelocktoken:wrong"),
            Err(Error::PermissionDenied(_))
        ));
    }

    #[test]
    fn test_sweep_removes_expired() {
        let config = LockConfig {
            min_timeout_secs: 0,
            ..LockConfig::default()
        };
        let manager = LockManager::new(config);
        manager
            .acquire("/x.txt", None, LockDepth::Zero, LockScope::Exclusive, Some(0))
            .unwrap();
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(manager.sweep_expired(), 1);
        assert!(manager.check_write("/x.txt", &[]).is_ok());
    }
}
