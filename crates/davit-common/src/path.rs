//! Virtual path handling
//!
//! A [`VirtualPath`] is a POSIX-like, forward-slash path into the mounted
//! namespace. Canonical form: a single leading slash, no duplicate slashes,
//! no `.` or `..` segments. A trailing slash marks a directory; the empty
//! path is the root `/`.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A validated, canonical virtual path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct VirtualPath(String);

impl VirtualPath {
    /// The root path `/`.
    #[must_use]
    pub fn root() -> Self {
        Self("/".to_string())
    }

    /// Parse and canonicalise a raw path string.
    ///
    /// Rejects `.` and `..` segments, backslashes, and embedded NUL with
    /// [`Error::InvalidPath`]. Duplicate slashes collapse; an empty input
    /// (or bare `/`) is the root. A trailing slash is preserved as the
    /// directory marker.
    pub fn parse(raw: &str) -> Result<Self> {
        if raw.contains('\0') || raw.contains('\\') {
            return Err(Error::invalid_path(raw.to_string()));
        }
        let is_dir = raw.is_empty() || raw.ends_with('/');
        let mut segments = Vec::new();
        for segment in raw.split('/') {
            match segment {
                "" => {}
                "." | ".." => return Err(Error::invalid_path(raw.to_string())),
                s => segments.push(s),
            }
        }
        if segments.is_empty() {
            return Ok(Self::root());
        }
        let mut path = String::with_capacity(raw.len() + 1);
        path.push('/');
        path.push_str(&segments.join("/"));
        if is_dir {
            path.push('/');
        }
        Ok(Self(path))
    }

    /// The canonical string form.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True for the root path `/`.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.0 == "/"
    }

    /// True if the path carries the trailing-slash directory marker.
    #[must_use]
    pub fn is_dir(&self) -> bool {
        self.0.ends_with('/')
    }

    /// Path segments, in order. Empty for the root.
    #[must_use]
    pub fn segments(&self) -> Vec<&str> {
        self.0.split('/').filter(|s| !s.is_empty()).collect()
    }

    /// The final segment, if any.
    #[must_use]
    pub fn file_name(&self) -> Option<&str> {
        self.segments().last().copied()
    }

    /// The parent directory. Root has no parent.
    #[must_use]
    pub fn parent(&self) -> Option<Self> {
        if self.is_root() {
            return None;
        }
        let segments = self.segments();
        if segments.len() == 1 {
            return Some(Self::root());
        }
        let mut path = String::from("/");
        path.push_str(&segments[..segments.len() - 1].join("/"));
        path.push('/');
        Some(Self(path))
    }

    /// Every ancestor directory from the root down to the parent of this
    /// path, root first. Used to refresh parent modification times after
    /// a mutation.
    #[must_use]
    pub fn ancestors(&self) -> Vec<Self> {
        let mut out = Vec::new();
        let mut current = self.parent();
        while let Some(p) = current {
            current = p.parent();
            out.push(p);
        }
        out.reverse();
        out
    }

    /// Append a single segment, producing a file path.
    pub fn join(&self, segment: &str) -> Result<Self> {
        if segment.is_empty() || segment.contains('/') {
            return Err(Error::invalid_path(segment.to_string()));
        }
        let mut path = self.0.trim_end_matches('/').to_string();
        path.push('/');
        path.push_str(segment);
        Self::parse(&path)
    }

    /// This path with the directory marker forced on.
    #[must_use]
    pub fn as_dir(&self) -> Self {
        if self.is_dir() {
            self.clone()
        } else {
            Self(format!("{}/", self.0))
        }
    }

    /// Segment-aware prefix test: `/team-a/` is a prefix of `/team-a/x`
    /// but not of `/team-ab/x`. Every path has the root as a prefix.
    #[must_use]
    pub fn has_prefix(&self, prefix: &Self) -> bool {
        if prefix.is_root() {
            return true;
        }
        let base = prefix.0.trim_end_matches('/');
        match self.0.strip_prefix(base) {
            Some(rest) => rest.is_empty() || rest.starts_with('/'),
            None => false,
        }
    }

    /// The remainder after a matching prefix, without a leading slash.
    /// Returns `None` when `prefix` is not a prefix of this path.
    #[must_use]
    pub fn strip_prefix(&self, prefix: &Self) -> Option<String> {
        if !self.has_prefix(prefix) {
            return None;
        }
        let base = if prefix.is_root() {
            ""
        } else {
            prefix.0.trim_end_matches('/')
        };
        Some(self.0[base.len()..].trim_start_matches('/').to_string())
    }
}

impl fmt::Display for VirtualPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for VirtualPath {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<VirtualPath> for String {
    fn from(value: VirtualPath) -> Self {
        value.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_canonicalises() {
        assert_eq!(VirtualPath::parse("").unwrap().as_str(), "/");
        assert_eq!(VirtualPath::parse("/").unwrap().as_str(), "/");
        assert_eq!(VirtualPath::parse("a/b").unwrap().as_str(), "/a/b");
        assert_eq!(VirtualPath::parse("//a///b").unwrap().as_str(), "/a/b");
        assert_eq!(VirtualPath::parse("/docs/").unwrap().as_str(), "/docs/");
    }

    #[test]
    fn test_parse_rejects_dot_segments() {
        assert!(VirtualPath::parse("/a/../b").is_err());
        assert!(VirtualPath::parse("/./a").is_err());
        assert!(VirtualPath::parse("/a/b\\c").is_err());
        assert!(VirtualPath::parse("/a\0b").is_err());
    }

    #[test]
    fn test_directory_marker() {
        assert!(VirtualPath::parse("/docs/").unwrap().is_dir());
        assert!(!VirtualPath::parse("/docs/a.txt").unwrap().is_dir());
        assert!(VirtualPath::root().is_dir());
        assert_eq!(
            VirtualPath::parse("/docs").unwrap().as_dir().as_str(),
            "/docs/"
        );
    }

    #[test]
    fn test_parent_and_file_name() {
        let p = VirtualPath::parse("/a/b/c.txt").unwrap();
        assert_eq!(p.file_name(), Some("c.txt"));
        assert_eq!(p.parent().unwrap().as_str(), "/a/b/");
        assert_eq!(VirtualPath::parse("/a").unwrap().parent().unwrap().as_str(), "/");
        assert!(VirtualPath::root().parent().is_none());
    }

    #[test]
    fn test_ancestors_root_first() {
        let p = VirtualPath::parse("/a/b/c.txt").unwrap();
        let ancestors: Vec<String> =
            p.ancestors().iter().map(|a| a.as_str().to_string()).collect();
        assert_eq!(ancestors, vec!["/", "/a/", "/a/b/"]);
    }

    #[test]
    fn test_prefix_is_segment_aware() {
        let team_a = VirtualPath::parse("/team-a/").unwrap();
        assert!(VirtualPath::parse("/team-a/x").unwrap().has_prefix(&team_a));
        assert!(VirtualPath::parse("/team-a/").unwrap().has_prefix(&team_a));
        assert!(!VirtualPath::parse("/team-ab/x").unwrap().has_prefix(&team_a));
        assert!(VirtualPath::parse("/anything").unwrap().has_prefix(&VirtualPath::root()));
    }

    #[test]
    fn test_strip_prefix() {
        let mount = VirtualPath::parse("/m1/").unwrap();
        let p = VirtualPath::parse("/m1/dir/f.bin").unwrap();
        assert_eq!(p.strip_prefix(&mount).unwrap(), "dir/f.bin");
        assert_eq!(
            VirtualPath::parse("/m1/").unwrap().strip_prefix(&mount).unwrap(),
            ""
        );
        assert!(VirtualPath::parse("/m2/x").unwrap().strip_prefix(&mount).is_none());
        assert_eq!(
            p.strip_prefix(&VirtualPath::root()).unwrap(),
            "m1/dir/f.bin"
        );
    }

    #[test]
    fn test_join() {
        let d = VirtualPath::parse("/docs/").unwrap();
        assert_eq!(d.join("a.txt").unwrap().as_str(), "/docs/a.txt");
        assert!(d.join("a/b").is_err());
        assert!(d.join("").is_err());
    }

    #[test]
    fn test_serde_round_trip() {
        let p: VirtualPath = serde_json::from_str("\"/a/b/\"").unwrap();
        assert_eq!(p.as_str(), "/a/b/");
        assert!(serde_json::from_str::<VirtualPath>("\"/a/../b\"").is_err());
    }
}
