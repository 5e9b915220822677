//! Listing and entry types surfaced by the filesystem.

use chrono::{DateTime, Utc};
use davit_common::VirtualPath;
use serde::Serialize;

/// One file or directory as seen through the virtual filesystem.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Entry {
    pub name: String,
    pub path: VirtualPath,
    pub is_directory: bool,
    pub size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modified: Option<DateTime<Utc>>,
    pub mimetype: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    /// Set by `stat`; listings leave these unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preview_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
}

impl Entry {
    /// A directory entry with no object behind it yet.
    #[must_use]
    pub fn directory(name: &str, path: VirtualPath, modified: Option<DateTime<Utc>>) -> Self {
        Self {
            name: name.to_string(),
            path: path.as_dir(),
            is_directory: true,
            size: 0,
            modified,
            mimetype: davit_common::mime::DIRECTORY_CONTENT_TYPE.to_string(),
            etag: None,
            preview_url: None,
            download_url: None,
        }
    }
}

/// A snapshot of one directory.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryListing {
    pub path: VirtualPath,
    pub entries: Vec<Entry>,
    pub refreshed_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_serialises_camel_case() {
        let entry = Entry::directory(
            "docs",
            VirtualPath::parse("/docs/").unwrap(),
            None,
        );
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["isDirectory"], true);
        assert_eq!(json["mimetype"], "application/x-directory");
        assert!(json.get("previewUrl").is_none());
    }
}
