//! Redb table definitions for persistent metadata storage.

use redb::TableDefinition;

// Principals
pub const API_KEYS: TableDefinition<&str, &[u8]> = TableDefinition::new("api_keys");
// Key: the API key secret itself, Value: record id (login-path index)
pub const API_KEY_LOOKUP: TableDefinition<&str, &str> = TableDefinition::new("api_key_lookup");

// Storage
pub const STORAGE_CONFIGS: TableDefinition<&str, &[u8]> = TableDefinition::new("storage_configs");
pub const MOUNTS: TableDefinition<&str, &[u8]> = TableDefinition::new("mounts");

// Sharing
pub const SHARED_FILES: TableDefinition<&str, &[u8]> = TableDefinition::new("shared_files");

// Key: "mount_id\x00sub_path", Value: modification time (unix millis)
pub const PARENT_MODIFIED: TableDefinition<&str, u64> = TableDefinition::new("parent_modified");

// Free-form settings, e.g. "webdav_upload_mode"
pub const SETTINGS: TableDefinition<&str, &str> = TableDefinition::new("settings");

/// Composite key for the parent-modified table.
#[must_use]
pub fn parent_modified_key(mount_id: &str, sub_path: &str) -> String {
    format!("{mount_id}\x00{sub_path}")
}
