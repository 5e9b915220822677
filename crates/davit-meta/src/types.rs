//! Metadata record types
//!
//! Records are persisted as JSON bytes; ids are random UUIDs assigned by
//! the `generate` constructors.

use davit_common::VirtualPath;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

fn now_secs() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Capability flags carried by an API key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionSet {
    /// Text-snippet surface
    #[serde(default)]
    pub text: bool,
    /// File-share surface
    #[serde(default)]
    pub file: bool,
    /// Mounted file-system and WebDAV surface
    #[serde(default)]
    pub mount: bool,
}

impl PermissionSet {
    /// All capabilities granted.
    #[must_use]
    pub fn all() -> Self {
        Self {
            text: true,
            file: true,
            mount: true,
        }
    }
}

/// A stored API key principal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKeyRecord {
    pub id: String,
    pub name: String,
    /// The key material the client presents. Also the Basic password.
    pub key: String,
    pub permissions: PermissionSet,
    /// The virtual-path prefix this key may operate under.
    pub basic_path: VirtualPath,
    /// Unix seconds; `None` = never expires.
    pub expires_at: Option<i64>,
    pub last_used_at: Option<i64>,
    pub created_at: i64,
}

impl ApiKeyRecord {
    /// Generate a new key with fresh random key material.
    #[must_use]
    pub fn generate(name: &str, permissions: PermissionSet, basic_path: VirtualPath) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            key: format!("dk_{}", Uuid::new_v4().simple()),
            permissions,
            basic_path,
            expires_at: None,
            last_used_at: None,
            created_at: now_secs(),
        }
    }

    /// Whether the key has passed its expiry.
    #[must_use]
    pub fn is_expired(&self, now: i64) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// The S3-compatible provider family a storage config talks to.
///
/// Provider differences are configuration-level tuning (timeouts, retry
/// counts, checksum behaviour), never interface differences.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Aws,
    R2,
    B2,
    Generic,
}

impl ProviderKind {
    /// Max request attempts for this provider.
    #[must_use]
    pub fn max_attempts(self) -> u32 {
        match self {
            Self::B2 => 4,
            _ => 3,
        }
    }

    /// Per-operation timeout in seconds.
    #[must_use]
    pub fn operation_timeout_secs(self) -> u64 {
        match self {
            Self::B2 => 120,
            _ => 60,
        }
    }

    /// Whether checksum calculation should be relaxed to "when required".
    /// AWS validates full checksums; the compatible providers reject or
    /// ignore them.
    #[must_use]
    pub fn relaxed_checksums(self) -> bool {
        !matches!(self, Self::Aws)
    }

    /// Part size to recommend for client-driven multipart uploads.
    #[must_use]
    pub fn recommended_part_size(self) -> u64 {
        match self {
            // B2 bills per transaction; larger parts cost less
            Self::B2 => 100 * 1024 * 1024,
            _ => 5 * 1024 * 1024,
        }
    }
}

/// One S3-compatible bucket an admin has registered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfigRecord {
    pub id: String,
    pub name: String,
    pub provider: ProviderKind,
    pub endpoint: Option<String>,
    pub region: String,
    pub bucket: String,
    pub access_key_id: String,
    /// Sealed with the process `SecretBox`; never plaintext on disk.
    pub secret_access_key: String,
    /// Path-style addressing (vs virtual-host style).
    pub path_style: bool,
    /// Object-key prefix transparently prepended to every key.
    pub root_prefix: String,
    pub default_signed_ttl_secs: u64,
    /// Hard usage cap in bytes; `None` = unlimited.
    pub total_capacity_bytes: Option<u64>,
    pub cache_ttl_secs: u64,
    pub created_at: i64,
}

impl StorageConfigRecord {
    #[must_use]
    pub fn new_id() -> String {
        Uuid::new_v4().to_string()
    }
}

/// A binding of a virtual directory to a storage config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MountRecord {
    pub id: String,
    /// Absolute virtual directory, normalised with leading slash.
    pub mount_path: VirtualPath,
    pub storage_config_id: String,
    /// When true, downloads and previews are streamed through the
    /// gateway; when false, clients are redirected to presigned URLs.
    pub web_proxy: bool,
    /// Overrides the storage default; 0 disables listing cache.
    pub cache_ttl_secs: u64,
    pub last_used_at: Option<i64>,
    pub created_at: i64,
}

impl MountRecord {
    #[must_use]
    pub fn generate(
        mount_path: VirtualPath,
        storage_config_id: &str,
        web_proxy: bool,
        cache_ttl_secs: u64,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            mount_path: mount_path.as_dir(),
            storage_config_id: storage_config_id.to_string(),
            web_proxy,
            cache_ttl_secs,
            last_used_at: None,
            created_at: now_secs(),
        }
    }
}

/// A committed client-direct upload, readable by the share/download path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SharedFileRecord {
    pub id: String,
    pub object_key: String,
    pub storage_config_id: String,
    pub mount_id: String,
    pub virtual_path: VirtualPath,
    pub size: Option<u64>,
    /// May be absent when bucket CORS strips the ETag from the client's
    /// presigned PUT response.
    pub etag: Option<String>,
    pub created_by: String,
    pub created_at: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_key_generate() {
        let key = ApiKeyRecord::generate(
            "ci",
            PermissionSet::all(),
            VirtualPath::parse("/team-a/").unwrap(),
        );
        assert!(key.key.starts_with("dk_"));
        assert!(!key.is_expired(chrono::Utc::now().timestamp()));
    }

    #[test]
    fn test_api_key_expiry() {
        let mut key = ApiKeyRecord::generate("ci", PermissionSet::default(), VirtualPath::root());
        key.expires_at = Some(100);
        assert!(key.is_expired(100));
        assert!(key.is_expired(101));
        assert!(!key.is_expired(99));
    }

    #[test]
    fn test_provider_tuning() {
        assert_eq!(ProviderKind::Aws.max_attempts(), 3);
        assert_eq!(ProviderKind::B2.max_attempts(), 4);
        assert!(ProviderKind::B2.operation_timeout_secs() > ProviderKind::Aws.operation_timeout_secs());
        assert!(!ProviderKind::Aws.relaxed_checksums());
        assert!(ProviderKind::R2.relaxed_checksums());
        assert_eq!(ProviderKind::Aws.recommended_part_size(), 5 * 1024 * 1024);
        assert_eq!(ProviderKind::B2.recommended_part_size(), 100 * 1024 * 1024);
    }

    #[test]
    fn test_mount_path_normalised_to_directory() {
        let mount = MountRecord::generate(
            VirtualPath::parse("/data").unwrap(),
            "sc1",
            true,
            0,
        );
        assert_eq!(mount.mount_path.as_str(), "/data/");
    }
}
