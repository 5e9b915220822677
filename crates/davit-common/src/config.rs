//! Configuration types for Davit
//!
//! This module defines configuration structures used across components.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;

/// Root configuration for the gateway
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// HTTP server configuration
    pub server: ServerConfig,
    /// Admin principal credentials
    pub admin: AdminConfig,
    /// Upload pipeline configuration
    pub upload: UploadConfig,
    /// Directory cache configuration
    pub cache: CacheConfig,
    /// WebDAV lock configuration
    pub locks: LockConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            admin: AdminConfig::default(),
            upload: UploadConfig::default(),
            cache: CacheConfig::default(),
            locks: LockConfig::default(),
        }
    }
}

/// HTTP server configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen address
    pub listen: SocketAddr,
    /// Externally reachable base URL (used when building proxy URLs)
    pub external_url: String,
    /// Data directory for the metadata store
    pub data_dir: PathBuf,
    /// Per-request timeout (seconds)
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:8080".parse().unwrap(),
            external_url: "http://localhost:8080".to_string(),
            data_dir: PathBuf::from("/var/lib/davit"),
            request_timeout_secs: 30,
        }
    }
}

/// Admin principal credentials
///
/// The admin authenticates with `Bearer <token>` or `Basic username:token`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AdminConfig {
    /// Admin username for Basic authentication
    pub username: String,
    /// Admin token (also the Basic password)
    pub token: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            username: "admin".to_string(),
            token: String::new(),
        }
    }
}

/// Server-side upload mode for WebDAV PUT and chunked uploads
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadMode {
    /// Buffer the whole body and issue a single PutObject
    Direct,
    /// Stream the body through a bounded multipart pipeline
    Multipart,
}

/// Upload pipeline configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UploadConfig {
    /// Default mode when the settings table has no override
    pub mode: UploadMode,
    /// Bodies at or below this size take the direct PutObject path
    pub direct_threshold: u64,
    /// Part size for streaming multipart (S3 minimum for non-final parts)
    pub part_size: usize,
    /// Ready parts resident in memory at once; the hard memory bound is
    /// `queue_depth * part_size`
    pub queue_depth: usize,
    /// Retry attempts per part
    pub part_retries: u32,
    /// Per-part upload timeout (seconds)
    pub part_timeout_secs: u64,
    /// Whole-upload cap (seconds)
    pub max_upload_secs: u64,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            mode: UploadMode::Multipart,
            direct_threshold: 5 * 1024 * 1024, // 5 MiB
            part_size: 5 * 1024 * 1024,        // 5 MiB
            queue_depth: 2,
            part_retries: 3,
            part_timeout_secs: 300,
            max_upload_secs: 3600,
        }
    }
}

/// Directory cache configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Soft cap on cached listings before LRU eviction
    pub max_entries: usize,
    /// TTL used when neither the mount nor the storage config sets one
    pub default_ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 4096,
            default_ttl_secs: 60,
        }
    }
}

/// WebDAV lock configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LockConfig {
    /// Default lock timeout when the client does not request one (seconds)
    pub default_timeout_secs: u64,
    /// Lower clamp for requested timeouts (seconds)
    pub min_timeout_secs: u64,
    /// Upper clamp for requested timeouts (seconds)
    pub max_timeout_secs: u64,
    /// Expired-lock sweep interval (seconds)
    pub sweep_interval_secs: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            default_timeout_secs: 600,
            min_timeout_secs: 60,
            max_timeout_secs: 3600,
            sweep_interval_secs: 60,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = GatewayConfig::default();
        assert_eq!(config.server.listen.port(), 8080);
        assert_eq!(config.upload.mode, UploadMode::Multipart);
        assert_eq!(config.upload.part_size, 5 * 1024 * 1024);
        assert_eq!(config.locks.default_timeout_secs, 600);
    }

    #[test]
    fn test_upload_mode_serde() {
        assert_eq!(
            serde_json::to_string(&UploadMode::Direct).unwrap(),
            "\"direct\""
        );
        let mode: UploadMode = serde_json::from_str("\"multipart\"").unwrap();
        assert_eq!(mode, UploadMode::Multipart);
    }
}
