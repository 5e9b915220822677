//! Error types for Davit
//!
//! This module defines the common error type used throughout the system.

use thiserror::Error;
use uuid::Uuid;

/// Common result type for Davit operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error type for Davit
#[derive(Debug, Error)]
pub enum Error {
    // Path / resolution errors
    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("no mount resolves path: {0}")]
    MountNotFound(String),

    #[error("path is outside the allowed prefix: {0}")]
    PathForbidden(String),

    #[error("cross-mount rename is not supported")]
    CrossMountRename,

    // Resource errors
    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("resource is locked: {0}")]
    Locked(String),

    // Auth errors
    #[error("missing or invalid credentials")]
    Unauthorized,

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    // Request errors
    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("declared size {declared} does not match actual size {actual}")]
    SizeMismatch { declared: u64, actual: u64 },

    #[error("payload too large: max {max_size} bytes")]
    PayloadTooLarge { max_size: u64 },

    #[error("storage capacity exhausted: {used} of {capacity} bytes used, {requested} requested")]
    CapacityExhausted {
        used: u64,
        capacity: u64,
        requested: u64,
    },

    // Upstream errors
    #[error("object store unavailable: {0}")]
    UpstreamUnavailable(String),

    // Internal errors
    #[error("metadata store error: {0}")]
    Meta(String),

    #[error("crypto error: {0}")]
    Crypto(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a new internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Create an invalid path error
    pub fn invalid_path(msg: impl Into<String>) -> Self {
        Self::InvalidPath(msg.into())
    }

    /// Create a not found error
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    /// Create a conflict error
    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    /// Create an unsupported error
    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::Unsupported(msg.into())
    }

    /// Create an upstream error
    pub fn upstream(msg: impl Into<String>) -> Self {
        Self::UpstreamUnavailable(msg.into())
    }

    /// Check if this is a not found error
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_) | Self::MountNotFound(_))
    }

    /// Check if the caller could retry this request unchanged
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::UpstreamUnavailable(_))
    }

    /// Get the HTTP status code this error maps to
    #[must_use]
    pub fn http_status_code(&self) -> u16 {
        match self {
            // 400 Bad Request
            Self::InvalidPath(_) | Self::CrossMountRename | Self::SizeMismatch { .. } => 400,

            // 401 Unauthorized
            Self::Unauthorized => 401,

            // 403 Forbidden
            Self::PathForbidden(_) | Self::PermissionDenied(_) => 403,

            // 404 Not Found
            Self::NotFound(_) | Self::MountNotFound(_) => 404,

            // 409 Conflict
            Self::Conflict(_) => 409,

            // 413 Payload Too Large
            Self::PayloadTooLarge { .. } => 413,

            // 415 Unsupported Media Type
            Self::Unsupported(_) => 415,

            // 423 Locked (WebDAV)
            Self::Locked(_) => 423,

            // 502 Bad Gateway
            Self::UpstreamUnavailable(_) => 502,

            // 507 Insufficient Storage (WebDAV)
            Self::CapacityExhausted { .. } => 507,

            // 500 Internal Server Error
            Self::Meta(_) | Self::Crypto(_) | Self::Internal(_) => 500,
        }
    }

    /// Get the wire-level error code carried in the JSON envelope
    #[must_use]
    pub fn wire_code(&self) -> &'static str {
        match self {
            Self::InvalidPath(_) => "invalidPath",
            Self::MountNotFound(_) => "mountNotFound",
            Self::PathForbidden(_) => "pathForbidden",
            Self::CrossMountRename => "crossMountRename",
            Self::NotFound(_) => "notFound",
            Self::Conflict(_) => "conflict",
            Self::Locked(_) => "locked",
            Self::Unauthorized => "unauthorized",
            Self::PermissionDenied(_) => "permissionDenied",
            Self::Unsupported(_) => "unsupported",
            Self::SizeMismatch { .. } => "sizeMismatch",
            Self::PayloadTooLarge { .. } => "payloadTooLarge",
            Self::CapacityExhausted { .. } => "capacityExhausted",
            Self::UpstreamUnavailable(_) => "upstreamUnavailable",
            Self::Meta(_) | Self::Crypto(_) | Self::Internal(_) => "internalError",
        }
    }

    /// Whether the detailed message is safe to show to the caller.
    ///
    /// Internal and upstream errors are logged in full but surfaced only as
    /// an opaque error id; everything else carries a human-safe message.
    #[must_use]
    pub fn message_is_public(&self) -> bool {
        !matches!(
            self,
            Self::Meta(_) | Self::Crypto(_) | Self::Internal(_) | Self::UpstreamUnavailable(_)
        )
    }

    /// Generate a short opaque id used to correlate a client-visible error
    /// with the full server-side log line.
    #[must_use]
    pub fn new_error_id() -> String {
        Uuid::new_v4().simple().to_string()[..12].to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_http_status() {
        assert_eq!(Error::Unauthorized.http_status_code(), 401);
        assert_eq!(Error::PathForbidden("/x".into()).http_status_code(), 403);
        assert_eq!(Error::NotFound("x".into()).http_status_code(), 404);
        assert_eq!(Error::Locked("/x".into()).http_status_code(), 423);
        assert_eq!(
            Error::CapacityExhausted {
                used: 40,
                capacity: 100,
                requested: 70
            }
            .http_status_code(),
            507
        );
        assert_eq!(Error::Internal("x".into()).http_status_code(), 500);
    }

    #[test]
    fn test_error_wire_code() {
        assert_eq!(Error::InvalidPath("..".into()).wire_code(), "invalidPath");
        assert_eq!(Error::CrossMountRename.wire_code(), "crossMountRename");
        assert_eq!(Error::Meta("boom".into()).wire_code(), "internalError");
    }

    #[test]
    fn test_internal_messages_are_private() {
        assert!(!Error::Internal("sdk detail".into()).message_is_public());
        assert!(!Error::UpstreamUnavailable("s3 500".into()).message_is_public());
        assert!(Error::NotFound("/a.txt".into()).message_is_public());
    }

    #[test]
    fn test_error_id_is_short_and_opaque() {
        let id = Error::new_error_id();
        assert_eq!(id.len(), 12);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
