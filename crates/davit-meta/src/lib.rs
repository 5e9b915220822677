//! Metadata store for Davit
//!
//! Persists the small relational state the gateway needs: API keys,
//! storage configs, mounts, shared-file records, cached directory
//! modification times, and settings. Backed by a single redb database;
//! records are stored as JSON bytes under string keys. S3 credentials are
//! sealed with AES-256-GCM before they touch disk.

pub mod secret;
pub mod store;
pub mod tables;
pub mod types;

pub use secret::SecretBox;
pub use store::MetaStore;
pub use types::{
    ApiKeyRecord, MountRecord, PermissionSet, ProviderKind, SharedFileRecord,
    StorageConfigRecord,
};
