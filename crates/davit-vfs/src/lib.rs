//! Virtual filesystem over mounted S3 buckets
//!
//! The [`FileSystem`] façade is the single operation surface both the
//! JSON API and the WebDAV layer call. Every operation resolves its
//! virtual path through the mount table, enforces the caller's allowed
//! prefix, talks to the owning bucket through a cached [`davit_s3::S3Driver`],
//! and keeps the directory cache coherent after mutations.

pub mod cache;
pub mod clients;
pub mod fs;
pub mod resolver;
pub mod types;
pub mod urls;

pub use cache::{CacheKey, DirectoryCache};
pub use clients::DriverCache;
pub use fs::FileSystem;
pub use resolver::{PathResolver, ResolvedPath, ROOT_MARKER};
pub use types::{DirectoryListing, Entry};
