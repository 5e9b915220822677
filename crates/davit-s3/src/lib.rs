//! S3-compatible storage driver for Davit
//!
//! One [`S3Driver`] wraps one configured bucket. The driver exposes a
//! capability-scoped surface (object get/put/head/delete/copy, delimiter
//! listing, presigned URLs, backend multipart) and owns retry, timeout,
//! and checksum tuning per provider family. The streaming multipart
//! pipeline used for WebDAV PUT lives in [`upload`].

pub mod capability;
pub mod driver;
pub mod upload;

pub use capability::Capability;
pub use driver::{ListPage, ObjectAttrs, ObjectBody, PutResult, S3Driver};
pub use upload::{CompletedUpload, StreamUploadConfig, upload_stream};
