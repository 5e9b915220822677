//! The filesystem façade
//!
//! Operation-level surface shared by the JSON API and the WebDAV layer.
//! Every operation resolves the virtual path (which enforces the
//! caller's allowed prefix), performs its object-store work through the
//! cached driver, and then keeps coherence: the store mutation commits
//! first, ancestor modification times are bumped second, and cache
//! entries are invalidated last.

use crate::cache::{CacheKey, DirectoryCache};
use crate::clients::DriverCache;
use crate::resolver::{PathResolver, ROOT_MARKER, ResolvedPath};
use crate::types::{DirectoryListing, Entry};
use crate::urls::{FileUrls, build_file_urls};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use davit_auth::AuthResult;
use davit_common::config::{GatewayConfig, UploadConfig, UploadMode};
use davit_common::mime::{
    DIRECTORY_CONTENT_TYPE, Disposition, content_disposition, content_type_for,
    infer_content_type,
};
use davit_common::{Error, Result, VirtualPath};
use davit_meta::{MetaStore, SecretBox, SharedFileRecord, StorageConfigRecord};
use davit_s3::upload::{CapacityBudget, StreamUploadConfig, upload_stream};
use davit_s3::{ObjectBody, S3Driver};
use futures::Stream;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Presigned GETs may not outlive the SigV4 cap of 7 days.
const MAX_SIGNED_TTL_SECS: u64 = 7 * 24 * 3600;

/// Upper bound on keys visited when removing a directory tree.
const REMOVE_WALK_LIMIT: usize = 100_000;

/// Upper bound on keys visited per mount by the search fallback walk.
const SEARCH_WALK_LIMIT: usize = 1_000;

/// Settings-table key overriding the configured upload mode.
const UPLOAD_MODE_SETTING: &str = "webdav_upload_mode";

/// Result of a completed upload.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadOutcome {
    pub object_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    pub size: u64,
    pub mimetype: String,
}

/// Per-item failure in a batch operation.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchFailure {
    pub path: String,
    pub reason: String,
}

/// Best-effort batch removal result.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchRemoveOutcome {
    pub succeeded: Vec<String>,
    pub failed: Vec<BatchFailure>,
}

/// One source/target pair for batch copy.
#[derive(Debug, Clone)]
pub struct CopyItem {
    pub source_path: VirtualPath,
    pub target_path: VirtualPath,
}

/// Per-item batch copy status.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CopyItemResult {
    pub source_path: VirtualPath,
    pub target_path: VirtualPath,
    pub status: CopyStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum CopyStatus {
    Copied,
    Skipped,
    Failed,
    RequiresClientSideCopy,
}

/// Batch copy result. When any pair crosses storage configs the server
/// does not stream bytes; the caller runs presigned upload + download
/// cycles for the flagged items and then calls `batch_copy_commit`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchCopyOutcome {
    pub requires_client_side_copy: bool,
    pub results: Vec<CopyItemResult>,
}

/// Paginated search result.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchOutcome {
    pub total: usize,
    pub limit: usize,
    pub offset: usize,
    pub items: Vec<Entry>,
}

/// Mode A multipart session descriptor returned from `initiate`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MultipartInitOutcome {
    pub upload_id: String,
    pub key: String,
    pub recommended_part_size: u64,
}

/// Presigned client-direct upload descriptor.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PresignPutOutcome {
    pub presigned_url: String,
    pub object_key: String,
    pub file_id: String,
    pub content_type: String,
    pub expires_in_secs: u64,
}

/// Parameters for recording a committed client-direct upload.
#[derive(Debug, Clone)]
pub struct PresignCommit {
    pub file_id: String,
    pub object_key: String,
    pub target_path: VirtualPath,
    pub etag: Option<String>,
    pub file_size: Option<u64>,
    pub storage_config_id: String,
    pub mount_id: String,
}

/// How a download request is satisfied.
pub enum DownloadOutcome {
    /// Stream the object through the gateway.
    Proxy {
        body: ObjectBody,
        content_type: String,
        content_disposition: String,
    },
    /// Redirect the client to a presigned URL.
    Redirect(String),
}

/// Every directory that must observe a mutation at `sub_path`: the
/// chain from the mount root down to the target's parent.
#[must_use]
pub fn parent_chain(sub_path: &str) -> Vec<String> {
    let trimmed = sub_path.trim_end_matches('/');
    let segments: Vec<&str> = trimmed.split('/').filter(|s| !s.is_empty()).collect();
    let mut chain = vec![String::new()];
    let mut acc = String::new();
    for segment in segments.iter().take(segments.len().saturating_sub(1)) {
        acc.push_str(segment);
        acc.push('/');
        chain.push(acc.clone());
    }
    chain
}

/// The operation façade over the mounted namespace.
pub struct FileSystem {
    store: Arc<MetaStore>,
    resolver: PathResolver,
    cache: DirectoryCache,
    drivers: DriverCache,
    external_url: String,
    upload_config: UploadConfig,
}

impl FileSystem {
    #[must_use]
    pub fn new(store: Arc<MetaStore>, secret_box: SecretBox, config: &GatewayConfig) -> Self {
        Self {
            resolver: PathResolver::new(store.clone()),
            cache: DirectoryCache::new(config.cache.max_entries),
            drivers: DriverCache::new(secret_box),
            external_url: config.server.external_url.clone(),
            upload_config: config.upload.clone(),
            store,
        }
    }

    #[must_use]
    pub fn store(&self) -> &Arc<MetaStore> {
        &self.store
    }

    #[must_use]
    pub fn cache(&self) -> &DirectoryCache {
        &self.cache
    }

    #[must_use]
    pub fn drivers(&self) -> &DriverCache {
        &self.drivers
    }

    /// Flush caches at shutdown. In-flight multipart aborts are spawned
    /// tasks; the caller bounds the grace period it waits for them.
    pub fn shutdown(&self) {
        self.cache.clear();
    }

    fn driver(&self, resolved: &ResolvedPath) -> Result<Arc<S3Driver>> {
        self.drivers.driver_for(&resolved.storage)
    }

    fn effective_ttl(resolved: &ResolvedPath) -> Duration {
        // A zero mount TTL disables caching outright; otherwise the
        // longer of the mount and storage values wins.
        if resolved.mount.cache_ttl_secs == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs(resolved.mount.cache_ttl_secs.max(resolved.storage.cache_ttl_secs))
    }

    fn modified_from_millis(millis: u64) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(millis as i64)
    }

    /// Coherence after a mutation: (1) the store mutation has committed,
    /// (2) bump every ancestor's modification time, (3) drop affected
    /// cache entries.
    fn after_mutation(&self, resolved: &ResolvedPath) -> Result<()> {
        let now_millis = Utc::now().timestamp_millis() as u64;
        let chain = parent_chain(&resolved.sub_path);
        for dir in &chain {
            self.store
                .bump_parent_modified(&resolved.mount.id, dir, now_millis)?;
        }
        self.cache
            .invalidate_ancestors(&resolved.mount.id, &resolved.dir_sub_path());
        Ok(())
    }

    async fn capacity_budget(
        &self,
        driver: &S3Driver,
        storage: &StorageConfigRecord,
        incoming: Option<u64>,
    ) -> Result<Option<CapacityBudget>> {
        let Some(capacity) = storage.total_capacity_bytes else {
            return Ok(None);
        };
        let prefix = crate::resolver::object_key_for(&storage.root_prefix, "");
        let used = driver.usage_bytes(&prefix).await?;
        let budget = CapacityBudget { used, capacity };
        if let Some(incoming) = incoming {
            if incoming > budget.remaining() {
                return Err(Error::CapacityExhausted {
                    used,
                    capacity,
                    requested: incoming,
                });
            }
        }
        Ok(Some(budget))
    }

    // =========== Listing & stat ===========

    /// Directory listing, cache-first.
    pub async fn list(&self, path: &VirtualPath, auth: &AuthResult) -> Result<Arc<DirectoryListing>> {
        let dir = path.as_dir();
        let resolved = match self.resolver.resolve(&dir, auth) {
            Ok(resolved) => resolved,
            Err(Error::MountNotFound(_)) => return self.list_mount_points(&dir, auth),
            Err(e) => return Err(e),
        };
        let cache_key = CacheKey {
            mount_id: resolved.mount.id.clone(),
            sub_path: resolved.dir_sub_path(),
            principal_class: auth.principal_class(),
        };
        let ttl = Self::effective_ttl(&resolved);
        if !ttl.is_zero() {
            if let Some(hit) = self.cache.get(&cache_key) {
                return Ok(hit);
            }
        }
        let listing = Arc::new(self.fetch_listing(&resolved, &dir).await?);
        self.store
            .touch_mount(&resolved.mount.id, Utc::now().timestamp())?;
        self.cache.put(cache_key, listing.clone(), ttl);
        Ok(listing)
    }

    /// Listing for a directory above every mount: synthesise the next
    /// mount-path segments as directories.
    fn list_mount_points(
        &self,
        dir: &VirtualPath,
        auth: &AuthResult,
    ) -> Result<Arc<DirectoryListing>> {
        let mut names: Vec<String> = Vec::new();
        for mount in self.store.list_mounts()? {
            if !mount.mount_path.has_prefix(dir) || !mount.mount_path.has_prefix(&auth.allowed_prefix)
            {
                continue;
            }
            if let Some(rest) = mount.mount_path.strip_prefix(dir) {
                if let Some(first) = rest.split('/').find(|s| !s.is_empty()) {
                    if !names.iter().any(|n| n == first) {
                        names.push(first.to_string());
                    }
                }
            }
        }
        if names.is_empty() {
            return Err(Error::MountNotFound(dir.to_string()));
        }
        names.sort();
        let entries = names
            .into_iter()
            .map(|name| {
                let path = dir.join(&name)?.as_dir();
                Ok(Entry::directory(&name, path, None))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Arc::new(DirectoryListing {
            path: dir.clone(),
            entries,
            refreshed_at: Utc::now(),
        }))
    }

    async fn fetch_listing(
        &self,
        resolved: &ResolvedPath,
        dir: &VirtualPath,
    ) -> Result<DirectoryListing> {
        let driver = self.driver(resolved)?;
        let prefix = resolved.dir_prefix();
        let page = driver.list_dir(&prefix).await?;
        let mut entries: Vec<Entry> = Vec::new();

        for common_prefix in &page.common_prefixes {
            let Some(name) = common_prefix
                .trim_end_matches('/')
                .rsplit('/')
                .next()
                .filter(|n| !n.is_empty())
            else {
                continue;
            };
            if format!("{name}/") == ROOT_MARKER {
                continue;
            }
            let sub_dir = format!("{}{name}/", resolved.dir_sub_path());
            let modified = self
                .store
                .get_parent_modified(&resolved.mount.id, &sub_dir)?
                .and_then(Self::modified_from_millis);
            entries.push(Entry::directory(name, dir.join(name)?.as_dir(), modified));
        }

        for object in &page.objects {
            // Skip explicit directory markers; common prefixes already
            // cover them.
            if object.key.ends_with('/') {
                continue;
            }
            let Some(name) = object.key.strip_prefix(&prefix).filter(|n| !n.is_empty()) else {
                continue;
            };
            if name.contains('/') || format!("{name}/") == ROOT_MARKER {
                continue;
            }
            entries.push(Entry {
                name: name.to_string(),
                path: dir.join(name)?,
                is_directory: false,
                size: object.size,
                modified: object.modified,
                mimetype: infer_content_type(name),
                etag: object.etag.clone(),
                preview_url: None,
                download_url: None,
            });
        }

        entries.sort_by(|a, b| {
            b.is_directory
                .cmp(&a.is_directory)
                .then_with(|| a.name.cmp(&b.name))
        });
        Ok(DirectoryListing {
            path: dir.clone(),
            entries,
            refreshed_at: Utc::now(),
        })
    }

    /// Whether any mount lives at or below this directory.
    fn has_mounts_below(&self, dir: &VirtualPath, auth: &AuthResult) -> Result<bool> {
        Ok(self.store.list_mounts()?.iter().any(|mount| {
            mount.mount_path.has_prefix(dir) && mount.mount_path.has_prefix(&auth.allowed_prefix)
        }))
    }

    /// Single-entry metadata with preview/download URLs.
    pub async fn stat(&self, path: &VirtualPath, auth: &AuthResult) -> Result<Entry> {
        let name = path.file_name().unwrap_or("").to_string();
        let resolved = match self.resolver.resolve(path, auth) {
            Ok(resolved) => resolved,
            // Directories above every mount exist as long as something
            // is mounted below them.
            Err(Error::MountNotFound(_)) => {
                if self.has_mounts_below(&path.as_dir(), auth)? {
                    return Ok(Entry::directory(&name, path.as_dir(), None));
                }
                return Err(Error::MountNotFound(path.to_string()));
            }
            Err(e) => return Err(e),
        };

        if resolved.sub_path.is_empty() {
            // Mount roots always exist.
            let modified = self
                .store
                .get_parent_modified(&resolved.mount.id, "")?
                .and_then(Self::modified_from_millis);
            return Ok(Entry::directory(&name, path.as_dir(), modified));
        }

        let driver = self.driver(&resolved)?;
        if path.is_dir() {
            return self.stat_as_directory(&resolved, path, &driver).await;
        }
        let attrs = match driver.head(&resolved.effective_object_key()).await {
            Ok(attrs) => attrs,
            Err(e) if e.is_not_found() => {
                // The path may still be a directory: an explicit marker
                // or a bare common prefix.
                return self.stat_as_directory(&resolved, path, &driver).await;
            }
            Err(e) => return Err(e),
        };

        if attrs.content_type.as_deref() == Some(DIRECTORY_CONTENT_TYPE) {
            return Ok(Entry::directory(&name, path.as_dir(), attrs.modified));
        }

        let FileUrls {
            preview_url,
            download_url,
        } = build_file_urls(&driver, &resolved, path, &self.external_url).await?;
        Ok(Entry {
            name: name.clone(),
            path: path.clone(),
            is_directory: false,
            size: attrs.size,
            modified: attrs.modified,
            mimetype: attrs
                .content_type
                .filter(|ct| ct != "application/octet-stream")
                .unwrap_or_else(|| infer_content_type(&name)),
            etag: attrs.etag,
            preview_url: Some(preview_url),
            download_url: Some(download_url),
        })
    }

    async fn stat_as_directory(
        &self,
        resolved: &ResolvedPath,
        path: &VirtualPath,
        driver: &S3Driver,
    ) -> Result<Entry> {
        let prefix = resolved.dir_prefix();
        if let Ok(attrs) = driver.head(&prefix).await {
            return Ok(Entry::directory(
                path.file_name().unwrap_or(""),
                path.as_dir(),
                attrs.modified,
            ));
        }
        let probe = driver.list_page(&prefix, Some("/"), None, 1).await?;
        if probe.objects.is_empty() && probe.common_prefixes.is_empty() {
            return Err(Error::not_found(path.to_string()));
        }
        let modified = self
            .store
            .get_parent_modified(&resolved.mount.id, &resolved.dir_sub_path())?
            .and_then(Self::modified_from_millis);
        Ok(Entry::directory(
            path.file_name().unwrap_or(""),
            path.as_dir(),
            modified,
        ))
    }

    /// Whether a path currently exists (as a file or directory).
    pub async fn exists(&self, path: &VirtualPath, auth: &AuthResult) -> Result<bool> {
        match self.stat(path, auth).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    // =========== Mutations ===========

    /// Idempotent directory creation via an explicit marker object.
    pub async fn mkdir(&self, path: &VirtualPath, auth: &AuthResult) -> Result<()> {
        let dir = path.as_dir();
        let resolved = self.resolver.resolve(&dir, auth)?;
        let driver = self.driver(&resolved)?;
        let key = resolved.effective_object_key();
        driver
            .put(&key, Bytes::new(), DIRECTORY_CONTENT_TYPE)
            .await?;
        self.after_mutation(&resolved)?;
        debug!(path = %dir, key, "created directory marker");
        Ok(())
    }

    /// Small-object upload from a fully buffered body.
    pub async fn upload(
        &self,
        path: &VirtualPath,
        data: Bytes,
        use_multipart: bool,
        auth: &AuthResult,
    ) -> Result<UploadOutcome> {
        let resolved = self.resolver.resolve(path, auth)?;
        if resolved.sub_path.is_empty() || path.is_dir() {
            return Err(Error::invalid_path("upload target must be a file path"));
        }
        let name = path.file_name().unwrap_or_default();
        let content_type = infer_content_type(name);
        let driver = self.driver(&resolved)?;
        let size = data.len() as u64;
        let budget = self
            .capacity_budget(&driver, &resolved.storage, Some(size))
            .await?;
        let key = resolved.object_key.clone();

        let etag = if use_multipart && data.len() > self.upload_config.part_size {
            let stream =
                futures::stream::once(async move { Ok::<Bytes, std::io::Error>(data) });
            let completed = upload_stream(
                &driver,
                &key,
                &content_type,
                Box::pin(stream),
                &StreamUploadConfig {
                    part_size: self.upload_config.part_size,
                    queue_depth: self.upload_config.queue_depth,
                    capacity: budget,
                },
            )
            .await?;
            completed.etag
        } else {
            driver.put(&key, data, &content_type).await?.etag
        };

        self.after_mutation(&resolved)?;
        Ok(UploadOutcome {
            object_key: key,
            etag,
            size,
            mimetype: content_type,
        })
    }

    /// Streaming upload for WebDAV PUT and chunked bodies.
    ///
    /// The mode comes from the settings table (`webdav_upload_mode`),
    /// falling back to the configured default. Direct mode applies only
    /// when the declared length fits the threshold; chunked bodies with
    /// no declared length always stream through the multipart pipeline.
    pub async fn upload_streaming<S, E>(
        &self,
        path: &VirtualPath,
        stream: S,
        declared_len: Option<u64>,
        auth: &AuthResult,
    ) -> Result<UploadOutcome>
    where
        S: Stream<Item = std::result::Result<Bytes, E>> + Unpin,
        E: std::fmt::Display,
    {
        let resolved = self.resolver.resolve(path, auth)?;
        if resolved.sub_path.is_empty() || path.is_dir() {
            return Err(Error::invalid_path("upload target must be a file path"));
        }
        let name = path.file_name().unwrap_or_default();
        let content_type = infer_content_type(name);
        let driver = self.driver(&resolved)?;
        let key = resolved.object_key.clone();
        let budget = self
            .capacity_budget(&driver, &resolved.storage, declared_len)
            .await?;

        // Content-Length: 0 writes the empty object without ever opening
        // a multipart session.
        if declared_len == Some(0) {
            let result = driver.put(&key, Bytes::new(), &content_type).await?;
            self.after_mutation(&resolved)?;
            return Ok(UploadOutcome {
                object_key: key,
                etag: result.etag,
                size: 0,
                mimetype: content_type,
            });
        }

        let mode = self.effective_upload_mode()?;
        let direct = mode == UploadMode::Direct
            && declared_len.is_some_and(|len| len <= self.upload_config.direct_threshold);

        let completed = if direct {
            let body = collect_bounded(stream, self.upload_config.direct_threshold).await?;
            let size = body.len() as u64;
            let etag = driver.put(&key, body, &content_type).await?.etag;
            davit_s3::CompletedUpload {
                etag,
                size,
                parts: 0,
            }
        } else {
            upload_stream(
                &driver,
                &key,
                &content_type,
                Box::pin(stream),
                &StreamUploadConfig {
                    part_size: self.upload_config.part_size,
                    queue_depth: self.upload_config.queue_depth,
                    capacity: budget,
                },
            )
            .await?
        };

        if let Some(declared) = declared_len {
            if declared != completed.size {
                warn!(path = %path, declared, actual = completed.size, "size mismatch, removing object");
                if let Err(e) = driver.delete(&key).await {
                    warn!(key, "failed to remove mismatched object: {e}");
                }
                return Err(Error::SizeMismatch {
                    declared,
                    actual: completed.size,
                });
            }
        }

        self.after_mutation(&resolved)?;
        Ok(UploadOutcome {
            object_key: key,
            etag: completed.etag,
            size: completed.size,
            mimetype: content_type,
        })
    }

    fn effective_upload_mode(&self) -> Result<UploadMode> {
        match self.store.get_setting(UPLOAD_MODE_SETTING)?.as_deref() {
            Some("direct") => Ok(UploadMode::Direct),
            Some("multipart") => Ok(UploadMode::Multipart),
            Some(other) => {
                warn!(value = other, "unknown {UPLOAD_MODE_SETTING} setting, using default");
                Ok(self.upload_config.mode)
            }
            None => Ok(self.upload_config.mode),
        }
    }

    /// Serve a file: proxy stream or presigned redirect per the mount.
    pub async fn download(
        &self,
        path: &VirtualPath,
        range: Option<&str>,
        disposition: Disposition,
        auth: &AuthResult,
    ) -> Result<DownloadOutcome> {
        let resolved = self.resolver.resolve(path, auth)?;
        if resolved.sub_path.is_empty() || path.is_dir() {
            return Err(Error::invalid_path("cannot download a directory"));
        }
        let driver = self.driver(&resolved)?;
        let name = path.file_name().unwrap_or_default();
        self.store
            .touch_mount(&resolved.mount.id, Utc::now().timestamp())?;

        if resolved.mount.web_proxy {
            let body = driver.get(&resolved.object_key, range).await?;
            return Ok(DownloadOutcome::Proxy {
                body,
                content_type: content_type_for(name, disposition),
                content_disposition: content_disposition(name, disposition),
            });
        }
        let expires = Duration::from_secs(resolved.storage.default_signed_ttl_secs.max(1));
        let url = driver
            .presign_get(
                &resolved.object_key,
                expires,
                &content_disposition(name, disposition),
                &content_type_for(name, disposition),
            )
            .await?;
        Ok(DownloadOutcome::Redirect(url))
    }

    /// A time-limited presigned link for sharing.
    pub async fn file_link(
        &self,
        path: &VirtualPath,
        expires_in_secs: Option<u64>,
        force_download: bool,
        auth: &AuthResult,
    ) -> Result<String> {
        let resolved = self.resolver.resolve(path, auth)?;
        if resolved.sub_path.is_empty() || path.is_dir() {
            return Err(Error::invalid_path("cannot link a directory"));
        }
        let driver = self.driver(&resolved)?;
        let name = path.file_name().unwrap_or_default();
        let expires = expires_in_secs
            .unwrap_or(resolved.storage.default_signed_ttl_secs)
            .clamp(1, MAX_SIGNED_TTL_SECS);
        let disposition = if force_download {
            Disposition::Download
        } else {
            Disposition::Preview
        };
        driver
            .presign_get(
                &resolved.object_key,
                Duration::from_secs(expires),
                &content_disposition(name, disposition),
                &content_type_for(name, disposition),
            )
            .await
    }

    /// Replace a text file's content in place.
    pub async fn update_inline(
        &self,
        path: &VirtualPath,
        content: String,
        auth: &AuthResult,
    ) -> Result<UploadOutcome> {
        self.upload(path, Bytes::from(content), false, auth).await
    }

    /// Remove a file or directory tree. The root, mount roots, and the
    /// sentinel marker are never removed.
    pub async fn remove(&self, path: &VirtualPath, auth: &AuthResult) -> Result<()> {
        let resolved = self.resolver.resolve_for_removal(path, auth)?;
        let driver = self.driver(&resolved)?;

        let is_directory = if path.is_dir() {
            true
        } else {
            match driver.head(&resolved.object_key).await {
                Ok(attrs) => attrs.content_type.as_deref() == Some(DIRECTORY_CONTENT_TYPE),
                Err(e) if e.is_not_found() => {
                    // No object: only a directory (marker or implicit
                    // prefix) can still be here.
                    self.stat_as_directory(&resolved, path, &driver).await?;
                    true
                }
                Err(e) => return Err(e),
            }
        };

        if is_directory {
            let prefix = resolved.dir_prefix();
            let keys: Vec<String> = driver
                .list_keys_recursive(&prefix, REMOVE_WALK_LIMIT)
                .await?
                .into_iter()
                .map(|attrs| attrs.key)
                .filter(|key| !key.ends_with(ROOT_MARKER))
                .collect();
            if !keys.is_empty() {
                let failed = driver.delete_batch(&keys).await?;
                if !failed.is_empty() {
                    return Err(Error::upstream(format!(
                        "{} of {} objects failed to delete",
                        failed.len(),
                        keys.len()
                    )));
                }
            }
            // The marker itself may not appear in the listing when the
            // directory was only implicit.
            driver.delete(&prefix).await.ok();
            self.cache.invalidate_where(|key| {
                key.mount_id == resolved.mount.id
                    && key.sub_path.starts_with(&resolved.dir_sub_path())
            });
        } else {
            driver.delete(&resolved.object_key).await?;
        }

        self.after_mutation(&resolved)?;
        info!(path = %path, "removed");
        Ok(())
    }

    /// Best-effort removal of many paths.
    pub async fn batch_remove(
        &self,
        paths: &[VirtualPath],
        auth: &AuthResult,
    ) -> BatchRemoveOutcome {
        let mut outcome = BatchRemoveOutcome::default();
        for path in paths {
            match self.remove(path, auth).await {
                Ok(()) => outcome.succeeded.push(path.to_string()),
                Err(e) => outcome.failed.push(BatchFailure {
                    path: path.to_string(),
                    reason: e.wire_code().to_string(),
                }),
            }
        }
        outcome
    }

    /// Move a file or directory. Same storage config only; a crash
    /// between copy and delete leaves the source in place.
    pub async fn move_path(
        &self,
        old_path: &VirtualPath,
        new_path: &VirtualPath,
        overwrite: bool,
        auth: &AuthResult,
    ) -> Result<()> {
        let source = self.resolver.resolve_for_removal(old_path, auth)?;
        let target = self.resolver.resolve(new_path, auth)?;
        if target.sub_path.is_empty() {
            return Err(Error::invalid_path("cannot move onto a mount root"));
        }
        if source.storage.id != target.storage.id {
            return Err(Error::CrossMountRename);
        }
        let driver = self.driver(&source)?;

        if !overwrite && self.exists(new_path, auth).await? {
            return Err(Error::conflict(format!("{new_path} already exists")));
        }

        let source_is_dir = old_path.is_dir()
            || matches!(
                driver.head(&source.object_key).await,
                Err(ref e) if e.is_not_found()
            );

        if source_is_dir {
            let source_prefix = source.dir_prefix();
            let target_prefix = target.dir_prefix();
            let objects = driver
                .list_keys_recursive(&source_prefix, REMOVE_WALK_LIMIT)
                .await?;
            if objects.is_empty() {
                return Err(Error::not_found(old_path.to_string()));
            }
            for object in &objects {
                let suffix = object.key.strip_prefix(&source_prefix).unwrap_or(&object.key);
                let target_key = format!("{target_prefix}{suffix}");
                driver.copy(&object.key, &target_key).await?;
            }
            // Copy phase done; deletions are best-effort.
            let keys: Vec<String> = objects.into_iter().map(|o| o.key).collect();
            for (key, reason) in driver.delete_batch(&keys).await.unwrap_or_default() {
                warn!(key, reason, "move left source object behind");
            }
            self.cache.invalidate_where(|key| {
                key.mount_id == source.mount.id
                    && key.sub_path.starts_with(&source.dir_sub_path())
            });
        } else {
            driver.head(&source.object_key).await?;
            driver.copy(&source.object_key, &target.object_key).await?;
            driver.delete(&source.object_key).await?;
        }

        self.after_mutation(&source)?;
        self.after_mutation(&target)?;
        info!(from = %old_path, to = %new_path, "moved");
        Ok(())
    }

    /// Rename within the same mount. Refuses to overwrite.
    pub async fn rename(
        &self,
        old_path: &VirtualPath,
        new_path: &VirtualPath,
        auth: &AuthResult,
    ) -> Result<()> {
        let source = self.resolver.resolve(old_path, auth)?;
        let target = self.resolver.resolve(new_path, auth)?;
        if source.mount.id != target.mount.id {
            return Err(Error::CrossMountRename);
        }
        self.move_path(old_path, new_path, false, auth).await
    }

    /// Server-side copy within one storage config. Copies a single
    /// object, or a whole tree when the source is a directory.
    pub async fn copy_path(
        &self,
        source_path: &VirtualPath,
        target_path: &VirtualPath,
        overwrite: bool,
        auth: &AuthResult,
    ) -> Result<()> {
        let source = self.resolver.resolve(source_path, auth)?;
        let target = self.resolver.resolve(target_path, auth)?;
        if target.sub_path.is_empty() {
            return Err(Error::invalid_path("cannot copy onto a mount root"));
        }
        if source.storage.id != target.storage.id {
            return Err(Error::CrossMountRename);
        }
        let driver = self.driver(&source)?;
        if !overwrite && self.exists(target_path, auth).await? {
            return Err(Error::conflict(format!("{target_path} already exists")));
        }

        let source_is_dir = source_path.is_dir()
            || matches!(
                driver.head(&source.object_key).await,
                Err(ref e) if e.is_not_found()
            );
        if source_is_dir {
            let source_prefix = source.dir_prefix();
            let target_prefix = target.dir_prefix();
            let objects = driver
                .list_keys_recursive(&source_prefix, REMOVE_WALK_LIMIT)
                .await?;
            if objects.is_empty() {
                return Err(Error::not_found(source_path.to_string()));
            }
            for object in &objects {
                let suffix = object.key.strip_prefix(&source_prefix).unwrap_or(&object.key);
                driver
                    .copy(&object.key, &format!("{target_prefix}{suffix}"))
                    .await?;
            }
        } else {
            driver.head(&source.object_key).await?;
            driver.copy(&source.object_key, &target.object_key).await?;
        }
        self.after_mutation(&target)?;
        Ok(())
    }

    /// Batch copy. Same-storage pairs are copied server-side; pairs that
    /// cross storage configs are flagged for client-side transfer.
    pub async fn batch_copy(
        &self,
        items: &[CopyItem],
        skip_existing: bool,
        auth: &AuthResult,
    ) -> Result<BatchCopyOutcome> {
        let mut results = Vec::with_capacity(items.len());
        let mut requires_client_side_copy = false;

        for item in items {
            let source = match self.resolver.resolve(&item.source_path, auth) {
                Ok(r) => r,
                Err(e) => {
                    results.push(CopyItemResult {
                        source_path: item.source_path.clone(),
                        target_path: item.target_path.clone(),
                        status: CopyStatus::Failed,
                        reason: Some(e.wire_code().to_string()),
                    });
                    continue;
                }
            };
            let target = match self.resolver.resolve(&item.target_path, auth) {
                Ok(r) => r,
                Err(e) => {
                    results.push(CopyItemResult {
                        source_path: item.source_path.clone(),
                        target_path: item.target_path.clone(),
                        status: CopyStatus::Failed,
                        reason: Some(e.wire_code().to_string()),
                    });
                    continue;
                }
            };

            if source.storage.id != target.storage.id {
                requires_client_side_copy = true;
                results.push(CopyItemResult {
                    source_path: item.source_path.clone(),
                    target_path: item.target_path.clone(),
                    status: CopyStatus::RequiresClientSideCopy,
                    reason: None,
                });
                continue;
            }

            let driver = self.driver(&source)?;
            if skip_existing && driver.head(&target.object_key).await.is_ok() {
                results.push(CopyItemResult {
                    source_path: item.source_path.clone(),
                    target_path: item.target_path.clone(),
                    status: CopyStatus::Skipped,
                    reason: None,
                });
                continue;
            }
            match driver.copy(&source.object_key, &target.object_key).await {
                Ok(_) => {
                    self.after_mutation(&target)?;
                    results.push(CopyItemResult {
                        source_path: item.source_path.clone(),
                        target_path: item.target_path.clone(),
                        status: CopyStatus::Copied,
                        reason: None,
                    });
                }
                Err(e) => results.push(CopyItemResult {
                    source_path: item.source_path.clone(),
                    target_path: item.target_path.clone(),
                    status: CopyStatus::Failed,
                    reason: Some(e.wire_code().to_string()),
                }),
            }
        }

        Ok(BatchCopyOutcome {
            requires_client_side_copy,
            results,
        })
    }

    /// After a client-side copy cycle, refresh target state.
    pub async fn batch_copy_commit(
        &self,
        target_mount_id: &str,
        files: &[VirtualPath],
        auth: &AuthResult,
    ) -> Result<()> {
        let mount = self
            .store
            .get_mount(target_mount_id)?
            .ok_or_else(|| Error::not_found(format!("mount {target_mount_id}")))?;
        for path in files {
            let resolved = self.resolver.resolve(path, auth)?;
            if resolved.mount.id != mount.id {
                return Err(Error::invalid_path(format!(
                    "{path} does not resolve to mount {target_mount_id}"
                )));
            }
            self.after_mutation(&resolved)?;
        }
        Ok(())
    }

    // =========== Search ===========

    /// Substring search over cached listings, falling back to a bounded
    /// listing walk per mount.
    pub async fn search(
        &self,
        query: &str,
        mount_id: Option<&str>,
        path_prefix: Option<&VirtualPath>,
        limit: usize,
        offset: usize,
        auth: &AuthResult,
    ) -> Result<SearchOutcome> {
        if query.chars().count() < 2 {
            return Err(Error::invalid_path("search query must be at least 2 characters"));
        }
        auth.require_mount()?;
        let needle = query.to_lowercase();
        let mut matches: Vec<Entry> = Vec::new();

        for mount in self.store.list_mounts()? {
            if mount_id.is_some_and(|id| id != mount.id) {
                continue;
            }
            // A mount is searchable when the principal can see any part
            // of it.
            let visible = mount.mount_path.has_prefix(&auth.allowed_prefix)
                || auth.allowed_prefix.has_prefix(&mount.mount_path);
            if !visible {
                continue;
            }

            let cached = self
                .cache
                .snapshot_for_mount(&mount.id, &auth.principal_class());
            if cached.is_empty() {
                let Some(storage) = self.store.get_storage_config(&mount.storage_config_id)?
                else {
                    continue;
                };
                let driver = self.drivers.driver_for(&storage)?;
                let prefix = crate::resolver::object_key_for(&storage.root_prefix, "");
                let objects = driver.list_keys_recursive(&prefix, SEARCH_WALK_LIMIT).await?;
                for object in objects {
                    if object.key.ends_with('/') {
                        continue;
                    }
                    let suffix = object.key.strip_prefix(&prefix).unwrap_or(&object.key);
                    let Some(name) = suffix.rsplit('/').next().filter(|n| !n.is_empty()) else {
                        continue;
                    };
                    if !name.to_lowercase().contains(&needle) {
                        continue;
                    }
                    let Ok(path) =
                        VirtualPath::parse(&format!("{}{suffix}", mount.mount_path))
                    else {
                        continue;
                    };
                    if !path.has_prefix(&auth.allowed_prefix) {
                        continue;
                    }
                    if path_prefix.is_some_and(|p| !path.has_prefix(p)) {
                        continue;
                    }
                    matches.push(Entry {
                        name: name.to_string(),
                        path,
                        is_directory: false,
                        size: object.size,
                        modified: object.modified,
                        mimetype: infer_content_type(name),
                        etag: object.etag,
                        preview_url: None,
                        download_url: None,
                    });
                }
            } else {
                for listing in cached {
                    for entry in &listing.entries {
                        if !entry.name.to_lowercase().contains(&needle) {
                            continue;
                        }
                        if path_prefix.is_some_and(|p| !entry.path.has_prefix(p)) {
                            continue;
                        }
                        matches.push(entry.clone());
                    }
                }
            }
        }

        matches.sort_by(|a, b| a.path.as_str().cmp(b.path.as_str()));
        matches.dedup_by(|a, b| a.path == b.path);
        let total = matches.len();
        let items = matches
            .into_iter()
            .skip(offset)
            .take(limit.max(1))
            .collect();
        Ok(SearchOutcome {
            total,
            limit: limit.max(1),
            offset,
            items,
        })
    }

    // =========== Presigned client-direct uploads ===========

    /// Sign a PUT URL for a client-direct upload into a directory.
    pub async fn presign_put(
        &self,
        target_dir: &VirtualPath,
        file_name: &str,
        auth: &AuthResult,
    ) -> Result<PresignPutOutcome> {
        let file_path = target_dir.as_dir().join(file_name)?;
        let resolved = self.resolver.resolve(&file_path, auth)?;
        let driver = self.driver(&resolved)?;
        // Content type is inferred from the file name, never trusted
        // from the client.
        let content_type = infer_content_type(file_name);
        let expires = resolved.storage.default_signed_ttl_secs.max(1);
        let url = driver
            .presign_put(
                &resolved.object_key,
                Duration::from_secs(expires),
                &content_type,
            )
            .await?;
        Ok(PresignPutOutcome {
            presigned_url: url,
            object_key: resolved.object_key,
            file_id: Uuid::new_v4().to_string(),
            content_type,
            expires_in_secs: expires,
        })
    }

    /// Record a completed client-direct upload.
    pub async fn presign_commit(
        &self,
        commit: PresignCommit,
        auth: &AuthResult,
    ) -> Result<SharedFileRecord> {
        let resolved = self.resolver.resolve(&commit.target_path, auth)?;
        if resolved.mount.id != commit.mount_id || resolved.storage.id != commit.storage_config_id
        {
            return Err(Error::invalid_path(
                "target path does not resolve to the claimed mount",
            ));
        }
        if commit.etag.is_none() {
            // Some S3-compatible services strip the ETag under CORS.
            warn!(object_key = %commit.object_key, "presign commit without etag");
        }
        let record = SharedFileRecord {
            id: commit.file_id,
            object_key: commit.object_key,
            storage_config_id: commit.storage_config_id,
            mount_id: commit.mount_id,
            virtual_path: commit.target_path.clone(),
            size: commit.file_size,
            etag: commit.etag,
            created_by: auth.principal_id.clone(),
            created_at: Utc::now().timestamp(),
        };
        self.store.put_shared_file(&record)?;
        self.after_mutation(&resolved)?;
        Ok(record)
    }

    // =========== Mode A multipart (client-driven backend proxy) ===========

    /// Open a backend multipart session. No server-side session state is
    /// kept; the caller carries `uploadId` and `key` through the
    /// part/complete/abort calls.
    pub async fn multipart_init(
        &self,
        path: &VirtualPath,
        file_size: Option<u64>,
        auth: &AuthResult,
    ) -> Result<MultipartInitOutcome> {
        let resolved = self.resolver.resolve(path, auth)?;
        if resolved.sub_path.is_empty() || path.is_dir() {
            return Err(Error::invalid_path("multipart target must be a file path"));
        }
        let driver = self.driver(&resolved)?;
        self.capacity_budget(&driver, &resolved.storage, file_size)
            .await?;
        let content_type = infer_content_type(path.file_name().unwrap_or_default());
        let upload_id = driver
            .multipart_init(&resolved.object_key, &content_type)
            .await?;
        Ok(MultipartInitOutcome {
            upload_id,
            key: resolved.object_key,
            recommended_part_size: resolved.storage.provider.recommended_part_size(),
        })
    }

    /// Forward one raw part body to the object store.
    pub async fn multipart_part(
        &self,
        path: &VirtualPath,
        upload_id: &str,
        part_number: i32,
        data: Bytes,
        auth: &AuthResult,
    ) -> Result<String> {
        if !(1..=10_000).contains(&part_number) {
            return Err(Error::invalid_path(
                "part number must be between 1 and 10000",
            ));
        }
        let resolved = self.resolver.resolve(path, auth)?;
        let driver = self.driver(&resolved)?;
        driver
            .multipart_part(&resolved.object_key, upload_id, part_number, data)
            .await
    }

    /// Commit a backend multipart session from the submitted part list.
    pub async fn multipart_complete(
        &self,
        path: &VirtualPath,
        upload_id: &str,
        parts: &[(i32, String)],
        auth: &AuthResult,
    ) -> Result<UploadOutcome> {
        let resolved = self.resolver.resolve(path, auth)?;
        let driver = self.driver(&resolved)?;
        let result = driver
            .multipart_complete(&resolved.object_key, upload_id, parts)
            .await?;

        let attrs = driver.head(&resolved.object_key).await?;
        // Capacity is enforced around completion; an oversized commit is
        // rolled back rather than left in the bucket.
        if let Some(capacity) = resolved.storage.total_capacity_bytes {
            let prefix =
                crate::resolver::object_key_for(&resolved.storage.root_prefix, "");
            let used = driver.usage_bytes(&prefix).await?;
            if used > capacity {
                warn!(path = %path, used, capacity, "multipart commit exceeded capacity, deleting");
                driver.delete(&resolved.object_key).await.ok();
                return Err(Error::CapacityExhausted {
                    used: used.saturating_sub(attrs.size),
                    capacity,
                    requested: attrs.size,
                });
            }
        }

        self.after_mutation(&resolved)?;
        Ok(UploadOutcome {
            object_key: resolved.object_key.clone(),
            etag: result.etag.or(attrs.etag),
            size: attrs.size,
            mimetype: attrs
                .content_type
                .unwrap_or_else(|| infer_content_type(path.file_name().unwrap_or_default())),
        })
    }

    /// Abort a backend multipart session. Succeeds regardless of the
    /// abort outcome.
    pub async fn multipart_abort(
        &self,
        path: &VirtualPath,
        upload_id: &str,
        auth: &AuthResult,
    ) -> Result<()> {
        let resolved = self.resolver.resolve(path, auth)?;
        let driver = self.driver(&resolved)?;
        if let Err(e) = driver.multipart_abort(&resolved.object_key, upload_id).await {
            warn!(path = %path, upload_id, "multipart abort failed: {e}");
        }
        Ok(())
    }
}

/// Buffer a stream fully, refusing bodies above the limit.
async fn collect_bounded<S, E>(mut stream: S, limit: u64) -> Result<Bytes>
where
    S: Stream<Item = std::result::Result<Bytes, E>> + Unpin,
    E: std::fmt::Display,
{
    use futures::StreamExt;
    let mut buffer = bytes::BytesMut::new();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| Error::internal(format!("request body error: {e}")))?;
        if buffer.len() as u64 + chunk.len() as u64 > limit {
            return Err(Error::PayloadTooLarge { max_size: limit });
        }
        buffer.extend_from_slice(&chunk);
    }
    Ok(buffer.freeze())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parent_chain_for_file() {
        assert_eq!(parent_chain("a/b/c.txt"), vec!["", "a/", "a/b/"]);
    }

    #[test]
    fn test_parent_chain_for_directory() {
        assert_eq!(parent_chain("a/b/"), vec!["", "a/"]);
        assert_eq!(parent_chain("a/"), vec![""]);
    }

    #[test]
    fn test_parent_chain_at_mount_root() {
        assert_eq!(parent_chain("c.txt"), vec![""]);
        assert_eq!(parent_chain(""), vec![""]);
    }

    #[tokio::test]
    async fn test_collect_bounded_accepts_within_limit() {
        let stream = futures::stream::iter(vec![
            Ok::<Bytes, std::io::Error>(Bytes::from_static(b"hello ")),
            Ok(Bytes::from_static(b"world")),
        ]);
        let body = collect_bounded(Box::pin(stream), 64).await.unwrap();
        assert_eq!(&body[..], b"hello world");
    }

    #[tokio::test]
    async fn test_collect_bounded_rejects_oversize() {
        let stream = futures::stream::iter(vec![
            Ok::<Bytes, std::io::Error>(Bytes::from_static(b"0123456789")),
            Ok(Bytes::from_static(b"0123456789")),
        ]);
        let err = collect_bounded(Box::pin(stream), 15).await.unwrap_err();
        assert!(matches!(err, Error::PayloadTooLarge { max_size: 15 }));
    }
}
