//! The S3 driver
//!
//! Thin capability-scoped wrapper over one S3-compatible endpoint.
//! Provider differences (retry budget, timeouts, checksum strictness,
//! path-style addressing) are applied at client construction; the call
//! surface is identical for every provider.

use crate::capability::{Capability, CapabilitySet};
use aws_sdk_s3::Client;
use aws_sdk_s3::config::retry::RetryConfig;
use aws_sdk_s3::config::timeout::TimeoutConfig;
use aws_sdk_s3::config::{
    BehaviorVersion, Credentials, Region, RequestChecksumCalculation, ResponseChecksumValidation,
};
use aws_sdk_s3::error::{ProvideErrorMetadata, SdkError};
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart, Delete, ObjectIdentifier};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use davit_common::{Error, Result};
use davit_meta::StorageConfigRecord;
use std::time::Duration;
use tracing::{debug, warn};

/// Attributes of a stored object.
#[derive(Debug, Clone)]
pub struct ObjectAttrs {
    pub key: String,
    pub size: u64,
    pub modified: Option<DateTime<Utc>>,
    pub etag: Option<String>,
    pub content_type: Option<String>,
}

/// A streaming object body with its attributes.
pub struct ObjectBody {
    pub attrs: ObjectAttrs,
    /// Declared length of this response body (range-aware).
    pub content_length: Option<u64>,
    /// `Content-Range` echoed from the store for range requests.
    pub content_range: Option<String>,
    pub body: ByteStream,
}

impl ObjectBody {
    /// The body as a chunk stream, for handing to an HTTP response.
    pub fn into_byte_stream(
        self,
    ) -> impl futures::Stream<Item = std::io::Result<Bytes>> + Send + 'static {
        tokio_util::io::ReaderStream::new(self.body.into_async_read())
    }
}

/// Result of a write operation.
#[derive(Debug, Clone)]
pub struct PutResult {
    pub etag: Option<String>,
}

/// One page of a delimiter listing.
#[derive(Debug, Clone, Default)]
pub struct ListPage {
    pub objects: Vec<ObjectAttrs>,
    pub common_prefixes: Vec<String>,
    pub next_token: Option<String>,
}

fn to_chrono(dt: &aws_sdk_s3::primitives::DateTime) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(dt.secs(), dt.subsec_nanos())
}

/// Map an SDK failure onto the domain error, after the SDK retry budget
/// is spent. Service-level not-found becomes `notFound`; everything else
/// is an upstream failure whose detail stays server-side.
fn map_sdk_error<E>(e: &SdkError<E>, key: &str) -> Error
where
    E: ProvideErrorMetadata + std::fmt::Debug,
{
    match e {
        SdkError::ServiceError(se) => {
            let code = se.err().code().unwrap_or_default().to_string();
            let status = se.raw().status().as_u16();
            if status == 404 || code == "NoSuchKey" || code == "NotFound" {
                Error::not_found(key.to_string())
            } else {
                Error::upstream(format!("s3 {code} (status {status}) for key {key}"))
            }
        }
        other => Error::upstream(format!("s3 transport error for key {key}: {other}")),
    }
}

fn service_status<E>(e: &SdkError<E>) -> Option<u16> {
    match e {
        SdkError::ServiceError(se) => Some(se.raw().status().as_u16()),
        _ => None,
    }
}

/// Percent-encode one path segment for a `CopySource` header.
fn encode_copy_segment(segment: &str) -> String {
    let mut out = String::with_capacity(segment.len());
    for b in segment.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(b as char);
            }
            _ => out.push_str(&format!("%{b:02X}")),
        }
    }
    out
}

/// A client bound to one bucket of one storage config.
#[derive(Clone)]
pub struct S3Driver {
    client: Client,
    bucket: String,
    storage_config_id: String,
    capabilities: CapabilitySet,
    part_retries: u32,
}

impl S3Driver {
    /// Build a driver from a storage config and its decrypted secret.
    ///
    /// Construction is cheap network-wise (no calls are made) but clients
    /// are still cached per storage config because credential decryption
    /// happens upstream exactly once.
    #[must_use]
    pub fn connect(record: &StorageConfigRecord, secret_access_key: &str) -> Self {
        let credentials = Credentials::new(
            record.access_key_id.clone(),
            secret_access_key.to_string(),
            None,
            None,
            "davit-meta",
        );
        let mut builder = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .credentials_provider(credentials)
            .region(Region::new(record.region.clone()))
            .retry_config(
                RetryConfig::standard()
                    .with_max_attempts(record.provider.max_attempts())
                    .with_initial_backoff(Duration::from_millis(500))
                    .with_max_backoff(Duration::from_secs(10)),
            )
            .timeout_config(
                TimeoutConfig::builder()
                    .operation_timeout(Duration::from_secs(
                        record.provider.operation_timeout_secs(),
                    ))
                    .build(),
            )
            .force_path_style(record.path_style);
        if record.provider.relaxed_checksums() {
            builder = builder
                .request_checksum_calculation(RequestChecksumCalculation::WhenRequired)
                .response_checksum_validation(ResponseChecksumValidation::WhenRequired);
        }
        if let Some(endpoint) = &record.endpoint {
            builder = builder.endpoint_url(endpoint.clone());
        }
        Self {
            client: Client::from_conf(builder.build()),
            bucket: record.bucket.clone(),
            storage_config_id: record.id.clone(),
            capabilities: CapabilitySet::all(),
            part_retries: 3,
        }
    }

    #[must_use]
    pub fn storage_config_id(&self) -> &str {
        &self.storage_config_id
    }

    #[must_use]
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    #[must_use]
    pub fn has_capability(&self, capability: Capability) -> bool {
        self.capabilities.has(capability)
    }

    // =========== Object operations ===========

    /// Object attributes via HeadObject.
    ///
    /// Some S3-compatible services reject HEAD with 403/405; those fall
    /// back to a one-byte ranged GET.
    pub async fn head(&self, key: &str) -> Result<ObjectAttrs> {
        self.capabilities.ensure(Capability::Read)?;
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(out) => Ok(ObjectAttrs {
                key: key.to_string(),
                size: out.content_length().unwrap_or(0).max(0) as u64,
                modified: out.last_modified().and_then(to_chrono),
                etag: out.e_tag().map(ToString::to_string),
                content_type: out.content_type().map(ToString::to_string),
            }),
            Err(e) if matches!(service_status(&e), Some(403 | 405)) => {
                debug!(key, "HeadObject refused, probing with ranged GetObject");
                self.head_via_ranged_get(key).await
            }
            Err(e) => Err(map_sdk_error(&e, key)),
        }
    }

    async fn head_via_ranged_get(&self, key: &str) -> Result<ObjectAttrs> {
        let out = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .range("bytes=0-0")
            .send()
            .await
            .map_err(|e| map_sdk_error(&e, key))?;
        // Content-Range carries the full size: "bytes 0-0/1234"
        let size = out
            .content_range()
            .and_then(|r| r.rsplit_once('/'))
            .and_then(|(_, total)| total.parse().ok())
            .unwrap_or_else(|| out.content_length().unwrap_or(0).max(0) as u64);
        Ok(ObjectAttrs {
            key: key.to_string(),
            size,
            modified: out.last_modified().and_then(to_chrono),
            etag: out.e_tag().map(ToString::to_string),
            content_type: out.content_type().map(ToString::to_string),
        })
    }

    /// Open an object for streaming, optionally with an HTTP `Range`.
    pub async fn get(&self, key: &str, range: Option<&str>) -> Result<ObjectBody> {
        self.capabilities.ensure(Capability::Read)?;
        let mut req = self.client.get_object().bucket(&self.bucket).key(key);
        if let Some(range) = range {
            req = req.range(range);
        }
        let out = req.send().await.map_err(|e| map_sdk_error(&e, key))?;
        let content_length = out.content_length().map(|l| l.max(0) as u64);
        let content_range = out.content_range().map(ToString::to_string);
        let attrs = ObjectAttrs {
            key: key.to_string(),
            size: content_length.unwrap_or(0),
            modified: out.last_modified().and_then(to_chrono),
            etag: out.e_tag().map(ToString::to_string),
            content_type: out.content_type().map(ToString::to_string),
        };
        Ok(ObjectBody {
            attrs,
            content_length,
            content_range,
            body: out.body,
        })
    }

    /// Read a whole (small) object into memory.
    pub async fn get_bytes(&self, key: &str) -> Result<Bytes> {
        let body = self.get(key, None).await?.body;
        let data = body
            .collect()
            .await
            .map_err(|e| Error::upstream(format!("reading body of {key}: {e}")))?;
        Ok(data.into_bytes())
    }

    /// Single-request PutObject.
    pub async fn put(&self, key: &str, data: Bytes, content_type: &str) -> Result<PutResult> {
        self.capabilities.ensure(Capability::Write)?;
        let out = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .body(ByteStream::from(data))
            .send()
            .await
            .map_err(|e| map_sdk_error(&e, key))?;
        Ok(PutResult {
            etag: out.e_tag().map(ToString::to_string),
        })
    }

    /// Delete a single object. S3 delete is idempotent; missing keys
    /// succeed.
    pub async fn delete(&self, key: &str) -> Result<()> {
        self.capabilities.ensure(Capability::Write)?;
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| map_sdk_error(&e, key))?;
        Ok(())
    }

    /// Batch delete. Returns the keys the store reported as failed.
    pub async fn delete_batch(&self, keys: &[String]) -> Result<Vec<(String, String)>> {
        self.capabilities.ensure(Capability::Write)?;
        let mut failed = Vec::new();
        // DeleteObjects caps at 1000 keys per request
        for chunk in keys.chunks(1000) {
            let identifiers = chunk
                .iter()
                .map(|key| {
                    ObjectIdentifier::builder()
                        .key(key)
                        .build()
                        .map_err(|e| Error::internal(e.to_string()))
                })
                .collect::<Result<Vec<_>>>()?;
            let delete = Delete::builder()
                .set_objects(Some(identifiers))
                .quiet(true)
                .build()
                .map_err(|e| Error::internal(e.to_string()))?;
            let out = self
                .client
                .delete_objects()
                .bucket(&self.bucket)
                .delete(delete)
                .send()
                .await
                .map_err(|e| map_sdk_error(&e, "<batch>"))?;
            for err in out.errors() {
                failed.push((
                    err.key().unwrap_or_default().to_string(),
                    err.code().unwrap_or("unknown").to_string(),
                ));
            }
        }
        Ok(failed)
    }

    /// Server-side copy within this bucket.
    pub async fn copy(&self, source_key: &str, target_key: &str) -> Result<PutResult> {
        self.capabilities.ensure(Capability::Copy)?;
        let copy_source = format!(
            "{}/{}",
            self.bucket,
            source_key
                .split('/')
                .map(encode_copy_segment)
                .collect::<Vec<_>>()
                .join("/")
        );
        let out = self
            .client
            .copy_object()
            .bucket(&self.bucket)
            .copy_source(copy_source)
            .key(target_key)
            .send()
            .await
            .map_err(|e| map_sdk_error(&e, source_key))?;
        Ok(PutResult {
            etag: out
                .copy_object_result()
                .and_then(|r| r.e_tag())
                .map(ToString::to_string),
        })
    }

    // =========== Listing ===========

    /// One page of ListObjectsV2.
    pub async fn list_page(
        &self,
        prefix: &str,
        delimiter: Option<&str>,
        continuation_token: Option<&str>,
        max_keys: i32,
    ) -> Result<ListPage> {
        self.capabilities.ensure(Capability::List)?;
        let mut req = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(prefix)
            .max_keys(max_keys);
        if let Some(delimiter) = delimiter {
            req = req.delimiter(delimiter);
        }
        if let Some(token) = continuation_token {
            req = req.continuation_token(token);
        }
        let out = req.send().await.map_err(|e| map_sdk_error(&e, prefix))?;
        let objects = out
            .contents()
            .iter()
            .filter_map(|obj| {
                Some(ObjectAttrs {
                    key: obj.key()?.to_string(),
                    size: obj.size().unwrap_or(0).max(0) as u64,
                    modified: obj.last_modified().and_then(to_chrono),
                    etag: obj.e_tag().map(ToString::to_string),
                    content_type: None,
                })
            })
            .collect();
        let common_prefixes = out
            .common_prefixes()
            .iter()
            .filter_map(|cp| cp.prefix().map(ToString::to_string))
            .collect();
        let next_token = if out.is_truncated().unwrap_or(false) {
            out.next_continuation_token().map(ToString::to_string)
        } else {
            None
        };
        Ok(ListPage {
            objects,
            common_prefixes,
            next_token,
        })
    }

    /// Delimiter listing consumed to exhaustion.
    pub async fn list_dir(&self, prefix: &str) -> Result<ListPage> {
        let mut merged = ListPage::default();
        let mut token: Option<String> = None;
        loop {
            let page = self
                .list_page(prefix, Some("/"), token.as_deref(), 1000)
                .await?;
            merged.objects.extend(page.objects);
            merged.common_prefixes.extend(page.common_prefixes);
            match page.next_token {
                Some(next) => token = Some(next),
                None => break,
            }
        }
        Ok(merged)
    }

    /// Every key under a prefix (no delimiter), up to `limit` keys.
    pub async fn list_keys_recursive(&self, prefix: &str, limit: usize) -> Result<Vec<ObjectAttrs>> {
        let mut keys = Vec::new();
        let mut token: Option<String> = None;
        loop {
            let page = self.list_page(prefix, None, token.as_deref(), 1000).await?;
            keys.extend(page.objects);
            if keys.len() >= limit {
                keys.truncate(limit);
                break;
            }
            match page.next_token {
                Some(next) => token = Some(next),
                None => break,
            }
        }
        Ok(keys)
    }

    /// Total bytes stored under a prefix. Used for capacity enforcement;
    /// walks the full listing.
    pub async fn usage_bytes(&self, prefix: &str) -> Result<u64> {
        let mut total: u64 = 0;
        let mut token: Option<String> = None;
        loop {
            let page = self.list_page(prefix, None, token.as_deref(), 1000).await?;
            total += page.objects.iter().map(|o| o.size).sum::<u64>();
            match page.next_token {
                Some(next) => token = Some(next),
                None => break,
            }
        }
        Ok(total)
    }

    // =========== Presigned URLs ===========

    /// Sign a GET URL with response-header overrides baked in.
    pub async fn presign_get(
        &self,
        key: &str,
        expires_in: Duration,
        content_disposition: &str,
        content_type: &str,
    ) -> Result<String> {
        self.capabilities.ensure(Capability::Presign)?;
        let config = PresigningConfig::expires_in(expires_in)
            .map_err(|e| Error::internal(e.to_string()))?;
        let presigned = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .response_content_disposition(content_disposition)
            .response_content_type(content_type)
            .presigned(config)
            .await
            .map_err(|e| map_sdk_error(&e, key))?;
        Ok(presigned.uri().to_string())
    }

    /// Sign a PUT URL for a client-direct upload.
    pub async fn presign_put(
        &self,
        key: &str,
        expires_in: Duration,
        content_type: &str,
    ) -> Result<String> {
        self.capabilities.ensure(Capability::Presign)?;
        let config = PresigningConfig::expires_in(expires_in)
            .map_err(|e| Error::internal(e.to_string()))?;
        let presigned = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .presigned(config)
            .await
            .map_err(|e| map_sdk_error(&e, key))?;
        Ok(presigned.uri().to_string())
    }

    // =========== Multipart ===========

    /// Start a multipart upload; returns the upload id.
    pub async fn multipart_init(&self, key: &str, content_type: &str) -> Result<String> {
        self.capabilities.ensure(Capability::Multipart)?;
        let out = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| map_sdk_error(&e, key))?;
        out.upload_id()
            .map(ToString::to_string)
            .ok_or_else(|| Error::upstream(format!("no upload id returned for {key}")))
    }

    /// Upload one part, retrying transient failures with exponential
    /// backoff (1 s doubling per attempt).
    pub async fn multipart_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: i32,
        data: Bytes,
    ) -> Result<String> {
        self.capabilities.ensure(Capability::Multipart)?;
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let result = self
                .client
                .upload_part()
                .bucket(&self.bucket)
                .key(key)
                .upload_id(upload_id)
                .part_number(part_number)
                .body(ByteStream::from(data.clone()))
                .send()
                .await;
            match result {
                Ok(out) => {
                    return out
                        .e_tag()
                        .map(ToString::to_string)
                        .ok_or_else(|| Error::upstream(format!("no etag for part {part_number}")));
                }
                Err(e) => {
                    let mapped = map_sdk_error(&e, key);
                    if attempt >= self.part_retries || !mapped.is_retryable() {
                        return Err(mapped);
                    }
                    let backoff = Duration::from_secs(1 << (attempt - 1));
                    warn!(
                        key,
                        part_number, attempt, "part upload failed, retrying: {mapped}"
                    );
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }

    /// Commit a multipart upload from its part list.
    pub async fn multipart_complete(
        &self,
        key: &str,
        upload_id: &str,
        parts: &[(i32, String)],
    ) -> Result<PutResult> {
        self.capabilities.ensure(Capability::Multipart)?;
        let completed: Vec<CompletedPart> = parts
            .iter()
            .map(|(number, etag)| {
                CompletedPart::builder()
                    .part_number(*number)
                    .e_tag(etag.clone())
                    .build()
            })
            .collect();
        let upload = CompletedMultipartUpload::builder()
            .set_parts(Some(completed))
            .build();
        let out = self
            .client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(upload)
            .send()
            .await
            .map_err(|e| map_sdk_error(&e, key))?;
        Ok(PutResult {
            etag: out.e_tag().map(ToString::to_string),
        })
    }

    /// Release multipart state. Best-effort by contract; callers treat a
    /// failed abort as success after logging.
    pub async fn multipart_abort(&self, key: &str, upload_id: &str) -> Result<()> {
        self.capabilities.ensure(Capability::Multipart)?;
        self.client
            .abort_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .send()
            .await
            .map_err(|e| map_sdk_error(&e, key))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_copy_segment_encoding() {
        assert_eq!(encode_copy_segment("plain-name_1.txt"), "plain-name_1.txt");
        assert_eq!(encode_copy_segment("a b"), "a%20b");
        assert_eq!(encode_copy_segment("caf\u{e9}"), "caf%C3%A9");
        assert_eq!(encode_copy_segment("50%"), "50%25");
    }

    #[test]
    fn test_content_range_total_parse() {
        // The parsing used by the ranged-GET head fallback
        let total = "bytes 0-0/1234"
            .rsplit_once('/')
            .and_then(|(_, t)| t.parse::<u64>().ok());
        assert_eq!(total, Some(1234));
    }
}
