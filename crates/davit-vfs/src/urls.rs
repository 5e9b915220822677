//! Proxy-vs-redirect URL selection
//!
//! Every file is exposed through a `previewUrl` and a `downloadUrl`.
//! Mounts with `web_proxy` route both through the gateway's own download
//! endpoint; everything else gets presigned object-store GETs with the
//! disposition and content-type overrides baked into the URL.

use crate::resolver::ResolvedPath;
use davit_common::mime::{Disposition, content_disposition, content_type_for};
use davit_common::{Result, VirtualPath};
use davit_s3::S3Driver;
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use serde::Serialize;
use std::time::Duration;

const QUERY_ENCODE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// The URL pair handed to clients for one file.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileUrls {
    pub preview_url: String,
    pub download_url: String,
}

/// The gateway-proxied download URL for a path.
#[must_use]
pub fn proxy_url(external_url: &str, path: &VirtualPath, disposition: Disposition) -> String {
    let encoded = utf8_percent_encode(path.as_str(), QUERY_ENCODE);
    let base = external_url.trim_end_matches('/');
    match disposition {
        Disposition::Preview => format!("{base}/api/fs/download?path={encoded}&preview=true"),
        Disposition::Download => format!("{base}/api/fs/download?path={encoded}"),
    }
}

/// Build the preview/download URL pair for a resolved file.
pub async fn build_file_urls(
    driver: &S3Driver,
    resolved: &ResolvedPath,
    path: &VirtualPath,
    external_url: &str,
) -> Result<FileUrls> {
    if resolved.mount.web_proxy {
        return Ok(FileUrls {
            preview_url: proxy_url(external_url, path, Disposition::Preview),
            download_url: proxy_url(external_url, path, Disposition::Download),
        });
    }
    let filename = path.file_name().unwrap_or_default();
    let expires = Duration::from_secs(resolved.storage.default_signed_ttl_secs.max(1));
    let key = resolved.effective_object_key();
    let preview_url = driver
        .presign_get(
            &key,
            expires,
            &content_disposition(filename, Disposition::Preview),
            &content_type_for(filename, Disposition::Preview),
        )
        .await?;
    let download_url = driver
        .presign_get(
            &key,
            expires,
            &content_disposition(filename, Disposition::Download),
            &content_type_for(filename, Disposition::Download),
        )
        .await?;
    Ok(FileUrls {
        preview_url,
        download_url,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_proxy_url_shapes() {
        let path = VirtualPath::parse("/docs/a report.txt").unwrap();
        assert_eq!(
            proxy_url("http://gw:8080/", &path, Disposition::Preview),
            "http://gw:8080/api/fs/download?path=%2Fdocs%2Fa%20report.txt&preview=true"
        );
        assert_eq!(
            proxy_url("http://gw:8080", &path, Disposition::Download),
            "http://gw:8080/api/fs/download?path=%2Fdocs%2Fa%20report.txt"
        );
    }
}
