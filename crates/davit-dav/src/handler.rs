//! WebDAV method dispatch
//!
//! One dispatcher handles every method under `/dav/*`, translating the
//! WebDAV contracts onto the filesystem façade and the lock table. The
//! RFC status codes are chosen here; the JSON envelope never appears on
//! this surface.

use crate::ifheader::{parse_if_tokens, parse_lock_token, parse_timeout};
use crate::lock::{LockDepth, LockManager, LockScope};
use crate::propfind;
use axum::body::Body;
use axum::http::{HeaderMap, Method, StatusCode, header};
use axum::response::Response;
use davit_auth::AuthResult;
use davit_common::mime::Disposition;
use davit_common::{Error, Result, VirtualPath};
use davit_vfs::fs::DownloadOutcome;
use davit_vfs::{Entry, FileSystem};
use percent_encoding::percent_decode_str;
use std::sync::Arc;
use tracing::{debug, error, warn};

const DAV_COMPLIANCE: &str = "1,2";
const ALLOWED_METHODS: &str =
    "OPTIONS, GET, HEAD, PUT, POST, DELETE, PROPFIND, PROPPATCH, MKCOL, COPY, MOVE, LOCK, UNLOCK";

/// Cap applied to PROPFIND/LOCK request bodies.
const MAX_XML_BODY: usize = 64 * 1024;

/// `Depth` header values we act on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Depth {
    Zero,
    One,
    Infinity,
}

fn parse_depth(headers: &HeaderMap) -> Depth {
    match headers
        .get("depth")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
    {
        Some("0") => Depth::Zero,
        Some("1") => Depth::One,
        // RFC default, and anything unrecognised
        _ => Depth::Infinity,
    }
}

fn submitted_tokens(headers: &HeaderMap) -> Vec<String> {
    headers
        .get("if")
        .and_then(|v| v.to_str().ok())
        .map(parse_if_tokens)
        .unwrap_or_default()
}

fn declared_content_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
}

/// Extract `<D:owner>` content from a LOCK body, tags stripped.
fn extract_owner(body: &str) -> Option<String> {
    let start = body.find("owner")?;
    let after_open = body[start..].find('>').map(|i| start + i + 1)?;
    let close = body[after_open..].find("</")? + after_open;
    let inner = &body[after_open..close];
    let text: String = inner
        .split('>')
        .filter_map(|chunk| chunk.split('<').next())
        .collect::<Vec<_>>()
        .join("")
        .trim()
        .to_string();
    if text.is_empty() { None } else { Some(text) }
}

fn text_response(status: StatusCode, message: &str) -> Response {
    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "text/plain; charset=utf-8")
        .body(Body::from(message.to_string()))
        .unwrap_or_default()
}

fn xml_response(status: StatusCode, xml: String) -> Response {
    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "application/xml; charset=utf-8")
        .body(Body::from(xml))
        .unwrap_or_default()
}

/// WebDAV method layer over the shared filesystem façade.
pub struct DavHandler {
    fs: Arc<FileSystem>,
    locks: Arc<LockManager>,
    prefix: String,
}

impl DavHandler {
    #[must_use]
    pub fn new(fs: Arc<FileSystem>, locks: Arc<LockManager>, prefix: &str) -> Self {
        Self {
            fs,
            locks,
            prefix: prefix.trim_end_matches('/').to_string(),
        }
    }

    #[must_use]
    pub fn locks(&self) -> &Arc<LockManager> {
        &self.locks
    }

    /// Handle one request below the DAV prefix.
    pub async fn dispatch(
        &self,
        method: &Method,
        raw_path: &str,
        headers: &HeaderMap,
        body: Body,
        auth: &AuthResult,
    ) -> Response {
        if let Err(e) = auth.require_authenticated() {
            return self.error_response(&e, method);
        }
        let path = match self.parse_path(raw_path) {
            Ok(path) => path,
            Err(e) => return self.error_response(&e, method),
        };
        debug!(method = %method, path = %path, "webdav request");

        let result = match method.as_str() {
            "OPTIONS" => Ok(self.options()),
            "PROPFIND" => self.propfind(&path, headers, auth).await,
            "GET" => self.get(&path, headers, auth).await,
            "HEAD" => self.head(&path, auth).await,
            "PUT" => self.put(&path, headers, body, auth).await,
            "DELETE" => self.delete(&path, headers, auth).await,
            "MKCOL" => self.mkcol(&path, headers, body, auth).await,
            "COPY" => self.copy_or_move(&path, headers, auth, false).await,
            "MOVE" => self.copy_or_move(&path, headers, auth, true).await,
            "LOCK" => self.lock(&path, headers, body, auth).await,
            "UNLOCK" => self.unlock(&path, headers).await,
            "PROPPATCH" => self.proppatch(&path, headers).await,
            _ => Ok(text_response(
                StatusCode::METHOD_NOT_ALLOWED,
                "method not allowed",
            )),
        };
        match result {
            Ok(response) => response,
            Err(e) => self.error_response(&e, method),
        }
    }

    fn parse_path(&self, raw_path: &str) -> Result<VirtualPath> {
        let decoded = percent_decode_str(raw_path)
            .decode_utf8()
            .map_err(|_| Error::invalid_path(raw_path.to_string()))?;
        VirtualPath::parse(&decoded)
    }

    fn error_response(&self, e: &Error, method: &Method) -> Response {
        // Cross-mount MOVE/COPY cannot be carried out atomically by the
        // backing stores; the RFC recommends 502 for that.
        let status = if matches!(e, Error::CrossMountRename)
            && matches!(method.as_str(), "MOVE" | "COPY")
        {
            StatusCode::BAD_GATEWAY
        } else {
            StatusCode::from_u16(e.http_status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
        };

        if status == StatusCode::UNAUTHORIZED {
            return Response::builder()
                .status(status)
                .header(header::WWW_AUTHENTICATE, "Basic realm=\"davit\"")
                .body(Body::from("authentication required"))
                .unwrap_or_default();
        }
        if status.is_server_error() {
            let error_id = Error::new_error_id();
            error!(error_id, "webdav {method} failed: {e}");
            return text_response(status, &format!("internal error (id {error_id})"));
        }
        text_response(status, &e.to_string())
    }

    fn check_lock(&self, path: &VirtualPath, headers: &HeaderMap) -> Result<()> {
        self.locks
            .check_write(path.as_str(), &submitted_tokens(headers))
    }

    // =========== Methods ===========

    fn options(&self) -> Response {
        Response::builder()
            .status(StatusCode::NO_CONTENT)
            .header("DAV", DAV_COMPLIANCE)
            .header("MS-Author-Via", "DAV")
            .header(header::ALLOW, ALLOWED_METHODS)
            .body(Body::empty())
            .unwrap_or_default()
    }

    async fn propfind(
        &self,
        path: &VirtualPath,
        headers: &HeaderMap,
        auth: &AuthResult,
    ) -> Result<Response> {
        // Depth: infinity is capped to 1; OPTIONS advertises exactly
        // what this serves.
        let depth = match parse_depth(headers) {
            Depth::Zero => Depth::Zero,
            _ => Depth::One,
        };
        let self_entry = self.fs.stat(path, auth).await?;
        let children: Vec<Entry> = if depth == Depth::One && self_entry.is_directory {
            self.fs.list(path, auth).await?.entries.clone()
        } else {
            Vec::new()
        };
        Ok(xml_response(
            StatusCode::MULTI_STATUS,
            propfind::multistatus(&self.prefix, &self_entry, &children),
        ))
    }

    async fn get(
        &self,
        path: &VirtualPath,
        headers: &HeaderMap,
        auth: &AuthResult,
    ) -> Result<Response> {
        let entry = self.fs.stat(path, auth).await?;
        if entry.is_directory {
            return Ok(text_response(
                StatusCode::METHOD_NOT_ALLOWED,
                "collections have no representation; use PROPFIND",
            ));
        }
        let range = headers
            .get(header::RANGE)
            .and_then(|v| v.to_str().ok());
        match self
            .fs
            .download(path, range, Disposition::Download, auth)
            .await?
        {
            DownloadOutcome::Proxy {
                body,
                content_type,
                content_disposition,
            } => {
                let status = if body.content_range.is_some() {
                    StatusCode::PARTIAL_CONTENT
                } else {
                    StatusCode::OK
                };
                let mut builder = Response::builder()
                    .status(status)
                    .header(header::CONTENT_TYPE, content_type)
                    .header(header::CONTENT_DISPOSITION, content_disposition)
                    .header(header::ACCEPT_RANGES, "bytes")
                    .header(header::CACHE_CONTROL, "public, max-age=31536000");
                if let Some(length) = body.content_length {
                    builder = builder.header(header::CONTENT_LENGTH, length);
                }
                if let Some(content_range) = &body.content_range {
                    builder = builder.header(header::CONTENT_RANGE, content_range);
                }
                if let Some(etag) = &body.attrs.etag {
                    builder = builder.header(header::ETAG, etag);
                }
                Ok(builder
                    .body(Body::from_stream(body.into_byte_stream()))
                    .unwrap_or_default())
            }
            DownloadOutcome::Redirect(url) => Ok(Response::builder()
                .status(StatusCode::FOUND)
                .header(header::LOCATION, url)
                .body(Body::empty())
                .unwrap_or_default()),
        }
    }

    async fn head(&self, path: &VirtualPath, auth: &AuthResult) -> Result<Response> {
        let entry = self.fs.stat(path, auth).await?;
        let mut builder = Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, entry.mimetype.clone())
            .header(header::CONTENT_LENGTH, entry.size);
        if let Some(etag) = &entry.etag {
            builder = builder.header(header::ETAG, etag);
        }
        Ok(builder.body(Body::empty()).unwrap_or_default())
    }

    async fn put(
        &self,
        path: &VirtualPath,
        headers: &HeaderMap,
        body: Body,
        auth: &AuthResult,
    ) -> Result<Response> {
        if path.is_dir() {
            return Err(Error::invalid_path("PUT target must be a file"));
        }
        self.check_lock(path, headers)?;

        // Clients that skip MKCOL get their parent collections created
        // rather than a 409.
        if let Some(parent) = path.parent() {
            if !parent.is_root() && !self.fs.exists(&parent, auth).await? {
                self.fs.mkdir(&parent, auth).await?;
            }
        }

        let declared_len = declared_content_length(headers);
        let stream = body.into_data_stream();
        self.fs
            .upload_streaming(path, stream, declared_len, auth)
            .await?;
        Ok(text_response(StatusCode::CREATED, "created"))
    }

    async fn delete(
        &self,
        path: &VirtualPath,
        headers: &HeaderMap,
        auth: &AuthResult,
    ) -> Result<Response> {
        self.check_lock(path, headers)?;
        self.fs.remove(path, auth).await?;
        Ok(Response::builder()
            .status(StatusCode::NO_CONTENT)
            .body(Body::empty())
            .unwrap_or_default())
    }

    async fn mkcol(
        &self,
        path: &VirtualPath,
        headers: &HeaderMap,
        body: Body,
        auth: &AuthResult,
    ) -> Result<Response> {
        let body_bytes = axum::body::to_bytes(body, MAX_XML_BODY)
            .await
            .map_err(|e| Error::internal(format!("reading MKCOL body: {e}")))?;
        if !body_bytes.is_empty() {
            return Err(Error::unsupported("MKCOL does not accept a request body"));
        }
        self.check_lock(path, headers)?;
        if self.fs.exists(&path.as_dir(), auth).await? {
            return Ok(text_response(
                StatusCode::METHOD_NOT_ALLOWED,
                "collection already exists",
            ));
        }
        self.fs.mkdir(path, auth).await?;
        Ok(text_response(StatusCode::CREATED, "created"))
    }

    async fn copy_or_move(
        &self,
        path: &VirtualPath,
        headers: &HeaderMap,
        auth: &AuthResult,
        is_move: bool,
    ) -> Result<Response> {
        let destination = self.parse_destination(headers)?;
        let overwrite = headers
            .get("overwrite")
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            != Some("F");
        self.check_lock(&destination, headers)?;
        if is_move {
            self.check_lock(path, headers)?;
            self.fs.move_path(path, &destination, overwrite, auth).await?;
        } else {
            self.fs
                .copy_path(path, &destination, overwrite, auth)
                .await?;
        }
        Ok(text_response(StatusCode::CREATED, "created"))
    }

    fn parse_destination(&self, headers: &HeaderMap) -> Result<VirtualPath> {
        let raw = headers
            .get("destination")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| Error::invalid_path("missing Destination header"))?;
        // Absolute URL or absolute path; either way the DAV prefix must
        // lead the path.
        let path_part = if let Some(scheme_end) = raw.find("://") {
            let after = &raw[scheme_end + 3..];
            after.find('/').map(|i| &after[i..]).unwrap_or("/")
        } else {
            raw
        };
        let below_prefix = path_part
            .strip_prefix(&self.prefix)
            .ok_or_else(|| Error::invalid_path(format!("destination outside {}", self.prefix)))?;
        let decoded = percent_decode_str(below_prefix)
            .decode_utf8()
            .map_err(|_| Error::invalid_path(raw.to_string()))?;
        VirtualPath::parse(&decoded)
    }

    async fn lock(
        &self,
        path: &VirtualPath,
        headers: &HeaderMap,
        body: Body,
        auth: &AuthResult,
    ) -> Result<Response> {
        // Locking requires the same capability as writing.
        auth.require_mount()?;
        let body_bytes = axum::body::to_bytes(body, MAX_XML_BODY)
            .await
            .map_err(|e| Error::internal(format!("reading LOCK body: {e}")))?;
        let timeout = headers
            .get("timeout")
            .and_then(|v| v.to_str().ok())
            .and_then(parse_timeout);

        // An empty body with a submitted token is a refresh.
        if body_bytes.is_empty() {
            let tokens = submitted_tokens(headers);
            let token = tokens
                .first()
                .ok_or_else(|| Error::invalid_path("LOCK refresh without If token"))?;
            let lock = self.locks.refresh(path.as_str(), token, timeout)?;
            return Ok(xml_response(
                StatusCode::OK,
                propfind::lockdiscovery(&self.prefix, &lock),
            ));
        }

        let body_text = String::from_utf8_lossy(&body_bytes);
        let scope = if body_text.contains("shared") {
            LockScope::Shared
        } else {
            LockScope::Exclusive
        };
        let depth = match parse_depth(headers) {
            Depth::Zero => LockDepth::Zero,
            _ => LockDepth::Infinity,
        };
        let owner = extract_owner(&body_text);
        let lock = self
            .locks
            .acquire(path.as_str(), owner.as_deref(), depth, scope, timeout)?;
        Ok(Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, "application/xml; charset=utf-8")
            .header("Lock-Token", format!("<{}>", lock.token))
            .body(Body::from(propfind::lockdiscovery(&self.prefix, &lock)))
            .unwrap_or_default())
    }

    async fn unlock(&self, path: &VirtualPath, headers: &HeaderMap) -> Result<Response> {
        let token = headers
            .get("lock-token")
            .and_then(|v| v.to_str().ok())
            .and_then(parse_lock_token)
            .ok_or_else(|| Error::invalid_path("missing Lock-Token header"))?;
        self.locks.release(path.as_str(), &token)?;
        Ok(Response::builder()
            .status(StatusCode::NO_CONTENT)
            .body(Body::empty())
            .unwrap_or_default())
    }

    async fn proppatch(&self, path: &VirtualPath, headers: &HeaderMap) -> Result<Response> {
        self.check_lock(path, headers)?;
        // Live properties are derived from the object store and cannot
        // be patched.
        warn!(path = %path, "refusing PROPPATCH");
        Ok(xml_response(
            StatusCode::MULTI_STATUS,
            propfind::proppatch_refusal(&self.prefix, path.as_str(), &["property".to_string()]),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use davit_common::GatewayConfig;
    use davit_meta::{MetaStore, SecretBox};
    use std::sync::Arc;

    fn test_handler() -> (DavHandler, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MetaStore::open(&dir.path().join("meta.redb")).unwrap());
        let config = GatewayConfig::default();
        let fs = Arc::new(FileSystem::new(
            store,
            SecretBox::from_passphrase("test").unwrap(),
            &config,
        ));
        let locks = Arc::new(LockManager::new(config.locks.clone()));
        (DavHandler::new(fs, locks, "/dav"), dir)
    }

    #[test]
    fn test_parse_destination_absolute_url() {
        let (handler, _dir) = test_handler();
        let mut headers = HeaderMap::new();
        headers.insert(
            "destination",
            "http://host:8080/dav/docs/b%20c.txt".parse().unwrap(),
        );
        let destination = handler.parse_destination(&headers).unwrap();
        assert_eq!(destination.as_str(), "/docs/b c.txt");
    }

    #[test]
    fn test_parse_destination_path_only() {
        let (handler, _dir) = test_handler();
        let mut headers = HeaderMap::new();
        headers.insert("destination", "/dav/docs/b.txt".parse().unwrap());
        assert_eq!(
            handler.parse_destination(&headers).unwrap().as_str(),
            "/docs/b.txt"
        );
    }

    #[test]
    fn test_parse_destination_outside_prefix() {
        let (handler, _dir) = test_handler();
        let mut headers = HeaderMap::new();
        headers.insert("destination", "/elsewhere/b.txt".parse().unwrap());
        assert!(handler.parse_destination(&headers).is_err());
    }

    #[test]
    fn test_error_mapping() {
        let (handler, _dir) = test_handler();
        let resp = handler.error_response(&Error::Locked("/x".into()), &Method::PUT);
        assert_eq!(resp.status(), StatusCode::LOCKED);

        let mv = Method::from_bytes(b"MOVE").unwrap();
        let resp = handler.error_response(&Error::CrossMountRename, &mv);
        assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);

        let resp = handler.error_response(&Error::Unauthorized, &Method::GET);
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        assert!(resp.headers().contains_key(header::WWW_AUTHENTICATE));

        let resp = handler.error_response(
            &Error::CapacityExhausted {
                used: 40,
                capacity: 100,
                requested: 70,
            },
            &Method::PUT,
        );
        assert_eq!(resp.status(), StatusCode::INSUFFICIENT_STORAGE);
    }

    #[test]
    fn test_parse_depth() {
        let mut headers = HeaderMap::new();
        assert_eq!(parse_depth(&headers), Depth::Infinity);
        headers.insert("depth", "0".parse().unwrap());
        assert_eq!(parse_depth(&headers), Depth::Zero);
        headers.insert("depth", "1".parse().unwrap());
        assert_eq!(parse_depth(&headers), Depth::One);
        headers.insert("depth", "infinity".parse().unwrap());
        assert_eq!(parse_depth(&headers), Depth::Infinity);
    }

    #[test]
    fn test_extract_owner() {
        let body = r#"<D:lockinfo xmlns:D="DAV:"><D:lockscope><D:exclusive/></D:lockscope>
            <D:owner><D:href>alice@example.com</D:href></D:owner></D:lockinfo>"#;
        assert_eq!(extract_owner(body).as_deref(), Some("alice@example.com"));
        assert!(extract_owner("<D:lockinfo/>").is_none());
    }

    #[test]
    fn test_declared_content_length() {
        let mut headers = HeaderMap::new();
        assert_eq!(declared_content_length(&headers), None);
        headers.insert(header::CONTENT_LENGTH, "42".parse().unwrap());
        assert_eq!(declared_content_length(&headers), Some(42));
    }
}
