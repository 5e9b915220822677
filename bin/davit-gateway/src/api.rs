//! `/api/fs/*` handlers
//!
//! Thin translations from HTTP to the filesystem façade. Path strings
//! are validated into `VirtualPath` at this edge; everything else is
//! enforced below.

use crate::envelope::{ApiError, ApiResult, Envelope};
use crate::state::AppState;
use axum::Extension;
use axum::body::Body;
use axum::extract::{Multipart, Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use davit_auth::AuthResult;
use davit_common::mime::Disposition;
use davit_common::{Error, VirtualPath};
use davit_vfs::fs::{CopyItem, DownloadOutcome, PresignCommit};
use serde::Deserialize;
use std::sync::Arc;

fn parse_path(raw: &str) -> Result<VirtualPath, ApiError> {
    Ok(VirtualPath::parse(raw)?)
}

/// Resolve the target file path for operations addressed by a directory
/// plus file name, tolerating callers that pass the full file path.
fn target_file_path(path: &str, file_name: Option<&str>) -> Result<VirtualPath, ApiError> {
    let parsed = parse_path(path)?;
    match file_name {
        Some(name) if parsed.is_dir() => Ok(parsed.join(name)?),
        _ => Ok(parsed),
    }
}

// =========== Listing, stat, download ===========

#[derive(Deserialize)]
pub struct PathQuery {
    path: String,
}

pub async fn list(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthResult>,
    Query(query): Query<PathQuery>,
) -> ApiResult {
    let path = parse_path(&query.path)?;
    let listing = state.fs.list(&path, &auth).await?;
    Ok(Envelope::ok(&*listing))
}

pub async fn stat(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthResult>,
    Query(query): Query<PathQuery>,
) -> ApiResult {
    let path = parse_path(&query.path)?;
    let entry = state.fs.stat(&path, &auth).await?;
    Ok(Envelope::ok(entry))
}

#[derive(Deserialize)]
pub struct DownloadQuery {
    path: String,
    #[serde(default)]
    preview: bool,
}

pub async fn download(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthResult>,
    Query(query): Query<DownloadQuery>,
    headers: HeaderMap,
) -> ApiResult {
    let path = parse_path(&query.path)?;
    let disposition = if query.preview {
        Disposition::Preview
    } else {
        Disposition::Download
    };
    let range = headers.get(header::RANGE).and_then(|v| v.to_str().ok());
    match state.fs.download(&path, range, disposition, &auth).await? {
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

// =========== Mutations ===========

#[derive(Deserialize)]
pub struct MkdirBody {
    path: String,
}

pub async fn mkdir(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthResult>,
    axum::Json(body): axum::Json<MkdirBody>,
) -> ApiResult {
    let path = parse_path(&body.path)?;
    state.fs.mkdir(&path, &auth).await?;
    Ok(Envelope::empty(StatusCode::CREATED))
}

pub async fn upload(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthResult>,
    mut multipart: Multipart,
) -> ApiResult {
    let mut path: Option<String> = None;
    let mut use_multipart = false;
    let mut file: Option<(Option<String>, Bytes)> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError(Error::invalid_path(format!("bad form data: {e}"))))?
    {
        match field.name().unwrap_or_default() {
            "path" => {
                path = Some(field.text().await.map_err(|e| {
                    ApiError(Error::invalid_path(format!("bad path field: {e}")))
                })?);
            }
            "use_multipart" => {
                let value = field.text().await.unwrap_or_default();
                use_multipart = matches!(value.as_str(), "true" | "1");
            }
            "file" => {
                let file_name = field.file_name().map(ToString::to_string);
                let data = field.bytes().await.map_err(|e| {
                    ApiError(Error::invalid_path(format!("bad file field: {e}")))
                })?;
                file = Some((file_name, data));
            }
            _ => {}
        }
    }

    let path = path.ok_or_else(|| ApiError(Error::invalid_path("missing path field")))?;
    let (file_name, data) =
        file.ok_or_else(|| ApiError(Error::invalid_path("missing file field")))?;
    let target = target_file_path(&path, file_name.as_deref())?;
    let outcome = state.fs.upload(&target, data, use_multipart, &auth).await?;
    Ok(Envelope::ok(outcome))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenameBody {
    old_path: String,
    new_path: String,
}

pub async fn rename(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthResult>,
    axum::Json(body): axum::Json<RenameBody>,
) -> ApiResult {
    let old_path = parse_path(&body.old_path)?;
    let new_path = parse_path(&body.new_path)?;
    state.fs.rename(&old_path, &new_path, &auth).await?;
    Ok(Envelope::empty(StatusCode::OK))
}

pub async fn remove(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthResult>,
    Query(query): Query<PathQuery>,
) -> ApiResult {
    let path = parse_path(&query.path)?;
    state.fs.remove(&path, &auth).await?;
    Ok(Envelope::empty(StatusCode::OK))
}

#[derive(Deserialize)]
pub struct BatchRemoveBody {
    paths: Vec<String>,
}

pub async fn batch_remove(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthResult>,
    axum::Json(body): axum::Json<BatchRemoveBody>,
) -> ApiResult {
    let paths = body
        .paths
        .iter()
        .map(|p| parse_path(p))
        .collect::<Result<Vec<_>, _>>()?;
    let outcome = state.fs.batch_remove(&paths, &auth).await;
    Ok(Envelope::ok(outcome))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchCopyBody {
    items: Vec<BatchCopyItem>,
    #[serde(default)]
    skip_existing: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchCopyItem {
    source_path: String,
    target_path: String,
}

pub async fn batch_copy(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthResult>,
    axum::Json(body): axum::Json<BatchCopyBody>,
) -> ApiResult {
    let items = body
        .items
        .iter()
        .map(|item| {
            Ok(CopyItem {
                source_path: parse_path(&item.source_path)?,
                target_path: parse_path(&item.target_path)?,
            })
        })
        .collect::<Result<Vec<_>, ApiError>>()?;
    let outcome = state.fs.batch_copy(&items, body.skip_existing, &auth).await?;
    Ok(Envelope::ok(outcome))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchCopyCommitBody {
    target_mount_id: String,
    files: Vec<String>,
}

pub async fn batch_copy_commit(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthResult>,
    axum::Json(body): axum::Json<BatchCopyCommitBody>,
) -> ApiResult {
    let files = body
        .files
        .iter()
        .map(|p| parse_path(p))
        .collect::<Result<Vec<_>, _>>()?;
    state
        .fs
        .batch_copy_commit(&body.target_mount_id, &files, &auth)
        .await?;
    Ok(Envelope::empty(StatusCode::OK))
}

#[derive(Deserialize)]
pub struct UpdateBody {
    path: String,
    content: String,
}

pub async fn update(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthResult>,
    axum::Json(body): axum::Json<UpdateBody>,
) -> ApiResult {
    let path = parse_path(&body.path)?;
    let outcome = state.fs.update_inline(&path, body.content, &auth).await?;
    Ok(Envelope::ok(outcome))
}

// =========== Search & links ===========

#[derive(Deserialize)]
pub struct SearchQuery {
    q: String,
    #[serde(default)]
    mount_id: Option<String>,
    #[serde(default)]
    path: Option<String>,
    #[serde(default = "default_limit")]
    limit: usize,
    #[serde(default)]
    offset: usize,
}

fn default_limit() -> usize {
    50
}

pub async fn search(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthResult>,
    Query(query): Query<SearchQuery>,
) -> ApiResult {
    let prefix = query.path.as_deref().map(parse_path).transpose()?;
    let outcome = state
        .fs
        .search(
            &query.q,
            query.mount_id.as_deref(),
            prefix.as_ref(),
            query.limit,
            query.offset,
            &auth,
        )
        .await?;
    Ok(Envelope::ok(outcome))
}

#[derive(Deserialize)]
pub struct FileLinkQuery {
    path: String,
    #[serde(default)]
    expires_in: Option<u64>,
    #[serde(default)]
    force_download: bool,
}

pub async fn file_link(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthResult>,
    Query(query): Query<FileLinkQuery>,
) -> ApiResult {
    let path = parse_path(&query.path)?;
    let url = state
        .fs
        .file_link(&path, query.expires_in, query.force_download, &auth)
        .await?;
    Ok(Envelope::ok(serde_json::json!({ "url": url })))
}

// =========== Presigned client-direct uploads ===========

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresignBody {
    path: String,
    file_name: String,
}

pub async fn presign(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthResult>,
    axum::Json(body): axum::Json<PresignBody>,
) -> ApiResult {
    let dir = parse_path(&body.path)?;
    let outcome = state.fs.presign_put(&dir, &body.file_name, &auth).await?;
    Ok(Envelope::ok(outcome))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresignCommitBody {
    file_id: String,
    object_key: String,
    target_path: String,
    #[serde(default)]
    etag: Option<String>,
    #[serde(default)]
    file_size: Option<u64>,
    storage_config_id: String,
    mount_id: String,
}

pub async fn presign_commit(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthResult>,
    axum::Json(body): axum::Json<PresignCommitBody>,
) -> ApiResult {
    let target_path = parse_path(&body.target_path)?;
    let record = state
        .fs
        .presign_commit(
            PresignCommit {
                file_id: body.file_id,
                object_key: body.object_key,
                target_path,
                etag: body.etag,
                file_size: body.file_size,
                storage_config_id: body.storage_config_id,
                mount_id: body.mount_id,
            },
            &auth,
        )
        .await?;
    Ok(Envelope::ok(record))
}

// =========== Mode A multipart ===========

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MultipartInitBody {
    path: String,
    #[serde(default)]
    filename: Option<String>,
    #[serde(default)]
    file_size: Option<u64>,
}

pub async fn multipart_init(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthResult>,
    axum::Json(body): axum::Json<MultipartInitBody>,
) -> ApiResult {
    let target = target_file_path(&body.path, body.filename.as_deref())?;
    let outcome = state
        .fs
        .multipart_init(&target, body.file_size, &auth)
        .await?;
    Ok(Envelope::ok(outcome))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MultipartPartQuery {
    path: String,
    upload_id: String,
    part_number: i32,
}

pub async fn multipart_part(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthResult>,
    Query(query): Query<MultipartPartQuery>,
    body: Bytes,
) -> ApiResult {
    let path = parse_path(&query.path)?;
    let etag = state
        .fs
        .multipart_part(&path, &query.upload_id, query.part_number, body, &auth)
        .await?;
    Ok(Envelope::ok(serde_json::json!({ "etag": etag })))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MultipartCompleteBody {
    path: String,
    upload_id: String,
    parts: Vec<PartBody>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartBody {
    part_number: i32,
    etag: String,
}

pub async fn multipart_complete(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthResult>,
    axum::Json(body): axum::Json<MultipartCompleteBody>,
) -> ApiResult {
    let path = parse_path(&body.path)?;
    let parts: Vec<(i32, String)> = body
        .parts
        .iter()
        .map(|p| (p.part_number, p.etag.clone()))
        .collect();
    let outcome = state
        .fs
        .multipart_complete(&path, &body.upload_id, &parts, &auth)
        .await?;
    Ok(Envelope::ok(outcome))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MultipartAbortBody {
    path: String,
    upload_id: String,
}

pub async fn multipart_abort(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthResult>,
    axum::Json(body): axum::Json<MultipartAbortBody>,
) -> ApiResult {
    let path = parse_path(&body.path)?;
    state
        .fs
        .multipart_abort(&path, &body.upload_id, &auth)
        .await?;
    Ok(Envelope::empty(StatusCode::OK))
}

pub async fn health() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}
