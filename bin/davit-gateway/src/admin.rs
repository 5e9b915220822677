//! `/api/admin/*` handlers
//!
//! The JSON surface an admin UI would call to manage the records the
//! core depends on: storage configs, mounts, API keys, and settings.
//! Every handler requires the admin principal.

use crate::envelope::{ApiError, ApiResult, Envelope};
use crate::state::AppState;
use axum::Extension;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use davit_auth::AuthResult;
use davit_common::{Error, VirtualPath};
use davit_meta::{ApiKeyRecord, MountRecord, PermissionSet, ProviderKind, StorageConfigRecord};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Storage config as exposed over the API: the sealed secret never
/// leaves the server.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StorageConfigView {
    id: String,
    name: String,
    provider: ProviderKind,
    endpoint: Option<String>,
    region: String,
    bucket: String,
    access_key_id: String,
    path_style: bool,
    root_prefix: String,
    default_signed_ttl_secs: u64,
    total_capacity_bytes: Option<u64>,
    cache_ttl_secs: u64,
    created_at: i64,
}

impl From<StorageConfigRecord> for StorageConfigView {
    fn from(record: StorageConfigRecord) -> Self {
        Self {
            id: record.id,
            name: record.name,
            provider: record.provider,
            endpoint: record.endpoint,
            region: record.region,
            bucket: record.bucket,
            access_key_id: record.access_key_id,
            path_style: record.path_style,
            root_prefix: record.root_prefix,
            default_signed_ttl_secs: record.default_signed_ttl_secs,
            total_capacity_bytes: record.total_capacity_bytes,
            cache_ttl_secs: record.cache_ttl_secs,
            created_at: record.created_at,
        }
    }
}

// =========== Storage configs ===========

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateStorageConfigBody {
    name: String,
    provider: ProviderKind,
    #[serde(default)]
    endpoint: Option<String>,
    region: String,
    bucket: String,
    access_key_id: String,
    secret_access_key: String,
    #[serde(default)]
    path_style: bool,
    #[serde(default)]
    root_prefix: String,
    #[serde(default = "default_signed_ttl")]
    default_signed_ttl_secs: u64,
    #[serde(default)]
    total_capacity_bytes: Option<u64>,
    #[serde(default = "default_cache_ttl")]
    cache_ttl_secs: u64,
}

fn default_signed_ttl() -> u64 {
    3600
}

fn default_cache_ttl() -> u64 {
    60
}

pub async fn create_storage_config(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthResult>,
    axum::Json(body): axum::Json<CreateStorageConfigBody>,
) -> ApiResult {
    auth.require_admin()?;
    let record = StorageConfigRecord {
        id: StorageConfigRecord::new_id(),
        name: body.name,
        provider: body.provider,
        endpoint: body.endpoint,
        region: body.region,
        bucket: body.bucket,
        access_key_id: body.access_key_id,
        secret_access_key: state.fs.drivers().seal_secret(&body.secret_access_key)?,
        path_style: body.path_style,
        root_prefix: body.root_prefix,
        default_signed_ttl_secs: body.default_signed_ttl_secs,
        total_capacity_bytes: body.total_capacity_bytes,
        cache_ttl_secs: body.cache_ttl_secs,
        created_at: chrono::Utc::now().timestamp(),
    };
    state.store.put_storage_config(&record)?;
    Ok(Envelope::with_status(
        StatusCode::CREATED,
        StorageConfigView::from(record),
    ))
}

pub async fn list_storage_configs(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthResult>,
) -> ApiResult {
    auth.require_admin()?;
    let views: Vec<StorageConfigView> = state
        .store
        .list_storage_configs()?
        .into_iter()
        .map(StorageConfigView::from)
        .collect();
    Ok(Envelope::ok(views))
}

pub async fn delete_storage_config(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthResult>,
    Path(id): Path<String>,
) -> ApiResult {
    auth.require_admin()?;
    let in_use = state
        .store
        .list_mounts()?
        .iter()
        .any(|m| m.storage_config_id == id);
    if in_use {
        return Err(ApiError(Error::conflict(
            "storage config is referenced by a mount",
        )));
    }
    state.store.delete_storage_config(&id)?;
    state.fs.drivers().invalidate(&id);
    Ok(Envelope::empty(StatusCode::OK))
}

// =========== Mounts ===========

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateMountBody {
    mount_path: String,
    storage_config_id: String,
    #[serde(default)]
    web_proxy: bool,
    #[serde(default = "default_cache_ttl")]
    cache_ttl_secs: u64,
}

pub async fn create_mount(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthResult>,
    axum::Json(body): axum::Json<CreateMountBody>,
) -> ApiResult {
    auth.require_admin()?;
    let mount_path = VirtualPath::parse(&body.mount_path)?;
    if state
        .store
        .get_storage_config(&body.storage_config_id)?
        .is_none()
    {
        return Err(ApiError(Error::not_found(format!(
            "storage config {}",
            body.storage_config_id
        ))));
    }
    let record = MountRecord::generate(
        mount_path,
        &body.storage_config_id,
        body.web_proxy,
        body.cache_ttl_secs,
    );
    state.store.put_mount(&record)?;
    Ok(Envelope::with_status(StatusCode::CREATED, record))
}

pub async fn list_mounts(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthResult>,
) -> ApiResult {
    auth.require_admin()?;
    Ok(Envelope::ok(state.store.list_mounts()?))
}

pub async fn delete_mount(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthResult>,
    Path(id): Path<String>,
) -> ApiResult {
    auth.require_admin()?;
    state.store.delete_mount(&id)?;
    // Every cached listing resolved through this mount is now stale.
    state.fs.cache().invalidate_mount(&id);
    Ok(Envelope::empty(StatusCode::OK))
}

// =========== API keys ===========

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateApiKeyBody {
    name: String,
    #[serde(default)]
    permissions: PermissionSet,
    basic_path: String,
    #[serde(default)]
    expires_at: Option<i64>,
}

pub async fn create_api_key(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthResult>,
    axum::Json(body): axum::Json<CreateApiKeyBody>,
) -> ApiResult {
    auth.require_admin()?;
    let basic_path = VirtualPath::parse(&body.basic_path)?.as_dir();
    let mut record = ApiKeyRecord::generate(&body.name, body.permissions, basic_path);
    record.expires_at = body.expires_at;
    state.store.put_api_key(&record)?;
    Ok(Envelope::with_status(StatusCode::CREATED, record))
}

pub async fn list_api_keys(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthResult>,
) -> ApiResult {
    auth.require_admin()?;
    Ok(Envelope::ok(state.store.list_api_keys()?))
}

pub async fn delete_api_key(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthResult>,
    Path(id): Path<String>,
) -> ApiResult {
    auth.require_admin()?;
    state.store.delete_api_key(&id)?;
    Ok(Envelope::empty(StatusCode::OK))
}

// =========== Settings ===========

#[derive(Deserialize)]
pub struct SettingBody {
    key: String,
    value: String,
}

pub async fn set_setting(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthResult>,
    axum::Json(body): axum::Json<SettingBody>,
) -> ApiResult {
    auth.require_admin()?;
    if body.key == "webdav_upload_mode" && !matches!(body.value.as_str(), "direct" | "multipart") {
        return Err(ApiError(Error::invalid_path(
            "webdav_upload_mode must be direct or multipart",
        )));
    }
    state.store.set_setting(&body.key, &body.value)?;
    Ok(Envelope::empty(StatusCode::OK))
}
