//! Davit Gateway - storage gateway over mounted S3 buckets
//!
//! This binary serves the JSON file-system API and the WebDAV surface
//! over one shared backend. Metadata lives in a local redb store;
//! object data lives in the admin-configured S3-compatible buckets.

mod admin;
mod api;
mod auth_middleware;
mod dav;
mod envelope;
mod state;

use anyhow::Result;
use auth_middleware::auth_layer;
use axum::{
    Router,
    extract::DefaultBodyLimit,
    middleware,
    routing::{any, delete, get, post},
};
use clap::Parser;
use davit_common::GatewayConfig;
use davit_meta::{MetaStore, SecretBox};
use state::AppState;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "davit-gateway")]
#[command(about = "Davit storage gateway")]
#[command(version)]
struct Args {
    /// Listen address
    #[arg(short, long, default_value = "0.0.0.0:8080")]
    listen: String,

    /// Externally reachable base URL (used in proxy download links)
    #[arg(long, default_value = "http://localhost:8080")]
    external_url: String,

    /// Data directory for the metadata store
    #[arg(long, default_value = "/var/lib/davit")]
    data_dir: PathBuf,

    /// Admin username for Basic authentication
    #[arg(long, default_value = "admin")]
    admin_username: String,

    /// Admin token (Bearer token and Basic password)
    #[arg(long, env = "DAVIT_ADMIN_TOKEN")]
    admin_token: String,

    /// Secret used to decrypt stored S3 credentials
    #[arg(long, env = "ENCRYPTION_SECRET")]
    encryption_secret: String,

    /// Max single-request body size in megabytes
    #[arg(long, default_value = "100")]
    max_body_mb: usize,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| args.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Davit Gateway");

    let mut config = GatewayConfig::default();
    config.server.listen = args
        .listen
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid listen address {}: {}", args.listen, e))?;
    config.server.external_url = args.external_url.clone();
    config.server.data_dir = args.data_dir.clone();
    config.admin.username = args.admin_username.clone();
    config.admin.token = args.admin_token.clone();

    std::fs::create_dir_all(&config.server.data_dir)?;
    let store = Arc::new(
        MetaStore::open(&config.server.data_dir.join("davit.redb"))
            .map_err(|e| anyhow::anyhow!("Failed to open metadata store: {e}"))?,
    );
    info!("Metadata store: {}", config.server.data_dir.display());

    let secret_box = SecretBox::from_passphrase(&args.encryption_secret)
        .map_err(|e| anyhow::anyhow!("Invalid ENCRYPTION_SECRET: {e}"))?;

    let state = Arc::new(AppState::build(config.clone(), store, secret_box));

    // Expired-lock sweep
    let sweep_state = state.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(sweep_state.dav.locks().sweep_interval());
        loop {
            ticker.tick().await;
            let removed = sweep_state.dav.locks().sweep_expired();
            if removed > 0 {
                info!(removed, "swept expired webdav locks");
            }
        }
    });

    let body_limit = DefaultBodyLimit::max(args.max_body_mb * 1024 * 1024);
    info!("Max buffered body size: {} MB", args.max_body_mb);

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
        .expose_headers(Any);

    // Metadata reads get the per-request timeout; streaming uploads and
    // downloads are bounded by the S3 operation timeouts instead.
    let read_routes = Router::new()
        .route("/api/fs/list", get(api::list))
        .route("/api/fs/get", get(api::stat))
        .route("/api/fs/search", get(api::search))
        .route("/api/fs/file-link", get(api::file_link))
        .layer(TimeoutLayer::new(Duration::from_secs(
            config.server.request_timeout_secs,
        )));

    let app = Router::new()
        // Health FIRST (no auth)
        .route("/health", get(api::health))
        // File-system API
        .merge(read_routes)
        .route("/api/fs/download", get(api::download))
        .route("/api/fs/mkdir", post(api::mkdir))
        .route("/api/fs/upload", post(api::upload))
        .route("/api/fs/multipart/init", post(api::multipart_init))
        .route("/api/fs/multipart/part", post(api::multipart_part))
        .route("/api/fs/multipart/complete", post(api::multipart_complete))
        .route("/api/fs/multipart/abort", post(api::multipart_abort))
        .route("/api/fs/presign", post(api::presign))
        .route("/api/fs/presign/commit", post(api::presign_commit))
        .route("/api/fs/rename", post(api::rename))
        .route("/api/fs/remove", delete(api::remove))
        .route("/api/fs/batch-remove", post(api::batch_remove))
        .route("/api/fs/batch-copy", post(api::batch_copy))
        .route("/api/fs/batch-copy-commit", post(api::batch_copy_commit))
        .route("/api/fs/update", post(api::update))
        // Admin API (admin principal checked in handlers)
        .route(
            "/api/admin/storage-configs",
            get(admin::list_storage_configs).post(admin::create_storage_config),
        )
        .route(
            "/api/admin/storage-configs/{id}",
            delete(admin::delete_storage_config),
        )
        .route(
            "/api/admin/mounts",
            get(admin::list_mounts).post(admin::create_mount),
        )
        .route("/api/admin/mounts/{id}", delete(admin::delete_mount))
        .route(
            "/api/admin/api-keys",
            get(admin::list_api_keys).post(admin::create_api_key),
        )
        .route("/api/admin/api-keys/{id}", delete(admin::delete_api_key))
        .route("/api/admin/settings", post(admin::set_setting))
        // WebDAV (all methods funnel into one dispatcher)
        .route("/dav", any(dav::entry))
        .route("/dav/", any(dav::entry))
        .route("/dav/{*path}", any(dav::entry))
        .layer(body_limit)
        .layer(middleware::from_fn_with_state(state.clone(), auth_layer))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state.clone());

    let addr: SocketAddr = config.server.listen;
    info!("Serving JSON API under /api and WebDAV under /dav on {addr}");

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            info!("Shutting down...");
        })
        .await?;

    // Flush caches and give spawned multipart aborts a bounded grace
    // period to settle.
    state.fs.shutdown();
    tokio::time::sleep(Duration::from_secs(1)).await;
    info!("Gateway shut down gracefully");

    Ok(())
}
