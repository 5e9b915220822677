//! Application state shared across handlers.

use davit_auth::AuthResolver;
use davit_common::GatewayConfig;
use davit_dav::{DavHandler, LockManager};
use davit_meta::{MetaStore, SecretBox};
use davit_vfs::FileSystem;
use std::sync::Arc;

/// The DAV surface lives under this route prefix.
pub const DAV_PREFIX: &str = "/dav";

pub struct AppState {
    pub config: GatewayConfig,
    pub store: Arc<MetaStore>,
    pub fs: Arc<FileSystem>,
    pub dav: DavHandler,
    pub auth: AuthResolver,
}

impl AppState {
    pub fn build(config: GatewayConfig, store: Arc<MetaStore>, secret_box: SecretBox) -> Self {
        let fs = Arc::new(FileSystem::new(store.clone(), secret_box, &config));
        let locks = Arc::new(LockManager::new(config.locks.clone()));
        let dav = DavHandler::new(fs.clone(), locks, DAV_PREFIX);
        let auth = AuthResolver::new(store.clone(), &config.admin.username, &config.admin.token);
        Self {
            config,
            store,
            fs,
            dav,
            auth,
        }
    }
}
