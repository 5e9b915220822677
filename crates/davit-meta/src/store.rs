//! The redb-backed metadata store.

use crate::tables::{
    API_KEY_LOOKUP, API_KEYS, MOUNTS, PARENT_MODIFIED, SETTINGS, SHARED_FILES, STORAGE_CONFIGS,
    parent_modified_key,
};
use crate::types::{ApiKeyRecord, MountRecord, SharedFileRecord, StorageConfigRecord};
use davit_common::{Error, Result};
use redb::{Database, ReadableTable};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::Path;
use tracing::debug;

type ByteTable = redb::TableDefinition<'static, &'static str, &'static [u8]>;

fn meta<E: std::fmt::Display>(e: E) -> Error {
    Error::Meta(e.to_string())
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    serde_json::to_vec(value).map_err(meta)
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    serde_json::from_slice(bytes).map_err(meta)
}

/// Persistent metadata store shared by all components.
///
/// All operations are short synchronous transactions; the database handle
/// is internally synchronised and safe to share behind an `Arc`.
pub struct MetaStore {
    db: Database,
}

impl MetaStore {
    /// Open (or create) the store at the given path, creating all tables.
    pub fn open(path: &Path) -> Result<Self> {
        let db = Database::create(path).map_err(meta)?;
        let txn = db.begin_write().map_err(meta)?;
        {
            txn.open_table(API_KEYS).map_err(meta)?;
            txn.open_table(API_KEY_LOOKUP).map_err(meta)?;
            txn.open_table(STORAGE_CONFIGS).map_err(meta)?;
            txn.open_table(MOUNTS).map_err(meta)?;
            txn.open_table(SHARED_FILES).map_err(meta)?;
            txn.open_table(PARENT_MODIFIED).map_err(meta)?;
            txn.open_table(SETTINGS).map_err(meta)?;
        }
        txn.commit().map_err(meta)?;
        Ok(Self { db })
    }

    // =========== API keys ===========

    /// Insert or replace an API key record.
    pub fn put_api_key(&self, record: &ApiKeyRecord) -> Result<()> {
        let bytes = encode(record)?;
        let txn = self.db.begin_write().map_err(meta)?;
        {
            let mut keys = txn.open_table(API_KEYS).map_err(meta)?;
            keys.insert(record.id.as_str(), bytes.as_slice())
                .map_err(meta)?;
            let mut lookup = txn.open_table(API_KEY_LOOKUP).map_err(meta)?;
            lookup
                .insert(record.key.as_str(), record.id.as_str())
                .map_err(meta)?;
        }
        txn.commit().map_err(meta)
    }

    /// Look up an API key by its presented secret.
    ///
    /// Expired keys are deleted on touch and reported as absent.
    pub fn lookup_api_key(&self, secret: &str, now: i64) -> Result<Option<ApiKeyRecord>> {
        let id = {
            let txn = self.db.begin_read().map_err(meta)?;
            let lookup = txn.open_table(API_KEY_LOOKUP).map_err(meta)?;
            match lookup.get(secret).map_err(meta)? {
                Some(guard) => guard.value().to_string(),
                None => return Ok(None),
            }
        };
        let Some(record) = self.get_api_key(&id)? else {
            return Ok(None);
        };
        if record.is_expired(now) {
            debug!(key_id = %record.id, "deleting expired api key");
            self.delete_api_key(&record.id)?;
            return Ok(None);
        }
        Ok(Some(record))
    }

    /// Fetch an API key record by id.
    pub fn get_api_key(&self, id: &str) -> Result<Option<ApiKeyRecord>> {
        let txn = self.db.begin_read().map_err(meta)?;
        let keys = txn.open_table(API_KEYS).map_err(meta)?;
        match keys.get(id).map_err(meta)? {
            Some(guard) => Ok(Some(decode(guard.value())?)),
            None => Ok(None),
        }
    }

    /// Record a successful use of the key.
    pub fn touch_api_key(&self, id: &str, now: i64) -> Result<()> {
        if let Some(mut record) = self.get_api_key(id)? {
            record.last_used_at = Some(now);
            self.put_api_key(&record)?;
        }
        Ok(())
    }

    /// All stored API keys.
    pub fn list_api_keys(&self) -> Result<Vec<ApiKeyRecord>> {
        self.list_table(API_KEYS)
    }

    /// Remove an API key and its lookup entry.
    pub fn delete_api_key(&self, id: &str) -> Result<()> {
        let record = self.get_api_key(id)?;
        let txn = self.db.begin_write().map_err(meta)?;
        {
            let mut keys = txn.open_table(API_KEYS).map_err(meta)?;
            keys.remove(id).map_err(meta)?;
            if let Some(record) = record {
                let mut lookup = txn.open_table(API_KEY_LOOKUP).map_err(meta)?;
                lookup.remove(record.key.as_str()).map_err(meta)?;
            }
        }
        txn.commit().map_err(meta)
    }

    // =========== Storage configs ===========

    pub fn put_storage_config(&self, record: &StorageConfigRecord) -> Result<()> {
        self.put_record(STORAGE_CONFIGS, &record.id, record)
    }

    pub fn get_storage_config(&self, id: &str) -> Result<Option<StorageConfigRecord>> {
        self.get_record(STORAGE_CONFIGS, id)
    }

    pub fn list_storage_configs(&self) -> Result<Vec<StorageConfigRecord>> {
        self.list_table(STORAGE_CONFIGS)
    }

    pub fn delete_storage_config(&self, id: &str) -> Result<()> {
        self.delete_record(STORAGE_CONFIGS, id)
    }

    // =========== Mounts ===========

    /// Insert a mount. Mount paths must be unique.
    pub fn put_mount(&self, record: &MountRecord) -> Result<()> {
        let duplicate = self
            .list_mounts()?
            .into_iter()
            .any(|m| m.id != record.id && m.mount_path == record.mount_path);
        if duplicate {
            return Err(Error::conflict(format!(
                "mount path already in use: {}",
                record.mount_path
            )));
        }
        self.put_record(MOUNTS, &record.id, record)
    }

    pub fn get_mount(&self, id: &str) -> Result<Option<MountRecord>> {
        self.get_record(MOUNTS, id)
    }

    pub fn list_mounts(&self) -> Result<Vec<MountRecord>> {
        self.list_table(MOUNTS)
    }

    /// Remove a mount and its cached parent-modification entries.
    pub fn delete_mount(&self, id: &str) -> Result<()> {
        self.delete_record(MOUNTS, id)?;
        self.clear_parent_modified_for_mount(id)
    }

    /// Record mount activity.
    pub fn touch_mount(&self, id: &str, now: i64) -> Result<()> {
        if let Some(mut record) = self.get_mount(id)? {
            record.last_used_at = Some(now);
            self.put_record(MOUNTS, &record.id, &record)?;
        }
        Ok(())
    }

    // =========== Shared files ===========

    pub fn put_shared_file(&self, record: &SharedFileRecord) -> Result<()> {
        self.put_record(SHARED_FILES, &record.id, record)
    }

    pub fn get_shared_file(&self, id: &str) -> Result<Option<SharedFileRecord>> {
        self.get_record(SHARED_FILES, id)
    }

    /// Find the most recent record committed for an object key.
    pub fn find_shared_file_by_key(&self, object_key: &str) -> Result<Option<SharedFileRecord>> {
        let mut newest: Option<SharedFileRecord> = None;
        for record in self.list_table::<SharedFileRecord>(SHARED_FILES)? {
            if record.object_key == object_key
                && newest.as_ref().is_none_or(|n| record.created_at > n.created_at)
            {
                newest = Some(record);
            }
        }
        Ok(newest)
    }

    // =========== Parent modification times ===========

    /// Set the modification time for a directory under a mount.
    pub fn bump_parent_modified(&self, mount_id: &str, sub_path: &str, millis: u64) -> Result<()> {
        let key = parent_modified_key(mount_id, sub_path);
        let txn = self.db.begin_write().map_err(meta)?;
        {
            let mut table = txn.open_table(PARENT_MODIFIED).map_err(meta)?;
            table.insert(key.as_str(), millis).map_err(meta)?;
        }
        txn.commit().map_err(meta)
    }

    /// The recorded modification time for a directory, if any.
    pub fn get_parent_modified(&self, mount_id: &str, sub_path: &str) -> Result<Option<u64>> {
        let key = parent_modified_key(mount_id, sub_path);
        let txn = self.db.begin_read().map_err(meta)?;
        let table = txn.open_table(PARENT_MODIFIED).map_err(meta)?;
        Ok(table.get(key.as_str()).map_err(meta)?.map(|g| g.value()))
    }

    /// Drop all parent-modified entries belonging to a mount.
    pub fn clear_parent_modified_for_mount(&self, mount_id: &str) -> Result<()> {
        let prefix = format!("{mount_id}\x00");
        let stale: Vec<String> = {
            let txn = self.db.begin_read().map_err(meta)?;
            let table = txn.open_table(PARENT_MODIFIED).map_err(meta)?;
            let mut stale = Vec::new();
            for entry in table.iter().map_err(meta)? {
                let (key, _) = entry.map_err(meta)?;
                if key.value().starts_with(&prefix) {
                    stale.push(key.value().to_string());
                }
            }
            stale
        };
        if stale.is_empty() {
            return Ok(());
        }
        let txn = self.db.begin_write().map_err(meta)?;
        {
            let mut table = txn.open_table(PARENT_MODIFIED).map_err(meta)?;
            for key in &stale {
                table.remove(key.as_str()).map_err(meta)?;
            }
        }
        txn.commit().map_err(meta)
    }

    // =========== Settings ===========

    pub fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let txn = self.db.begin_read().map_err(meta)?;
        let table = txn.open_table(SETTINGS).map_err(meta)?;
        Ok(table
            .get(key)
            .map_err(meta)?
            .map(|g| g.value().to_string()))
    }

    pub fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        let txn = self.db.begin_write().map_err(meta)?;
        {
            let mut table = txn.open_table(SETTINGS).map_err(meta)?;
            table.insert(key, value).map_err(meta)?;
        }
        txn.commit().map_err(meta)
    }

    // =========== Generic record plumbing ===========

    fn put_record<T: Serialize>(&self, table_def: ByteTable, id: &str, record: &T) -> Result<()> {
        let bytes = encode(record)?;
        let txn = self.db.begin_write().map_err(meta)?;
        {
            let mut table = txn.open_table(table_def).map_err(meta)?;
            table.insert(id, bytes.as_slice()).map_err(meta)?;
        }
        txn.commit().map_err(meta)
    }

    fn get_record<T: DeserializeOwned>(&self, table_def: ByteTable, id: &str) -> Result<Option<T>> {
        let txn = self.db.begin_read().map_err(meta)?;
        let table = txn.open_table(table_def).map_err(meta)?;
        match table.get(id).map_err(meta)? {
            Some(guard) => Ok(Some(decode(guard.value())?)),
            None => Ok(None),
        }
    }

    fn delete_record(&self, table_def: ByteTable, id: &str) -> Result<()> {
        let txn = self.db.begin_write().map_err(meta)?;
        {
            let mut table = txn.open_table(table_def).map_err(meta)?;
            table.remove(id).map_err(meta)?;
        }
        txn.commit().map_err(meta)
    }

    fn list_table<T: DeserializeOwned>(&self, table_def: ByteTable) -> Result<Vec<T>> {
        let txn = self.db.begin_read().map_err(meta)?;
        let table = txn.open_table(table_def).map_err(meta)?;
        let mut out = Vec::new();
        for entry in table.iter().map_err(meta)? {
            let (_, value) = entry.map_err(meta)?;
            out.push(decode(value.value())?);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{PermissionSet, ProviderKind};
    use davit_common::VirtualPath;

    fn test_store() -> (MetaStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = MetaStore::open(&dir.path().join("meta.redb")).unwrap();
        (store, dir)
    }

    fn sample_storage_config() -> StorageConfigRecord {
        StorageConfigRecord {
            id: StorageConfigRecord::new_id(),
            name: "minio".into(),
            provider: ProviderKind::Generic,
            endpoint: Some("http://localhost:9000".into()),
            region: "us-east-1".into(),
            bucket: "davit-test".into(),
            access_key_id: "AKID".into(),
            secret_access_key: "sealed".into(),
            path_style: true,
            root_prefix: String::new(),
            default_signed_ttl_secs: 3600,
            total_capacity_bytes: None,
            cache_ttl_secs: 60,
            created_at: 0,
        }
    }

    #[test]
    fn test_api_key_round_trip() {
        let (store, _dir) = test_store();
        let record = ApiKeyRecord::generate(
            "ci",
            PermissionSet::all(),
            VirtualPath::parse("/team-a/").unwrap(),
        );
        store.put_api_key(&record).unwrap();

        let found = store.lookup_api_key(&record.key, 0).unwrap().unwrap();
        assert_eq!(found.id, record.id);
        assert_eq!(found.basic_path.as_str(), "/team-a/");

        assert!(store.lookup_api_key("dk_nope", 0).unwrap().is_none());
    }

    #[test]
    fn test_expired_key_is_lazily_deleted() {
        let (store, _dir) = test_store();
        let mut record =
            ApiKeyRecord::generate("ci", PermissionSet::default(), VirtualPath::root());
        record.expires_at = Some(100);
        store.put_api_key(&record).unwrap();

        assert!(store.lookup_api_key(&record.key, 200).unwrap().is_none());
        // Gone from both tables, not just refused
        assert!(store.get_api_key(&record.id).unwrap().is_none());
        assert!(store.lookup_api_key(&record.key, 0).unwrap().is_none());
    }

    #[test]
    fn test_mount_path_uniqueness() {
        let (store, _dir) = test_store();
        let sc = sample_storage_config();
        store.put_storage_config(&sc).unwrap();

        let m1 = MountRecord::generate(VirtualPath::parse("/m1/").unwrap(), &sc.id, true, 0);
        store.put_mount(&m1).unwrap();

        let dup = MountRecord::generate(VirtualPath::parse("/m1").unwrap(), &sc.id, false, 0);
        assert!(matches!(store.put_mount(&dup), Err(Error::Conflict(_))));

        // Updating the same mount is not a duplicate
        let mut updated = m1.clone();
        updated.web_proxy = false;
        store.put_mount(&updated).unwrap();
        assert!(!store.get_mount(&m1.id).unwrap().unwrap().web_proxy);
    }

    #[test]
    fn test_parent_modified_cleared_with_mount() {
        let (store, _dir) = test_store();
        store.bump_parent_modified("m1", "docs/", 1000).unwrap();
        store.bump_parent_modified("m1", "", 1000).unwrap();
        store.bump_parent_modified("m2", "docs/", 2000).unwrap();

        assert_eq!(store.get_parent_modified("m1", "docs/").unwrap(), Some(1000));
        store.clear_parent_modified_for_mount("m1").unwrap();
        assert_eq!(store.get_parent_modified("m1", "docs/").unwrap(), None);
        assert_eq!(store.get_parent_modified("m2", "docs/").unwrap(), Some(2000));
    }

    #[test]
    fn test_shared_file_lookup_by_key() {
        let (store, _dir) = test_store();
        let older = SharedFileRecord {
            id: "sf1".into(),
            object_key: "uploads/a.bin".into(),
            storage_config_id: "sc1".into(),
            mount_id: "m1".into(),
            virtual_path: VirtualPath::parse("/m1/a.bin").unwrap(),
            size: Some(10),
            etag: None,
            created_by: "key1".into(),
            created_at: 100,
        };
        let newer = SharedFileRecord {
            id: "sf2".into(),
            created_at: 200,
            ..older.clone()
        };
        store.put_shared_file(&older).unwrap();
        store.put_shared_file(&newer).unwrap();

        let found = store.find_shared_file_by_key("uploads/a.bin").unwrap().unwrap();
        assert_eq!(found.id, "sf2");
    }

    #[test]
    fn test_settings_round_trip() {
        let (store, _dir) = test_store();
        assert!(store.get_setting("webdav_upload_mode").unwrap().is_none());
        store.set_setting("webdav_upload_mode", "direct").unwrap();
        assert_eq!(
            store.get_setting("webdav_upload_mode").unwrap().as_deref(),
            Some("direct")
        );
    }
}
