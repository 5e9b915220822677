//! Per-storage-config driver cache
//!
//! Driver construction decrypts the stored secret, so clients are built
//! once per storage config and reused for the process lifetime.
//! Decrypted credentials live only inside the cached client.

use dashmap::DashMap;
use davit_common::Result;
use davit_meta::{SecretBox, StorageConfigRecord};
use davit_s3::S3Driver;
use std::sync::Arc;
use tracing::debug;

pub struct DriverCache {
    secret_box: SecretBox,
    drivers: DashMap<String, Arc<S3Driver>>,
}

impl DriverCache {
    #[must_use]
    pub fn new(secret_box: SecretBox) -> Self {
        Self {
            secret_box,
            drivers: DashMap::new(),
        }
    }

    /// The cached driver for a storage config, building it on first use.
    pub fn driver_for(&self, record: &StorageConfigRecord) -> Result<Arc<S3Driver>> {
        if let Some(driver) = self.drivers.get(&record.id) {
            return Ok(driver.clone());
        }
        let secret = self.secret_box.open(&record.secret_access_key)?;
        let driver = Arc::new(S3Driver::connect(record, &secret));
        debug!(storage_config_id = %record.id, bucket = %record.bucket, "built s3 client");
        self.drivers.insert(record.id.clone(), driver.clone());
        Ok(driver)
    }

    /// Drop the cached client, e.g. after the config's credentials
    /// changed.
    pub fn invalidate(&self, storage_config_id: &str) {
        self.drivers.remove(storage_config_id);
    }

    /// Seal a plaintext secret for storage. Admin handlers use this when
    /// creating or updating a storage config.
    pub fn seal_secret(&self, plaintext: &str) -> Result<String> {
        self.secret_box.seal(plaintext)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use davit_meta::ProviderKind;

    fn record(secret_box: &SecretBox) -> StorageConfigRecord {
        StorageConfigRecord {
            id: "sc1".into(),
            name: "minio".into(),
            provider: ProviderKind::Generic,
            endpoint: Some("http://localhost:9000".into()),
            region: "us-east-1".into(),
            bucket: "bkt".into(),
            access_key_id: "AKID".into(),
            secret_access_key: secret_box.seal("hunter2").unwrap(),
            path_style: true,
            root_prefix: String::new(),
            default_signed_ttl_secs: 3600,
            total_capacity_bytes: None,
            cache_ttl_secs: 60,
            created_at: 0,
        }
    }

    #[test]
    fn test_driver_is_cached() {
        let secret_box = SecretBox::from_passphrase("pass").unwrap();
        let cache = DriverCache::new(secret_box.clone());
        let record = record(&secret_box);
        let a = cache.driver_for(&record).unwrap();
        let b = cache.driver_for(&record).unwrap();
        assert!(Arc::ptr_eq(&a, &b));

        cache.invalidate(&record.id);
        let c = cache.driver_for(&record).unwrap();
        assert!(!Arc::ptr_eq(&a, &c));
    }

    #[test]
    fn test_bad_seal_surfaces_crypto_error() {
        let cache = DriverCache::new(SecretBox::from_passphrase("pass").unwrap());
        let mut record = record(&SecretBox::from_passphrase("other").unwrap());
        record.secret_access_key = SecretBox::from_passphrase("other")
            .unwrap()
            .seal("hunter2")
            .unwrap();
        assert!(cache.driver_for(&record).is_err());
    }
}
