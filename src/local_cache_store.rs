//! LMDB-backed persistence for the offline cache.
//!
//! Everything lives in one named LMDB database under a small set of string keys:
//!
//! | key                        | value                                  |
//! |----------------------------|----------------------------------------|
//! | `cached_vending_machines`  | JSON array of [`VendingMachine`]       |
//! | `last_sync_time`           | RFC 3339 timestamp                     |
//! | `cached_user_location`     | JSON [`UserLocation`]                  |
//! | `favorites-<userId>`       | JSON array of machine ids              |
//!
//! plus auxiliary per-user records written through [`CacheStore::write_record`].
//! Every write is a single LMDB write transaction, so a reader never observes a
//! half-written record and a failed write leaves the previous value in place.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use lmdb::{Database, DatabaseFlags, Environment, Transaction, WriteFlags};
use log::{debug, info, warn};

use crate::error::StoreError;
use crate::machine_model::{UserLocation, VendingMachine};

pub const MACHINES_KEY: &str = "cached_vending_machines";
pub const LAST_SYNC_KEY: &str = "last_sync_time";
pub const USER_LOCATION_KEY: &str = "cached_user_location";

const DB_NAME: &str = "vending_cache";
const BYTES_PER_MB: usize = 1024 * 1024;

pub fn favorites_key(user_id: &str) -> String {
    format!("favorites-{user_id}")
}

/// Durable storage for the cache records.
///
/// Calls are expected to come from a single logical owner; implementations
/// only need to keep individual records consistent, not serialize writers.
pub trait CacheStore: Send + Sync {
    /// Replaces the machine snapshot and stamps the sync time, atomically.
    /// Returns the timestamp that was written.
    fn write_entities(&self, machines: &[VendingMachine]) -> Result<DateTime<Utc>, StoreError>;

    /// The last written snapshot, or empty if nothing was ever written.
    fn read_entities(&self) -> Result<Vec<VendingMachine>, StoreError>;

    fn read_last_sync(&self) -> Result<Option<DateTime<Utc>>, StoreError>;

    fn write_favorites(&self, user_id: &str, ids: &BTreeSet<String>) -> Result<(), StoreError>;

    fn read_favorites(&self, user_id: &str) -> Result<BTreeSet<String>, StoreError>;

    fn write_user_location(&self, location: &UserLocation) -> Result<(), StoreError>;

    fn read_user_location(&self) -> Result<Option<UserLocation>, StoreError>;

    /// Stores an arbitrary JSON document under `key`.
    fn write_record(&self, key: &str, json: &str) -> Result<(), StoreError>;

    fn read_record(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Removes every record; later reads behave as if nothing was ever written.
    fn clear_all(&self) -> Result<(), StoreError>;
}

pub struct LocalCacheStore {
    env: Environment,
    db: Database,
    path: PathBuf,
}

impl LocalCacheStore {
    /// Opens (creating if needed) the LMDB environment in directory `path`.
    pub fn open(path: impl AsRef<Path>, map_size_mb: usize) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        fs::create_dir_all(&path)?;

        info!("Opening cache store at {}", path.display());

        let env = Environment::new()
            .set_max_dbs(1)
            .set_map_size(map_size_mb.max(1) * BYTES_PER_MB)
            .open(&path)?;
        let db = env.create_db(Some(DB_NAME), DatabaseFlags::empty())?;

        Ok(Self { env, db, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn get_bytes<T>(
        &self,
        key: &str,
        decode: impl FnOnce(&[u8]) -> Result<T, StoreError>,
    ) -> Result<Option<T>, StoreError> {
        let txn = self.env.begin_ro_txn()?;
        let result = match txn.get(self.db, &key) {
            Ok(bytes) => Some(decode(bytes)?),
            Err(lmdb::Error::NotFound) => None,
            Err(e) => return Err(e.into()),
        };
        txn.abort();
        Ok(result)
    }

    fn put_bytes(&self, entries: &[(&str, &[u8])]) -> Result<(), StoreError> {
        let mut txn = self.env.begin_rw_txn()?;
        for (key, value) in entries {
            txn.put(self.db, key, value, WriteFlags::empty())?;
        }
        txn.commit()?;
        Ok(())
    }
}

impl CacheStore for LocalCacheStore {
    fn write_entities(&self, machines: &[VendingMachine]) -> Result<DateTime<Utc>, StoreError> {
        let json = serde_json::to_vec(machines)?;
        let now = Utc::now();
        let stamp = now.to_rfc3339();

        self.put_bytes(&[(MACHINES_KEY, json.as_slice()), (LAST_SYNC_KEY, stamp.as_bytes())])?;

        debug!("Cached {} machines at {stamp}", machines.len());
        Ok(now)
    }

    fn read_entities(&self) -> Result<Vec<VendingMachine>, StoreError> {
        let machines = self.get_bytes(MACHINES_KEY, |bytes| Ok(serde_json::from_slice(bytes)?))?;
        Ok(machines.unwrap_or_default())
    }

    fn read_last_sync(&self) -> Result<Option<DateTime<Utc>>, StoreError> {
        self.get_bytes(LAST_SYNC_KEY, |bytes| {
            let raw = String::from_utf8_lossy(bytes);
            DateTime::parse_from_rfc3339(&raw)
                .map(|t| t.with_timezone(&Utc))
                .map_err(|source| StoreError::Timestamp {
                    key: LAST_SYNC_KEY.to_string(),
                    source,
                })
        })
    }

    fn write_favorites(&self, user_id: &str, ids: &BTreeSet<String>) -> Result<(), StoreError> {
        let json = serde_json::to_vec(ids)?;
        self.put_bytes(&[(favorites_key(user_id).as_str(), json.as_slice())])
    }

    fn read_favorites(&self, user_id: &str) -> Result<BTreeSet<String>, StoreError> {
        let ids = self.get_bytes(&favorites_key(user_id), |bytes| Ok(serde_json::from_slice(bytes)?))?;
        Ok(ids.unwrap_or_default())
    }

    fn write_user_location(&self, location: &UserLocation) -> Result<(), StoreError> {
        let json = serde_json::to_vec(location)?;
        self.put_bytes(&[(USER_LOCATION_KEY, json.as_slice())])
    }

    fn read_user_location(&self) -> Result<Option<UserLocation>, StoreError> {
        self.get_bytes(USER_LOCATION_KEY, |bytes| Ok(serde_json::from_slice(bytes)?))
    }

    fn write_record(&self, key: &str, json: &str) -> Result<(), StoreError> {
        self.put_bytes(&[(key, json.as_bytes())])
    }

    fn read_record(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.get_bytes(key, |bytes| Ok(String::from_utf8_lossy(bytes).into_owned()))
    }

    fn clear_all(&self) -> Result<(), StoreError> {
        let mut txn = self.env.begin_rw_txn()?;
        txn.clear_db(self.db)?;
        txn.commit()?;

        info!("Cache store cleared");
        Ok(())
    }
}

impl Drop for LocalCacheStore {
    fn drop(&mut self) {
        if let Err(e) = self.env.sync(true) {
            warn!("Failed to sync cache store on close: {e}");
        }
    }
}
