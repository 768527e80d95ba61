//! LMDB-backed persistent tier.
//!
//! Uses the heed crate (Rust bindings for LMDB) to keep string values in a
//! memory-mapped file, so cached records survive a process restart.
//!
//! # Thread Safety
//!
//! LMDB provides ACID transactions. The store uses:
//! - Read transactions for `get_item` and `list_keys`
//! - Write transactions for `set_item`, `remove_item` and
//!   `remove_all_key_prefixes`

use std::path::Path;

use heed::types::Str;
use heed::{Database, Env, EnvOpenOptions};
use remora_core::StoreError;
use tracing::{debug, warn};

use super::store::KeyValueStore;

/// Error type for LMDB store operations.
#[derive(Debug, thiserror::Error)]
pub enum LmdbStoreError {
    /// Failed to open or create the LMDB environment.
    #[error("Failed to open LMDB environment: {0}")]
    EnvOpen(String),

    /// Failed to open the database within the environment.
    #[error("Failed to open database: {0}")]
    DbOpen(String),

    /// Transaction error.
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<LmdbStoreError> for StoreError {
    fn from(e: LmdbStoreError) -> Self {
        match e {
            LmdbStoreError::EnvOpen(reason) | LmdbStoreError::DbOpen(reason) => {
                StoreError::Open { reason }
            }
            LmdbStoreError::Io(err) => StoreError::Open {
                reason: err.to_string(),
            },
            LmdbStoreError::Transaction(reason) => StoreError::Transaction { reason },
        }
    }
}

fn txn_error(e: heed::Error) -> LmdbStoreError {
    LmdbStoreError::Transaction(e.to_string())
}

/// LMDB-backed [`KeyValueStore`].
///
/// # Example
///
/// ```ignore
/// use remora_storage::{KeyValueStore, LmdbStore};
///
/// let store = LmdbStore::open("/var/cache/remora", 16)?;
/// store.set_item("remora-config-User-u1", "{\"_key\":\"u1\"}")?;
/// let keys = store.list_keys("remora-config-")?;
/// ```
pub struct LmdbStore {
    /// The LMDB environment.
    env: Env,
    /// The main database (single unnamed database).
    db: Database<Str, Str>,
}

impl LmdbStore {
    /// Open (or create) a store in `path`.
    ///
    /// # Arguments
    ///
    /// * `path` - Directory where LMDB files will be stored
    /// * `max_size_mb` - Maximum size of the database in megabytes
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The directory cannot be created
    /// - LMDB environment cannot be opened
    /// - Database cannot be created
    pub fn open<P: AsRef<Path>>(path: P, max_size_mb: usize) -> Result<Self, LmdbStoreError> {
        let map_size = max_size_mb.checked_mul(1024 * 1024).ok_or_else(|| {
            LmdbStoreError::EnvOpen(format!("map size of {max_size_mb} MB overflows"))
        })?;

        std::fs::create_dir_all(&path)?;

        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(map_size)
                .max_dbs(1)
                .open(path.as_ref())
        }
        .map_err(|e| LmdbStoreError::EnvOpen(e.to_string()))?;

        let mut wtxn = env.write_txn().map_err(txn_error)?;

        let db: Database<Str, Str> = env
            .create_database(&mut wtxn, None)
            .map_err(|e| LmdbStoreError::DbOpen(e.to_string()))?;

        wtxn.commit().map_err(txn_error)?;

        debug!(path = %path.as_ref().display(), max_size_mb, "Opened LMDB store");
        Ok(Self { env, db })
    }

    /// Iterate over keys matching a prefix and collect them.
    fn collect_keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, LmdbStoreError> {
        let rtxn = self.env.read_txn().map_err(txn_error)?;

        let mut keys = Vec::new();
        let iter = self.db.iter(&rtxn).map_err(txn_error)?;

        for result in iter {
            match result {
                Ok((key, _)) => {
                    if key.starts_with(prefix) {
                        keys.push(key.to_string());
                    }
                }
                Err(e) => {
                    warn!(prefix, error = %e, "Skipping unreadable LMDB entry");
                }
            }
        }

        Ok(keys)
    }

    fn read(&self, key: &str) -> Result<Option<String>, LmdbStoreError> {
        let rtxn = self.env.read_txn().map_err(txn_error)?;
        let value = self.db.get(&rtxn, key).map_err(txn_error)?;
        Ok(value.map(str::to_string))
    }

    fn write(&self, key: &str, value: &str) -> Result<(), LmdbStoreError> {
        let mut wtxn = self.env.write_txn().map_err(txn_error)?;
        self.db.put(&mut wtxn, key, value).map_err(txn_error)?;
        wtxn.commit().map_err(txn_error)
    }

    fn delete(&self, key: &str) -> Result<(), LmdbStoreError> {
        let mut wtxn = self.env.write_txn().map_err(txn_error)?;
        self.db.delete(&mut wtxn, key).map_err(txn_error)?;
        wtxn.commit().map_err(txn_error)
    }

    fn delete_prefix(&self, prefix: &str) -> Result<Vec<String>, LmdbStoreError> {
        let keys_to_delete = self.collect_keys_with_prefix(prefix)?;

        let mut wtxn = self.env.write_txn().map_err(txn_error)?;

        let mut removed = Vec::with_capacity(keys_to_delete.len());
        for key in keys_to_delete {
            match self.db.delete(&mut wtxn, key.as_str()) {
                Ok(true) => removed.push(key),
                Ok(false) => {}
                Err(e) => {
                    warn!(key = %key, error = %e, "Failed to delete LMDB entry during purge");
                }
            }
        }

        wtxn.commit().map_err(txn_error)?;
        Ok(removed)
    }
}

impl KeyValueStore for LmdbStore {
    fn get_item(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.read(key)?)
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), StoreError> {
        Ok(self.write(key, value)?)
    }

    fn remove_item(&self, key: &str) -> Result<(), StoreError> {
        Ok(self.delete(key)?)
    }

    fn list_keys(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        Ok(self.collect_keys_with_prefix(prefix)?)
    }

    fn remove_all_key_prefixes(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        Ok(self.delete_prefix(prefix)?)
    }
}
