//! Persistent key-value store seam.

use std::collections::BTreeMap;
use std::sync::RwLock;

use remora_core::StoreError;

/// Persisted value that reads back as "nothing stored".
pub const NULL_SENTINEL: &str = "null";

/// Persisted value that reads back as "nothing stored".
pub const UNDEFINED_SENTINEL: &str = "undefined";

/// True for persisted strings that mean "no value".
pub fn is_absent_sentinel(value: &str) -> bool {
    value == NULL_SENTINEL || value == UNDEFINED_SENTINEL
}

/// String-valued persistent storage.
///
/// Implementations are synchronous. Every method may fail; the config cache
/// treats any failure as a miss (reads) or a dropped write.
pub trait KeyValueStore: Send + Sync {
    fn get_item(&self, key: &str) -> Result<Option<String>, StoreError>;

    fn set_item(&self, key: &str, value: &str) -> Result<(), StoreError>;

    fn remove_item(&self, key: &str) -> Result<(), StoreError>;

    /// Every stored key starting with `prefix`, in key order.
    fn list_keys(&self, prefix: &str) -> Result<Vec<String>, StoreError>;

    /// Remove every key starting with `prefix` and return the removed keys.
    fn remove_all_key_prefixes(&self, prefix: &str) -> Result<Vec<String>, StoreError>;
}

/// In-process [`KeyValueStore`]. Nothing survives the process.
#[derive(Debug, Default)]
pub struct MemoryStore {
    items: RwLock<BTreeMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.items.read().map(|items| items.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl KeyValueStore for MemoryStore {
    fn get_item(&self, key: &str) -> Result<Option<String>, StoreError> {
        let items = self.items.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(items.get(key).cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut items = self.items.write().map_err(|_| StoreError::LockPoisoned)?;
        items.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<(), StoreError> {
        let mut items = self.items.write().map_err(|_| StoreError::LockPoisoned)?;
        items.remove(key);
        Ok(())
    }

    fn list_keys(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let items = self.items.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(items
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, _)| key.clone())
            .collect())
    }

    fn remove_all_key_prefixes(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let mut items = self.items.write().map_err(|_| StoreError::LockPoisoned)?;
        let removed: Vec<String> = items
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &removed {
            items.remove(key);
        }
        Ok(removed)
    }
}
