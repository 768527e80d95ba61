//! Two-tier config cache.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use remora_core::{EntityRecord, Identity, RemoraConfig, Snapshot, StoreError};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use super::key::CacheKey;
use super::lmdb_store::LmdbStore;
use super::store::{is_absent_sentinel, KeyValueStore, MemoryStore};

/// Statistics about cache usage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Reads answered with a record.
    pub hits: u64,
    /// Reads answered with nothing.
    pub misses: u64,
    /// Successful `set` calls.
    pub writes: u64,
    /// `remove` calls plus records dropped by `purge_all`.
    pub removals: u64,
    /// Persistent-tier operations that failed and were absorbed.
    pub persist_failures: u64,
    /// Entries (records and absent markers) in the memory tier.
    pub entry_count: u64,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Memory-tier slot. `Absent` records that the persistent tier was consulted
/// and held nothing; a key with no slot has never been looked up.
#[derive(Debug, Clone)]
enum Slot {
    Present(EntityRecord),
    Absent,
}

/// Memory map in front of an optional persistent store.
///
/// Without a store the cache is memory-only. Persistent failures never reach
/// the caller: reads treat them as misses and writes keep the memory tier.
pub struct ConfigCache {
    prefix: String,
    memory: RwLock<HashMap<CacheKey, Slot>>,
    store: Option<Arc<dyn KeyValueStore>>,
    stats: RwLock<CacheStats>,
}

impl ConfigCache {
    pub fn new(prefix: impl Into<String>, store: Option<Arc<dyn KeyValueStore>>) -> Self {
        Self {
            prefix: prefix.into(),
            memory: RwLock::new(HashMap::new()),
            store,
            stats: RwLock::new(CacheStats::default()),
        }
    }

    /// Cache with no persistent tier at all.
    pub fn memory_only(prefix: impl Into<String>) -> Self {
        Self::new(prefix, None)
    }

    /// Cache over the store `config` describes: LMDB when `store_path` is
    /// set, an in-process [`MemoryStore`] otherwise.
    pub fn open(config: &RemoraConfig) -> Result<Self, StoreError> {
        let store: Arc<dyn KeyValueStore> = match &config.store_path {
            Some(path) => Arc::new(LmdbStore::open(path, config.store_max_size_mb)?),
            None => Arc::new(MemoryStore::new()),
        };
        Ok(Self::new(config.cache_key_prefix.clone(), Some(store)))
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn has_persistent_tier(&self) -> bool {
        self.store.is_some()
    }

    pub fn key_for(&self, identity: &Identity) -> CacheKey {
        CacheKey::derive(&self.prefix, identity)
    }

    /// Cached record for `identity`, if any.
    ///
    /// Checks memory first. On a memory miss the persistent tier is read and
    /// the outcome, record or absent, is remembered in memory.
    pub fn get(&self, identity: &Identity) -> Option<EntityRecord> {
        let key = self.key_for(identity);

        let remembered = self
            .memory
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
            .cloned();

        let found = match remembered {
            Some(Slot::Present(record)) => Some(record),
            Some(Slot::Absent) => None,
            None => self.backfill(key),
        };

        self.record(|stats| {
            if found.is_some() {
                stats.hits += 1;
            } else {
                stats.misses += 1;
            }
        });
        found
    }

    fn backfill(&self, key: CacheKey) -> Option<EntityRecord> {
        let store = self.store.as_ref()?;

        let slot = match store.get_item(key.as_str()) {
            Ok(Some(raw)) if is_absent_sentinel(&raw) => Slot::Absent,
            Ok(Some(raw)) => match serde_json::from_str::<EntityRecord>(&raw) {
                Ok(record) => Slot::Present(record),
                Err(e) => {
                    warn!(key = %key, error = %e, "Discarding unreadable cache entry");
                    Slot::Absent
                }
            },
            Ok(None) => Slot::Absent,
            Err(e) => {
                warn!(key = %key, error = %e, "Persistent cache read failed");
                self.record(|stats| stats.persist_failures += 1);
                return None;
            }
        };

        let found = match &slot {
            Slot::Present(record) => Some(record.clone()),
            Slot::Absent => None,
        };
        self.remember(key, slot);
        found
    }

    /// Store `record` under `identity` in both tiers.
    pub fn set(&self, identity: &Identity, record: &EntityRecord) {
        let key = self.key_for(identity);

        if let Some(store) = &self.store {
            let persisted = serde_json::to_string(record)
                .map_err(|e| StoreError::Transaction {
                    reason: e.to_string(),
                })
                .and_then(|raw| store.set_item(key.as_str(), &raw));
            if let Err(e) = persisted {
                warn!(key = %key, error = %e, "Persistent cache write failed");
                self.record(|stats| stats.persist_failures += 1);
            }
        }

        self.remember(key, Slot::Present(record.clone()));
        self.record(|stats| stats.writes += 1);
    }

    /// Shallow-merge `changes` into the cached record's data, if one is
    /// cached. Returns whether a record was updated.
    pub fn merge_if_present(&self, identity: &Identity, changes: &Map<String, Value>) -> bool {
        self.update_if_present(identity, |record| record.data.merge(changes))
    }

    /// Replace the cached record's data with `data`, if one is cached.
    /// Allowed actions are kept.
    pub fn replace_data_if_present(&self, identity: &Identity, data: &Snapshot) -> bool {
        self.update_if_present(identity, |record| record.data = data.clone())
    }

    fn update_if_present(
        &self,
        identity: &Identity,
        apply: impl FnOnce(&mut EntityRecord),
    ) -> bool {
        match self.peek(&self.key_for(identity)) {
            Some(mut record) => {
                apply(&mut record);
                self.set(identity, &record);
                true
            }
            None => false,
        }
    }

    /// Cached record for `key` without touching stats or remembering the
    /// outcome.
    fn peek(&self, key: &CacheKey) -> Option<EntityRecord> {
        let remembered = self
            .memory
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned();

        match remembered {
            Some(Slot::Present(record)) => Some(record),
            Some(Slot::Absent) => None,
            None => {
                let store = self.store.as_ref()?;
                match store.get_item(key.as_str()) {
                    Ok(Some(raw)) if !is_absent_sentinel(&raw) => serde_json::from_str(&raw).ok(),
                    Ok(_) => None,
                    Err(e) => {
                        warn!(key = %key, error = %e, "Persistent cache read failed");
                        self.record(|stats| stats.persist_failures += 1);
                        None
                    }
                }
            }
        }
    }

    /// Delete `identity` from both tiers.
    pub fn remove(&self, identity: &Identity) {
        let key = self.key_for(identity);

        if let Some(store) = &self.store {
            if let Err(e) = store.remove_item(key.as_str()) {
                warn!(key = %key, error = %e, "Persistent cache remove failed");
                self.record(|stats| stats.persist_failures += 1);
            }
        }

        self.memory
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&key);
        self.record(|stats| stats.removals += 1);
        self.sync_entry_count();
    }

    /// Clear the memory tier and every persisted key under this cache's
    /// prefix. Returns the number of persisted keys removed.
    pub fn purge_all(&self) -> usize {
        let cleared = {
            let mut memory = self.memory.write().unwrap_or_else(PoisonError::into_inner);
            let count = memory
                .values()
                .filter(|slot| matches!(slot, Slot::Present(_)))
                .count();
            memory.clear();
            count
        };

        let removed = match &self.store {
            Some(store) => match store.remove_all_key_prefixes(&self.prefix) {
                Ok(keys) => keys.len(),
                Err(e) => {
                    warn!(prefix = %self.prefix, error = %e, "Persistent cache purge failed");
                    self.record(|stats| stats.persist_failures += 1);
                    0
                }
            },
            None => 0,
        };

        debug!(prefix = %self.prefix, memory = cleared, persisted = removed, "Purged config cache");
        self.record(|stats| stats.removals += cleared.max(removed) as u64);
        self.sync_entry_count();
        removed
    }

    /// Persisted keys under this cache's prefix.
    pub fn persisted_keys(&self) -> Vec<String> {
        match &self.store {
            Some(store) => store.list_keys(&self.prefix).unwrap_or_else(|e| {
                warn!(prefix = %self.prefix, error = %e, "Persistent cache scan failed");
                Vec::new()
            }),
            None => Vec::new(),
        }
    }

    /// Number of memory-tier entries, absent markers included.
    pub fn memory_len(&self) -> usize {
        self.memory
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
            .read()
            .map(|s| s.clone())
            .unwrap_or_default()
    }

    fn remember(&self, key: CacheKey, slot: Slot) {
        self.memory
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, slot);
        self.sync_entry_count();
    }

    fn sync_entry_count(&self) {
        let count = self.memory_len() as u64;
        self.record(|stats| stats.entry_count = count);
    }

    fn record(&self, update: impl FnOnce(&mut CacheStats)) {
        if let Ok(mut stats) = self.stats.write() {
            update(&mut stats);
        }
    }
}

impl std::fmt::Debug for ConfigCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigCache")
            .field("prefix", &self.prefix)
            .field("persistent", &self.store.is_some())
            .field("memory_len", &self.memory_len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use remora_core::{AllowedActions, EntityKind};
    use serde_json::json;
    use tempfile::TempDir;

    const PREFIX: &str = "remora-config-";

    /// Store whose every operation fails.
    struct BrokenStore;

    impl KeyValueStore for BrokenStore {
        fn get_item(&self, _key: &str) -> Result<Option<String>, StoreError> {
            Err(StoreError::Unavailable {
                reason: "disabled".to_string(),
            })
        }

        fn set_item(&self, _key: &str, _value: &str) -> Result<(), StoreError> {
            Err(StoreError::Unavailable {
                reason: "quota exceeded".to_string(),
            })
        }

        fn remove_item(&self, _key: &str) -> Result<(), StoreError> {
            Err(StoreError::Unavailable {
                reason: "disabled".to_string(),
            })
        }

        fn list_keys(&self, _prefix: &str) -> Result<Vec<String>, StoreError> {
            Err(StoreError::Unavailable {
                reason: "disabled".to_string(),
            })
        }

        fn remove_all_key_prefixes(&self, _prefix: &str) -> Result<Vec<String>, StoreError> {
            Err(StoreError::Unavailable {
                reason: "disabled".to_string(),
            })
        }
    }

    fn user(key: &str) -> Identity {
        Identity::parse(EntityKind::User, key).unwrap()
    }

    fn record(key: &str, data: Value) -> EntityRecord {
        let data = match data {
            Value::Object(map) => Snapshot::from(map),
            _ => Snapshot::new(),
        };
        EntityRecord::new(key, data, AllowedActions::new(["read"]))
    }

    fn cache_with_store() -> (ConfigCache, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let cache = ConfigCache::new(PREFIX, Some(store.clone() as Arc<dyn KeyValueStore>));
        (cache, store)
    }

    #[test]
    fn test_set_writes_both_tiers() {
        let (cache, store) = cache_with_store();
        let rec = record("u1", json!({"name": "ann"}));

        cache.set(&user("u1"), &rec);

        assert_eq!(cache.get(&user("u1")), Some(rec.clone()));
        let raw = store.get_item("remora-config-User-u1").unwrap().unwrap();
        let persisted: EntityRecord = serde_json::from_str(&raw).unwrap();
        assert_eq!(persisted, rec);
    }

    #[test]
    fn test_get_backfills_memory_from_store() {
        let (cache, store) = cache_with_store();
        let rec = record("u1", json!({"name": "ann"}));
        store
            .set_item("remora-config-User-u1", &serde_json::to_string(&rec).unwrap())
            .unwrap();
        assert_eq!(cache.memory_len(), 0);

        assert_eq!(cache.get(&user("u1")), Some(rec.clone()));
        assert_eq!(cache.memory_len(), 1);

        // Memory now answers even if the store loses the value.
        store.remove_item("remora-config-User-u1").unwrap();
        assert_eq!(cache.get(&user("u1")), Some(rec));
    }

    #[test]
    fn test_miss_is_remembered_as_absent() {
        let (cache, store) = cache_with_store();

        assert_eq!(cache.get(&user("u1")), None);
        assert_eq!(cache.memory_len(), 1);

        // A later out-of-band write to the store is not seen through the
        // remembered absence.
        let rec = record("u1", json!({}));
        store
            .set_item("remora-config-User-u1", &serde_json::to_string(&rec).unwrap())
            .unwrap();
        assert_eq!(cache.get(&user("u1")), None);

        // set replaces the absent marker.
        cache.set(&user("u1"), &rec);
        assert_eq!(cache.get(&user("u1")), Some(rec));
    }

    #[test]
    fn test_sentinel_strings_read_as_absent() {
        let (cache, store) = cache_with_store();
        store.set_item("remora-config-User-u1", "null").unwrap();
        store.set_item("remora-config-User-u2", "undefined").unwrap();

        assert_eq!(cache.get(&user("u1")), None);
        assert_eq!(cache.get(&user("u2")), None);
    }

    #[test]
    fn test_unreadable_entry_is_a_miss() {
        let (cache, store) = cache_with_store();
        store.set_item("remora-config-User-u1", "{not json").unwrap();
        assert_eq!(cache.get(&user("u1")), None);
    }

    #[test]
    fn test_remove_deletes_both_tiers() {
        let (cache, store) = cache_with_store();
        cache.set(&user("u1"), &record("u1", json!({})));

        cache.remove(&user("u1"));

        assert_eq!(cache.get(&user("u1")), None);
        assert_eq!(store.get_item("remora-config-User-u1").unwrap(), None);
    }

    #[test]
    fn test_purge_all_clears_namespace_only() {
        let (cache, store) = cache_with_store();
        cache.set(&user("u1"), &record("u1", json!({})));
        cache.set(&user("u2"), &record("u2", json!({})));
        store.set_item("elsewhere-User-u1", "{}").unwrap();

        let removed = cache.purge_all();

        assert_eq!(removed, 2);
        assert_eq!(cache.memory_len(), 0);
        assert!(store.list_keys(PREFIX).unwrap().is_empty());
        assert!(cache.persisted_keys().is_empty());
        assert_eq!(cache.get(&user("u1")), None);
        assert_eq!(cache.get(&user("u2")), None);
        assert!(store.get_item("elsewhere-User-u1").unwrap().is_some());
    }

    #[test]
    fn test_merge_if_present() {
        let (cache, _store) = cache_with_store();
        assert!(!cache.merge_if_present(&user("u1"), &Map::new()));

        cache.set(&user("u1"), &record("u1", json!({"a": 1, "b": {"x": 1}})));
        let changes = match json!({"b": {"y": 2}}) {
            Value::Object(map) => map,
            _ => unreachable!(),
        };
        assert!(cache.merge_if_present(&user("u1"), &changes));

        let cached = cache.get(&user("u1")).unwrap();
        assert_eq!(Value::from(cached.data), json!({"a": 1, "b": {"y": 2}}));
    }

    #[test]
    fn test_broken_store_degrades_to_memory() {
        let cache = ConfigCache::new(PREFIX, Some(Arc::new(BrokenStore) as Arc<dyn KeyValueStore>));
        let rec = record("u1", json!({}));

        assert_eq!(cache.get(&user("u1")), None);
        cache.set(&user("u1"), &rec);
        assert_eq!(cache.get(&user("u1")), Some(rec));
        cache.remove(&user("u1"));
        assert_eq!(cache.purge_all(), 0);
        assert!(cache.persisted_keys().is_empty());

        assert!(cache.stats().persist_failures >= 4);
    }

    #[test]
    fn test_memory_only_cache() {
        let cache = ConfigCache::memory_only(PREFIX);
        assert!(!cache.has_persistent_tier());

        let rec = record("u1", json!({}));
        cache.set(&user("u1"), &rec);
        assert_eq!(cache.get(&user("u1")), Some(rec));
        assert_eq!(cache.purge_all(), 0);
        assert_eq!(cache.get(&user("u1")), None);
    }

    #[test]
    fn test_stats() {
        let (cache, _store) = cache_with_store();
        cache.set(&user("u1"), &record("u1", json!({})));
        cache.get(&user("u1"));
        cache.get(&user("u2"));

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.writes, 1);
        assert_eq!(stats.entry_count, 2);
        assert!((stats.hit_rate() - 0.5).abs() < 0.001);
        assert!((CacheStats::default().hit_rate() - 0.0).abs() < 0.001);
    }

    #[test]
    fn test_merge_if_present_leaves_read_stats_alone() {
        let (cache, store) = cache_with_store();

        assert!(!cache.merge_if_present(&user("u1"), &json!({"a": 1}).as_object().unwrap().clone()));
        assert_eq!(cache.memory_len(), 0);

        let rec = record("u2", json!({"a": 1}));
        store
            .set_item("remora-config-User-u2", &serde_json::to_string(&rec).unwrap())
            .unwrap();
        assert!(cache.merge_if_present(&user("u2"), &json!({"b": 2}).as_object().unwrap().clone()));

        let stats = cache.stats();
        assert_eq!(stats.hits, 0);
        assert_eq!(stats.misses, 0);
        assert_eq!(stats.writes, 1);
        assert_eq!(
            cache.get(&user("u2")).unwrap().data.get("b"),
            Some(&json!(2))
        );
    }

    #[test]
    fn test_replace_data_keeps_allowed_actions() {
        let cache = ConfigCache::memory_only(PREFIX);
        let rec = record("u1", json!({"a": 1, "stale": true}));
        cache.set(&user("u1"), &rec);

        let fresh = Snapshot::from(json!({"a": 2}).as_object().unwrap().clone());
        assert!(cache.replace_data_if_present(&user("u1"), &fresh));
        assert!(!cache.replace_data_if_present(&user("u9"), &fresh));

        let cached = cache.get(&user("u1")).unwrap();
        assert_eq!(cached.data, fresh);
        assert_eq!(cached.allowed_actions, rec.allowed_actions);
    }

    #[test]
    fn test_open_rejects_oversized_store_without_panicking() {
        let temp_dir = TempDir::new().expect("TempDir creation should succeed");
        let config = RemoraConfig::new()
            .with_store_path(temp_dir.path().join("cache"))
            .with_store_max_size_mb(usize::MAX);

        assert!(ConfigCache::open(&config).is_err());
    }

    #[test]
    fn test_open_from_config_with_lmdb() {
        let temp_dir = TempDir::new().expect("TempDir creation should succeed");
        let config = RemoraConfig::new()
            .with_store_path(temp_dir.path().join("cache"))
            .with_store_max_size_mb(1);

        let cache = ConfigCache::open(&config).unwrap();
        assert!(cache.has_persistent_tier());

        let rec = record("u1", json!({"n": 1}));
        cache.set(&user("u1"), &rec);
        assert_eq!(
            cache.persisted_keys(),
            vec!["remora-config-User-u1".to_string()]
        );
        assert_eq!(cache.purge_all(), 1);
    }
}
