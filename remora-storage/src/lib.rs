//! Remora Storage - Config Cache
//!
//! Two-tier cache of entity records keyed by identity: a process memory map
//! in front of a string-valued persistent key-value store. The persistent
//! tier is either in memory or LMDB via heed.

pub mod cache;

pub use cache::{
    is_absent_sentinel, CacheKey, CacheStats, ConfigCache, KeyValueStore, LmdbStore,
    LmdbStoreError, MemoryStore, NULL_SENTINEL, UNDEFINED_SENTINEL,
};
