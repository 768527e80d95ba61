//! Config cache with deterministic key derivation and best-effort persistence.
//!
//! # Tiers
//!
//! Reads check the memory map first and fall back to the [`KeyValueStore`],
//! backfilling memory with either the record or an explicit absent marker.
//! Writes go to both tiers. Persistent failures are logged and absorbed: the
//! cache degrades to memory-only rather than failing the caller.
//!
//! # Keys
//!
//! [`CacheKey`] flattens an identity into `prefix + type + "-" + key`. Type
//! names cannot contain `-`, so the encoding is injective.
//!
//! # Example
//!
//! ```
//! use remora_core::{AllowedActions, EntityKind, EntityRecord, Identity, Snapshot};
//! use remora_storage::ConfigCache;
//!
//! let cache = ConfigCache::memory_only("remora-config-");
//! let user = Identity::parse(EntityKind::User, "u1").unwrap();
//! let record = EntityRecord::new("u1", Snapshot::new(), AllowedActions::default());
//!
//! cache.set(&user, &record);
//! assert_eq!(cache.get(&user), Some(record));
//! ```

pub mod config_cache;
pub mod key;
pub mod lmdb_store;
pub mod store;

pub use config_cache::{CacheStats, ConfigCache};
pub use key::CacheKey;
pub use lmdb_store::{LmdbStore, LmdbStoreError};
pub use store::{is_absent_sentinel, KeyValueStore, MemoryStore, NULL_SENTINEL, UNDEFINED_SENTINEL};
