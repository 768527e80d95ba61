//! Remora Core - Naming Service Types
//!
//! Identities, snapshots, update events, configuration and the error
//! catalog shared by every remora crate. Nothing here performs I/O.

pub mod catalog;
pub mod config;
pub mod error;
pub mod event;
pub mod identity;
pub mod snapshot;

pub use catalog::{render_template, ErrorCode, Responsibility};
pub use config::{
    RemoraConfig, DEFAULT_CACHE_KEY_PREFIX, DEFAULT_SERVICE_NAME, MAX_STORE_SIZE_MB,
};
pub use error::{
    ConfigError, ErrorRecord, PayloadError, RemoraError, RemoraResult, StoreError,
    ValidationError,
};
pub use event::{RemoteUpdate, UpdateEvent, UpdateOrigin};
pub use identity::{
    new_instance_id, EntityKey, EntityKind, Identity, InstanceId, KindFactory, KindRegistry,
    Timestamp, TypeName, KEY_SEPARATOR,
};
pub use snapshot::{json_kind, AllowedActions, EntityRecord, Snapshot};
