//! Update notifications

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::identity::{Identity, Timestamp};

/// Where a snapshot change came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateOrigin {
    /// Caller invoked `update` on this instance.
    Local,
    /// The server pushed a change for a watched instance.
    Remote,
}

impl UpdateOrigin {
    pub fn is_remote(&self) -> bool {
        matches!(self, UpdateOrigin::Remote)
    }
}

/// Fired to a proxy's observers after its snapshot was merged.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateEvent {
    pub identity: Identity,
    /// The fields that changed in this update, exactly as merged.
    pub changes: Map<String, Value>,
    pub origin: UpdateOrigin,
    pub at: Timestamp,
}

impl UpdateEvent {
    pub fn new(identity: Identity, changes: Map<String, Value>, origin: UpdateOrigin) -> Self {
        Self {
            identity,
            changes,
            origin,
            at: Utc::now(),
        }
    }

    pub fn is_remote(&self) -> bool {
        self.origin.is_remote()
    }
}

/// A server-pushed change as it arrives from the transport.
///
/// The type name is still a raw string here; it is resolved through the kind
/// registry before delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteUpdate {
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(rename = "_key")]
    pub key: String,
    pub changes: Map<String, Value>,
}

impl RemoteUpdate {
    pub fn new(
        type_name: impl Into<String>,
        key: impl Into<String>,
        changes: Map<String, Value>,
    ) -> Self {
        Self {
            type_name: type_name.into(),
            key: key.into(),
            changes,
        }
    }
}
