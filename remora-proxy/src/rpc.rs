//! RPC transport seam and the typed naming service calls.
//!
//! The transport itself is user-supplied: implement [`MessagingProxy`] to
//! resolve services and [`ServiceHandle`] to invoke their methods. Every
//! invocation resolves exactly once, with a value or one [`ErrorRecord`].

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use remora_core::{
    EntityKind, EntityRecord, ErrorCode, ErrorRecord, Identity, RemoraResult,
};
use serde_json::{Map, Value};
use tracing::{debug, warn};

// ============================================================================
// TRANSPORT TRAITS
// ============================================================================

/// Resolves named services on the remote side.
///
/// # Example
/// ```ignore
/// struct WsMessaging { /* ... */ }
///
/// #[async_trait]
/// impl MessagingProxy for WsMessaging {
///     async fn get_service(&self, name: &str) -> Result<Arc<dyn ServiceHandle>, ErrorRecord> {
///         // Load the service descriptor over the socket
///     }
/// }
/// ```
#[async_trait]
pub trait MessagingProxy: Send + Sync {
    /// Resolve `name` to a callable service.
    ///
    /// # Returns
    /// * `Ok(handle)` - The service is ready for calls
    /// * `Err(record)` - e.g. SERVICE_DESCRIPTOR_LOAD_ERROR, NETWORK_ERROR
    async fn get_service(&self, name: &str) -> Result<Arc<dyn ServiceHandle>, ErrorRecord>;
}

/// A resolved remote service.
#[async_trait]
pub trait ServiceHandle: Send + Sync {
    /// Invoke `method` with positional arguments.
    async fn invoke(&self, method: &str, args: Vec<Value>) -> Result<Value, ErrorRecord>;
}

// ============================================================================
// NAMING METHODS
// ============================================================================

/// Methods of the naming service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NamingMethod {
    Get,
    Find,
    Update,
    Destroy,
    CreateRelatedObject,
    GetRelatedObject,
    GetRelatedObjects,
    FindRelatedObjects,
}

impl NamingMethod {
    pub const ALL: [NamingMethod; 8] = [
        NamingMethod::Get,
        NamingMethod::Find,
        NamingMethod::Update,
        NamingMethod::Destroy,
        NamingMethod::CreateRelatedObject,
        NamingMethod::GetRelatedObject,
        NamingMethod::GetRelatedObjects,
        NamingMethod::FindRelatedObjects,
    ];

    /// Wire name of the method.
    pub fn as_str(&self) -> &'static str {
        match self {
            NamingMethod::Get => "get",
            NamingMethod::Find => "find",
            NamingMethod::Update => "update",
            NamingMethod::Destroy => "destroy",
            NamingMethod::CreateRelatedObject => "createRelatedObject",
            NamingMethod::GetRelatedObject => "getRelatedObject",
            NamingMethod::GetRelatedObjects => "getRelatedObjects",
            NamingMethod::FindRelatedObjects => "findRelatedObjects",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|m| m.as_str() == name)
    }
}

impl fmt::Display for NamingMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// TIMEOUT DECORATOR
// ============================================================================

/// Wraps a [`ServiceHandle`] so that calls with no reply inside `timeout`
/// resolve with RPC_TIMEOUT.
///
/// The abandoned call is dropped; a late reply is never observed.
pub struct TimeoutHandle {
    inner: Arc<dyn ServiceHandle>,
    timeout: Duration,
}

impl TimeoutHandle {
    pub fn new(inner: Arc<dyn ServiceHandle>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

#[async_trait]
impl ServiceHandle for TimeoutHandle {
    async fn invoke(&self, method: &str, args: Vec<Value>) -> Result<Value, ErrorRecord> {
        match tokio::time::timeout(self.timeout, self.inner.invoke(method, args)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    method = method,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "RPC timed out"
                );
                Err(ErrorRecord::from(ErrorCode::RpcTimeout))
            }
        }
    }
}

// ============================================================================
// TYPED NAMING CALLS
// ============================================================================

/// Typed wrapper over the naming service.
///
/// Builds the positional arguments for each method and decodes the replies
/// into [`EntityRecord`]s. Cheap to clone.
#[derive(Clone)]
pub struct NamingRpc {
    messaging: Arc<dyn MessagingProxy>,
    service_name: Arc<str>,
    timeout: Option<Duration>,
}

impl NamingRpc {
    pub fn new(
        messaging: Arc<dyn MessagingProxy>,
        service_name: impl Into<Arc<str>>,
        timeout: Option<Duration>,
    ) -> Self {
        Self {
            messaging,
            service_name: service_name.into(),
            timeout,
        }
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    async fn service(&self) -> RemoraResult<Arc<dyn ServiceHandle>> {
        let handle = self.messaging.get_service(&self.service_name).await?;
        Ok(match self.timeout {
            Some(timeout) => Arc::new(TimeoutHandle::new(handle, timeout)),
            None => handle,
        })
    }

    /// Resolve the service and invoke `method`.
    pub async fn call(&self, method: NamingMethod, args: Vec<Value>) -> RemoraResult<Value> {
        let service = self.service().await?;
        debug!(service = %self.service_name, method = %method, args = args.len(), "Dispatching RPC");

        match service.invoke(method.as_str(), args).await {
            Ok(value) => Ok(value),
            Err(record) => {
                debug!(method = %method, code = %record.code, "RPC failed");
                Err(record.into())
            }
        }
    }

    pub async fn get(&self, identity: &Identity) -> RemoraResult<EntityRecord> {
        let value = self
            .call(NamingMethod::Get, identity_args(identity))
            .await?;
        Ok(EntityRecord::from_value(NamingMethod::Get.as_str(), value)?)
    }

    pub async fn find(
        &self,
        kind: &EntityKind,
        query: &Value,
        start: u64,
        rows: u64,
    ) -> RemoraResult<Vec<EntityRecord>> {
        let args = vec![
            Value::from(kind.type_name()),
            query.clone(),
            Value::from(start),
            Value::from(rows),
        ];
        let value = self.call(NamingMethod::Find, args).await?;
        Ok(EntityRecord::list_from_value(
            NamingMethod::Find.as_str(),
            value,
        )?)
    }

    /// Persist `data` for `identity`. The reply carries no snapshot.
    pub async fn update(&self, identity: &Identity, data: &Map<String, Value>) -> RemoraResult<()> {
        let mut args = identity_args(identity);
        args.push(Value::Object(data.clone()));
        self.call(NamingMethod::Update, args).await?;
        Ok(())
    }

    pub async fn destroy(&self, identity: &Identity) -> RemoraResult<()> {
        self.call(NamingMethod::Destroy, identity_args(identity))
            .await?;
        Ok(())
    }

    pub async fn create_related_object(
        &self,
        identity: &Identity,
        relation_method: &str,
        data: &Map<String, Value>,
    ) -> RemoraResult<EntityRecord> {
        let mut args = identity_args(identity);
        args.push(Value::from(relation_method));
        args.push(Value::Object(data.clone()));
        let value = self.call(NamingMethod::CreateRelatedObject, args).await?;
        Ok(EntityRecord::from_value(
            NamingMethod::CreateRelatedObject.as_str(),
            value,
        )?)
    }

    /// `Ok(None)` when the server reports no linked object.
    pub async fn get_related_object(
        &self,
        identity: &Identity,
        related: &EntityKind,
        key: Option<&str>,
        tag: Option<&str>,
    ) -> RemoraResult<Option<EntityRecord>> {
        let mut args = identity_args(identity);
        args.push(Value::from(related.type_name()));
        args.push(optional(key));
        args.push(optional(tag));
        match self.call(NamingMethod::GetRelatedObject, args).await? {
            Value::Null => Ok(None),
            value => Ok(Some(EntityRecord::from_value(
                NamingMethod::GetRelatedObject.as_str(),
                value,
            )?)),
        }
    }

    pub async fn get_related_objects(
        &self,
        identity: &Identity,
        related: &EntityKind,
        tag: Option<&str>,
    ) -> RemoraResult<Vec<EntityRecord>> {
        let mut args = identity_args(identity);
        args.push(Value::from(related.type_name()));
        args.push(optional(tag));
        let value = self.call(NamingMethod::GetRelatedObjects, args).await?;
        Ok(EntityRecord::list_from_value(
            NamingMethod::GetRelatedObjects.as_str(),
            value,
        )?)
    }

    pub async fn find_related_objects(
        &self,
        identity: &Identity,
        related: &EntityKind,
        key: Option<&str>,
        tag: Option<&str>,
        query: Option<&Value>,
    ) -> RemoraResult<Vec<EntityRecord>> {
        let mut args = identity_args(identity);
        args.push(Value::from(related.type_name()));
        args.push(optional(key));
        args.push(optional(tag));
        args.push(query.cloned().unwrap_or(Value::Null));
        let value = self.call(NamingMethod::FindRelatedObjects, args).await?;
        Ok(EntityRecord::list_from_value(
            NamingMethod::FindRelatedObjects.as_str(),
            value,
        )?)
    }
}

impl fmt::Debug for NamingRpc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NamingRpc")
            .field("service_name", &self.service_name)
            .field("timeout", &self.timeout)
            .finish()
    }
}

fn identity_args(identity: &Identity) -> Vec<Value> {
    vec![
        Value::from(identity.type_name()),
        Value::from(identity.key().as_str()),
    ]
}

fn optional(value: Option<&str>) -> Value {
    value.map(Value::from).unwrap_or(Value::Null)
}
