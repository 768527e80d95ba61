//! Entity proxies.
//!
//! An [`EntityProxy`] is the client-side handle of one remote entity: its
//! identity, last known snapshot, allowed actions and watch registration.
//! Proxies are built from server replies or cached records, never from a
//! client-invented identity.
//!
//! Two proxies fetched separately for the same identity are independent
//! instances. Each holds its own snapshot, and local updates on one are not
//! reflected in the other. Cloning an `EntityProxy` clones the handle, not
//! the instance.

use std::collections::BTreeSet;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use remora_core::{
    AllowedActions, EntityKind, EntityRecord, Identity, InstanceId, RemoraResult, Snapshot,
    UpdateEvent, UpdateOrigin, ValidationError, new_instance_id,
};
use remora_storage::ConfigCache;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::observer::{ObserverId, ObserverList};
use crate::rpc::NamingRpc;
use crate::subscription::WatchRegistry;

/// Collaborators shared by every proxy of one client.
pub(crate) struct ProxyContext {
    pub(crate) rpc: NamingRpc,
    pub(crate) cache: Arc<ConfigCache>,
    pub(crate) watches: Arc<WatchRegistry>,
}

// ============================================================================
// INSTANCE STATE
// ============================================================================

/// Which pushed fields a watched instance accepts.
#[derive(Debug, Clone, PartialEq, Eq)]
enum WatchFilter {
    All,
    Only(BTreeSet<String>),
}

impl WatchFilter {
    fn from_properties(properties: Option<&[String]>) -> Self {
        match properties {
            Some(props) => WatchFilter::Only(props.iter().cloned().collect()),
            None => WatchFilter::All,
        }
    }

    fn select(&self, changes: &Map<String, Value>) -> Map<String, Value> {
        match self {
            WatchFilter::All => changes.clone(),
            WatchFilter::Only(props) => changes
                .iter()
                .filter(|(field, _)| props.contains(*field))
                .map(|(field, value)| (field.clone(), value.clone()))
                .collect(),
        }
    }
}

#[derive(Debug)]
struct ProxyInner {
    snapshot: Snapshot,
    allowed_actions: AllowedActions,
    watch: Option<WatchFilter>,
}

/// One proxy instance. Shared between handles and weakly referenced by the
/// watch registry.
pub(crate) struct ProxyState {
    identity: Identity,
    instance_id: InstanceId,
    inner: Mutex<ProxyInner>,
    observers: ObserverList,
}

impl ProxyState {
    fn new(identity: Identity, record: EntityRecord) -> Self {
        Self {
            identity,
            instance_id: new_instance_id(),
            inner: Mutex::new(ProxyInner {
                snapshot: record.data,
                allowed_actions: record.allowed_actions,
                watch: None,
            }),
            observers: ObserverList::new(),
        }
    }

    pub(crate) fn identity(&self) -> &Identity {
        &self.identity
    }

    pub(crate) fn instance_id(&self) -> InstanceId {
        self.instance_id
    }

    fn lock(&self) -> MutexGuard<'_, ProxyInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Merge `changes` and return the resulting snapshot.
    fn merge_local(&self, changes: &Map<String, Value>) -> Snapshot {
        let mut inner = self.lock();
        inner.snapshot.merge(changes);
        inner.snapshot.clone()
    }

    /// Merge the watched subset of `changes`. Returns the fields applied, or
    /// `None` when the instance is not watched or nothing passed the filter.
    pub(crate) fn merge_remote(&self, changes: &Map<String, Value>) -> Option<Map<String, Value>> {
        let mut inner = self.lock();
        let applied = inner.watch.as_ref()?.select(changes);
        if applied.is_empty() {
            return None;
        }
        inner.snapshot.merge(&applied);
        Some(applied)
    }

    fn set_watch(&self, watch: Option<WatchFilter>) {
        self.lock().watch = watch;
    }

    pub(crate) fn notify(&self, event: &UpdateEvent) -> usize {
        self.observers.notify(event)
    }
}

// ============================================================================
// ENTITY PROXY
// ============================================================================

/// Handle to one entity proxy instance.
#[derive(Clone)]
pub struct EntityProxy {
    state: Arc<ProxyState>,
    ctx: Arc<ProxyContext>,
}

impl EntityProxy {
    pub(crate) fn from_record(
        ctx: &Arc<ProxyContext>,
        kind: EntityKind,
        record: EntityRecord,
    ) -> RemoraResult<Self> {
        let identity = Identity::parse(kind, record.key.clone())?;
        Ok(Self {
            state: Arc::new(ProxyState::new(identity, record)),
            ctx: ctx.clone(),
        })
    }

    fn from_records(
        ctx: &Arc<ProxyContext>,
        kind: &EntityKind,
        records: Vec<EntityRecord>,
    ) -> RemoraResult<Vec<Self>> {
        records
            .into_iter()
            .map(|record| Self::from_record(ctx, kind.clone(), record))
            .collect()
    }

    pub fn identity(&self) -> &Identity {
        &self.state.identity
    }

    pub fn kind(&self) -> &EntityKind {
        self.state.identity.kind()
    }

    pub fn key(&self) -> &str {
        self.state.identity.key().as_str()
    }

    pub fn instance_id(&self) -> InstanceId {
        self.state.instance_id
    }

    /// Copy of the current snapshot.
    pub fn snapshot(&self) -> Snapshot {
        self.state.lock().snapshot.clone()
    }

    /// Current value of one field.
    pub fn get(&self, field: &str) -> Option<Value> {
        self.state.lock().snapshot.get(field).cloned()
    }

    pub fn allowed_actions(&self) -> AllowedActions {
        self.state.lock().allowed_actions.clone()
    }

    /// Snapshot and allowed actions in wire form, as the cache stores them.
    pub fn to_record(&self) -> EntityRecord {
        let inner = self.state.lock();
        EntityRecord::new(
            self.key(),
            inner.snapshot.clone(),
            inner.allowed_actions.clone(),
        )
    }

    pub fn is_watched(&self) -> bool {
        self.state.lock().watch.is_some()
    }

    /// True when both handles point at the same instance.
    pub fn same_instance(&self, other: &EntityProxy) -> bool {
        Arc::ptr_eq(&self.state, &other.state)
    }

    pub fn subscribe<F>(&self, observer: F) -> ObserverId
    where
        F: Fn(&UpdateEvent) + Send + Sync + 'static,
    {
        self.state.observers.subscribe(observer)
    }

    pub fn unsubscribe(&self, id: ObserverId) -> bool {
        self.state.observers.unsubscribe(id)
    }

    /// Optimistically apply `changes`, then persist them.
    ///
    /// Before this returns, `changes` is shallow-merged into the snapshot,
    /// the cached record (if any) takes this instance's merged data, and
    /// observers receive a local update event. The returned future performs the "update" RPC. If that
    /// fails the local merge stays in place; no rollback is attempted.
    pub fn update(
        &self,
        changes: Map<String, Value>,
    ) -> impl Future<Output = RemoraResult<()>> + Send + 'static {
        let identity = self.state.identity.clone();

        let merged = self.state.merge_local(&changes);
        self.ctx.cache.replace_data_if_present(&identity, &merged);
        self.state.notify(&UpdateEvent::new(
            identity.clone(),
            changes.clone(),
            UpdateOrigin::Local,
        ));

        let rpc = self.ctx.rpc.clone();
        async move {
            let result = rpc.update(&identity, &changes).await;
            if let Err(e) = &result {
                warn!(identity = %identity, error = %e, "Update not persisted, local changes kept");
            }
            result
        }
    }

    /// Destroy the remote entity. The cached record is left in place; call
    /// [`remove_cached`](Self::remove_cached) to evict it.
    pub async fn destroy(&self) -> RemoraResult<()> {
        self.ctx.rpc.destroy(&self.state.identity).await
    }

    /// Receive pushed updates for all fields (`None`) or only the listed ones.
    pub fn watch(&self, properties: Option<Vec<String>>) {
        self.state
            .set_watch(Some(WatchFilter::from_properties(properties.as_deref())));
        self.ctx.watches.register(&self.state, properties.as_deref());
    }

    /// Stop receiving pushed updates. The property list is passed through to
    /// the upstream subscription service.
    pub fn ignore(&self, properties: Option<Vec<String>>) {
        self.state.set_watch(None);
        self.ctx.watches.unregister(&self.state, properties.as_deref());
    }

    /// Evict this entity's cached record from both cache tiers.
    pub fn remove_cached(&self) {
        debug!(identity = %self.state.identity, "Evicting cached record");
        self.ctx.cache.remove(&self.state.identity);
    }

    /// Create an entity related to this one through `relation_method` and
    /// wrap it as `related`.
    pub async fn create_related_object(
        &self,
        relation_method: &str,
        related: EntityKind,
        data: Map<String, Value>,
    ) -> RemoraResult<EntityProxy> {
        if relation_method.trim().is_empty() {
            return Err(ValidationError::RequiredFieldMissing {
                field: "relation_method".to_string(),
            }
            .into());
        }
        let record = self
            .ctx
            .rpc
            .create_related_object(&self.state.identity, relation_method, &data)
            .await?;
        Self::from_record(&self.ctx, related, record)
    }

    /// The single related entity, or `None` if nothing is linked.
    pub async fn get_related_object(
        &self,
        related: EntityKind,
        key: Option<&str>,
        tag: Option<&str>,
    ) -> RemoraResult<Option<EntityProxy>> {
        let record = self
            .ctx
            .rpc
            .get_related_object(&self.state.identity, &related, key, tag)
            .await?;
        record
            .map(|record| Self::from_record(&self.ctx, related, record))
            .transpose()
    }

    pub async fn get_related_objects(
        &self,
        related: EntityKind,
        tag: Option<&str>,
    ) -> RemoraResult<Vec<EntityProxy>> {
        let records = self
            .ctx
            .rpc
            .get_related_objects(&self.state.identity, &related, tag)
            .await?;
        Self::from_records(&self.ctx, &related, records)
    }

    pub async fn find_related_objects(
        &self,
        related: EntityKind,
        key: Option<&str>,
        tag: Option<&str>,
        query: Option<&Value>,
    ) -> RemoraResult<Vec<EntityProxy>> {
        let records = self
            .ctx
            .rpc
            .find_related_objects(&self.state.identity, &related, key, tag, query)
            .await?;
        Self::from_records(&self.ctx, &related, records)
    }
}

impl std::fmt::Debug for EntityProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityProxy")
            .field("identity", &self.state.identity)
            .field("instance_id", &self.state.instance_id)
            .field("watched", &self.is_watched())
            .finish()
    }
}
