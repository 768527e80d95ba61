//! Watch registrations and remote push delivery.
//!
//! ## Architecture
//!
//! - Proxies register themselves per identity; the registry only holds weak
//!   references, so dropped proxies fall out on the next delivery
//! - Registrations are forwarded to an optional upstream
//!   [`UpdateSubscriptions`] (the transport's event service)
//! - Pushed changes arrive as [`RemoteUpdate`]s, either directly or through a
//!   tokio mpsc channel drained by [`WatchRegistry::run`]
//!
//! Delivery is per instance. Two live proxies for the same identity are
//! separate subscribers, and an unwatched proxy never sees pushed changes.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, Weak};

use remora_core::{
    EntityKey, Identity, InstanceId, KindRegistry, RemoraResult, RemoteUpdate, UpdateEvent,
    UpdateOrigin,
};
use remora_storage::ConfigCache;
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::proxy::ProxyState;

/// Event subscription collaborator on the transport side.
///
/// Registration is fire-and-forget: there is no failure path.
pub trait UpdateSubscriptions: Send + Sync {
    fn register_for_updates(
        &self,
        identity: &Identity,
        instance: InstanceId,
        properties: Option<&[String]>,
    );

    fn unregister_for_updates(
        &self,
        identity: &Identity,
        instance: InstanceId,
        properties: Option<&[String]>,
    );
}

/// Live watched proxy instances, by identity.
pub struct WatchRegistry {
    watchers: RwLock<HashMap<Identity, Vec<Weak<ProxyState>>>>,
    upstream: Option<Arc<dyn UpdateSubscriptions>>,
    cache: Arc<ConfigCache>,
    kinds: KindRegistry,
}

impl WatchRegistry {
    pub fn new(cache: Arc<ConfigCache>, kinds: KindRegistry) -> Self {
        Self {
            watchers: RwLock::new(HashMap::new()),
            upstream: None,
            cache,
            kinds,
        }
    }

    pub fn with_upstream(mut self, upstream: Arc<dyn UpdateSubscriptions>) -> Self {
        self.upstream = Some(upstream);
        self
    }

    /// Create the push channel consumed by [`WatchRegistry::run`].
    pub fn push_channel(
        capacity: usize,
    ) -> (mpsc::Sender<RemoteUpdate>, mpsc::Receiver<RemoteUpdate>) {
        mpsc::channel(capacity)
    }

    pub(crate) fn register(&self, state: &Arc<ProxyState>, properties: Option<&[String]>) {
        {
            let mut watchers = self.watchers.write().unwrap_or_else(PoisonError::into_inner);
            let entries = watchers.entry(state.identity().clone()).or_default();
            entries.retain(|weak| weak.strong_count() > 0);
            if !entries
                .iter()
                .any(|weak| std::ptr::eq(weak.as_ptr(), Arc::as_ptr(state)))
            {
                entries.push(Arc::downgrade(state));
            }
        }

        debug!(
            identity = %state.identity(),
            instance = %state.instance_id(),
            properties = ?properties,
            "Watching entity"
        );
        if let Some(upstream) = &self.upstream {
            upstream.register_for_updates(state.identity(), state.instance_id(), properties);
        }
    }

    pub(crate) fn unregister(&self, state: &ProxyState, properties: Option<&[String]>) {
        {
            let mut watchers = self.watchers.write().unwrap_or_else(PoisonError::into_inner);
            if let Some(entries) = watchers.get_mut(state.identity()) {
                entries.retain(|weak| {
                    weak.strong_count() > 0 && !std::ptr::eq(weak.as_ptr(), state)
                });
                if entries.is_empty() {
                    watchers.remove(state.identity());
                }
            }
        }

        debug!(
            identity = %state.identity(),
            instance = %state.instance_id(),
            "Ignoring entity"
        );
        if let Some(upstream) = &self.upstream {
            upstream.unregister_for_updates(state.identity(), state.instance_id(), properties);
        }
    }

    /// Number of live watched instances for `identity`.
    pub fn watched_instances(&self, identity: &Identity) -> usize {
        self.watchers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(identity)
            .map(|entries| entries.iter().filter(|weak| weak.strong_count() > 0).count())
            .unwrap_or(0)
    }

    /// Merge pushed `changes` into every live watched instance of
    /// `identity`, refresh the cached record if there is one, then fire a
    /// remote update event on each instance that received fields.
    ///
    /// Returns the number of instances notified.
    pub fn deliver(&self, identity: &Identity, changes: &Map<String, Value>) -> usize {
        let live: Vec<Arc<ProxyState>> = {
            let mut watchers = self.watchers.write().unwrap_or_else(PoisonError::into_inner);
            match watchers.get_mut(identity) {
                Some(entries) => {
                    entries.retain(|weak| weak.strong_count() > 0);
                    let live = entries.iter().filter_map(Weak::upgrade).collect();
                    if entries.is_empty() {
                        watchers.remove(identity);
                    }
                    live
                }
                None => Vec::new(),
            }
        };

        let merged: Vec<(Arc<ProxyState>, Map<String, Value>)> = live
            .into_iter()
            .filter_map(|state| state.merge_remote(changes).map(|applied| (state, applied)))
            .collect();

        if merged.is_empty() {
            debug!(identity = %identity, "No watched instance for pushed update");
            return 0;
        }

        self.cache.merge_if_present(identity, changes);

        for (state, applied) in &merged {
            state.notify(&UpdateEvent::new(
                identity.clone(),
                applied.clone(),
                UpdateOrigin::Remote,
            ));
        }

        debug!(identity = %identity, instances = merged.len(), "Delivered pushed update");
        merged.len()
    }

    /// Resolve the pushed type name and key, then [`deliver`](Self::deliver).
    pub fn deliver_remote(&self, update: RemoteUpdate) -> RemoraResult<usize> {
        let kind = self.kinds.resolve(&update.type_name)?;
        let identity = Identity::new(kind, EntityKey::new(update.key)?);
        Ok(self.deliver(&identity, &update.changes))
    }

    /// Drain `receiver` until every sender is gone.
    pub async fn run(self: Arc<Self>, mut receiver: mpsc::Receiver<RemoteUpdate>) {
        info!("Push delivery started");
        while let Some(update) = receiver.recv().await {
            let type_name = update.type_name.clone();
            if let Err(e) = self.deliver_remote(update) {
                warn!(type_name = %type_name, error = %e, "Dropping pushed update");
            }
        }
        info!("Push delivery stopped");
    }
}

impl std::fmt::Debug for WatchRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let identities = self
            .watchers
            .read()
            .map(|w| w.len())
            .unwrap_or_default();
        f.debug_struct("WatchRegistry")
            .field("identities", &identities)
            .field("upstream", &self.upstream.is_some())
            .finish()
    }
}
