//! Naming client: the dependency root.
//!
//! A [`NamingClient`] is built once per process and owns the config cache,
//! the watch registry and the RPC wrapper. Every [`EntityProxy`] it hands
//! out shares those collaborators.

use std::sync::Arc;

use remora_core::{
    EntityKind, EntityRecord, Identity, KindRegistry, RemoraConfig, RemoraResult, RemoteUpdate,
};
use remora_storage::{ConfigCache, KeyValueStore};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::proxy::{EntityProxy, ProxyContext};
use crate::rpc::{MessagingProxy, NamingRpc};
use crate::subscription::{UpdateSubscriptions, WatchRegistry};

/// Where the config cache keeps its persistent tier.
enum StoreChoice {
    /// Open what the config describes.
    FromConfig,
    /// Use a caller-supplied store.
    Custom(Arc<dyn KeyValueStore>),
    /// No persistent tier.
    MemoryOnly,
}

/// Builder for [`NamingClient`].
///
/// # Example
/// ```ignore
/// let client = NamingClient::builder(messaging)
///     .config(RemoraConfig::from_env()?)
///     .subscriptions(push_service)
///     .build()?;
///
/// let user = client.get_cached_object(EntityKind::User, "u1").await?;
/// ```
pub struct NamingClientBuilder {
    messaging: Arc<dyn MessagingProxy>,
    config: RemoraConfig,
    store: StoreChoice,
    subscriptions: Option<Arc<dyn UpdateSubscriptions>>,
    kinds: KindRegistry,
}

impl NamingClientBuilder {
    pub fn config(mut self, config: RemoraConfig) -> Self {
        self.config = config;
        self
    }

    /// Use `store` as the persistent tier instead of opening one from the
    /// config.
    pub fn store(mut self, store: Arc<dyn KeyValueStore>) -> Self {
        self.store = StoreChoice::Custom(store);
        self
    }

    /// Run without a persistent tier.
    pub fn memory_only(mut self) -> Self {
        self.store = StoreChoice::MemoryOnly;
        self
    }

    pub fn subscriptions(mut self, subscriptions: Arc<dyn UpdateSubscriptions>) -> Self {
        self.subscriptions = Some(subscriptions);
        self
    }

    /// Replace the kind registry (defaults to the well-known kinds).
    pub fn kinds(mut self, kinds: KindRegistry) -> Self {
        self.kinds = kinds;
        self
    }

    /// Validate the config and assemble the client.
    ///
    /// A persistent store that cannot be opened is logged and replaced by a
    /// memory-only cache.
    pub fn build(self) -> RemoraResult<NamingClient> {
        self.config.validate()?;
        let prefix = self.config.cache_key_prefix.clone();

        let cache = match self.store {
            StoreChoice::FromConfig => ConfigCache::open(&self.config).unwrap_or_else(|e| {
                warn!(error = %e, "Persistent cache unavailable, continuing memory-only");
                ConfigCache::memory_only(prefix)
            }),
            StoreChoice::Custom(store) => ConfigCache::new(prefix, Some(store)),
            StoreChoice::MemoryOnly => ConfigCache::memory_only(prefix),
        };
        let cache = Arc::new(cache);

        let mut watches = WatchRegistry::new(cache.clone(), self.kinds.clone());
        if let Some(subscriptions) = self.subscriptions {
            watches = watches.with_upstream(subscriptions);
        }

        let rpc = NamingRpc::new(
            self.messaging,
            self.config.service_name.clone(),
            self.config.rpc_timeout,
        );

        info!(
            service = %self.config.service_name,
            prefix = %self.config.cache_key_prefix,
            persistent = cache.has_persistent_tier(),
            "Naming client ready"
        );

        Ok(NamingClient {
            ctx: Arc::new(ProxyContext {
                rpc,
                cache,
                watches: Arc::new(watches),
            }),
            kinds: self.kinds,
            config: self.config,
        })
    }
}

/// Entry point for fetching and finding entity proxies.
#[derive(Clone)]
pub struct NamingClient {
    ctx: Arc<ProxyContext>,
    kinds: KindRegistry,
    config: RemoraConfig,
}

impl NamingClient {
    pub fn builder(messaging: Arc<dyn MessagingProxy>) -> NamingClientBuilder {
        NamingClientBuilder {
            messaging,
            config: RemoraConfig::default(),
            store: StoreChoice::FromConfig,
            subscriptions: None,
            kinds: KindRegistry::new(),
        }
    }

    pub fn config(&self) -> &RemoraConfig {
        &self.config
    }

    pub fn kinds(&self) -> &KindRegistry {
        &self.kinds
    }

    pub fn cache(&self) -> &Arc<ConfigCache> {
        &self.ctx.cache
    }

    pub fn watches(&self) -> &Arc<WatchRegistry> {
        &self.ctx.watches
    }

    /// Look up a type name in the kind registry.
    pub fn resolve_kind(&self, type_name: &str) -> RemoraResult<EntityKind> {
        Ok(self.kinds.resolve(type_name)?)
    }

    /// Wrap a record already in hand (e.g. one delivered out of band).
    pub fn proxy_from_record(
        &self,
        kind: EntityKind,
        record: EntityRecord,
    ) -> RemoraResult<EntityProxy> {
        EntityProxy::from_record(&self.ctx, kind, record)
    }

    /// Fetch from the server, bypassing the cache entirely.
    pub async fn get_object(&self, kind: EntityKind, key: &str) -> RemoraResult<EntityProxy> {
        let identity = Identity::parse(kind, key)?;
        self.fetch(&identity, false).await
    }

    /// Serve from the cache when possible; otherwise fetch and cache.
    pub async fn get_cached_object(
        &self,
        kind: EntityKind,
        key: &str,
    ) -> RemoraResult<EntityProxy> {
        let identity = Identity::parse(kind, key)?;
        self.fetch(&identity, true).await
    }

    /// Materialize a proxy for `identity`.
    ///
    /// With `use_cache`, a cached record is used without any RPC, and a
    /// fetched record is written back. On failure no proxy is built.
    pub async fn fetch(&self, identity: &Identity, use_cache: bool) -> RemoraResult<EntityProxy> {
        if use_cache {
            if let Some(record) = self.ctx.cache.get(identity) {
                debug!(identity = %identity, "Serving entity from cache");
                return EntityProxy::from_record(&self.ctx, identity.kind().clone(), record);
            }
        }

        let record = self.ctx.rpc.get(identity).await?;
        if use_cache {
            self.ctx.cache.set(identity, &record);
        }
        EntityProxy::from_record(&self.ctx, identity.kind().clone(), record)
    }

    /// Run a server-side query. Results keep server order; no match is an
    /// empty list.
    pub async fn find_objects(
        &self,
        kind: EntityKind,
        query: &Value,
        start: u64,
        rows: u64,
    ) -> RemoraResult<Vec<EntityProxy>> {
        let records = self.ctx.rpc.find(&kind, query, start, rows).await?;
        records
            .into_iter()
            .map(|record| EntityProxy::from_record(&self.ctx, kind.clone(), record))
            .collect()
    }

    /// Put `record` into the cache as the known state of `kind`/`record.key`.
    pub fn cache_object_config(&self, kind: EntityKind, record: &EntityRecord) -> RemoraResult<()> {
        let identity = Identity::parse(kind, record.key.clone())?;
        self.ctx.cache.set(&identity, record);
        Ok(())
    }

    pub fn remove_cached_object(&self, kind: EntityKind, key: &str) -> RemoraResult<()> {
        let identity = Identity::parse(kind, key)?;
        self.ctx.cache.remove(&identity);
        Ok(())
    }

    /// Purge every cached record. Returns the number of persisted keys
    /// removed.
    pub fn nuke_cache(&self) -> usize {
        self.ctx.cache.purge_all()
    }

    /// Push channel sized from the config.
    pub fn push_channel(&self) -> (mpsc::Sender<RemoteUpdate>, mpsc::Receiver<RemoteUpdate>) {
        WatchRegistry::push_channel(self.config.push_channel_capacity)
    }

    /// Deliver one pushed change to the watched instances of its identity.
    pub fn deliver_remote_update(&self, update: RemoteUpdate) -> RemoraResult<usize> {
        self.ctx.watches.deliver_remote(update)
    }

    /// Spawn the push loop on the current tokio runtime.
    pub fn spawn_push_loop(&self, receiver: mpsc::Receiver<RemoteUpdate>) -> JoinHandle<()> {
        tokio::spawn(self.ctx.watches.clone().run(receiver))
    }
}

impl std::fmt::Debug for NamingClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NamingClient")
            .field("service", &self.config.service_name)
            .field("cache", &self.ctx.cache)
            .field("watches", &self.ctx.watches)
            .finish()
    }
}
