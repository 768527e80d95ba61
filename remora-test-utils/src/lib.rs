//! Remora Test Utilities
//!
//! Centralized test infrastructure for the remora workspace:
//! - Scripted mock messaging proxy with a call log
//! - Recording update subscription service
//! - Proptest generators for identities, fields and records
//! - Test fixtures for common scenarios
//! - Custom assertions for catalog error codes

// Re-export core types for convenience
pub use remora_core::{
    AllowedActions, EntityKey, EntityKind, EntityRecord, ErrorCode, ErrorRecord, Identity,
    InstanceId, KindRegistry, RemoraConfig, RemoraError, RemoraResult, RemoteUpdate, Snapshot,
    TypeName, UpdateEvent, UpdateOrigin,
};
pub use remora_proxy::{
    EntityProxy, MessagingProxy, NamingClient, ServiceHandle, UpdateSubscriptions,
};
pub use remora_storage::{ConfigCache, KeyValueStore, MemoryStore};

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};

// ============================================================================
// TRACING
// ============================================================================

/// Install a test-friendly tracing subscriber once per process.
///
/// Honors `RUST_LOG`; defaults to debug output for the remora crates.
pub fn init_test_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("remora_core=debug,remora_storage=debug,remora_proxy=debug,warn")
    });
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

// ============================================================================
// MOCK MESSAGING
// ============================================================================

/// Scripted answer to one RPC invocation.
#[derive(Debug, Clone)]
pub enum Reply {
    Value(Value),
    Error(ErrorRecord),
    /// Never answer.
    Hang,
}

/// One invocation seen by the mock service.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub service: String,
    pub method: String,
    pub args: Vec<Value>,
}

#[derive(Default)]
struct MockState {
    queued: HashMap<String, VecDeque<Reply>>,
    standing: HashMap<String, Reply>,
    calls: Vec<RecordedCall>,
    resolutions: usize,
    resolve_failure: Option<ErrorRecord>,
    journal: Option<Arc<Mutex<Vec<String>>>>,
}

/// Mock [`MessagingProxy`] with per-method scripted replies.
///
/// Replies queued with [`reply_once`](Self::reply_once) are consumed first,
/// in order; after that the standing reply set with
/// [`reply`](Self::reply) answers every call. A method with neither answers
/// UNKNOWN_RPC_ERROR. Clones share state.
#[derive(Clone, Default)]
pub struct MockMessaging {
    state: Arc<Mutex<MockState>>,
}

impl MockMessaging {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Answer every call of `method` with `reply`.
    pub fn reply(&self, method: &str, reply: Reply) -> &Self {
        self.lock().standing.insert(method.to_string(), reply);
        self
    }

    /// Answer the next call of `method` with `reply`.
    pub fn reply_once(&self, method: &str, reply: Reply) -> &Self {
        self.lock()
            .queued
            .entry(method.to_string())
            .or_default()
            .push_back(reply);
        self
    }

    pub fn reply_value(&self, method: &str, value: Value) -> &Self {
        self.reply(method, Reply::Value(value))
    }

    pub fn reply_error(&self, method: &str, code: ErrorCode) -> &Self {
        self.reply(method, Reply::Error(ErrorRecord::from(code)))
    }

    /// Make service resolution fail with `error`.
    pub fn fail_resolution(&self, error: ErrorRecord) -> &Self {
        self.lock().resolve_failure = Some(error);
        self
    }

    /// Append `rpc:<method>` to `journal` whenever an invocation completes.
    pub fn with_journal(&self, journal: Arc<Mutex<Vec<String>>>) -> &Self {
        self.lock().journal = Some(journal);
        self
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.lock().calls.clone()
    }

    pub fn calls_to(&self, method: &str) -> Vec<RecordedCall> {
        self.lock()
            .calls
            .iter()
            .filter(|call| call.method == method)
            .cloned()
            .collect()
    }

    pub fn call_count(&self, method: &str) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|call| call.method == method)
            .count()
    }

    pub fn total_calls(&self) -> usize {
        self.lock().calls.len()
    }

    /// Number of `get_service` calls.
    pub fn resolutions(&self) -> usize {
        self.lock().resolutions
    }

    fn next_reply(&self, service: &str, method: &str, args: Vec<Value>) -> Reply {
        let mut state = self.lock();
        state.calls.push(RecordedCall {
            service: service.to_string(),
            method: method.to_string(),
            args,
        });

        if let Some(reply) = state
            .queued
            .get_mut(method)
            .and_then(|queue| queue.pop_front())
        {
            return reply;
        }
        state.standing.get(method).cloned().unwrap_or_else(|| {
            let mut record = ErrorRecord::from(ErrorCode::UnknownRpcError);
            record.message = format!("No scripted reply for '{method}'");
            Reply::Error(record)
        })
    }

    fn note_completion(&self, method: &str) {
        let journal = self.lock().journal.clone();
        if let Some(journal) = journal {
            journal
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(format!("rpc:{method}"));
        }
    }
}

#[async_trait]
impl MessagingProxy for MockMessaging {
    async fn get_service(&self, name: &str) -> Result<Arc<dyn ServiceHandle>, ErrorRecord> {
        let failure = {
            let mut state = self.lock();
            state.resolutions += 1;
            state.resolve_failure.clone()
        };
        match failure {
            Some(error) => Err(error),
            None => Ok(Arc::new(MockService {
                name: name.to_string(),
                messaging: self.clone(),
            })),
        }
    }
}

/// Service handle handed out by [`MockMessaging`].
pub struct MockService {
    name: String,
    messaging: MockMessaging,
}

#[async_trait]
impl ServiceHandle for MockService {
    async fn invoke(&self, method: &str, args: Vec<Value>) -> Result<Value, ErrorRecord> {
        let reply = self.messaging.next_reply(&self.name, method, args);
        tokio::task::yield_now().await;

        let result = match reply {
            Reply::Value(value) => Ok(value),
            Reply::Error(error) => Err(error),
            Reply::Hang => std::future::pending().await,
        };
        self.messaging.note_completion(method);
        result
    }
}

// ============================================================================
// RECORDING SUBSCRIPTIONS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionAction {
    Register,
    Unregister,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionCall {
    pub action: SubscriptionAction,
    pub identity: Identity,
    pub instance: InstanceId,
    pub properties: Option<Vec<String>>,
}

/// [`UpdateSubscriptions`] that records every call.
#[derive(Debug, Default)]
pub struct RecordingSubscriptions {
    calls: Mutex<Vec<SubscriptionCall>>,
}

impl RecordingSubscriptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<SubscriptionCall> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn push(
        &self,
        action: SubscriptionAction,
        identity: &Identity,
        instance: InstanceId,
        properties: Option<&[String]>,
    ) {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(SubscriptionCall {
                action,
                identity: identity.clone(),
                instance,
                properties: properties.map(<[String]>::to_vec),
            });
    }
}

impl UpdateSubscriptions for RecordingSubscriptions {
    fn register_for_updates(
        &self,
        identity: &Identity,
        instance: InstanceId,
        properties: Option<&[String]>,
    ) {
        self.push(SubscriptionAction::Register, identity, instance, properties);
    }

    fn unregister_for_updates(
        &self,
        identity: &Identity,
        instance: InstanceId,
        properties: Option<&[String]>,
    ) {
        self.push(SubscriptionAction::Unregister, identity, instance, properties);
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for generating remora types.

    use super::*;
    use proptest::prelude::*;

    /// Generate a valid type name.
    pub fn arb_type_name() -> impl Strategy<Value = TypeName> {
        "[A-Z][A-Za-z0-9_]{0,11}".prop_map(|name| {
            TypeName::new(name).unwrap_or_else(|_| unreachable!("pattern yields valid names"))
        })
    }

    /// Generate an entity key, separators included.
    pub fn arb_entity_key() -> impl Strategy<Value = String> {
        "[a-z0-9][a-z0-9-]{0,15}"
    }

    /// Generate a well-known or registered kind.
    pub fn arb_entity_kind() -> impl Strategy<Value = EntityKind> {
        prop_oneof![
            proptest::sample::select(EntityKind::WELL_KNOWN.to_vec()),
            arb_type_name().prop_map(EntityKind::Registered),
        ]
    }

    pub fn arb_identity() -> impl Strategy<Value = Identity> {
        (arb_entity_kind(), arb_entity_key()).prop_map(|(kind, key)| {
            Identity::parse(kind, key).unwrap_or_else(|_| unreachable!("keys are non-empty"))
        })
    }

    /// Generate a flat JSON value.
    pub fn arb_scalar() -> impl Strategy<Value = Value> {
        prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::from),
            any::<i64>().prop_map(Value::from),
            "[a-z ]{0,12}".prop_map(Value::from),
        ]
    }

    /// Generate a field map, with values up to one level of nesting.
    pub fn arb_fields() -> impl Strategy<Value = Map<String, Value>> {
        let value = prop_oneof![
            arb_scalar(),
            proptest::collection::btree_map("[a-z]{1,4}", arb_scalar(), 0..3)
                .prop_map(|m| Value::Object(m.into_iter().collect())),
        ];
        proptest::collection::btree_map("[a-z]{1,6}", value, 0..6)
            .prop_map(|m| m.into_iter().collect())
    }

    pub fn arb_allowed_actions() -> impl Strategy<Value = AllowedActions> {
        proptest::sample::subsequence(vec!["read", "update", "destroy", "relate"], 0..=4)
            .prop_map(AllowedActions::new)
    }

    pub fn arb_record() -> impl Strategy<Value = EntityRecord> {
        (arb_entity_key(), arb_fields(), arb_allowed_actions()).prop_map(
            |(key, fields, actions)| EntityRecord::new(key, Snapshot::from(fields), actions),
        )
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built test fixtures for common testing scenarios.

    use super::*;

    /// Unwrap a JSON object literal into a field map.
    #[track_caller]
    pub fn fields(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            other => panic!("expected a JSON object, got {other}"),
        }
    }

    /// Wire record with the given data and read/update permissions.
    pub fn record(key: &str, data: Value) -> EntityRecord {
        EntityRecord::new(
            key,
            Snapshot::from(fields(data)),
            AllowedActions::new(["read", "update"]),
        )
    }

    /// The same record as the server sends it.
    pub fn record_value(key: &str, data: Value) -> Value {
        serde_json::json!({
            "_key": key,
            "data": data,
            "allowedActions": ["read", "update"],
        })
    }

    /// Registry with the well-known kinds plus `Widget`.
    pub fn widget_registry() -> (KindRegistry, EntityKind) {
        let mut kinds = KindRegistry::new();
        let widget = kinds
            .register("Widget")
            .unwrap_or_else(|e| panic!("Widget must register: {e}"));
        (kinds, widget)
    }

    /// Client over `messaging` with an in-memory persistent tier that the
    /// test can inspect.
    pub fn client_with_store(
        messaging: &MockMessaging,
        kinds: KindRegistry,
    ) -> (NamingClient, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let client = NamingClient::builder(Arc::new(messaging.clone()))
            .store(store.clone())
            .kinds(kinds)
            .build()
            .unwrap_or_else(|e| panic!("client must build: {e}"));
        (client, store)
    }

    /// Client with push registrations recorded.
    pub fn client_with_subscriptions(
        messaging: &MockMessaging,
        kinds: KindRegistry,
    ) -> (NamingClient, Arc<RecordingSubscriptions>) {
        let subscriptions = Arc::new(RecordingSubscriptions::new());
        let client = NamingClient::builder(Arc::new(messaging.clone()))
            .memory_only()
            .subscriptions(subscriptions.clone())
            .kinds(kinds)
            .build()
            .unwrap_or_else(|e| panic!("client must build: {e}"));
        (client, subscriptions)
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions over remora results.

    use super::*;

    /// Assert that a RemoraResult failed with catalog entry `code`.
    #[track_caller]
    pub fn assert_error_code<T: std::fmt::Debug>(result: &RemoraResult<T>, code: ErrorCode) {
        match result {
            Err(err) if err.is(code) => {}
            other => panic!("Expected {code}, got: {:?}", other),
        }
    }
}
