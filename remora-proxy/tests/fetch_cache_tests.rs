//! Fetch, find and config cache behavior of the naming client.

use std::sync::Arc;
use std::time::Duration;

use remora_proxy::NamingClient;
use remora_storage::KeyValueStore;
use remora_test_utils::assertions::assert_error_code;
use remora_test_utils::fixtures::{client_with_store, fields, record_value, widget_registry};
use remora_test_utils::{
    init_test_tracing, EntityKind, ErrorCode, ErrorRecord, Identity, KindRegistry, MockMessaging,
    RemoraConfig, Reply,
};
use serde_json::{json, Value};

fn user(key: &str) -> Identity {
    Identity::parse(EntityKind::User, key).unwrap()
}

#[tokio::test]
async fn test_cached_fetch_issues_one_rpc() {
    init_test_tracing();
    let mock = MockMessaging::new();
    mock.reply_value("get", record_value("u1", json!({"name": "ann"})));
    let (client, store) = client_with_store(&mock, KindRegistry::new());

    let first = client.get_cached_object(EntityKind::User, "u1").await.unwrap();
    assert_eq!(mock.call_count("get"), 1);
    assert_eq!(first.get("name"), Some(json!("ann")));

    let second = client.get_cached_object(EntityKind::User, "u1").await.unwrap();
    assert_eq!(mock.call_count("get"), 1);
    assert_eq!(second.get("name"), Some(json!("ann")));
    assert!(!first.same_instance(&second));

    let keys = store.list_keys("remora-config-").unwrap();
    assert_eq!(keys, vec!["remora-config-User-u1".to_string()]);
}

#[tokio::test]
async fn test_uncached_fetch_always_calls_server() {
    let mock = MockMessaging::new();
    mock.reply_value("get", record_value("u1", json!({"n": 1})));
    let (client, store) = client_with_store(&mock, KindRegistry::new());

    client.get_object(EntityKind::User, "u1").await.unwrap();
    client.get_object(EntityKind::User, "u1").await.unwrap();

    assert_eq!(mock.call_count("get"), 2);
    assert!(store.is_empty());
    assert!(client.cache().get(&user("u1")).is_none());
}

#[tokio::test]
async fn test_get_sends_type_then_key() {
    let mock = MockMessaging::new();
    mock.reply_value("get", record_value("u-7", json!({})));
    let (client, _store) = client_with_store(&mock, KindRegistry::new());

    client.get_object(EntityKind::User, "u-7").await.unwrap();

    let call = &mock.calls_to("get")[0];
    assert_eq!(call.service, "NamingRpcService");
    assert_eq!(call.args, vec![json!("User"), json!("u-7")]);
}

#[tokio::test]
async fn test_failed_fetch_builds_nothing_and_caches_nothing() {
    let mock = MockMessaging::new();
    mock.reply_error("get", ErrorCode::NetworkError);
    let (client, store) = client_with_store(&mock, KindRegistry::new());

    let result = client.get_cached_object(EntityKind::User, "u1").await;
    assert_error_code(&result, ErrorCode::NetworkError);
    assert!(store.is_empty());
}

#[tokio::test]
async fn test_malformed_get_reply_is_unexpected_response() {
    let mock = MockMessaging::new();
    mock.reply_value("get", json!("not a record"));
    let (client, _store) = client_with_store(&mock, KindRegistry::new());

    let result = client.get_object(EntityKind::User, "u1").await;
    assert_error_code(&result, ErrorCode::UnexpectedResponse);
}

#[tokio::test]
async fn test_find_keeps_server_order() {
    let mock = MockMessaging::new();
    mock.reply_value(
        "find",
        json!([
            {"_key": "b", "data": {"rank": 1}},
            {"_key": "a", "data": {"rank": 2}},
            {"_key": "c", "data": {"rank": 3}},
        ]),
    );
    let (client, _store) = client_with_store(&mock, KindRegistry::new());

    let found = client
        .find_objects(EntityKind::Device, &json!({"os": "ios"}), 10, 3)
        .await
        .unwrap();

    let keys: Vec<&str> = found.iter().map(|p| p.key()).collect();
    assert_eq!(keys, vec!["b", "a", "c"]);
    assert!(found.iter().all(|p| p.kind() == &EntityKind::Device));
    assert_eq!(
        mock.calls_to("find")[0].args,
        vec![json!("Device"), json!({"os": "ios"}), json!(10), json!(3)]
    );
}

#[tokio::test]
async fn test_find_with_no_match_is_empty() {
    let mock = MockMessaging::new();
    mock.reply_value("find", json!([]));
    let (client, _store) = client_with_store(&mock, KindRegistry::new());

    let found = client
        .find_objects(EntityKind::User, &json!({}), 0, 20)
        .await
        .unwrap();
    assert!(found.is_empty());
}

#[tokio::test]
async fn test_find_non_list_reply_is_rejected() {
    let mock = MockMessaging::new();
    mock.reply_value("find", json!({"_key": "a"}));
    let (client, _store) = client_with_store(&mock, KindRegistry::new());

    let result = client.find_objects(EntityKind::User, &json!({}), 0, 20).await;
    assert_error_code(&result, ErrorCode::UnexpectedResponse);
}

#[tokio::test]
async fn test_registered_kind_round_trips_through_cache() {
    let mock = MockMessaging::new();
    mock.reply_value("get", record_value("w1", json!({"name": "bolt"})));
    let (kinds, widget) = widget_registry();
    let (client, store) = client_with_store(&mock, kinds);

    let proxy = client.get_cached_object(widget.clone(), "w1").await.unwrap();
    assert_eq!(proxy.identity().type_name(), "Widget");
    assert!(store.get_item("remora-config-Widget-w1").unwrap().is_some());
    assert_eq!(client.resolve_kind("Widget").unwrap(), widget);
}

#[tokio::test]
async fn test_keys_do_not_collide_across_type_and_key() {
    let mock = MockMessaging::new();
    let (mut kinds, _) = widget_registry();
    let use_kind = kinds.register("Use").unwrap();
    let (client, _store) = client_with_store(&mock, kinds);

    let a = Identity::parse(EntityKind::User, "abc-def").unwrap();
    let b = Identity::parse(use_kind, "r-abc-def").unwrap();
    assert_ne!(client.cache().key_for(&a), client.cache().key_for(&b));

    let record = remora_test_utils::fixtures::record("abc-def", json!({"who": "user"}));
    client.cache().set(&a, &record);
    assert!(client.cache().get(&b).is_none());
    assert_eq!(client.cache().get(&a), Some(record));
}

#[tokio::test]
async fn test_nuke_cache_purges_both_tiers() {
    let mock = MockMessaging::new();
    mock.reply_value("get", record_value("u1", json!({})));
    let (client, store) = client_with_store(&mock, KindRegistry::new());

    client.get_cached_object(EntityKind::User, "u1").await.unwrap();
    client
        .cache_object_config(
            EntityKind::Team,
            &remora_test_utils::fixtures::record("t1", json!({"size": 3})),
        )
        .unwrap();
    store.set_item("other-app-User-u1", "{}").unwrap();

    assert_eq!(client.nuke_cache(), 2);
    assert!(client.cache().get(&user("u1")).is_none());
    assert!(store.list_keys("remora-config-").unwrap().is_empty());
    assert_eq!(store.len(), 1);

    client.get_cached_object(EntityKind::User, "u1").await.unwrap();
    assert_eq!(mock.call_count("get"), 2);
}

#[tokio::test]
async fn test_remove_cached_object_forces_refetch() {
    let mock = MockMessaging::new();
    mock.reply_value("get", record_value("u1", json!({})));
    let (client, _store) = client_with_store(&mock, KindRegistry::new());

    let proxy = client.get_cached_object(EntityKind::User, "u1").await.unwrap();
    client.remove_cached_object(EntityKind::User, "u1").unwrap();
    client.get_cached_object(EntityKind::User, "u1").await.unwrap();
    assert_eq!(mock.call_count("get"), 2);

    proxy.remove_cached();
    client.get_cached_object(EntityKind::User, "u1").await.unwrap();
    assert_eq!(mock.call_count("get"), 3);
}

#[tokio::test]
async fn test_persisted_null_reads_as_absent() {
    let mock = MockMessaging::new();
    mock.reply_value("get", record_value("u1", json!({"fresh": true})));
    let (client, store) = client_with_store(&mock, KindRegistry::new());
    store.set_item("remora-config-User-u1", "null").unwrap();

    let proxy = client.get_cached_object(EntityKind::User, "u1").await.unwrap();
    assert_eq!(mock.call_count("get"), 1);
    assert_eq!(proxy.get("fresh"), Some(json!(true)));
}

#[tokio::test]
async fn test_empty_key_is_rejected_before_dispatch() {
    let mock = MockMessaging::new();
    let (client, _store) = client_with_store(&mock, KindRegistry::new());

    let result = client.get_object(EntityKind::User, "").await;
    assert_error_code(&result, ErrorCode::ParamMissing);
    assert_eq!(mock.total_calls(), 0);
}

#[tokio::test]
async fn test_unknown_type_name_is_rejected() {
    let mock = MockMessaging::new();
    let (client, _store) = client_with_store(&mock, KindRegistry::new());

    let result = client.resolve_kind("Gadget");
    assert_error_code(&result, ErrorCode::EntityTypeUnknown);
}

#[tokio::test]
async fn test_service_resolution_failure_surfaces() {
    let mock = MockMessaging::new();
    mock.fail_resolution(ErrorRecord::from(ErrorCode::ServiceDescriptorLoadError));
    let (client, _store) = client_with_store(&mock, KindRegistry::new());

    let result = client.get_object(EntityKind::App, "a1").await;
    assert_error_code(&result, ErrorCode::ServiceDescriptorLoadError);
    assert_eq!(mock.total_calls(), 0);
}

#[tokio::test]
async fn test_hanging_call_times_out() {
    let mock = MockMessaging::new();
    mock.reply("get", Reply::Hang);
    let client = NamingClient::builder(Arc::new(mock.clone()))
        .config(RemoraConfig::default().with_rpc_timeout(Duration::from_millis(20)))
        .memory_only()
        .build()
        .unwrap();

    let result = client.get_object(EntityKind::User, "u1").await;
    assert_error_code(&result, ErrorCode::RpcTimeout);
}

#[tokio::test]
async fn test_prefix_must_end_with_separator() {
    let mock = MockMessaging::new();
    let result = NamingClient::builder(Arc::new(mock))
        .config(RemoraConfig::default().with_cache_key_prefix("my-app-"))
        .memory_only()
        .build();
    assert!(result.is_ok());

    let result = NamingClient::builder(Arc::new(MockMessaging::new()))
        .config(RemoraConfig::default().with_cache_key_prefix("nosep"))
        .memory_only()
        .build();
    assert!(result.is_err());
}

#[tokio::test]
async fn test_cache_object_config_serves_later_fetch() {
    let mock = MockMessaging::new();
    let (client, _store) = client_with_store(&mock, KindRegistry::new());

    client
        .cache_object_config(
            EntityKind::Group,
            &remora_test_utils::fixtures::record("g1", json!({"members": 4})),
        )
        .unwrap();

    let proxy = client.get_cached_object(EntityKind::Group, "g1").await.unwrap();
    assert_eq!(proxy.get("members"), Some(json!(4)));
    assert_eq!(mock.total_calls(), 0);

    let map = fields(json!({"members": 4}));
    assert_eq!(Value::from(proxy.snapshot()), Value::Object(map));
}

#[tokio::test]
async fn test_oversized_store_config_fails_build_cleanly() {
    let dir = std::env::temp_dir().join("remora-oversized-store");
    let result = NamingClient::builder(Arc::new(MockMessaging::new()))
        .config(
            RemoraConfig::default()
                .with_store_path(&dir)
                .with_store_max_size_mb(18_014_398_509_481_984),
        )
        .build();

    assert!(result.is_err());
    assert!(!dir.exists());
}
