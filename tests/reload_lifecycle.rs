//! End-to-end reload behaviour against a running gateway.

use std::sync::Arc;
use std::time::Duration;

use schema_gateway::lifecycle::StartupError;
use schema_gateway::reload::{ReloadError, ReloadTrigger, TriggerSource};
use schema_gateway::schema::{BuildError, ConfigError};
use schema_gateway::store::{ConfigRows, SchemaDefinition, SubscriptionConfig};

mod common;
use common::{FAILS_CONNECT, OK};

#[tokio::test]
async fn test_failed_reload_keeps_serving_previous_generation() {
    let config = common::test_config();
    let gw = common::start_gateway(&config, common::rows(&[("a", OK), ("b", OK)])).await;
    let addr = gw.running.local_addr();
    let client = common::client();

    let (status, health) = common::get_health(&client, addr).await;
    assert_eq!(status, 200);
    assert_eq!(health["status"], "ok");
    assert_eq!(health["generation"], 1);

    let before = gw.running.gateway().current().unwrap();
    gw.journal.clear();

    gw.store
        .replace(common::rows(&[("a", OK), ("b", OK), ("c", FAILS_CONNECT)]));
    let err = gw
        .running
        .reload_handle()
        .reload_now(TriggerSource::Manual)
        .await
        .unwrap_err();
    assert!(matches!(*err, ReloadError::Connect(ref e) if e.key == "c"));

    // New a and b were torn down; the live ones were never touched.
    assert_eq!(
        gw.journal.events(),
        vec!["connect:a", "connect:b", "connect:c", "disconnect:b", "disconnect:a"]
    );
    let after = gw.running.gateway().current().unwrap();
    assert!(Arc::ptr_eq(&before, &after));
    assert!(after.sources().values().all(|s| s.is_connected()));

    let (status, health) = common::get_health(&client, addr).await;
    assert_eq!(status, 200);
    assert_eq!(health["generation"], 1);
    assert_eq!(health["data_sources"]["a"], "connected");

    let stats = gw.running.controller().stats();
    assert_eq!(stats.failed, 1);
    assert!(stats.last_error.unwrap().contains("'c'"));

    // Still serving generation 1 data.
    let (status, body) = common::query(&client, addr, "{ a b }").await;
    assert_eq!(status, 200);
    assert_eq!(body["data"]["a"], "from a");

    gw.running.shutdown().await;
}

#[tokio::test]
async fn test_successful_reload_swaps_and_retires() {
    let config = common::test_config();
    let gw = common::start_gateway(&config, common::rows(&[("a", OK)])).await;
    let addr = gw.running.local_addr();
    let client = common::client();
    gw.journal.clear();

    gw.store.replace(common::rows(&[("a", OK), ("b", OK)]));
    let outcome = gw
        .running
        .reload_handle()
        .reload_now(TriggerSource::Manual)
        .await
        .unwrap();
    assert_eq!(outcome.generation, 2);
    assert_eq!(outcome.previous_generation, Some(1));

    // New generation fully connected before the old one is retired.
    assert_eq!(
        gw.journal.events(),
        vec!["connect:a", "connect:b", "disconnect:a"]
    );

    let (_, body) = common::query(&client, addr, "{ b }").await;
    assert_eq!(body["data"]["b"], "from b");

    let res = client
        .get(format!("http://{}/schema", addr))
        .send()
        .await
        .unwrap();
    assert_eq!(res.headers()["x-schema-generation"], "2");

    gw.running.shutdown().await;
}

#[tokio::test]
async fn test_identical_rows_reload_is_idempotent() {
    let config = common::test_config();
    let gw = common::start_gateway(&config, common::rows(&[("a", OK)])).await;
    let first = gw.running.gateway().current().unwrap();

    let controller = gw.running.controller();
    controller
        .reload(ReloadTrigger::new(TriggerSource::Manual))
        .await
        .unwrap();
    let second = gw.running.gateway().current().unwrap();

    assert_eq!(second.generation(), first.generation() + 1);
    assert_eq!(**first.schema(), **second.schema());
    assert_eq!(
        first.sources().keys().collect::<Vec<_>>(),
        second.sources().keys().collect::<Vec<_>>()
    );

    gw.running.shutdown().await;
}

#[tokio::test]
async fn test_missing_default_schema_is_fatal_without_connecting() {
    let config = common::test_config();
    let mut rows = common::rows(&[("a", OK)]);
    rows.schemas = vec![
        SchemaDefinition {
            name: "users".into(),
            sdl: "type Query { a: String }".into(),
        },
        SchemaDefinition {
            name: "orders".into(),
            sdl: "type Query { a: String }".into(),
        },
    ];

    let journal = common::Journal::default();
    let (err, store) = match common::try_start(&config, rows, &journal, None).await {
        Ok(_) => panic!("startup should fail without a default schema"),
        Err(failed) => failed,
    };

    assert!(matches!(
        err,
        StartupError::Reload(ReloadError::Build(BuildError::Config(
            ConfigError::MissingDefaultSchema { .. }
        )))
    ));
    assert_eq!(journal.count_prefix("connect:"), 0);
    assert_eq!(store.close_count(), 1);
}

#[tokio::test]
async fn test_empty_store_serves_fallback_schema() {
    let config = common::test_config();
    let gw = common::start_gateway(&config, ConfigRows::default()).await;
    let client = common::client();

    let active = gw.running.gateway().current().unwrap();
    assert!(active.used_fallback());
    assert!(active.sources().is_empty());
    for root in ["Query", "Mutation", "Subscription"] {
        assert_eq!(active.schema().type_def(root).unwrap().fields.len(), 1);
    }

    let (status, body) = common::query(&client, gw.running.local_addr(), "{ _empty }").await;
    assert_eq!(status, 200);
    assert!(body["data"]["_empty"].is_null());

    gw.running.shutdown().await;
}

#[tokio::test]
async fn test_admin_api() {
    let config = common::with_admin(common::test_config());
    let gw = common::start_gateway(&config, common::rows(&[("a", OK)])).await;
    let admin = gw.running.admin_addr().unwrap();
    let client = common::client();

    let res = client
        .get(format!("http://{}/admin/status", admin))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 401);

    let res = client
        .get(format!("http://{}/admin/sources", admin))
        .bearer_auth(common::ADMIN_KEY)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);
    let sources: serde_json::Value = res.json().await.unwrap();
    assert_eq!(sources[0]["key"], "a");
    assert_eq!(sources[0]["state"], "connected");

    let res = client
        .post(format!("http://{}/admin/reload", admin))
        .bearer_auth(common::ADMIN_KEY)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);
    let outcome: serde_json::Value = res.json().await.unwrap();
    assert_eq!(outcome["generation"], 2);

    gw.store.replace(common::rows(&[("a", FAILS_CONNECT)]));
    let res = client
        .post(format!("http://{}/admin/reload", admin))
        .bearer_auth(common::ADMIN_KEY)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 422);

    let status: serde_json::Value = client
        .get(format!("http://{}/admin/status", admin))
        .bearer_auth(common::ADMIN_KEY)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status["generation"], 2);
    assert_eq!(status["phase"], "idle");
    assert_eq!(status["reloads"]["failed"], 1);

    gw.running.shutdown().await;
}

#[tokio::test]
async fn test_admin_publish_follows_served_topics() {
    let config = common::with_admin(common::test_config());
    let mut rows = common::rows(&[("a", OK)]);
    rows.schemas[0].sdl.push_str("type Subscription { orderPlaced: String }\n");
    rows.subscriptions.push(SubscriptionConfig {
        name: "orderPlaced".into(),
        topic: "orders".into(),
    });
    let gw = common::start_gateway(&config, rows).await;
    let admin = gw.running.admin_addr().unwrap();
    let client = common::client();
    let publish = |topic: &str| {
        client
            .post(format!("http://{}/admin/topics/{}", admin, topic))
            .bearer_auth(common::ADMIN_KEY)
            .json(&serde_json::json!({ "id": 7 }))
            .send()
    };

    let res = publish("orders").await.unwrap();
    assert_eq!(res.status(), 200);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["topic"], "orders");
    assert_eq!(body["receivers"], 0);
    assert_eq!(publish("refunds").await.unwrap().status(), 404);

    // The next generation has no subscriptions, so the topic is gone.
    gw.store.replace(common::rows(&[("a", OK)]));
    gw.running
        .reload_handle()
        .reload_now(TriggerSource::Admin)
        .await
        .unwrap();
    assert_eq!(publish("orders").await.unwrap().status(), 404);

    gw.running.shutdown().await;
}

#[tokio::test]
async fn test_queued_triggers_coalesce() {
    let config = common::test_config();
    let gw = common::start_gateway(&config, common::rows(&[("a", OK)])).await;
    let handle = gw.running.reload_handle().clone();

    for _ in 0..10 {
        handle.trigger(TriggerSource::ChangeNotification);
    }
    let outcome = handle.reload_now(TriggerSource::Manual).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    // At most two reloads cover eleven requests.
    assert!(outcome.generation <= 3);
    assert_eq!(gw.running.gateway().generation(), Some(outcome.generation));

    gw.running.shutdown().await;
}
