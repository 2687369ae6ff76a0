//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tokio::sync::{Notify, Semaphore};

use schema_gateway::config::GatewayConfig;
use schema_gateway::datasource::{DataSource, DataSourceFactory, DataSourceRegistry, SourceError};
use schema_gateway::lifecycle::{self, RunningGateway, StartupError};
use schema_gateway::reload::ChangeSource;
use schema_gateway::store::{
    ConfigRows, ConfigStore, DataSourceConfig, MemoryConfigStore, ResolverBinding,
    SchemaDefinition,
};

pub const ADMIN_KEY: &str = "test-admin-key";

/// Holds gated connects until released.
pub struct Gate {
    entered: Notify,
    release: Semaphore,
}

impl Default for Gate {
    fn default() -> Self {
        Self {
            entered: Notify::new(),
            release: Semaphore::new(0),
        }
    }
}

impl Gate {
    /// Wait until a gated connect is blocked.
    pub async fn entered(&self) {
        self.entered.notified().await;
    }

    pub fn release(&self) {
        self.release.add_permits(1);
    }

    async fn pass(&self) {
        self.entered.notify_one();
        self.release.acquire().await.unwrap().forget();
    }
}

/// Ordered record of driver calls across every flaky source.
#[derive(Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<String>>>, Arc<Gate>);

impl Journal {
    fn push(&self, event: String) {
        self.0.lock().unwrap().push(event);
    }

    pub fn gate(&self) -> &Gate {
        &self.1
    }

    pub fn events(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn count(&self, event: &str) -> usize {
        self.0.lock().unwrap().iter().filter(|e| *e == event).count()
    }

    pub fn count_prefix(&self, prefix: &str) -> usize {
        self.0
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.starts_with(prefix))
            .count()
    }

    pub fn clear(&self) {
        self.0.lock().unwrap().clear();
    }
}

/// `flaky` data source: fails on demand, answers with `params.value`.
struct FlakySource {
    key: String,
    fail_connect: bool,
    fail_disconnect: bool,
    gate_connect: bool,
    value: Value,
    journal: Journal,
}

#[async_trait]
impl DataSource for FlakySource {
    async fn connect(&self) -> Result<(), SourceError> {
        self.journal.push(format!("connect:{}", self.key));
        if self.gate_connect {
            self.journal.gate().pass().await;
        }
        if self.fail_connect {
            return Err(SourceError::Upstream(format!("{} refused the connection", self.key)));
        }
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), SourceError> {
        self.journal.push(format!("disconnect:{}", self.key));
        if self.fail_disconnect {
            return Err(SourceError::Upstream(format!("{} hung up badly", self.key)));
        }
        Ok(())
    }

    async fn resolve(&self, _descriptor: &Value) -> Result<Value, SourceError> {
        Ok(self.value.clone())
    }
}

pub struct FlakyFactory(pub Journal);

impl DataSourceFactory for FlakyFactory {
    fn create(&self, config: &DataSourceConfig) -> Result<Box<dyn DataSource>, SourceError> {
        let flag = |name: &str| config.params.get(name).and_then(Value::as_bool).unwrap_or(false);
        Ok(Box::new(FlakySource {
            key: config.key.clone(),
            fail_connect: flag("fail_connect"),
            fail_disconnect: flag("fail_disconnect"),
            gate_connect: flag("gate_connect"),
            value: config
                .params
                .get("value")
                .cloned()
                .unwrap_or_else(|| json!(config.key)),
            journal: self.0.clone(),
        }))
    }
}

pub fn registry(journal: &Journal) -> DataSourceRegistry {
    DataSourceRegistry::with_builtins().with("flaky", Arc::new(FlakyFactory(journal.clone())))
}

/// How one flaky source behaves.
#[derive(Clone, Copy, Default)]
pub struct Behaviour {
    pub fail_connect: bool,
    pub fail_disconnect: bool,
    /// Connect blocks on the journal's [`Gate`].
    pub gate_connect: bool,
}

pub const OK: Behaviour = Behaviour {
    fail_connect: false,
    fail_disconnect: false,
    gate_connect: false,
};
pub const FAILS_CONNECT: Behaviour = Behaviour {
    fail_connect: true,
    ..OK
};
pub const FAILS_DISCONNECT: Behaviour = Behaviour {
    fail_disconnect: true,
    ..OK
};
pub const GATED_CONNECT: Behaviour = Behaviour {
    gate_connect: true,
    ..OK
};

/// Rows for a `default` schema with one `String` root field per source,
/// each bound to the flaky source of the same name.
pub fn rows(sources: &[(&str, Behaviour)]) -> ConfigRows {
    let fields: String = sources
        .iter()
        .map(|(key, _)| format!("  {}: String\n", key))
        .collect();
    ConfigRows {
        schemas: vec![SchemaDefinition {
            name: "default".into(),
            sdl: format!("type Query {{\n{}}}\n", fields),
        }],
        data_sources: sources
            .iter()
            .map(|(key, behaviour)| {
                let mut params = Map::new();
                params.insert("fail_connect".into(), json!(behaviour.fail_connect));
                params.insert("fail_disconnect".into(), json!(behaviour.fail_disconnect));
                params.insert("gate_connect".into(), json!(behaviour.gate_connect));
                params.insert("value".into(), json!(format!("from {}", key)));
                DataSourceConfig {
                    key: key.to_string(),
                    kind: "flaky".into(),
                    params,
                }
            })
            .collect(),
        resolvers: sources
            .iter()
            .map(|(key, _)| ResolverBinding {
                field_path: format!("Query.{}", key),
                data_source: key.to_string(),
                descriptor: Value::Null,
            })
            .collect(),
        subscriptions: vec![],
    }
}

/// Settings for a test gateway: ephemeral ports, no watchers.
pub fn test_config() -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config.listener.bind_address = "127.0.0.1:0".into();
    config.reload.connect_timeout_ms = 2_000;
    config.reload.watch_store = false;
    config.reload.reload_on_sighup = false;
    config.reload.retire_grace_ms = 500;
    config.lifecycle.shutdown_timeout_secs = 5;
    config
}

pub fn with_admin(mut config: GatewayConfig) -> GatewayConfig {
    config.admin.enabled = true;
    config.admin.bind_address = "127.0.0.1:0".into();
    config.admin.api_key = ADMIN_KEY.into();
    config
}

pub struct TestGateway {
    pub running: RunningGateway,
    pub store: Arc<MemoryConfigStore>,
    pub journal: Journal,
}

pub async fn try_start(
    config: &GatewayConfig,
    rows: ConfigRows,
    journal: &Journal,
    change_source: Option<Box<dyn ChangeSource>>,
) -> Result<(RunningGateway, Arc<MemoryConfigStore>), (StartupError, Arc<MemoryConfigStore>)> {
    let store = Arc::new(MemoryConfigStore::new(rows));
    let dyn_store: Arc<dyn ConfigStore> = store.clone();
    match lifecycle::start(config, dyn_store, registry(journal), change_source).await {
        Ok(running) => Ok((running, store)),
        Err(e) => Err((e, store)),
    }
}

pub async fn start_gateway(config: &GatewayConfig, rows: ConfigRows) -> TestGateway {
    let journal = Journal::default();
    let (running, store) = match try_start(config, rows, &journal, None).await {
        Ok(started) => started,
        Err((e, _)) => panic!("gateway failed to start: {}", e),
    };
    TestGateway {
        running,
        store,
        journal,
    }
}

pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .no_proxy()
        .timeout(Duration::from_secs(5))
        .build()
        .unwrap()
}

pub async fn get_health(client: &reqwest::Client, addr: SocketAddr) -> (u16, Value) {
    let res = client
        .get(format!("http://{}/health", addr))
        .send()
        .await
        .expect("gateway unreachable");
    let status = res.status().as_u16();
    (status, res.json().await.unwrap())
}

pub async fn query(client: &reqwest::Client, addr: SocketAddr, query: &str) -> (u16, Value) {
    let res = client
        .post(format!("http://{}/graphql", addr))
        .json(&json!({ "query": query }))
        .send()
        .await
        .expect("gateway unreachable");
    let status = res.status().as_u16();
    (status, res.json().await.unwrap())
}

/// Poll `check` every 20ms until it holds or `limit` elapses.
pub async fn eventually<F: FnMut() -> bool>(limit: Duration, mut check: F) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    check()
}
