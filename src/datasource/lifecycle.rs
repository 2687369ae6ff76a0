//! Connect / disconnect ordering and failure policy.
//!
//! # Design Decisions
//! - Connect in lexicographic key order, sequentially, stop at the first failure
//! - A failed connect tears down whatever this call already connected
//! - A timed-out connect is cancelled and its driver still gets a disconnect
//! - Disconnect visits every instance in reverse order; failures are collected

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use crate::datasource::{
    ConnectError, DataSourceInstance, DataSourceRegistry, DisconnectError, SourceError,
};
use crate::observability::metrics;
use crate::store::DataSourceConfig;

/// Connected instances keyed by data source key.
pub type SourceMap = BTreeMap<String, Arc<DataSourceInstance>>;

#[derive(Clone)]
pub struct DataSourceLifecycle {
    registry: Arc<DataSourceRegistry>,
    connect_timeout: Duration,
}

impl DataSourceLifecycle {
    pub fn new(registry: DataSourceRegistry, connect_timeout: Duration) -> Self {
        Self {
            registry: Arc::new(registry),
            connect_timeout,
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    /// Instantiate and connect every config, or none of them.
    pub async fn connect_all(&self, configs: &[DataSourceConfig]) -> Result<SourceMap, ConnectError> {
        let mut ordered: Vec<&DataSourceConfig> = configs.iter().collect();
        ordered.sort_by(|a, b| a.key.cmp(&b.key));

        let mut connected = SourceMap::new();
        for config in ordered {
            match self.connect_one(config).await {
                Ok(instance) => {
                    tracing::info!(data_source = %config.key, kind = %config.kind, "Data source connected");
                    connected.insert(config.key.clone(), Arc::new(instance));
                }
                Err(reason) => {
                    tracing::error!(
                        data_source = %config.key,
                        kind = %config.kind,
                        error = %reason,
                        "Data source failed to connect"
                    );
                    metrics::record_connect_failure(&config.key);

                    if !connected.is_empty() {
                        tracing::info!(
                            count = connected.len(),
                            "Disconnecting data sources connected before the failure"
                        );
                        self.disconnect_all(&connected).await;
                    }

                    return Err(ConnectError {
                        key: config.key.clone(),
                        reason,
                    });
                }
            }
        }

        Ok(connected)
    }

    async fn connect_one(&self, config: &DataSourceConfig) -> Result<DataSourceInstance, SourceError> {
        let source = self.registry.create(config)?;
        let instance = DataSourceInstance::new(config, source);

        match tokio::time::timeout(self.connect_timeout, instance.connect()).await {
            Ok(Ok(())) => Ok(instance),
            Ok(Err(e)) => Err(e),
            Err(_) => {
                match tokio::time::timeout(self.connect_timeout, instance.abandon()).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => tracing::warn!(
                        data_source = %config.key,
                        error = %e,
                        "Cleanup after connect timeout failed"
                    ),
                    Err(_) => tracing::warn!(
                        data_source = %config.key,
                        "Cleanup after connect timeout timed out"
                    ),
                }
                Err(SourceError::Timeout(self.connect_timeout))
            }
        }
    }

    /// Disconnect every instance. Never fails; problems are logged and returned.
    pub async fn disconnect_all(&self, sources: &SourceMap) -> Vec<DisconnectError> {
        let mut errors = Vec::new();

        for (key, instance) in sources.iter().rev() {
            match instance.disconnect().await {
                Ok(()) => {
                    tracing::debug!(data_source = %key, "Data source disconnected");
                }
                Err(reason) => {
                    tracing::warn!(
                        data_source = %key,
                        error = %reason,
                        "Data source failed to disconnect"
                    );
                    metrics::record_disconnect_failure(key);
                    errors.push(DisconnectError {
                        key: key.clone(),
                        reason,
                    });
                }
            }
        }

        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datasource::{DataSource, DataSourceFactory, SourceState};
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::sync::Mutex;

    /// Records every driver call as "<op>:<key>".
    #[derive(Default)]
    struct Journal {
        calls: Mutex<Vec<String>>,
    }

    impl Journal {
        fn push(&self, entry: String) {
            self.calls.lock().unwrap().push(entry);
        }

        fn entries(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    struct ScriptedSource {
        key: String,
        journal: Arc<Journal>,
        fail_connect: bool,
        fail_disconnect: bool,
        hang: bool,
    }

    #[async_trait]
    impl DataSource for ScriptedSource {
        async fn connect(&self) -> Result<(), SourceError> {
            self.journal.push(format!("connect:{}", self.key));
            if self.hang {
                std::future::pending::<()>().await;
            }
            if self.fail_connect {
                return Err(SourceError::Upstream("refused".into()));
            }
            Ok(())
        }

        async fn disconnect(&self) -> Result<(), SourceError> {
            self.journal.push(format!("disconnect:{}", self.key));
            if self.fail_disconnect {
                return Err(SourceError::Upstream("stuck".into()));
            }
            Ok(())
        }

        async fn resolve(&self, _descriptor: &Value) -> Result<Value, SourceError> {
            Ok(Value::Null)
        }
    }

    struct ScriptedFactory(Arc<Journal>);

    impl DataSourceFactory for ScriptedFactory {
        fn create(&self, config: &DataSourceConfig) -> Result<Box<dyn DataSource>, SourceError> {
            let flag = |name: &str| config.params.get(name).and_then(Value::as_bool).unwrap_or(false);
            Ok(Box::new(ScriptedSource {
                key: config.key.clone(),
                journal: self.0.clone(),
                fail_connect: flag("fail_connect"),
                fail_disconnect: flag("fail_disconnect"),
                hang: flag("hang"),
            }))
        }
    }

    fn lifecycle(journal: &Arc<Journal>) -> DataSourceLifecycle {
        let registry = DataSourceRegistry::new().with("scripted", Arc::new(ScriptedFactory(journal.clone())));
        DataSourceLifecycle::new(registry, Duration::from_millis(200))
    }

    fn config(key: &str, params: Value) -> DataSourceConfig {
        DataSourceConfig {
            key: key.into(),
            kind: "scripted".into(),
            params: params.as_object().cloned().unwrap_or_default(),
        }
    }

    #[tokio::test]
    async fn test_connects_in_key_order() {
        let journal = Arc::new(Journal::default());
        let lc = lifecycle(&journal);

        let sources = lc
            .connect_all(&[config("c", json!({})), config("a", json!({})), config("b", json!({}))])
            .await
            .unwrap();

        assert_eq!(journal.entries(), vec!["connect:a", "connect:b", "connect:c"]);
        assert!(sources.values().all(|s| s.state() == SourceState::Connected));
    }

    #[tokio::test]
    async fn test_first_failure_aborts_and_cleans_up() {
        let journal = Arc::new(Journal::default());
        let lc = lifecycle(&journal);

        let err = lc
            .connect_all(&[
                config("a", json!({})),
                config("b", json!({})),
                config("c", json!({"fail_connect": true})),
                config("d", json!({})),
            ])
            .await
            .unwrap_err();

        assert_eq!(err.key, "c");
        assert_eq!(
            journal.entries(),
            vec![
                "connect:a",
                "connect:b",
                "connect:c",
                "disconnect:b",
                "disconnect:a"
            ]
        );
    }

    #[tokio::test]
    async fn test_unknown_kind_is_connect_error() {
        let journal = Arc::new(Journal::default());
        let lc = lifecycle(&journal);
        let mut bad = config("z", json!({}));
        bad.kind = "nope".into();

        let err = lc.connect_all(&[bad]).await.unwrap_err();
        assert_eq!(err.reason, SourceError::UnknownKind("nope".into()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_timeout() {
        let journal = Arc::new(Journal::default());
        let lc = lifecycle(&journal);

        let err = lc
            .connect_all(&[config("a", json!({})), config("slow", json!({"hang": true}))])
            .await
            .unwrap_err();
        assert_eq!(err.key, "slow");
        assert_eq!(err.reason, SourceError::Timeout(Duration::from_millis(200)));

        // The cancelled driver is released too, before earlier sources.
        assert_eq!(
            journal.entries(),
            vec!["connect:a", "connect:slow", "disconnect:slow", "disconnect:a"]
        );
    }

    #[tokio::test]
    async fn test_disconnect_all_collects_and_continues() {
        let journal = Arc::new(Journal::default());
        let lc = lifecycle(&journal);
        let sources = lc
            .connect_all(&[
                config("a", json!({})),
                config("b", json!({"fail_disconnect": true})),
                config("c", json!({})),
            ])
            .await
            .unwrap();

        let errors = lc.disconnect_all(&sources).await;

        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].key, "b");
        let entries = journal.entries();
        assert_eq!(
            &entries[3..],
            &["disconnect:c", "disconnect:b", "disconnect:a"]
        );
        assert_eq!(sources["a"].state(), SourceState::Disconnected);
        assert_eq!(sources["b"].state(), SourceState::Failed);
    }
}
