//! TOML rows file store.
//!
//! ```toml
//! [[schemas]]
//! name = "default"
//! sdl = "type Query { hello: String }"
//!
//! [[data_sources]]
//! key = "greetings"
//! kind = "static"
//! params = { values = { hello = "world" } }
//!
//! [[resolvers]]
//! field_path = "Query.hello"
//! data_source = "greetings"
//! descriptor = { key = "hello" }
//! ```

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;

use crate::store::{
    ConfigRows, ConfigStore, DataSourceConfig, ResolverBinding, SchemaDefinition, StoreError,
    SubscriptionConfig,
};

/// Reads rows from a TOML file on every fetch.
#[derive(Debug)]
pub struct FileConfigStore {
    path: PathBuf,
    closed: AtomicBool,
}

impl FileConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            closed: AtomicBool::new(false),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_rows(&self) -> Result<ConfigRows, StoreError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StoreError::Closed);
        }

        // A missing file means "nothing configured yet", which the builder
        // answers with the fallback schema.
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = ?self.path, "Rows file not found, treating as empty");
                return Ok(ConfigRows::default());
            }
            Err(e) => return Err(StoreError::Io(e)),
        };

        toml::from_str(&content).map_err(|e| StoreError::Decode(e.to_string()))
    }
}

#[async_trait]
impl ConfigStore for FileConfigStore {
    async fn schema_definitions(&self) -> Result<Vec<SchemaDefinition>, StoreError> {
        Ok(self.read_rows().await?.schemas)
    }

    async fn data_sources(&self) -> Result<Vec<DataSourceConfig>, StoreError> {
        Ok(self.read_rows().await?.data_sources)
    }

    async fn resolver_bindings(&self) -> Result<Vec<ResolverBinding>, StoreError> {
        Ok(self.read_rows().await?.resolvers)
    }

    async fn subscriptions(&self) -> Result<Vec<SubscriptionConfig>, StoreError> {
        Ok(self.read_rows().await?.subscriptions)
    }

    async fn close(&self) -> Result<(), StoreError> {
        self.closed.store(true, Ordering::Release);
        tracing::info!(path = ?self.path, "Config store closed");
        Ok(())
    }
}
