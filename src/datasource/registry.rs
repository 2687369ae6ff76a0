//! Data source kind registry.

use std::collections::HashMap;
use std::sync::Arc;

use crate::datasource::http_source::HttpSourceFactory;
use crate::datasource::static_source::StaticSourceFactory;
use crate::datasource::{DataSource, DataSourceFactory, SourceError};
use crate::store::DataSourceConfig;

/// Maps a `kind` string to the factory that builds its drivers.
#[derive(Clone, Default)]
pub struct DataSourceRegistry {
    factories: HashMap<String, Arc<dyn DataSourceFactory>>,
}

impl DataSourceRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with the `static` and `http` kinds.
    pub fn with_builtins() -> Self {
        Self::new()
            .with("static", Arc::new(StaticSourceFactory))
            .with("http", Arc::new(HttpSourceFactory))
    }

    /// Register (or replace) a kind.
    #[must_use]
    pub fn with(mut self, kind: &str, factory: Arc<dyn DataSourceFactory>) -> Self {
        self.factories.insert(kind.to_string(), factory);
        self
    }

    pub fn create(&self, config: &DataSourceConfig) -> Result<Box<dyn DataSource>, SourceError> {
        let factory = self
            .factories
            .get(&config.kind)
            .ok_or_else(|| SourceError::UnknownKind(config.kind.clone()))?;
        factory.create(config)
    }

    /// Registered kinds, sorted.
    pub fn kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        kinds
    }
}
