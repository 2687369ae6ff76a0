//! In-memory row store, for embedding and tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;

use crate::store::{
    ConfigRows, ConfigStore, DataSourceConfig, ResolverBinding, SchemaDefinition, StoreError,
    SubscriptionConfig,
};

/// Rows held in memory; replaceable at runtime to simulate edits.
#[derive(Debug, Default)]
pub struct MemoryConfigStore {
    rows: RwLock<ConfigRows>,
    closed: AtomicBool,
    fetches: AtomicUsize,
    close_calls: AtomicUsize,
}

impl MemoryConfigStore {
    pub fn new(rows: ConfigRows) -> Self {
        Self {
            rows: RwLock::new(rows),
            ..Default::default()
        }
    }

    /// Swap in a new set of rows.
    pub fn replace(&self, rows: ConfigRows) {
        match self.rows.write() {
            Ok(mut guard) => *guard = rows,
            Err(poisoned) => *poisoned.into_inner() = rows,
        }
    }

    /// Number of row fetches served so far.
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::Relaxed)
    }

    /// Number of times [`ConfigStore::close`] was called.
    pub fn close_count(&self) -> usize {
        self.close_calls.load(Ordering::Relaxed)
    }

    fn snapshot<T>(&self, pick: impl FnOnce(&ConfigRows) -> T) -> Result<T, StoreError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StoreError::Closed);
        }
        self.fetches.fetch_add(1, Ordering::Relaxed);
        let rows = match self.rows.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        Ok(pick(&rows))
    }
}

#[async_trait]
impl ConfigStore for MemoryConfigStore {
    async fn schema_definitions(&self) -> Result<Vec<SchemaDefinition>, StoreError> {
        self.snapshot(|rows| rows.schemas.clone())
    }

    async fn data_sources(&self) -> Result<Vec<DataSourceConfig>, StoreError> {
        self.snapshot(|rows| rows.data_sources.clone())
    }

    async fn resolver_bindings(&self) -> Result<Vec<ResolverBinding>, StoreError> {
        self.snapshot(|rows| rows.resolvers.clone())
    }

    async fn subscriptions(&self) -> Result<Vec<SubscriptionConfig>, StoreError> {
        self.snapshot(|rows| rows.subscriptions.clone())
    }

    async fn close(&self) -> Result<(), StoreError> {
        self.close_calls.fetch_add(1, Ordering::Relaxed);
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}
