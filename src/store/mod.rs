//! Configuration row storage.
//!
//! # Data Flow
//! ```text
//! rows file / database
//!     → ConfigStore (read-only fetch per row kind)
//!     → SchemaBuilder (selection, fallback, compile)
//! ```
//!
//! Every fetch is a suspension point; the store is re-read on every build so
//! edits made between reloads are picked up.

pub mod file;
pub mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

pub use file::FileConfigStore;
pub use memory::MemoryConfigStore;

/// Raw schema text row.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct SchemaDefinition {
    pub name: String,
    pub sdl: String,
}

/// Data source definition row.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct DataSourceConfig {
    /// Unique key resolvers refer to.
    pub key: String,
    /// Driver kind (e.g. "static", "http").
    pub kind: String,
    /// Driver-specific connection parameters.
    #[serde(default)]
    pub params: Map<String, Value>,
}

/// Maps a schema field onto a data source.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ResolverBinding {
    /// `Type.field`, e.g. `Query.users`.
    pub field_path: String,
    /// Key of the [`DataSourceConfig`] used to resolve the field.
    pub data_source: String,
    /// Driver-specific resolution descriptor.
    #[serde(default)]
    pub descriptor: Value,
}

impl ResolverBinding {
    /// Split the field path into `(type, field)`.
    pub fn split_path(&self) -> Option<(&str, &str)> {
        let (ty, field) = self.field_path.split_once('.')?;
        if ty.is_empty() || field.is_empty() {
            return None;
        }
        Some((ty, field))
    }
}

/// Subscription field definition row.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct SubscriptionConfig {
    /// Field name on the subscription root type.
    pub name: String,
    /// Pub/sub topic the field streams from.
    pub topic: String,
}

/// Every row kind at once; the serialized shape of a rows file.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ConfigRows {
    pub schemas: Vec<SchemaDefinition>,
    pub data_sources: Vec<DataSourceConfig>,
    pub resolvers: Vec<ResolverBinding>,
    pub subscriptions: Vec<SubscriptionConfig>,
}

/// Errors raised while fetching rows.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("store decode error: {0}")]
    Decode(String),

    #[error("store is closed")]
    Closed,
}

/// Read-only access to configuration rows.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    async fn schema_definitions(&self) -> Result<Vec<SchemaDefinition>, StoreError>;

    async fn data_sources(&self) -> Result<Vec<DataSourceConfig>, StoreError>;

    async fn resolver_bindings(&self) -> Result<Vec<ResolverBinding>, StoreError>;

    async fn subscriptions(&self) -> Result<Vec<SubscriptionConfig>, StoreError>;

    /// Release the underlying connection. Later fetches fail with [`StoreError::Closed`].
    async fn close(&self) -> Result<(), StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_path() {
        let binding = ResolverBinding {
            field_path: "Query.users".into(),
            data_source: "db".into(),
            descriptor: Value::Null,
        };
        assert_eq!(binding.split_path(), Some(("Query", "users")));

        let bad = ResolverBinding {
            field_path: "users".into(),
            ..binding.clone()
        };
        assert_eq!(bad.split_path(), None);

        let empty_field = ResolverBinding {
            field_path: "Query.".into(),
            ..binding
        };
        assert_eq!(empty_field.split_path(), None);
    }
}
