//! `static` data source: answers from values held in its parameters.
//!
//! ```toml
//! [[data_sources]]
//! key = "settings"
//! kind = "static"
//! params = { values = { motd = "hello", maintenance = false } }
//! ```
//!
//! Descriptors are either `{ key = "motd" }`, a bare `"motd"`, or a literal
//! `{ value = ... }`.

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::datasource::{DataSource, DataSourceFactory, SourceError};
use crate::store::DataSourceConfig;

#[derive(Debug, Clone, Copy, Default)]
pub struct StaticSourceFactory;

impl DataSourceFactory for StaticSourceFactory {
    fn create(&self, config: &DataSourceConfig) -> Result<Box<dyn DataSource>, SourceError> {
        let values = match config.params.get("values") {
            None => Map::new(),
            Some(Value::Object(map)) => map.clone(),
            Some(_) => {
                return Err(SourceError::InvalidParams(
                    "'values' must be a table".to_string(),
                ))
            }
        };
        Ok(Box::new(StaticSource { values }))
    }
}

#[derive(Debug)]
pub struct StaticSource {
    values: Map<String, Value>,
}

#[async_trait]
impl DataSource for StaticSource {
    async fn connect(&self) -> Result<(), SourceError> {
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), SourceError> {
        Ok(())
    }

    async fn resolve(&self, descriptor: &Value) -> Result<Value, SourceError> {
        let key = match descriptor {
            Value::String(key) => key.as_str(),
            Value::Object(obj) => {
                if let Some(value) = obj.get("value") {
                    return Ok(value.clone());
                }
                obj.get("key").and_then(Value::as_str).ok_or_else(|| {
                    SourceError::Descriptor("expected 'key' or 'value'".to_string())
                })?
            }
            _ => {
                return Err(SourceError::Descriptor(
                    "expected a string or a table".to_string(),
                ))
            }
        };
        Ok(self.values.get(key).cloned().unwrap_or(Value::Null))
    }
}
