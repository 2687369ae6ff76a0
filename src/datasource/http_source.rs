//! `http` data source: a JSON-over-HTTP backend.
//!
//! ```toml
//! [[data_sources]]
//! key = "users"
//! kind = "http"
//! params = { base_url = "http://users.internal:8080", health_path = "/healthz", timeout_ms = 2000 }
//!
//! [[resolvers]]
//! field_path = "Query.users"
//! data_source = "users"
//! descriptor = { path = "/v1/users", pointer = "/items" }
//! ```
//!
//! Connecting probes `health_path` and keeps the client; resolving issues a
//! request per field and optionally narrows the JSON body with a pointer.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Method;
use serde_json::Value;
use url::Url;

use crate::datasource::{DataSource, DataSourceFactory, SourceError};
use crate::store::DataSourceConfig;

const DEFAULT_TIMEOUT_MS: u64 = 5_000;

#[derive(Debug, Clone, Copy, Default)]
pub struct HttpSourceFactory;

impl DataSourceFactory for HttpSourceFactory {
    fn create(&self, config: &DataSourceConfig) -> Result<Box<dyn DataSource>, SourceError> {
        let base_url = config
            .params
            .get("base_url")
            .and_then(Value::as_str)
            .ok_or_else(|| SourceError::InvalidParams("'base_url' is required".to_string()))?;
        let base_url = Url::parse(base_url)
            .map_err(|e| SourceError::InvalidParams(format!("bad base_url: {}", e)))?;

        let health_path = config
            .params
            .get("health_path")
            .and_then(Value::as_str)
            .unwrap_or("/")
            .to_string();

        let timeout_ms = config
            .params
            .get("timeout_ms")
            .and_then(Value::as_u64)
            .unwrap_or(DEFAULT_TIMEOUT_MS);

        Ok(Box::new(HttpSource {
            base_url,
            health_path,
            timeout: Duration::from_millis(timeout_ms),
            client: Mutex::new(None),
        }))
    }
}

#[derive(Debug)]
pub struct HttpSource {
    base_url: Url,
    health_path: String,
    timeout: Duration,
    client: Mutex<Option<reqwest::Client>>,
}

impl HttpSource {
    fn url(&self, path: &str) -> Result<Url, SourceError> {
        self.base_url
            .join(path)
            .map_err(|e| SourceError::Descriptor(format!("bad path '{}': {}", path, e)))
    }

    fn current_client(&self) -> Option<reqwest::Client> {
        match self.client.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn set_client(&self, client: Option<reqwest::Client>) -> Option<reqwest::Client> {
        match self.client.lock() {
            Ok(mut guard) => std::mem::replace(&mut *guard, client),
            Err(poisoned) => std::mem::replace(&mut *poisoned.into_inner(), client),
        }
    }
}

#[async_trait]
impl DataSource for HttpSource {
    async fn connect(&self) -> Result<(), SourceError> {
        let client = reqwest::Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|e| SourceError::Upstream(e.to_string()))?;

        let url = self.url(&self.health_path)?;
        let response = client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| SourceError::Upstream(e.to_string()))?;
        if !response.status().is_success() {
            return Err(SourceError::Upstream(format!(
                "health probe {} returned {}",
                url,
                response.status()
            )));
        }

        tracing::debug!(url = %self.base_url, "HTTP data source connected");
        self.set_client(Some(client));
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), SourceError> {
        // Dropping the client closes its idle pooled connections.
        self.set_client(None);
        Ok(())
    }

    async fn resolve(&self, descriptor: &Value) -> Result<Value, SourceError> {
        let client = self.current_client().ok_or(SourceError::NotConnected)?;

        let path = descriptor
            .get("path")
            .and_then(Value::as_str)
            .ok_or_else(|| SourceError::Descriptor("'path' is required".to_string()))?;
        let method = match descriptor.get("method").and_then(Value::as_str) {
            None => Method::GET,
            Some(m) => Method::from_bytes(m.to_ascii_uppercase().as_bytes())
                .map_err(|_| SourceError::Descriptor(format!("bad method '{}'", m)))?,
        };

        let mut request = client.request(method, self.url(path)?);
        if let Some(body) = descriptor.get("body") {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| SourceError::Upstream(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::Upstream(format!("{} returned {}", path, status)));
        }
        let body: Value = response
            .json()
            .await
            .map_err(|e| SourceError::Upstream(format!("invalid JSON from {}: {}", path, e)))?;

        match descriptor.get("pointer").and_then(Value::as_str) {
            Some(pointer) => Ok(body.pointer(pointer).cloned().unwrap_or(Value::Null)),
            None => Ok(body),
        }
    }
}
