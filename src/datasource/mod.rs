//! Data source subsystem.
//!
//! # Data Flow
//! ```text
//! DataSourceConfig rows
//!     → registry.rs (kind → factory → Box<dyn DataSource>)
//!     → lifecycle.rs (sorted sequential connect, reverse disconnect)
//!     → DataSourceInstance (state: Disconnected → Connected | Failed)
//!     → ActiveConfiguration
//! ```
//!
//! # Design Decisions
//! - Drivers only see connect / disconnect / resolve; state lives in the instance
//! - Disconnecting a non-connected instance is a no-op, so retiring twice is harmless

pub mod http_source;
pub mod lifecycle;
pub mod registry;
pub mod static_source;

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::store::DataSourceConfig;

pub use lifecycle::{DataSourceLifecycle, SourceMap};
pub use registry::DataSourceRegistry;

/// Errors raised by drivers and factories.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SourceError {
    #[error("unknown data source kind '{0}'")]
    UnknownKind(String),

    #[error("invalid parameters: {0}")]
    InvalidParams(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("not connected")]
    NotConnected,

    #[error("invalid resolution descriptor: {0}")]
    Descriptor(String),

    #[error("upstream error: {0}")]
    Upstream(String),
}

/// A named data source failed to connect.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("data source '{key}' failed to connect: {reason}")]
pub struct ConnectError {
    pub key: String,
    pub reason: SourceError,
}

/// A data source failed to disconnect. Collected, never raised.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("data source '{key}' failed to disconnect: {reason}")]
pub struct DisconnectError {
    pub key: String,
    pub reason: SourceError,
}

/// Driver for one kind of backing system.
#[async_trait]
pub trait DataSource: Send + Sync {
    async fn connect(&self) -> Result<(), SourceError>;

    async fn disconnect(&self) -> Result<(), SourceError>;

    /// Resolve a field using the binding's descriptor.
    async fn resolve(&self, descriptor: &Value) -> Result<Value, SourceError>;
}

/// Creates drivers for a kind.
pub trait DataSourceFactory: Send + Sync {
    fn create(&self, config: &DataSourceConfig) -> Result<Box<dyn DataSource>, SourceError>;
}

/// Connection state of an instance.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceState {
    Disconnected = 0,
    Connected = 1,
    Failed = 2,
}

impl From<u8> for SourceState {
    fn from(val: u8) -> Self {
        match val {
            1 => SourceState::Connected,
            2 => SourceState::Failed,
            _ => SourceState::Disconnected,
        }
    }
}

/// Runtime handle for one configured data source.
pub struct DataSourceInstance {
    key: String,
    kind: String,
    source: Box<dyn DataSource>,
    state: AtomicU8,
}

impl fmt::Debug for DataSourceInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataSourceInstance")
            .field("key", &self.key)
            .field("kind", &self.kind)
            .field("state", &self.state())
            .finish()
    }
}

impl DataSourceInstance {
    pub fn new(config: &DataSourceConfig, source: Box<dyn DataSource>) -> Self {
        Self {
            key: config.key.clone(),
            kind: config.kind.clone(),
            source,
            state: AtomicU8::new(SourceState::Disconnected as u8),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn state(&self) -> SourceState {
        SourceState::from(self.state.load(Ordering::Acquire))
    }

    pub fn is_connected(&self) -> bool {
        self.state() == SourceState::Connected
    }

    fn set_state(&self, state: SourceState) {
        self.state.store(state as u8, Ordering::Release);
    }

    pub async fn connect(&self) -> Result<(), SourceError> {
        match self.source.connect().await {
            Ok(()) => {
                self.set_state(SourceState::Connected);
                Ok(())
            }
            Err(e) => {
                self.set_state(SourceState::Failed);
                Err(e)
            }
        }
    }

    /// Disconnect if connected. Only the caller that observes `Connected`
    /// reaches the driver.
    pub async fn disconnect(&self) -> Result<(), SourceError> {
        let was_connected = self
            .state
            .compare_exchange(
                SourceState::Connected as u8,
                SourceState::Disconnected as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok();
        if !was_connected {
            return Ok(());
        }
        self.source.disconnect().await.inspect_err(|_| {
            self.set_state(SourceState::Failed);
        })
    }

    /// Give up on a connect that was cancelled part way. The driver may hold
    /// half-opened resources, so it is asked to disconnect regardless of state.
    pub(crate) async fn abandon(&self) -> Result<(), SourceError> {
        self.set_state(SourceState::Failed);
        self.source.disconnect().await
    }

    pub async fn resolve(&self, descriptor: &Value) -> Result<Value, SourceError> {
        if !self.is_connected() {
            return Err(SourceError::NotConnected);
        }
        self.source.resolve(descriptor).await
    }
}
