//! Process settings schema.
//!
//! These are the gateway's own settings (where to listen, where the configuration
//! rows live, how reloads behave). The graph API itself is described by rows in the
//! [`ConfigStore`](crate::store::ConfigStore), not here.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root settings for the gateway process.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listener configuration (bind address, limits).
    pub listener: ListenerConfig,

    /// Location of the configuration rows.
    pub store: StoreConfig,

    /// Reload behaviour (debounce, connect timeout, watchers).
    pub reload: ReloadConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    #[serde(default)]
    pub admin: AdminConfig,

    #[serde(default)]
    pub lifecycle: LifecycleConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:4000").
    pub bind_address: String,

    /// Request timeout in seconds.
    pub request_timeout_secs: u64,

    /// Maximum request body size in bytes.
    pub max_body_size: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:4000".to_string(),
            request_timeout_secs: 30,
            max_body_size: 1024 * 1024, // 1MB
        }
    }
}

/// Where configuration rows are persisted.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Path to the TOML rows file.
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("graph.toml"),
        }
    }
}

/// Hot reload configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ReloadConfig {
    /// Quiet window for coalescing change signals, in milliseconds.
    pub debounce_ms: u64,

    /// Upper bound for a single data-source connect, in milliseconds.
    pub connect_timeout_ms: u64,

    /// Watch the rows file for changes.
    pub watch_store: bool,

    /// Treat SIGHUP as a change signal.
    pub reload_on_sighup: bool,

    /// How long a replaced generation may finish in-flight requests before
    /// its data sources are disconnected, in milliseconds.
    pub retire_grace_ms: u64,
}

impl ReloadConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn retire_grace(&self) -> Duration {
        Duration::from_millis(self.retire_grace_ms)
    }
}

impl Default for ReloadConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 500,
            connect_timeout_ms: 10_000,
            watch_store: true,
            reload_on_sighup: true,
            retire_grace_ms: 5_000,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log output format ("pretty" or "json").
    pub log_format: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Admin API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Enable admin API.
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    pub api_key: String,

    /// Admin API bind address.
    pub bind_address: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            // WARNING: This is a placeholder! Change this in production.
            api_key: "CHANGE_ME_IN_PRODUCTION".to_string(),
            bind_address: "127.0.0.1:4001".to_string(),
        }
    }
}

/// Process lifecycle configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LifecycleConfig {
    /// How long shutdown waits for an in-flight reload, in seconds.
    pub shutdown_timeout_secs: u64,
}

impl LifecycleConfig {
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            shutdown_timeout_secs: 30,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: GatewayConfig = toml::from_str(
            r#"
            [listener]
            bind_address = "127.0.0.1:5000"

            [reload]
            debounce_ms = 250
        "#,
        )
        .unwrap();

        assert_eq!(config.listener.bind_address, "127.0.0.1:5000");
        assert_eq!(config.listener.request_timeout_secs, 30);
        assert_eq!(config.reload.debounce(), Duration::from_millis(250));
        assert_eq!(config.reload.connect_timeout_ms, 10_000);
        assert_eq!(config.reload.retire_grace(), Duration::from_secs(5));
        assert!(!config.admin.enabled);
    }

    #[test]
    fn test_default_debounce_window() {
        let config = GatewayConfig::default();
        assert_eq!(config.reload.debounce(), Duration::from_millis(500));
        assert_eq!(config.lifecycle.shutdown_timeout(), Duration::from_secs(30));
    }
}
