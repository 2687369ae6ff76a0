//! Gateway settings.
//!
//! # Data Flow
//! ```text
//! gateway.toml (optional)
//!     → loader.rs (read + parse)
//!     → validation.rs (semantic checks)
//!     → GatewayConfig
//!     → main.rs wiring (listener, store path, debounce, logging, admin)
//! ```
//!
//! # Design Decisions
//! - Every field has a default; a missing settings file is valid
//! - Settings are read once at startup; hot reload covers the graph rows,
//!   not the process settings
//! - The store file is watched by [`watcher::FileChangeSource`]

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, load_or_default, LoadError};
pub use schema::{
    AdminConfig, GatewayConfig, LifecycleConfig, ListenerConfig, ObservabilityConfig,
    ReloadConfig, StoreConfig,
};
pub use watcher::FileChangeSource;
