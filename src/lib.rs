//! Schema-driven graph API gateway with hot reload.
//!
//! # Architecture Overview
//!
//! ```text
//!   rows file / memory                     ┌──────────────────────────────┐
//!   ┌─────────────┐   change signals       │        ReloadController       │
//!   │ ConfigStore │──────┐                 │                              │
//!   └──────┬──────┘      ▼                 │ build → connect → swap →     │
//!          │      ┌──────────────┐ trigger │ retire old generation        │
//!          │      │ChangeDebouncer│───────▶│                              │
//!          │      └──────────────┘         └───────┬──────────────┬───────┘
//!          ▼                                       │              │
//!   ┌──────────────┐   ┌──────────────────┐        │ bind         │ connect /
//!   │SchemaBuilder │──▶│ SchemaCompiler   │◀───────┘              │ disconnect
//!   └──────────────┘   └──────────────────┘                       ▼
//!                                               ┌──────────────────────────┐
//!     Client ──▶ HttpServer ──▶ ServingGateway  │   DataSourceLifecycle    │
//!                  /graphql      (ArcSwap)      │  static / http drivers   │
//!                  /schema /health              └──────────────────────────┘
//! ```

// Configuration
pub mod config;
pub mod store;

// Schema and data
pub mod datasource;
pub mod pubsub;
pub mod schema;

// Serving
pub mod admin;
pub mod health;
pub mod http;
pub mod reload;

// Cross-cutting concerns
pub mod lifecycle;
pub mod observability;

pub use config::GatewayConfig;
pub use http::{HttpServer, ServingGateway};
pub use lifecycle::{RunningGateway, Shutdown};
pub use reload::ReloadController;
