//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, middleware)
//!     → request.rs (request ID, tracing span)
//!     → gateway.rs (load the bound ActiveConfiguration once)
//!     → executor.rs (dispatch root fields to data sources)
//!     → JSON response
//! ```

pub mod executor;
pub mod gateway;
pub mod request;
pub mod server;

pub use executor::{GraphRequest, GraphResponse, QueryExecutor, RootFieldExecutor};
pub use gateway::ServingGateway;
pub use request::X_REQUEST_ID;
pub use server::{AppState, HttpServer};
